//! Fusion builders and statement-tree inspection shared by the tests.

use trellis_ir::kir::{self, Expr, Kernel, Stmt, visit};
use trellis_ir::{DataType, Fusion, MemoryType, ParallelType, ValId};

use crate::compute_at_map::ComputeAtMaps;
use crate::context::LowerContext;

/// `T1 = sum(T0, [1])`, `T2 = broadcast(T1, [false, true])`, `T3 = T2 + T0`.
///
/// Axis 1 of T1, T2 and T3 is bound to `TIDx`; T1 and T2 are computed inside
/// the outer loop of their consumer.
pub struct WarpReduceFusion {
    pub fusion: Fusion,
    pub t0: ValId,
    pub t1: ValId,
    pub t2: ValId,
    pub t3: ValId,
}

/// Builder knobs for [`warp_reduce_fusion`].
#[derive(Debug, Clone, Copy)]
pub struct WarpReduceShape {
    pub outer: i64,
    pub tidx: i64,
    /// Pad the reduction and broadcast `TIDx` axes to this size.
    pub padded: Option<i64>,
    pub broadcast_memory: MemoryType,
}

impl Default for WarpReduceShape {
    fn default() -> Self {
        Self { outer: 4, tidx: 32, padded: Some(32), broadcast_memory: MemoryType::Local }
    }
}

pub fn warp_reduce_fusion(shape: WarpReduceShape) -> WarpReduceFusion {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor(&[shape.outer, shape.tidx], DataType::Float32).unwrap();
    fusion.add_input(t0);
    let t1 = fusion.sum(t0, &[1]).unwrap();
    let t2 = fusion.broadcast(t1, &[false, true]).unwrap();
    let t3 = fusion.add(t2, t0).unwrap();
    fusion.add_output(t3);

    for tv in [t1, t2, t3] {
        fusion.parallelize(tv, 1, ParallelType::TIDx).unwrap();
    }
    if let Some(size) = shape.padded {
        for tv in [t1, t2] {
            fusion.pad_to_warp(tv, 1, Some(size)).unwrap();
        }
    }
    fusion.set_compute_at(t1, 1).unwrap();
    fusion.set_compute_at(t2, 1).unwrap();
    fusion.set_memory_type(t2, shape.broadcast_memory).unwrap();

    WarpReduceFusion { fusion, t0, t1, t2, t3 }
}

/// Lowering context with all three compute-at maps built.
pub fn context_with_maps(fusion: &Fusion) -> (LowerContext<'_>, ComputeAtMaps) {
    let mut ctx = LowerContext::new(fusion, 32);
    let maps = ComputeAtMaps::build(&mut ctx).unwrap();
    (ctx, maps)
}

/// Fusion tensor behind a kernel view or index.
pub fn fusion_tensor_of(kernel: &Kernel, v: kir::ValId) -> Option<ValId> {
    let view = kernel.view_of(v)?;
    match kernel.val(view).kind {
        kir::ValKind::TensorView { fusion_tv, .. } => Some(fusion_tv),
        _ => None,
    }
}

/// Fusion tensors with an `Allocate` anywhere in `stmts`.
pub fn allocated_tensors(kernel: &Kernel, stmts: &[Stmt]) -> Vec<ValId> {
    let mut out = Vec::new();
    visit(stmts, &mut |s| {
        if let Stmt::Allocate { buffer, .. } = s
            && let Some(tv) = fusion_tensor_of(kernel, *buffer)
        {
            out.push(tv);
        }
    });
    out
}

/// Every expression statement with the number of enclosing `ForLoop`s.
pub fn expr_depths(stmts: &[Stmt]) -> Vec<(kir::ExprId, usize)> {
    fn walk(stmts: &[Stmt], depth: usize, out: &mut Vec<(kir::ExprId, usize)>) {
        for s in stmts {
            match s {
                Stmt::Expr(e) => out.push((*e, depth)),
                Stmt::ForLoop { body, .. } => walk(body, depth + 1, out),
                Stmt::IfThenElse { then_body, else_body, .. } => {
                    walk(then_body, depth, out);
                    walk(else_body, depth, out);
                }
                Stmt::Allocate { .. } => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(stmts, 0, &mut out);
    out
}

pub fn count_loops(stmts: &[Stmt]) -> usize {
    let mut n = 0;
    visit(stmts, &mut |s| n += usize::from(matches!(s, Stmt::ForLoop { .. })));
    n
}

pub fn has_broadcast(kernel: &Kernel, stmts: &[Stmt]) -> bool {
    kir::stmt::collect_exprs(stmts).into_iter().any(|e| matches!(kernel.expr(e), Expr::Broadcast { .. }))
}
