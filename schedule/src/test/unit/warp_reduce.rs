use test_case::test_case;
use trellis_ir::kir::{self, Expr, Kernel, Stmt, collect_exprs, count_exprs, visit};
use trellis_ir::{DataType, Fusion, MemoryType, ParallelType, ValId};

use crate::allocation::insert_allocations;
use crate::compute_at_map::ComputeAtMaps;
use crate::config::LowerConfig;
use crate::context::LowerContext;
use crate::loop_nest::LoopNestGenerator;
use crate::partial_split::PartialSplitMap;
use crate::pipeline::{LoweredKernel, lower_fusion};
use crate::predicate::insert_thread_predicates;
use crate::test::helpers::{
    WarpReduceFusion, WarpReduceShape, allocated_tensors, count_loops, fusion_tensor_of, has_broadcast,
    warp_reduce_fusion,
};
use crate::thread_predicate::ThreadPredicateMap;
use crate::warp_reduce::{drop_lane_guard, fuse_warp_reduce};

fn lower(w: &WarpReduceFusion, fuse: bool) -> LoweredKernel {
    let config = LowerConfig::builder().fuse_warp_reduce(fuse).build();
    lower_fusion(&w.fusion, &config).unwrap()
}

/// Fusion tensors read by the expression writing `tv`.
fn operands_of(lowered: &LoweredKernel, tv: ValId) -> Vec<ValId> {
    let kernel = &lowered.kernel;
    collect_exprs(&lowered.stmts)
        .into_iter()
        .find(|&e| fusion_tensor_of(kernel, kernel.expr(e).out()) == Some(tv))
        .map(|e| kernel.expr(e).inputs().into_iter().filter_map(|v| fusion_tensor_of(kernel, v)).collect())
        .unwrap_or_default()
}

#[test]
fn test_fuses_single_warp_reduce_broadcast() {
    let w = warp_reduce_fusion(WarpReduceShape::default());
    let unfused = lower(&w, false);
    let fused = lower(&w, true);

    assert_eq!(count_exprs(&unfused.stmts), 3);
    assert_eq!(count_exprs(&fused.stmts), 2);
    assert!(has_broadcast(&unfused.kernel, &unfused.stmts));
    assert!(!has_broadcast(&fused.kernel, &fused.stmts));

    // The broadcast buffer and its now-empty loop are gone.
    assert_eq!(allocated_tensors(&fused.kernel, &fused.stmts), vec![w.t1]);
    assert_eq!(count_loops(&unfused.stmts), 4);
    assert_eq!(count_loops(&fused.stmts), 3);

    assert_eq!(operands_of(&unfused, w.t3), vec![w.t2, w.t0]);
    assert_eq!(operands_of(&fused, w.t3), vec![w.t1, w.t0]);

    let allreduce = collect_exprs(&fused.stmts)
        .into_iter()
        .filter(|&e| matches!(fused.kernel.expr(e), Expr::Reduction { warp_allreduce: true, .. }))
        .count();
    assert_eq!(allreduce, 1);
    assert!(fused.render().contains("warp"), "{}", fused.render());

    // Unfused, only lane 0 holds the reduction result; fused, every lane reads it.
    assert!(collect_exprs(&unfused.stmts)
        .into_iter()
        .any(|e| matches!(unfused.kernel.expr(e), Expr::Reduction { predicate: Some(_), .. })));
    for e in collect_exprs(&fused.stmts) {
        if let Expr::Reduction { warp_allreduce: true, predicate, .. } = fused.kernel.expr(e) {
            assert_eq!(*predicate, None, "{}", fused.render());
        }
    }
}

#[test]
fn test_drop_lane_guard_keeps_other_dimensions() {
    let mut kernel = Kernel::new();
    let zero = kernel.int(0);
    let tidx = kernel.parallel_index(ParallelType::TIDx).unwrap();
    let bidx = kernel.parallel_index(ParallelType::BIDx).unwrap();
    let on_block = kernel.eq(bidx, zero);
    let on_lane = kernel.eq(tidx, zero);
    let both = kernel.and(Some(on_block), on_lane);

    assert_eq!(drop_lane_guard(&mut kernel, both, ParallelType::TIDx), Some(on_block));
    assert_eq!(drop_lane_guard(&mut kernel, on_lane, ParallelType::TIDx), None);
    assert_eq!(drop_lane_guard(&mut kernel, on_block, ParallelType::TIDx), Some(on_block));
}

#[test_case(WarpReduceShape { tidx: 64, padded: None, ..Default::default() }; "unpadded wider than a warp")]
#[test_case(WarpReduceShape { tidx: 64, padded: Some(64), ..Default::default() }; "padded to two warps")]
#[test_case(WarpReduceShape { tidx: 64, padded: Some(32), ..Default::default() }; "consumer wider than a warp")]
#[test_case(WarpReduceShape { broadcast_memory: MemoryType::Shared, ..Default::default() }; "broadcast in shared memory")]
fn test_rejects_unproven_candidates(shape: WarpReduceShape) {
    let w = warp_reduce_fusion(shape);
    let lowered = lower(&w, true);
    assert_eq!(count_exprs(&lowered.stmts), 3);
    assert!(has_broadcast(&lowered.kernel, &lowered.stmts));
    assert_eq!(operands_of(&lowered, w.t3), vec![w.t2, w.t0]);
    assert!(collect_exprs(&lowered.stmts).into_iter().all(|e| !matches!(
        lowered.kernel.expr(e),
        Expr::Reduction { warp_allreduce: true, .. }
    )));
}

#[test]
fn test_warp_padded_info() {
    let padded = lower(&warp_reduce_fusion(WarpReduceShape::default()), true);
    assert!(padded.warp_padded.is_tidx_padded);
    assert!(padded.warp_padded.is_tidx_single_warp);

    let wide = lower(&warp_reduce_fusion(WarpReduceShape { tidx: 64, padded: Some(64), ..Default::default() }), true);
    assert!(wide.warp_padded.is_tidx_padded);
    assert!(!wide.warp_padded.is_tidx_single_warp);

    let unpadded = lower(&warp_reduce_fusion(WarpReduceShape { padded: None, ..Default::default() }), true);
    assert!(!unpadded.warp_padded.is_tidx_padded);
    assert!(!unpadded.warp_padded.is_tidx_single_warp);
}

// ============================================================================
// Hand-edited statement lists
// ============================================================================

/// Run every stage before warp-reduce fusion, keeping the context.
fn lower_until_fusion(fusion: &Fusion) -> (LowerContext<'_>, Vec<Stmt>) {
    let mut ctx = LowerContext::new(fusion, 32);
    let maps = ComputeAtMaps::build(&mut ctx).unwrap();
    PartialSplitMap::build(&mut ctx).unwrap();
    let tpm = ThreadPredicateMap::build(fusion, &maps.loop_map).unwrap();
    let stmts = LoopNestGenerator::new(&maps.parallel, &maps.index).generate(&mut ctx, &fusion.exprs()).unwrap();
    let stmts = insert_allocations(&mut ctx, stmts).unwrap();
    let stmts = insert_thread_predicates(&mut ctx, &tpm, stmts).unwrap();
    (ctx, stmts)
}

/// Body of the outer loop: `[alloc T1, for T1, alloc T2, for T2, for T3]`.
fn outer_body(stmts: &mut [Stmt]) -> (kir::AxisId, &mut Vec<Stmt>) {
    let [Stmt::ForLoop { axis, body, .. }] = stmts else {
        panic!("expected one outer loop");
    };
    assert!(matches!(body.as_slice(), [Stmt::Allocate { .. }, Stmt::ForLoop { .. }, Stmt::Allocate { .. }, _, _]));
    (*axis, body)
}

fn serial_loop(kernel: &mut Kernel, axis: kir::AxisId, body: Vec<Stmt>) -> Stmt {
    let index = kernel.new_scalar(DataType::Int64);
    let start = kernel.int(0);
    let stop = kernel.int(1);
    Stmt::ForLoop { axis, index, start, stop, body }
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    Unchanged,
    /// The reduction buffer is allocated inside a loop of its own.
    ReductionAllocInSiblingLoop,
    /// Allocation and reduction sit in a serial loop closed before the broadcast.
    ReductionInClosedLoop,
    ReductionAllocSize(i64),
    ReductionAllocSymbolic,
    BroadcastAllocSize(i64),
}

fn relayout(kernel: &mut Kernel, mut stmts: Vec<Stmt>, layout: Layout) -> Vec<Stmt> {
    let (outer, body) = outer_body(&mut stmts);
    let resize = |stmt: &mut Stmt, to: kir::ValId| {
        if let Stmt::Allocate { size, .. } = stmt {
            *size = to;
        }
    };
    match layout {
        Layout::Unchanged => {}
        Layout::ReductionAllocInSiblingLoop => {
            let alloc = body.remove(0);
            body.insert(0, serial_loop(kernel, outer, vec![alloc]));
        }
        Layout::ReductionInClosedLoop => {
            let inner: Vec<Stmt> = body.drain(..2).collect();
            body.insert(0, serial_loop(kernel, outer, inner));
        }
        Layout::ReductionAllocSize(n) => resize(&mut body[0], kernel.int(n)),
        Layout::ReductionAllocSymbolic => resize(&mut body[0], kernel.new_scalar(DataType::Int64)),
        Layout::BroadcastAllocSize(n) => resize(&mut body[2], kernel.int(n)),
    }
    stmts
}

fn count_ifs(stmts: &[Stmt]) -> usize {
    let mut n = 0;
    visit(stmts, &mut |s| n += usize::from(matches!(s, Stmt::IfThenElse { .. })));
    n
}

#[test]
fn test_unedited_statements_fuse() {
    let w = warp_reduce_fusion(WarpReduceShape::default());
    let (mut ctx, stmts) = lower_until_fusion(&w.fusion);
    let stmts = relayout(ctx.kernel_mut(), stmts, Layout::Unchanged);
    let fused = fuse_warp_reduce(&mut ctx, 32, stmts).unwrap();
    assert_eq!(count_exprs(&fused), 2);
    assert!(!has_broadcast(ctx.kernel(), &fused));
}

#[test_case(Layout::ReductionAllocInSiblingLoop; "reduction buffer allocated in a sibling loop")]
#[test_case(Layout::ReductionInClosedLoop; "reduction buffer in a closed serial loop")]
#[test_case(Layout::ReductionAllocSize(4); "reduction buffer holds four elements")]
#[test_case(Layout::ReductionAllocSymbolic; "reduction buffer size unknown")]
#[test_case(Layout::BroadcastAllocSize(2); "broadcast buffer holds two elements")]
fn test_rejects_unsafe_layouts(layout: Layout) {
    let w = warp_reduce_fusion(WarpReduceShape::default());
    let (mut ctx, stmts) = lower_until_fusion(&w.fusion);
    let stmts = relayout(ctx.kernel_mut(), stmts, layout);
    let before = count_exprs(&stmts);

    let fused = fuse_warp_reduce(&mut ctx, 32, stmts).unwrap();
    let kernel = ctx.kernel();
    assert_eq!(count_exprs(&fused), before);
    assert!(has_broadcast(kernel, &fused));
    assert!(
        collect_exprs(&fused)
            .into_iter()
            .all(|e| !matches!(kernel.expr(e), Expr::Reduction { warp_allreduce: true, .. }))
    );
}

#[test]
fn test_drops_if_emptied_by_elimination() {
    let w = warp_reduce_fusion(WarpReduceShape::default());
    let (mut ctx, mut stmts) = lower_until_fusion(&w.fusion);
    let cond = ctx.kernel_mut().bool_const(true);
    {
        let (_, body) = outer_body(&mut stmts);
        let Stmt::ForLoop { body: broadcast_body, .. } = &mut body[3] else {
            panic!("expected the broadcast loop");
        };
        let then_body = std::mem::take(broadcast_body);
        *broadcast_body = vec![Stmt::IfThenElse { cond, then_body, else_body: Vec::new() }];
    }
    assert_eq!(count_ifs(&stmts), 1);

    let fused = fuse_warp_reduce(&mut ctx, 32, stmts).unwrap();
    assert_eq!(count_ifs(&fused), 0);
    assert_eq!(count_exprs(&fused), 2);
    assert_eq!(count_loops(&fused), 3);
}
