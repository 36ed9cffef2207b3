//! Loop-nest synthesis.
//!
//! Turns a dependency-ordered expression list into nested [`Stmt::ForLoop`]s.
//!
//! # Algorithm
//!
//! 1. Every tensor gets a *loop structure*: the concrete axes of its leaf
//!    domain, ordered by a global "outer before inner" relation collected from
//!    the stored order of every tensor's leaf domain.
//! 2. Expressions are visited last to first. A tensor expression closes the
//!    open loops that diverge from its structure, opens the missing ones and
//!    is prepended to the innermost open loop. A scalar expression closes
//!    everything and is hoisted above all loops together with a one-element
//!    local allocation for its result.
//!
//! Visiting in reverse and prepending lets consecutive expressions with a
//! common loop prefix share the same loop nodes.
//!
//! Tensor operands are indexed per leaf axis: broadcast axes read index 0,
//! reduction axes are not indexed, other axes take the index of the open loop
//! they map to (through the loop map first, then the index map).

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;
use snafu::OptionExt;
use trellis_ir::kir::{self, Stmt};
use trellis_ir::{AxisId, BinaryOp, DataType, ExprId, Fusion, MemoryType, ValId};

use crate::compute_at_map::ComputeAtMap;
use crate::context::LowerContext;
use crate::error::*;

/// A loop that has been opened but not yet closed. Its body is accumulated
/// back to front.
#[derive(Debug)]
struct OpenLoop {
    axis: AxisId,
    kir_axis: kir::AxisId,
    index: kir::ValId,
    start: kir::ValId,
    stop: kir::ValId,
    body_rev: Vec<Stmt>,
}

pub struct LoopNestGenerator<'m> {
    loop_map: &'m ComputeAtMap,
    index_map: &'m ComputeAtMap,
    loop_structures: HashMap<ValId, Vec<AxisId>>,
}

impl<'m> LoopNestGenerator<'m> {
    /// `loop_map` decides which axes share a loop (the parallel map);
    /// `index_map` resolves operand indices that the loop map does not.
    pub fn new(loop_map: &'m ComputeAtMap, index_map: &'m ComputeAtMap) -> Self {
        Self { loop_map, index_map, loop_structures: HashMap::new() }
    }

    /// Concrete loop axes, outermost first, open while `tv` is computed.
    pub fn loop_structure(&self, tv: ValId) -> Result<&[AxisId]> {
        self.loop_structures.get(&tv).map(Vec::as_slice).context(MissingLoopStructureSnafu { tensor: tv })
    }

    #[tracing::instrument(skip_all, fields(exprs = exprs.len()))]
    pub fn generate(&mut self, ctx: &mut LowerContext<'_>, exprs: &[ExprId]) -> Result<Vec<Stmt>> {
        let fusion = ctx.fusion();
        self.compute_loop_structures(fusion, exprs)?;

        let (loop_map, index_map) = (self.loop_map, self.index_map);
        let mut open: Vec<OpenLoop> = Vec::new();
        let mut top_rev: Vec<Stmt> = Vec::new();
        let mut loops_opened = 0usize;

        for &expr in exprs.iter().rev() {
            let out = fusion.expr(expr).out();

            if !fusion.val(out).is_tensor() {
                while !open.is_empty() {
                    close_loop(&mut open, &mut top_rev);
                }
                // Consumers lowered earlier may already have pulled in the definition.
                let lowered = match ctx.kernel_value(out).and_then(|k| ctx.kernel().val(k).definition) {
                    Some(existing) => existing,
                    None => ctx.lower_expr(expr, |_, v, _| {
                        UnsupportedPatternSnafu { tensor: v, reason: "tensor operand of a scalar expression" }
                            .fail()
                    })?,
                };
                let buffer = ctx.kernel().expr(lowered).out();
                let size = ctx.kernel_mut().int(1);
                top_rev.push(Stmt::Expr(lowered));
                top_rev.push(Stmt::Allocate { buffer, memory_type: MemoryType::Local, size, zero_init: false });
                continue;
            }

            let structure = self.loop_structure(out)?.to_vec();
            let shared = open.iter().zip(&structure).take_while(|(l, a)| l.axis == **a).count();
            while open.len() > shared {
                close_loop(&mut open, &mut top_rev);
            }
            for &axis in &structure[shared..] {
                open.push(self.open_loop(ctx, axis)?);
                loops_opened += 1;
            }

            let lowered = ctx.lower_expr(expr, |ctx, tv, _| index_tensor(ctx, loop_map, index_map, &open, tv))?;
            match open.last_mut() {
                Some(innermost) => innermost.body_rev.push(Stmt::Expr(lowered)),
                None => top_rev.push(Stmt::Expr(lowered)),
            }
        }

        while !open.is_empty() {
            close_loop(&mut open, &mut top_rev);
        }
        top_rev.reverse();
        tracing::debug!(loops_opened, top_level = top_rev.len(), "loop nest generated");
        Ok(top_rev)
    }

    fn compute_loop_structures(&mut self, fusion: &Fusion, exprs: &[ExprId]) -> Result<()> {
        let mut tensors: Vec<ValId> = Vec::new();
        for &expr in exprs {
            let e = fusion.expr(expr);
            for v in e.inputs().into_iter().chain(e.outputs()) {
                if fusion.val(v).is_tensor() && !tensors.contains(&v) {
                    tensors.push(v);
                }
            }
        }

        let mut concrete_leaves: HashMap<ValId, Vec<AxisId>> = HashMap::new();
        let mut deps: HashMap<AxisId, HashSet<AxisId>> = HashMap::new();
        for &tv in &tensors {
            let mut concrete: Vec<AxisId> = Vec::new();
            for &axis in fusion.tensor_view(tv)?.leaf() {
                let c = self.loop_map.concrete_id(axis)?;
                if !concrete.contains(&c) {
                    concrete.push(c);
                }
            }
            for (i, &inner) in concrete.iter().enumerate() {
                deps.entry(inner).or_default().extend(concrete[..i].iter().copied());
            }
            concrete_leaves.insert(tv, concrete);
        }

        for expr in exprs {
            let out = fusion.expr(*expr).out();
            let Some(needed) = concrete_leaves.get(&out) else { continue };
            let sorted = sort_loops(needed, &deps).context(UnsupportedPatternSnafu {
                tensor: out,
                reason: "loop axes have no consistent nesting order",
            })?;
            tracing::trace!(tensor = %out, loops = sorted.len(), "loop structure");
            self.loop_structures.insert(out, sorted);
        }
        Ok(())
    }

    fn open_loop(&self, ctx: &mut LowerContext<'_>, axis: AxisId) -> Result<OpenLoop> {
        let fusion = ctx.fusion();
        let id = fusion.axis(axis);
        let kir_axis = ctx.lower_axis(axis)?;
        let parallel_type = self.loop_map.parallel_type(axis)?;
        let index = match ctx.kernel_mut().parallel_index(parallel_type) {
            Some(named) => named,
            None => ctx.kernel_mut().new_scalar(DataType::Int64),
        };

        let extent = ctx.lower_value(id.extent())?;
        let (start, stop) = if id.is_broadcast() {
            (ctx.kernel_mut().int(0), extent)
        } else {
            let start = ctx.lower_value(id.start())?;
            let stop = match ctx.halo_extent(axis)? {
                Some(widened) => widened,
                None if fusion.is_zero(id.stop_offset()) => extent,
                None => {
                    let stop_offset = ctx.lower_value(id.stop_offset())?;
                    ctx.kernel_mut().binary(BinaryOp::Sub, extent, stop_offset)
                }
            };
            (start, stop)
        };
        Ok(OpenLoop { axis, kir_axis, index, start, stop, body_rev: Vec::new() })
    }
}

fn close_loop(open: &mut Vec<OpenLoop>, top_rev: &mut Vec<Stmt>) {
    let Some(OpenLoop { kir_axis, index, start, stop, mut body_rev, .. }) = open.pop() else {
        return;
    };
    body_rev.reverse();
    let stmt = Stmt::ForLoop { axis: kir_axis, index, start, stop, body: body_rev };
    match open.last_mut() {
        Some(parent) => parent.body_rev.push(stmt),
        None => top_rev.push(stmt),
    }
}

/// Order `needed` so that every axis comes after the axes it depends on.
///
/// Kahn's algorithm over the transitive closure of `deps`, always taking the
/// earliest ready axis in `needed` order. `None` on a cycle.
fn sort_loops(needed: &[AxisId], deps: &HashMap<AxisId, HashSet<AxisId>>) -> Option<Vec<AxisId>> {
    let closure: HashMap<AxisId, HashSet<AxisId>> = needed.iter().map(|&a| (a, transitive_deps(a, deps))).collect();
    let mut remaining: Vec<AxisId> = needed.to_vec();
    let mut sorted = Vec::with_capacity(needed.len());
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|a| remaining.iter().all(|b| b == a || !closure[a].contains(b)))?;
        sorted.push(remaining.remove(ready));
    }
    Some(sorted)
}

fn transitive_deps(axis: AxisId, deps: &HashMap<AxisId, HashSet<AxisId>>) -> HashSet<AxisId> {
    let mut seen = HashSet::new();
    let mut stack: Vec<AxisId> = deps.get(&axis).into_iter().flatten().copied().collect();
    while let Some(a) = stack.pop() {
        if seen.insert(a) {
            stack.extend(deps.get(&a).into_iter().flatten().copied());
        }
    }
    seen
}

/// Lowered element of `tv` at the current loop position.
fn index_tensor(
    ctx: &mut LowerContext<'_>,
    loop_map: &ComputeAtMap,
    index_map: &ComputeAtMap,
    open: &[OpenLoop],
    tv: ValId,
) -> Result<kir::ValId> {
    let fusion = ctx.fusion();
    let mut indices: SmallVec<[kir::ValId; 8]> = SmallVec::new();
    for &axis in fusion.tensor_view(tv)?.leaf() {
        let id = fusion.axis(axis);
        if id.is_reduction() {
            continue;
        }
        if id.is_broadcast() {
            indices.push(ctx.kernel_mut().int(0));
            continue;
        }

        let concrete = loop_map.concrete_id(axis)?;
        let mut index = open.iter().find(|l| l.axis == concrete).map(|l| l.index);
        if index.is_none() {
            for l in open {
                if index_map.are_mapped(axis, l.axis)? {
                    index = Some(l.index);
                    break;
                }
            }
        }
        let index = match index {
            Some(index) => index,
            None => {
                let pt = loop_map.parallel_type(axis)?;
                match ctx.kernel_mut().parallel_index(pt) {
                    Some(named) => named,
                    None => {
                        tracing::trace!(tensor = %tv, %axis, "no open loop for axis, indexing at 0");
                        ctx.kernel_mut().int(0)
                    }
                }
            }
        };
        indices.push(index);
    }
    ctx.tensor_index(tv, indices)
}
