//! Buffer allocation for intermediate tensors.
//!
//! Each tensor that is neither a fusion input nor an output gets one
//! [`Stmt::Allocate`], placed inside the loops it shares with its consumers
//! (its compute-at position) right before the statement that computes it.
//! The buffer only needs to hold the axes right of the compute-at position;
//! reduction and broadcast axes never take storage, and axes bound to lanes
//! the memory space is private to are dropped as well.

use std::collections::HashMap;

use trellis_ir::kir::{self, Stmt, collect_exprs};
use trellis_ir::{MemoryType, ValId};

use crate::context::LowerContext;
use crate::error::*;

struct PendingAlloc {
    tensor: ValId,
    depth: usize,
    stmt: Stmt,
}

#[tracing::instrument(skip_all)]
pub fn insert_allocations(ctx: &mut LowerContext<'_>, stmts: Vec<Stmt>) -> Result<Vec<Stmt>> {
    let fusion = ctx.fusion();

    let mut pending: HashMap<kir::ValId, PendingAlloc> = HashMap::new();
    for tv in defined_tensors(ctx, &stmts) {
        if fusion.is_input(tv) || fusion.is_output(tv) {
            continue;
        }
        let view = fusion.tensor_view(tv)?;
        let memory_type = view.memory_type();
        let depth = view.compute_at_pos().min(view.leaf().len());

        let mut size = ctx.kernel_mut().int(1);
        for &axis in &view.leaf()[depth..] {
            let id = fusion.axis(axis);
            let private = match memory_type {
                MemoryType::Local => id.is_thread(),
                MemoryType::Shared => id.parallel_type().is_block(),
                MemoryType::Global => false,
            };
            if id.is_reduction() || id.is_broadcast() || private {
                continue;
            }
            let extent = ctx.lower_value(id.extent())?;
            size = ctx.kernel_mut().mul(size, extent);
        }

        let buffer = ctx.lower_value(tv)?;
        let stmt = Stmt::Allocate { buffer, memory_type, size, zero_init: false };
        pending.insert(buffer, PendingAlloc { tensor: tv, depth, stmt });
    }

    let total = pending.len();
    let placed = place(ctx.kernel(), stmts, 0, &mut pending);
    if let Some(left) = pending.values().next() {
        return UnsupportedPatternSnafu {
            tensor: left.tensor,
            reason: format!("compute-at position {} is deeper than the loops computing it", left.depth),
        }
        .fail();
    }
    tracing::debug!(allocations = total, "allocations inserted");
    Ok(placed)
}

/// Fusion tensors written by expressions in `stmts`, in statement order.
fn defined_tensors(ctx: &LowerContext<'_>, stmts: &[Stmt]) -> Vec<ValId> {
    let mut out = Vec::new();
    for e in collect_exprs(stmts) {
        if let Some(tv) = ctx.fusion_tensor(ctx.kernel().expr(e).out())
            && !out.contains(&tv)
        {
            out.push(tv);
        }
    }
    out
}

fn defined_views(kernel: &kir::Kernel, stmt: &Stmt) -> Vec<kir::ValId> {
    let mut out = Vec::new();
    for e in collect_exprs(std::slice::from_ref(stmt)) {
        if let Some(view) = kernel.view_of(kernel.expr(e).out())
            && !out.contains(&view)
        {
            out.push(view);
        }
    }
    out
}

/// Put each pending allocation in front of the first statement at loop depth
/// `depth` that writes its buffer.
fn place(
    kernel: &kir::Kernel,
    stmts: Vec<Stmt>,
    depth: usize,
    pending: &mut HashMap<kir::ValId, PendingAlloc>,
) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        for view in defined_views(kernel, &stmt) {
            if pending.get(&view).is_some_and(|p| p.depth == depth)
                && let Some(alloc) = pending.remove(&view)
            {
                out.push(alloc.stmt);
            }
        }
        let stmt = match stmt {
            Stmt::ForLoop { axis, index, start, stop, body } => {
                Stmt::ForLoop { axis, index, start, stop, body: place(kernel, body, depth + 1, pending) }
            }
            Stmt::IfThenElse { cond, then_body, else_body } => Stmt::IfThenElse {
                cond,
                then_body: place(kernel, then_body, depth, pending),
                else_body: place(kernel, else_body, depth, pending),
            },
            other => other,
        };
        out.push(stmt);
    }
    out
}
