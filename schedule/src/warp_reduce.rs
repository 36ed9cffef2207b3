//! Warp-reduce fusion.
//!
//! A reduction over a thread dimension that spans exactly one warp can be
//! lowered as a warp all-reduce, after which every lane already holds the
//! result. A broadcast of that result along the same dimension is then
//! redundant: its readers can read the reduction output directly.
//!
//! The pass runs in three phases over the lowered statement list:
//!
//! 1. **Detect**: pair each broadcast with the reduction producing its input
//!    and prove the fusion safe (same single-warp thread dimension, both
//!    buffers local with one element, reduction buffer visible from the
//!    broadcast).
//! 2. **Replace**: redirect every read of a fused broadcast's output to the
//!    reduction output and mark the reduction `warp_allreduce`. Every lane
//!    now reads the result, so the reduction's lane-0 guard on the fused
//!    dimension is dropped; guards on other dimensions stay.
//! 3. **Eliminate**: drop the fused broadcasts and their allocations, then
//!    any loop or `if` left empty.
//!
//! Any unproven precondition just skips the candidate.

use std::collections::{HashMap, HashSet};

use trellis_ir::kir::{self, Expr, Kernel, Stmt, collect_exprs, count_exprs};
use trellis_ir::{BinaryOp, ExpressionEvaluator, MemoryType, ParallelType};

use crate::context::{LowerContext, WarpPaddedInfo};
use crate::error::*;

/// Scopes form a tree; a buffer allocated in scope `a` is visible in `s`
/// when `a` is `s` or one of its ancestors.
#[derive(Debug, Default)]
struct ScopeTree {
    parents: Vec<Option<usize>>,
}

impl ScopeTree {
    fn root(&mut self) -> usize {
        self.push(None)
    }

    fn push(&mut self, parent: Option<usize>) -> usize {
        self.parents.push(parent);
        self.parents.len() - 1
    }

    fn is_visible_from(&self, alloc_scope: usize, mut scope: usize) -> bool {
        loop {
            if scope == alloc_scope {
                return true;
            }
            match self.parents[scope] {
                Some(parent) => scope = parent,
                None => return false,
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AllocInfo {
    scope: usize,
    memory_type: MemoryType,
    size: kir::ValId,
}

#[derive(Debug, Clone, Copy)]
struct ReductionInfo {
    expr: kir::ExprId,
    out: kir::ValId,
}

struct Detector<'k> {
    kernel: &'k Kernel,
    evaluator: ExpressionEvaluator<'k, Kernel>,
    warp_size: i64,
    warp_padded: WarpPaddedInfo,
    scopes: ScopeTree,
    allocs: HashMap<kir::ValId, AllocInfo>,
    reductions: HashMap<kir::ValId, ReductionInfo>,
    /// Broadcast output view -> reduction output that replaces it.
    replacements: HashMap<kir::ValId, kir::ValId>,
    /// Fused reductions with the thread dimension they all-reduce over.
    fused: Vec<(kir::ExprId, ParallelType)>,
}

impl<'k> Detector<'k> {
    fn walk(&mut self, stmts: &[Stmt], scope: usize) -> Result<()> {
        for stmt in stmts {
            match stmt {
                Stmt::Allocate { buffer, memory_type, size, .. } => {
                    self.allocs.insert(*buffer, AllocInfo { scope, memory_type: *memory_type, size: *size });
                }
                Stmt::ForLoop { axis, body, .. } => {
                    let inner =
                        if self.kernel.axis(*axis).is_thread() { scope } else { self.scopes.push(Some(scope)) };
                    self.walk(body, inner)?;
                }
                Stmt::IfThenElse { then_body, else_body, .. } => {
                    let then_scope = self.scopes.push(Some(scope));
                    self.walk(then_body, then_scope)?;
                    let else_scope = self.scopes.push(Some(scope));
                    self.walk(else_body, else_scope)?;
                }
                Stmt::Expr(e) => match *self.kernel.expr(*e) {
                    Expr::Reduction { out, .. } => {
                        if let Some(view) = self.kernel.view_of(out) {
                            self.reductions.insert(view, ReductionInfo { expr: *e, out });
                        }
                    }
                    Expr::Broadcast { out, input, .. } => self.check(*e, out, input, scope)?,
                    _ => {}
                },
            }
        }
        Ok(())
    }

    fn check(&mut self, expr: kir::ExprId, out: kir::ValId, input: kir::ValId, scope: usize) -> Result<()> {
        let kernel = self.kernel;
        let (Some(red_view), Some(bcast_view)) = (kernel.view_of(input), kernel.view_of(out)) else {
            return Ok(());
        };
        let Some(&reduction) = self.reductions.get(&red_view) else {
            tracing::trace!(broadcast = %expr, "input is not a reduction output");
            return Ok(());
        };

        let red_axis = thread_axis(kernel, red_view, kir::IterDomain::is_reduction);
        let bcast_axis = thread_axis(kernel, bcast_view, kir::IterDomain::is_broadcast);
        let (Some(red_axis), Some(bcast_axis)) = (red_axis, bcast_axis) else {
            tracing::trace!(broadcast = %expr, "no thread-parallel reduction/broadcast axis pair");
            return Ok(());
        };
        let (red_pt, bcast_pt) = (kernel.axis(red_axis).parallel_type, kernel.axis(bcast_axis).parallel_type);
        if red_pt != bcast_pt {
            tracing::trace!(broadcast = %expr, %red_pt, %bcast_pt, "different thread dimensions");
            return Ok(());
        }
        if !self.is_single_warp(red_axis)? || !self.is_single_warp(bcast_axis)? {
            tracing::trace!(broadcast = %expr, "not provably confined to one warp");
            return Ok(());
        }

        let (Some(red_alloc), Some(bcast_alloc)) =
            (self.allocs.get(&red_view).copied(), self.allocs.get(&bcast_view).copied())
        else {
            tracing::trace!(broadcast = %expr, "buffer not allocated in this kernel");
            return Ok(());
        };
        for alloc in [red_alloc, bcast_alloc] {
            if alloc.memory_type != MemoryType::Local || self.evaluator.evaluate(alloc.size)? != Some(1) {
                tracing::trace!(broadcast = %expr, "buffer is not a single local element");
                return Ok(());
            }
        }

        if !self.scopes.is_visible_from(red_alloc.scope, scope) {
            tracing::trace!(broadcast = %expr, "reduction buffer not visible from the broadcast");
            return Ok(());
        }

        tracing::trace!(broadcast = %expr, reduction = %reduction.expr, "fusing warp reduce");
        self.replacements.insert(bcast_view, reduction.out);
        self.fused.push((reduction.expr, red_pt));
        Ok(())
    }

    /// Padded axes rely on the kernel-wide padding proof; unpadded ones need
    /// an extent that folds to exactly one warp.
    fn is_single_warp(&mut self, axis: kir::AxisId) -> Result<bool> {
        let kernel = self.kernel;
        let id = kernel.axis(axis);
        if id.parallel_type != ParallelType::TIDx {
            return Ok(false);
        }
        if id.padded_to_warp {
            return Ok(self.warp_padded.is_tidx_single_warp && id.padded_size.is_none_or(|s| s == self.warp_size));
        }
        Ok(self.evaluator.evaluate(id.extent)? == Some(self.warp_size))
    }
}

/// First leaf axis of `view` bound to a thread dimension and satisfying `pred`.
fn thread_axis(kernel: &Kernel, view: kir::ValId, pred: fn(&kir::IterDomain) -> bool) -> Option<kir::AxisId> {
    let kir::ValKind::TensorView { domain, .. } = &kernel.val(view).kind else {
        return None;
    };
    domain.iter().copied().find(|&a| {
        let id = kernel.axis(a);
        id.parallel_type.is_thread() && pred(id)
    })
}

#[tracing::instrument(skip_all)]
pub fn fuse_warp_reduce(ctx: &mut LowerContext<'_>, warp_size: i64, stmts: Vec<Stmt>) -> Result<Vec<Stmt>> {
    let before = count_exprs(&stmts);

    // Phase 1: detect
    let (replacements, fused) = {
        let kernel = ctx.kernel();
        let mut detector = Detector {
            kernel,
            evaluator: ExpressionEvaluator::new(kernel),
            warp_size,
            warp_padded: ctx.warp_padded_info(),
            scopes: ScopeTree::default(),
            allocs: HashMap::new(),
            reductions: HashMap::new(),
            replacements: HashMap::new(),
            fused: Vec::new(),
        };
        let root = detector.scopes.root();
        detector.walk(&stmts, root)?;
        (detector.replacements, detector.fused)
    };
    if replacements.is_empty() {
        tracing::debug!(fused = 0, "warp reduce fusion");
        return Ok(stmts);
    }

    // Phase 2: replace
    let kernel = ctx.kernel_mut();
    let mut replaced = 0usize;
    for e in collect_exprs(&stmts) {
        for input in kernel.expr(e).inputs() {
            if let Some(view) = kernel.view_of(input)
                && let Some(&to) = replacements.get(&view)
                && kernel.replace_input(e, input, to)
            {
                replaced += 1;
            }
        }
    }
    for &(e, pt) in &fused {
        let guard = match kernel.expr(e) {
            Expr::Reduction { predicate, .. } => *predicate,
            _ => continue,
        };
        let guard = guard.and_then(|pred| drop_lane_guard(kernel, pred, pt));
        if let Expr::Reduction { warp_allreduce, predicate, .. } = kernel.expr_mut(e) {
            *warp_allreduce = true;
            *predicate = guard;
        }
    }

    // Phase 3: eliminate
    let mut still_read: HashSet<kir::ValId> = HashSet::new();
    for e in collect_exprs(&stmts) {
        still_read.extend(kernel.expr(e).inputs().into_iter().filter_map(|v| kernel.view_of(v)));
    }
    let dead: HashSet<kir::ValId> = replacements.keys().copied().filter(|v| !still_read.contains(v)).collect();
    let stmts = eliminate(kernel, stmts, &dead);

    tracing::debug!(fused = fused.len(), replaced, removed = before - count_exprs(&stmts), "warp reduce fusion");
    Ok(stmts)
}

/// `pred` without its `index(pt) == 0` conjuncts; `None` when nothing is left.
pub(crate) fn drop_lane_guard(kernel: &mut Kernel, pred: kir::ValId, pt: ParallelType) -> Option<kir::ValId> {
    fn conjuncts(kernel: &Kernel, v: kir::ValId, out: &mut Vec<kir::ValId>) {
        match kernel.val(v).definition.map(|d| kernel.expr(d)) {
            Some(&Expr::Binary { op: BinaryOp::And, lhs, rhs, .. }) => {
                conjuncts(kernel, lhs, out);
                conjuncts(kernel, rhs, out);
            }
            _ => out.push(v),
        }
    }

    let index = kernel.parallel_index(pt);
    let mut terms = Vec::new();
    conjuncts(kernel, pred, &mut terms);
    if !terms.iter().any(|&t| is_lane_guard(kernel, t, index)) {
        return Some(pred);
    }
    let mut kept = None;
    for term in terms {
        if !is_lane_guard(kernel, term, index) {
            kept = Some(kernel.and(kept, term));
        }
    }
    kept
}

fn is_lane_guard(kernel: &Kernel, term: kir::ValId, index: Option<kir::ValId>) -> bool {
    matches!(
        kernel.val(term).definition.map(|d| kernel.expr(d)),
        Some(&Expr::Binary { op: BinaryOp::Eq, lhs, rhs, .. })
            if Some(lhs) == index && kernel.const_int(rhs) == Some(0)
    )
}

/// Drop dead broadcasts and allocations, then scopes they leave empty.
fn eliminate(kernel: &Kernel, stmts: Vec<Stmt>, dead: &HashSet<kir::ValId>) -> Vec<Stmt> {
    stmts
        .into_iter()
        .filter_map(|stmt| match stmt {
            Stmt::Expr(e) => match *kernel.expr(e) {
                Expr::Broadcast { out, .. } if kernel.view_of(out).is_some_and(|v| dead.contains(&v)) => None,
                _ => Some(Stmt::Expr(e)),
            },
            Stmt::Allocate { buffer, .. } if dead.contains(&buffer) => None,
            Stmt::ForLoop { axis, index, start, stop, body } => {
                let body = eliminate(kernel, body, dead);
                (!body.is_empty()).then_some(Stmt::ForLoop { axis, index, start, stop, body })
            }
            Stmt::IfThenElse { cond, then_body, else_body } => {
                let then_body = eliminate(kernel, then_body, dead);
                let else_body = eliminate(kernel, else_body, dead);
                let stmt = Stmt::IfThenElse { cond, then_body, else_body };
                (!stmt.is_empty_scope()).then_some(stmt)
            }
            other => Some(other),
        })
        .collect()
}
