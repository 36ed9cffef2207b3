//! Thread-predicate guards.
//!
//! Writes of a tensor whose value is only valid on lane/block 0 of some
//! dimension are restricted to that lane. Reductions and broadcasts take the
//! guard as their own predicate; every other expression is wrapped in an
//! `if`.

use trellis_ir::kir::{Expr, Stmt};

use crate::context::LowerContext;
use crate::error::*;
use crate::thread_predicate::ThreadPredicateMap;

#[tracing::instrument(skip_all)]
pub fn insert_thread_predicates(
    ctx: &mut LowerContext<'_>,
    predicates: &ThreadPredicateMap,
    stmts: Vec<Stmt>,
) -> Result<Vec<Stmt>> {
    let mut guarded = 0usize;
    let stmts = guard(ctx, predicates, stmts, &mut guarded)?;
    tracing::debug!(guarded, "thread predicates inserted");
    Ok(stmts)
}

fn guard(
    ctx: &mut LowerContext<'_>,
    predicates: &ThreadPredicateMap,
    stmts: Vec<Stmt>,
    guarded: &mut usize,
) -> Result<Vec<Stmt>> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        let stmt = match stmt {
            Stmt::Expr(e) => {
                let Some(tv) = ctx.fusion_tensor(ctx.kernel().expr(e).out()) else {
                    out.push(Stmt::Expr(e));
                    continue;
                };
                let Some(pred) = predicates.get_predicate(ctx.kernel_mut(), tv)? else {
                    out.push(Stmt::Expr(e));
                    continue;
                };
                *guarded += 1;
                match ctx.kernel_mut().expr_mut(e) {
                    Expr::Reduction { predicate, .. } | Expr::Broadcast { predicate, .. } => {
                        *predicate = Some(pred);
                        Stmt::Expr(e)
                    }
                    _ => Stmt::IfThenElse { cond: pred, then_body: vec![Stmt::Expr(e)], else_body: Vec::new() },
                }
            }
            Stmt::ForLoop { axis, index, start, stop, body } => {
                Stmt::ForLoop { axis, index, start, stop, body: guard(ctx, predicates, body, guarded)? }
            }
            Stmt::IfThenElse { cond, then_body, else_body } => Stmt::IfThenElse {
                cond,
                then_body: guard(ctx, predicates, then_body, guarded)?,
                else_body: guard(ctx, predicates, else_body, guarded)?,
            },
            alloc @ Stmt::Allocate { .. } => alloc,
        };
        out.push(stmt);
    }
    Ok(out)
}
