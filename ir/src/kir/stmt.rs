//! Lowered statements.

use super::{AxisId, ExprId, ValId};
use crate::types::MemoryType;

/// One node of the lowered statement list.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(ExprId),
    /// Storage for `buffer` with `size` elements.
    Allocate { buffer: ValId, memory_type: MemoryType, size: ValId, zero_init: bool },
    /// `for index in [start, stop)` over the concrete loop axis `axis`.
    ForLoop { axis: AxisId, index: ValId, start: ValId, stop: ValId, body: Vec<Stmt> },
    IfThenElse { cond: ValId, then_body: Vec<Stmt>, else_body: Vec<Stmt> },
}

impl Stmt {
    pub fn for_loop(axis: AxisId, index: ValId, start: ValId, stop: ValId) -> Self {
        Self::ForLoop { axis, index, start, stop, body: Vec::new() }
    }

    pub fn is_empty_scope(&self) -> bool {
        match self {
            Self::ForLoop { body, .. } => body.is_empty(),
            Self::IfThenElse { then_body, else_body, .. } => then_body.is_empty() && else_body.is_empty(),
            _ => false,
        }
    }
}

/// Number of expression statements in `stmts`, recursively.
pub fn count_exprs(stmts: &[Stmt]) -> usize {
    stmts
        .iter()
        .map(|s| match s {
            Stmt::Expr(_) => 1,
            Stmt::Allocate { .. } => 0,
            Stmt::ForLoop { body, .. } => count_exprs(body),
            Stmt::IfThenElse { then_body, else_body, .. } => count_exprs(then_body) + count_exprs(else_body),
        })
        .sum()
}

/// Visit every statement depth-first, parents before children.
pub fn visit<'a>(stmts: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
    for s in stmts {
        f(s);
        match s {
            Stmt::ForLoop { body, .. } => visit(body, f),
            Stmt::IfThenElse { then_body, else_body, .. } => {
                visit(then_body, f);
                visit(else_body, f);
            }
            Stmt::Expr(_) | Stmt::Allocate { .. } => {}
        }
    }
}

/// Expression ids in statement order.
pub fn collect_exprs(stmts: &[Stmt]) -> Vec<ExprId> {
    let mut out = Vec::new();
    visit(stmts, &mut |s| {
        if let Stmt::Expr(e) = s {
            out.push(*e);
        }
    });
    out
}
