//! Fusion expressions.
//!
//! The expression set is closed; passes match on it exhaustively.

use smallvec::{SmallVec, smallvec};

use super::ValId;
use crate::types::{BinaryOp, TernaryOp, UnaryOp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Unary { op: UnaryOp, out: ValId, input: ValId },
    Binary { op: BinaryOp, out: ValId, lhs: ValId, rhs: ValId },
    Ternary { op: TernaryOp, out: ValId, a: ValId, b: ValId, c: ValId },
    /// Combine `input` over its reduction axes into `out`, starting at `init`.
    Reduction { op: BinaryOp, init: ValId, out: ValId, input: ValId },
    /// Re-expand `input` with new broadcast axes where `flags` is set.
    Broadcast { out: ValId, input: ValId, flags: SmallVec<[bool; 8]> },
}

impl Expr {
    /// Value operands. The reduction init is a constant and is not an operand.
    pub fn inputs(&self) -> SmallVec<[ValId; 3]> {
        match *self {
            Self::Unary { input, .. } | Self::Reduction { input, .. } | Self::Broadcast { input, .. } => {
                smallvec![input]
            }
            Self::Binary { lhs, rhs, .. } => smallvec![lhs, rhs],
            Self::Ternary { a, b, c, .. } => smallvec![a, b, c],
        }
    }

    pub fn outputs(&self) -> SmallVec<[ValId; 1]> {
        match *self {
            Self::Unary { out, .. }
            | Self::Binary { out, .. }
            | Self::Ternary { out, .. }
            | Self::Reduction { out, .. }
            | Self::Broadcast { out, .. } => smallvec![out],
        }
    }

    pub fn out(&self) -> ValId {
        self.outputs()[0]
    }

    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unary { .. } => "unary",
            Self::Binary { .. } => "binary",
            Self::Ternary { .. } => "ternary",
            Self::Reduction { .. } => "reduction",
            Self::Broadcast { .. } => "broadcast",
        }
    }
}
