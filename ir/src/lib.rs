//! Intermediate representations for the Trellis loop-nest lowering engine.
//!
//! This crate defines the two node universes lowering works over and the
//! scalar interpreter shared by every analysis.
//!
//! # Module Organization
//!
//! - [`types`] - Shared enums (parallel/iteration/memory/data types, operators)
//! - [`fusion`] - Fusion IR: tensors, axes, domains, transform history, tensor ops
//! - [`kir`] - Kernel IR: lowered values, axes, expressions and statements
//! - [`eval`] - Compile-time scalar expression evaluator
//! - [`error`] - Error types and result handling

mod id;

pub mod error;
pub mod eval;
pub mod fusion;
pub mod kir;
pub mod types;

#[cfg(test)]
pub mod test;

pub use error::{Error, ErrorKind, Result};
pub use eval::{ExpressionEvaluator, ScalarGraph, ScalarNode, is_const};
pub use fusion::{
    AxisId, Expr, ExprId, Fusion, IterDomain, MAX_TENSOR_RANK, TensorDomain, TensorView, Transform, TransformId, ValId,
    ValKind,
};
pub use kir::{Kernel, Stmt};
pub use types::{
    BinaryOp, ConstValue, DataType, IterType, MemoryType, ParallelType, ParallelTypeBitmap, TernaryOp, UnaryOp,
};
