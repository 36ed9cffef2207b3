//! Compile-time scalar evaluation.
//!
//! [`ExpressionEvaluator`] interprets integer scalar expressions over either
//! node universe ([`Fusion`] or [`Kernel`]) through the [`ScalarGraph`] view.
//! Free scalars and parallel-dimension extents can be bound to concrete
//! values. A value that cannot be resolved evaluates to `Ok(None)`; only
//! division by a known zero and operators outside the folded set are errors.
//!
//! # Example
//!
//! ```
//! use trellis_ir::{DataType, ExpressionEvaluator, Fusion};
//!
//! let mut fusion = Fusion::new();
//! let n = fusion.new_scalar(DataType::Int64);
//! let four = fusion.int(4);
//! let sum = fusion.add_scalars(n, four).unwrap();
//!
//! let mut ee = ExpressionEvaluator::new(&fusion);
//! assert_eq!(ee.evaluate(sum).unwrap(), None);
//! ee.bind(n, 5).unwrap();
//! assert_eq!(ee.evaluate(sum).unwrap(), Some(9));
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use snafu::ensure;

use crate::error::*;
use crate::fusion::{self, Fusion, ValKind};
use crate::kir::{self, Kernel};
use crate::types::{BinaryOp, ConstValue, ParallelType, TernaryOp, UnaryOp};

/// What the evaluator needs to know about one scalar node.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarNode<'a, Id> {
    Const(ConstValue),
    /// Free scalar with no definition: bindable.
    Free,
    Named(&'a str),
    Unary { op: UnaryOp, input: Id },
    Binary { op: BinaryOp, lhs: Id, rhs: Id },
    Ternary { op: TernaryOp },
    /// Tensor or tensor element.
    NotScalar,
}

/// Scalar view over a node universe.
pub trait ScalarGraph {
    type Id: Copy + Eq + Hash + Display;

    fn scalar_node(&self, id: Self::Id) -> ScalarNode<'_, Self::Id>;

    fn describe_scalar(&self, id: Self::Id) -> String;
}

impl ScalarGraph for Fusion {
    type Id = fusion::ValId;

    fn scalar_node(&self, id: Self::Id) -> ScalarNode<'_, Self::Id> {
        let val = self.val(id);
        match &val.kind {
            ValKind::Tensor(_) => ScalarNode::NotScalar,
            ValKind::NamedScalar { name } => ScalarNode::Named(name),
            ValKind::Scalar { value: Some(c) } => ScalarNode::Const(*c),
            ValKind::Scalar { value: None } => match val.definition.map(|d| self.expr(d)) {
                None => ScalarNode::Free,
                Some(fusion::Expr::Unary { op, input, .. }) => ScalarNode::Unary { op: *op, input: *input },
                Some(fusion::Expr::Binary { op, lhs, rhs, .. }) => {
                    ScalarNode::Binary { op: *op, lhs: *lhs, rhs: *rhs }
                }
                Some(fusion::Expr::Ternary { op, .. }) => ScalarNode::Ternary { op: *op },
                Some(fusion::Expr::Reduction { .. } | fusion::Expr::Broadcast { .. }) => ScalarNode::NotScalar,
            },
        }
    }

    fn describe_scalar(&self, id: Self::Id) -> String {
        self.describe(id)
    }
}

impl ScalarGraph for Kernel {
    type Id = kir::ValId;

    fn scalar_node(&self, id: Self::Id) -> ScalarNode<'_, Self::Id> {
        let val = self.val(id);
        match &val.kind {
            kir::ValKind::TensorView { .. } | kir::ValKind::TensorIndex { .. } => ScalarNode::NotScalar,
            kir::ValKind::NamedScalar { name } => ScalarNode::Named(name),
            kir::ValKind::Scalar { value: Some(c) } => ScalarNode::Const(*c),
            kir::ValKind::Scalar { value: None } => match val.definition.map(|d| self.expr(d)) {
                None => ScalarNode::Free,
                Some(kir::Expr::Unary { op, input, .. }) => ScalarNode::Unary { op: *op, input: *input },
                Some(kir::Expr::Binary { op, lhs, rhs, .. }) => ScalarNode::Binary { op: *op, lhs: *lhs, rhs: *rhs },
                Some(kir::Expr::Ternary { op, .. }) => ScalarNode::Ternary { op: *op },
                Some(kir::Expr::Reduction { .. } | kir::Expr::Broadcast { .. }) => ScalarNode::NotScalar,
            },
        }
    }

    fn describe_scalar(&self, id: Self::Id) -> String {
        self.describe(id)
    }
}

/// Memoizing interpreter for integer scalar expressions.
pub struct ExpressionEvaluator<'g, G: ScalarGraph> {
    graph: &'g G,
    bindings: HashMap<G::Id, i64>,
    parallel_extents: HashMap<ParallelType, i64>,
    memo: HashMap<G::Id, Option<i64>>,
}

impl<'g, G: ScalarGraph> ExpressionEvaluator<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self { graph, bindings: HashMap::new(), parallel_extents: HashMap::new(), memo: HashMap::new() }
    }

    /// Bind a free scalar (or a named scalar) to a concrete value.
    ///
    /// Constants and values with a defining expression cannot be bound, and a
    /// value can only be bound once.
    pub fn bind(&mut self, value: G::Id, concrete: i64) -> Result<()> {
        match self.graph.scalar_node(value) {
            ScalarNode::Const(_) => return BindConstantSnafu { value: self.graph.describe_scalar(value) }.fail(),
            ScalarNode::Unary { .. } | ScalarNode::Binary { .. } | ScalarNode::Ternary { .. } => {
                return BindDerivedSnafu { value: self.graph.describe_scalar(value) }.fail();
            }
            ScalarNode::NotScalar => return NotAScalarSnafu { value: self.graph.describe_scalar(value) }.fail(),
            ScalarNode::Free | ScalarNode::Named(_) => {}
        }
        if let Some(&existing) = self.bindings.get(&value) {
            return DoubleBindSnafu { value: self.graph.describe_scalar(value), existing, requested: concrete }.fail();
        }
        self.bindings.insert(value, concrete);
        self.memo.clear();
        Ok(())
    }

    /// Record the launch extent of a parallel dimension. Re-binding the same
    /// value is a no-op; a different value is an error.
    pub fn bind_parallel(&mut self, parallel_type: ParallelType, concrete: i64) -> Result<()> {
        if let Some(&existing) = self.parallel_extents.get(&parallel_type) {
            ensure!(
                existing == concrete,
                DoubleBindParallelSnafu { parallel_type: parallel_type.to_string(), existing, requested: concrete }
            );
            return Ok(());
        }
        self.parallel_extents.insert(parallel_type, concrete);
        self.memo.clear();
        Ok(())
    }

    pub fn parallel_extent(&self, parallel_type: ParallelType) -> Option<i64> {
        self.parallel_extents.get(&parallel_type).copied()
    }

    /// Evaluate `value`. `Ok(None)` means some leaf is unresolved.
    pub fn evaluate(&mut self, value: G::Id) -> Result<Option<i64>> {
        if let Some(&cached) = self.memo.get(&value) {
            return Ok(cached);
        }
        let result = self.evaluate_uncached(value)?;
        self.memo.insert(value, result);
        Ok(result)
    }

    fn evaluate_uncached(&mut self, value: G::Id) -> Result<Option<i64>> {
        if let Some(&bound) = self.bindings.get(&value) {
            return Ok(Some(bound));
        }
        let graph = self.graph;
        Ok(match graph.scalar_node(value) {
            ScalarNode::Const(c) => c.as_int(),
            ScalarNode::Free | ScalarNode::NotScalar => None,
            ScalarNode::Named(name) => {
                ParallelType::from_extent_name(name).and_then(|pt| self.parallel_extent(pt))
            }
            ScalarNode::Unary { op, input } => match op {
                UnaryOp::Neg => self.evaluate(input)?.and_then(i64::checked_neg),
                UnaryOp::Cast | UnaryOp::Set => self.evaluate(input)?,
                other => return self.unsupported(other.to_string(), value),
            },
            ScalarNode::Binary { op, lhs, rhs } => self.evaluate_binary(op, lhs, rhs, value)?,
            ScalarNode::Ternary { op } => return self.unsupported(op.to_string(), value),
        })
    }

    fn evaluate_binary(&mut self, op: BinaryOp, lhs: G::Id, rhs: G::Id, value: G::Id) -> Result<Option<i64>> {
        if !matches!(
            op,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::CeilDiv | BinaryOp::And
        ) {
            return self.unsupported(op.to_string(), value);
        }
        let a = self.evaluate(lhs)?;
        let b = self.evaluate(rhs)?;
        if matches!(op, BinaryOp::Div | BinaryOp::Mod | BinaryOp::CeilDiv) && b == Some(0) {
            return DivisionByZeroSnafu { op, value: self.graph.describe_scalar(value) }.fail();
        }
        let (Some(a), Some(b)) = (a, b) else {
            return Ok(None);
        };
        Ok(match op {
            BinaryOp::And => Some(i64::from(a != 0 && b != 0)),
            _ => fusion::fold_int(op, a, b),
        })
    }

    fn unsupported(&self, op: String, value: G::Id) -> Result<Option<i64>> {
        UnsupportedOperatorSnafu { op, value: self.graph.describe_scalar(value) }.fail()
    }
}

/// Whether `value` folds to a constant with no bindings.
pub fn is_const<G: ScalarGraph>(graph: &G, value: G::Id) -> bool {
    matches!(ExpressionEvaluator::new(graph).evaluate(value), Ok(Some(_)))
}
