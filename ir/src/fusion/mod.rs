//! Fusion IR: the scheduled graph handed to lowering.
//!
//! A [`Fusion`] owns four arenas: values (scalars and tensors), axes
//! ([`IterDomain`]), expressions ([`Expr`]) and the axis transform history
//! ([`Transform`]). Everything is addressed by typed ids; ids are assigned in
//! creation order, which is also a valid topological order because an
//! expression can only consume values that already exist.
//!
//! # Module Organization
//!
//! - [`axis`] - iteration domains and the split/merge primitives
//! - [`domain`] - per-tensor domains and `reorder`
//! - [`transform`] - the global split/merge history
//! - [`expr`] - the closed set of expression kinds
//! - [`tensor`] - tensor construction, tensor ops and scheduling calls

pub mod axis;
pub mod domain;
pub mod expr;
pub mod tensor;
pub mod transform;

use std::collections::HashSet;

use smallvec::SmallVec;
use snafu::ensure;

use crate::error::*;
use crate::id::define_id;
use crate::types::{BinaryOp, ConstValue, DataType, MemoryType, UnaryOp};

pub use axis::IterDomain;
pub use domain::{TensorDomain, reorder_map};
pub use expr::Expr;
pub use tensor::{MAX_TENSOR_RANK, TensorView};
pub use transform::Transform;

define_id!(
    /// Scalar or tensor value in a [`Fusion`].
    ValId,
    "v"
);
define_id!(
    /// Iteration domain (axis) in a [`Fusion`].
    AxisId,
    "id"
);
define_id!(
    /// Expression in a [`Fusion`].
    ExprId,
    "e"
);
define_id!(
    /// Split or merge record in the transform history of a [`Fusion`].
    TransformId,
    "tr"
);

/// What a value is.
#[derive(Debug, Clone)]
pub enum ValKind {
    /// Scalar; `Some` value makes it a compile-time constant.
    Scalar { value: Option<ConstValue> },
    /// Scalar with a well-known name resolved at launch (`blockDim.x`, ...).
    NamedScalar { name: String },
    Tensor(TensorView),
}

#[derive(Debug, Clone)]
pub struct Val {
    pub(crate) kind: ValKind,
    pub(crate) dtype: DataType,
    pub(crate) definition: Option<ExprId>,
    pub(crate) uses: SmallVec<[ExprId; 2]>,
}

impl Val {
    pub fn kind(&self) -> &ValKind {
        &self.kind
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Expression producing this value, if any.
    pub fn definition(&self) -> Option<ExprId> {
        self.definition
    }

    /// Expressions consuming this value, in creation order.
    pub fn uses(&self) -> &[ExprId] {
        &self.uses
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self.kind, ValKind::Tensor(_))
    }

    pub fn const_value(&self) -> Option<ConstValue> {
        match self.kind {
            ValKind::Scalar { value } => value,
            _ => None,
        }
    }
}

/// Tensor-fusion graph with its axis transform history.
#[derive(Debug, Default, Clone)]
pub struct Fusion {
    vals: Vec<Val>,
    axes: Vec<IterDomain>,
    exprs: Vec<Expr>,
    transforms: Vec<Transform>,
    inputs: Vec<ValId>,
    outputs: Vec<ValId>,
}

impl Fusion {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------

    pub fn val(&self, id: ValId) -> &Val {
        &self.vals[id.index()]
    }

    pub fn axis(&self, id: AxisId) -> &IterDomain {
        &self.axes[id.index()]
    }

    pub(crate) fn axis_mut(&mut self, id: AxisId) -> &mut IterDomain {
        &mut self.axes[id.index()]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn transform(&self, id: TransformId) -> &Transform {
        &self.transforms[id.index()]
    }

    pub fn num_vals(&self) -> usize {
        self.vals.len()
    }

    pub fn num_axes(&self) -> usize {
        self.axes.len()
    }

    /// Every axis ever created, in creation order.
    pub fn all_axes(&self) -> impl Iterator<Item = AxisId> + '_ {
        (0..self.axes.len()).map(AxisId::from_index)
    }

    /// Every tensor value, in creation order.
    pub fn all_tensors(&self) -> Vec<ValId> {
        (0..self.vals.len()).map(ValId::from_index).filter(|&v| self.val(v).is_tensor()).collect()
    }

    pub fn inputs(&self) -> &[ValId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValId] {
        &self.outputs
    }

    pub fn is_input(&self, v: ValId) -> bool {
        self.inputs.contains(&v)
    }

    pub fn is_output(&self, v: ValId) -> bool {
        self.outputs.contains(&v)
    }

    /// Register a fusion input. Tensor inputs live in global memory.
    pub fn add_input(&mut self, v: ValId) {
        if !self.inputs.contains(&v) {
            self.inputs.push(v);
        }
        self.mark_global(v);
    }

    /// Register a fusion output. Tensor outputs live in global memory.
    pub fn add_output(&mut self, v: ValId) {
        if !self.outputs.contains(&v) {
            self.outputs.push(v);
        }
        self.mark_global(v);
    }

    fn mark_global(&mut self, v: ValId) {
        if let ValKind::Tensor(tv) = &mut self.vals[v.index()].kind {
            tv.memory_type = MemoryType::Global;
        }
    }

    /// Expressions reachable backwards from the outputs, in creation order.
    ///
    /// Creation order is topological, so this doubles as the default
    /// dependency-ordered expression list consumed by lowering. Axis extent
    /// arithmetic is not part of the dataflow and is not included.
    pub fn exprs(&self) -> Vec<ExprId> {
        let mut seen: HashSet<ExprId> = HashSet::new();
        let mut stack: Vec<ValId> = self.outputs.clone();
        while let Some(v) = stack.pop() {
            if let Some(def) = self.val(v).definition
                && seen.insert(def)
            {
                stack.extend(self.expr(def).inputs());
            }
        }
        let mut ordered: Vec<ExprId> = seen.into_iter().collect();
        ordered.sort_unstable();
        ordered
    }

    pub(crate) fn push_val(&mut self, kind: ValKind, dtype: DataType) -> ValId {
        let id = ValId::from_index(self.vals.len());
        self.vals.push(Val { kind, dtype, definition: None, uses: SmallVec::new() });
        id
    }

    pub(crate) fn push_axis(&mut self, axis: IterDomain) -> AxisId {
        let id = AxisId::from_index(self.axes.len());
        self.axes.push(axis);
        id
    }

    pub(crate) fn push_transform(&mut self, transform: Transform) -> TransformId {
        let id = TransformId::from_index(self.transforms.len());
        for out in transform.outputs() {
            self.axes[out.index()].definition = Some(id);
        }
        self.transforms.push(transform);
        id
    }

    pub(crate) fn push_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId::from_index(self.exprs.len());
        for input in expr.inputs() {
            let uses = &mut self.vals[input.index()].uses;
            if !uses.contains(&id) {
                uses.push(id);
            }
        }
        for out in expr.outputs() {
            self.vals[out.index()].definition = Some(id);
        }
        self.exprs.push(expr);
        id
    }

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------

    /// Free symbolic scalar, resolved only by binding at evaluation time.
    pub fn new_scalar(&mut self, dtype: DataType) -> ValId {
        self.push_val(ValKind::Scalar { value: None }, dtype)
    }

    pub fn int(&mut self, value: i64) -> ValId {
        self.push_val(ValKind::Scalar { value: Some(ConstValue::Int(value)) }, DataType::Int64)
    }

    pub fn float(&mut self, value: f64) -> ValId {
        self.push_val(ValKind::Scalar { value: Some(ConstValue::Float(value)) }, DataType::Float64)
    }

    pub fn named_scalar(&mut self, name: impl Into<String>, dtype: DataType) -> ValId {
        self.push_val(ValKind::NamedScalar { name: name.into() }, dtype)
    }

    pub fn const_value(&self, v: ValId) -> Option<ConstValue> {
        self.val(v).const_value()
    }

    /// Integer constant held by `v`, if it is one.
    pub fn const_int(&self, v: ValId) -> Option<i64> {
        self.const_value(v).and_then(|c| c.as_int())
    }

    pub fn is_zero(&self, v: ValId) -> bool {
        self.const_int(v) == Some(0)
    }

    pub fn is_one(&self, v: ValId) -> bool {
        self.const_int(v) == Some(1)
    }

    fn ensure_scalar(&self, v: ValId) -> Result<()> {
        ensure!(!self.val(v).is_tensor(), NotAScalarSnafu { value: v.to_string() });
        Ok(())
    }

    /// Scalar unary op. Folds negation of an integer constant.
    pub fn scalar_unary(&mut self, op: UnaryOp, input: ValId) -> Result<ValId> {
        self.ensure_scalar(input)?;
        if let (UnaryOp::Neg, Some(v)) = (op, self.const_int(input)) {
            return Ok(self.int(v.wrapping_neg()));
        }
        if matches!(op, UnaryOp::Set | UnaryOp::Cast)
            && let Some(v) = self.const_int(input)
        {
            return Ok(self.int(v));
        }
        let dtype = self.val(input).dtype;
        let out = self.new_scalar(dtype);
        self.push_expr(Expr::Unary { op, out, input });
        Ok(out)
    }

    /// Scalar binary op. Integer constants are folded for `+ - * / % ceilDiv`.
    pub fn scalar_binary(&mut self, op: BinaryOp, lhs: ValId, rhs: ValId) -> Result<ValId> {
        self.ensure_scalar(lhs)?;
        self.ensure_scalar(rhs)?;
        if let (Some(a), Some(b)) = (self.const_int(lhs), self.const_int(rhs))
            && let Some(folded) = fold_int(op, a, b)
        {
            return Ok(self.int(folded));
        }
        let dtype = if op.is_comparison() { DataType::Bool } else { self.val(lhs).dtype };
        let out = self.new_scalar(dtype);
        self.push_expr(Expr::Binary { op, out, lhs, rhs });
        Ok(out)
    }

    pub fn add_scalars(&mut self, lhs: ValId, rhs: ValId) -> Result<ValId> {
        if self.is_zero(rhs) {
            return Ok(lhs);
        }
        self.scalar_binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub_scalars(&mut self, lhs: ValId, rhs: ValId) -> Result<ValId> {
        if self.is_zero(rhs) {
            return Ok(lhs);
        }
        self.scalar_binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul_scalars(&mut self, lhs: ValId, rhs: ValId) -> Result<ValId> {
        self.scalar_binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn ceil_div(&mut self, lhs: ValId, rhs: ValId) -> Result<ValId> {
        if self.is_one(rhs) {
            return Ok(lhs);
        }
        self.scalar_binary(BinaryOp::CeilDiv, lhs, rhs)
    }

    /// Structural equality of scalars: identical ids, equal constants, or the
    /// same operator applied to structurally equal operands.
    pub fn scalar_same_as(&self, a: ValId, b: ValId) -> bool {
        if a == b {
            return true;
        }
        if let (Some(x), Some(y)) = (self.const_value(a), self.const_value(b)) {
            return x == y;
        }
        let (Some(da), Some(db)) = (self.val(a).definition, self.val(b).definition) else {
            return false;
        };
        match (self.expr(da), self.expr(db)) {
            (Expr::Unary { op: oa, input: ia, .. }, Expr::Unary { op: ob, input: ib, .. }) => {
                oa == ob && self.scalar_same_as(*ia, *ib)
            }
            (Expr::Binary { op: oa, lhs: la, rhs: ra, .. }, Expr::Binary { op: ob, lhs: lb, rhs: rb, .. }) => {
                oa == ob && self.scalar_same_as(*la, *lb) && self.scalar_same_as(*ra, *rb)
            }
            _ => false,
        }
    }

    /// Short human-readable name for diagnostics (`T3`, `i7`, `32`, `blockDim.x`).
    pub fn describe(&self, v: ValId) -> String {
        match &self.val(v).kind {
            ValKind::Tensor(_) => format!("T{}", v.0),
            ValKind::NamedScalar { name } => name.clone(),
            ValKind::Scalar { value: Some(c) } => c.to_string(),
            ValKind::Scalar { value: None } => format!("i{}", v.0),
        }
    }

    pub(crate) fn tensor_or_err(&self, v: ValId) -> Result<&TensorView> {
        match &self.val(v).kind {
            ValKind::Tensor(tv) => Ok(tv),
            _ => NotATensorSnafu { value: v }.fail(),
        }
    }

    pub(crate) fn tensor_mut_or_err(&mut self, v: ValId) -> Result<&mut TensorView> {
        match &mut self.vals[v.index()].kind {
            ValKind::Tensor(tv) => Ok(tv),
            _ => NotATensorSnafu { value: v }.fail(),
        }
    }
}

/// Integer folding shared by scalar construction. Returns `None` for
/// operators that are not folded, for a zero divisor and on overflow.
pub(crate) fn fold_int(op: BinaryOp, a: i64, b: i64) -> Option<i64> {
    match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Mod => a.checked_rem(b),
        BinaryOp::CeilDiv => ceil_div(a, b),
        _ => None,
    }
}

/// Quotient rounded toward positive infinity.
pub(crate) fn ceil_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    let r = a.checked_rem(b)?;
    if r != 0 && (r > 0) == (b > 0) { q.checked_add(1) } else { Some(q) }
}
