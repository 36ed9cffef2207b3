//! Kernel IR: the lowered representation handed to code emission.
//!
//! The kernel IR is a second node universe. Fusion values, axes and
//! expressions are cloned into a [`Kernel`] arena during lowering; the
//! lowering context keeps the id maps between the two universes so analyses
//! built over fusion axes can be queried with kernel axes and vice versa.
//!
//! Tensor operands of lowered expressions are [`ValKind::TensorIndex`] values:
//! a view of the lowered tensor plus one index scalar per leaf axis.
//!
//! # Module Organization
//!
//! - [`stmt`] - statements (`Expr`, `Allocate`, `ForLoop`, `IfThenElse`)
//! - [`tree`] - ASCII tree rendering of statement lists

pub mod stmt;
pub mod tree;

use std::collections::HashMap;

use smallvec::{SmallVec, smallvec};

use crate::fusion;
use crate::fusion::fold_int;
use crate::id::define_id;
use crate::types::{BinaryOp, ConstValue, DataType, IterType, MemoryType, ParallelType, TernaryOp, UnaryOp};

pub use stmt::{Stmt, collect_exprs, count_exprs, visit};
pub use tree::render_stmts;

define_id!(
    /// Value in a [`Kernel`].
    ValId,
    "k"
);
define_id!(
    /// Lowered iteration domain in a [`Kernel`].
    AxisId,
    "kid"
);
define_id!(
    /// Lowered expression in a [`Kernel`].
    ExprId,
    "ke"
);

#[derive(Debug, Clone, PartialEq)]
pub enum ValKind {
    Scalar { value: Option<ConstValue> },
    NamedScalar { name: String },
    /// Lowered tensor: its fusion origin and lowered leaf axes.
    TensorView { fusion_tv: fusion::ValId, domain: Vec<AxisId>, memory_type: MemoryType },
    /// One element of a lowered tensor.
    TensorIndex { view: ValId, indices: SmallVec<[ValId; 8]> },
}

#[derive(Debug, Clone)]
pub struct Val {
    pub kind: ValKind,
    pub dtype: DataType,
    pub definition: Option<ExprId>,
}

/// Lowered mirror of [`fusion::IterDomain`].
#[derive(Debug, Clone, PartialEq)]
pub struct IterDomain {
    pub start: ValId,
    pub extent: ValId,
    pub stop_offset: ValId,
    pub parallel_type: ParallelType,
    pub iter_type: IterType,
    pub is_rfactor_product: bool,
    pub padded_to_warp: bool,
    pub padded_size: Option<i64>,
}

impl IterDomain {
    pub fn is_reduction(&self) -> bool {
        self.iter_type.is_reduction()
    }

    pub fn is_broadcast(&self) -> bool {
        self.iter_type.is_broadcast()
    }

    pub fn is_thread(&self) -> bool {
        self.parallel_type.is_thread_or_block()
    }
}

/// Lowered expression.
///
/// Reductions and broadcasts can carry a thread predicate directly instead of
/// being wrapped in a guard; `warp_allreduce` marks a reduction whose result
/// every lane of the warp receives, making a following broadcast redundant.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Unary { op: UnaryOp, out: ValId, input: ValId },
    Binary { op: BinaryOp, out: ValId, lhs: ValId, rhs: ValId },
    Ternary { op: TernaryOp, out: ValId, a: ValId, b: ValId, c: ValId },
    Reduction { op: BinaryOp, init: ValId, out: ValId, input: ValId, predicate: Option<ValId>, warp_allreduce: bool },
    Broadcast { out: ValId, input: ValId, predicate: Option<ValId> },
}

impl Expr {
    pub fn inputs(&self) -> SmallVec<[ValId; 3]> {
        match *self {
            Self::Unary { input, .. } | Self::Reduction { input, .. } | Self::Broadcast { input, .. } => {
                smallvec![input]
            }
            Self::Binary { lhs, rhs, .. } => smallvec![lhs, rhs],
            Self::Ternary { a, b, c, .. } => smallvec![a, b, c],
        }
    }

    pub fn out(&self) -> ValId {
        match *self {
            Self::Unary { out, .. }
            | Self::Binary { out, .. }
            | Self::Ternary { out, .. }
            | Self::Reduction { out, .. }
            | Self::Broadcast { out, .. } => out,
        }
    }

    fn inputs_mut(&mut self) -> SmallVec<[&mut ValId; 3]> {
        match self {
            Self::Unary { input, .. } | Self::Reduction { input, .. } | Self::Broadcast { input, .. } => {
                smallvec![input]
            }
            Self::Binary { lhs, rhs, .. } => smallvec![lhs, rhs],
            Self::Ternary { a, b, c, .. } => smallvec![a, b, c],
        }
    }
}

/// Arena of kernel-IR nodes.
///
/// The named-scalar intern table is skipped in `Debug` output; it only
/// duplicates entries already visible in `vals`.
#[derive(Default, Clone, derive_more::Debug)]
pub struct Kernel {
    vals: Vec<Val>,
    axes: Vec<IterDomain>,
    exprs: Vec<Expr>,
    #[debug(skip)]
    named: HashMap<String, ValId>,
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn val(&self, id: ValId) -> &Val {
        &self.vals[id.index()]
    }

    pub fn axis(&self, id: AxisId) -> &IterDomain {
        &self.axes[id.index()]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    pub fn push_val(&mut self, kind: ValKind, dtype: DataType) -> ValId {
        let id = ValId::from_index(self.vals.len());
        self.vals.push(Val { kind, dtype, definition: None });
        id
    }

    pub fn push_axis(&mut self, axis: IterDomain) -> AxisId {
        let id = AxisId::from_index(self.axes.len());
        self.axes.push(axis);
        id
    }

    /// Append `expr` and make it the definition of its output.
    pub fn push_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId::from_index(self.exprs.len());
        self.vals[expr.out().index()].definition = Some(id);
        self.exprs.push(expr);
        id
    }

    pub fn int(&mut self, value: i64) -> ValId {
        self.push_val(ValKind::Scalar { value: Some(ConstValue::Int(value)) }, DataType::Int64)
    }

    pub fn bool_const(&mut self, value: bool) -> ValId {
        self.push_val(ValKind::Scalar { value: Some(ConstValue::Bool(value)) }, DataType::Bool)
    }

    pub fn new_scalar(&mut self, dtype: DataType) -> ValId {
        self.push_val(ValKind::Scalar { value: None }, dtype)
    }

    /// Named scalar, shared by every reference to the same name.
    pub fn named_scalar(&mut self, name: &str, dtype: DataType) -> ValId {
        if let Some(&id) = self.named.get(name) {
            return id;
        }
        let id = self.push_val(ValKind::NamedScalar { name: name.to_string() }, dtype);
        self.named.insert(name.to_string(), id);
        id
    }

    /// `threadIdx.x`-style index of a thread or block dimension.
    pub fn parallel_index(&mut self, parallel_type: ParallelType) -> Option<ValId> {
        parallel_type.index_name().map(|name| self.named_scalar(name, DataType::Int64))
    }

    /// `blockDim.x`-style extent of a thread or block dimension.
    pub fn parallel_extent(&mut self, parallel_type: ParallelType) -> Option<ValId> {
        parallel_type.extent_name().map(|name| self.named_scalar(name, DataType::Int64))
    }

    pub fn tensor_view(
        &mut self,
        fusion_tv: fusion::ValId,
        domain: Vec<AxisId>,
        memory_type: MemoryType,
        dtype: DataType,
    ) -> ValId {
        self.push_val(ValKind::TensorView { fusion_tv, domain, memory_type }, dtype)
    }

    pub fn tensor_index(&mut self, view: ValId, indices: SmallVec<[ValId; 8]>) -> ValId {
        let dtype = self.val(view).dtype;
        self.push_val(ValKind::TensorIndex { view, indices }, dtype)
    }

    /// The tensor view behind a tensor index or view, `None` for scalars.
    pub fn view_of(&self, v: ValId) -> Option<ValId> {
        match &self.val(v).kind {
            ValKind::TensorIndex { view, .. } => Some(*view),
            ValKind::TensorView { .. } => Some(v),
            _ => None,
        }
    }

    pub fn const_int(&self, v: ValId) -> Option<i64> {
        match self.val(v).kind {
            ValKind::Scalar { value: Some(c) } => c.as_int(),
            _ => None,
        }
    }

    /// Scalar binary expression; integer constants are folded.
    pub fn binary(&mut self, op: BinaryOp, lhs: ValId, rhs: ValId) -> ValId {
        if let (Some(a), Some(b)) = (self.const_int(lhs), self.const_int(rhs))
            && let Some(folded) = fold_int(op, a, b)
        {
            return self.int(folded);
        }
        let dtype = if op.is_comparison() || op == BinaryOp::And { DataType::Bool } else { self.val(lhs).dtype };
        let out = self.new_scalar(dtype);
        self.push_expr(Expr::Binary { op, out, lhs, rhs });
        out
    }

    pub fn add(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        if self.const_int(rhs) == Some(0) {
            return lhs;
        }
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        match (self.const_int(lhs), self.const_int(rhs)) {
            (Some(1), _) => rhs,
            (_, Some(1)) => lhs,
            _ => self.binary(BinaryOp::Mul, lhs, rhs),
        }
    }

    pub fn eq(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryOp::Eq, lhs, rhs)
    }

    /// Logical and; `None` on either side means "true".
    pub fn and(&mut self, lhs: Option<ValId>, rhs: ValId) -> ValId {
        match lhs {
            Some(lhs) => self.binary(BinaryOp::And, lhs, rhs),
            None => rhs,
        }
    }

    /// Replace every input of `expr` equal to `from` with `to`. Returns
    /// whether anything changed.
    pub fn replace_input(&mut self, expr: ExprId, from: ValId, to: ValId) -> bool {
        let mut changed = false;
        for input in self.exprs[expr.index()].inputs_mut() {
            if *input == from {
                *input = to;
                changed = true;
            }
        }
        changed
    }

    /// Short human-readable rendering of a value (`T3[i5, threadIdx.x]`, `blockDim.x`, `32`).
    pub fn describe(&self, v: ValId) -> String {
        match &self.val(v).kind {
            ValKind::Scalar { value: Some(c) } => c.to_string(),
            ValKind::Scalar { value: None } => match self.val(v).definition {
                Some(def) => self.describe_expr_value(def),
                None => format!("i{}", v.0),
            },
            ValKind::NamedScalar { name } => name.clone(),
            ValKind::TensorView { fusion_tv, .. } => format!("T{}", fusion_tv.index()),
            ValKind::TensorIndex { view, indices } => {
                let idx: Vec<String> = indices.iter().map(|&i| self.describe(i)).collect();
                format!("{}[{}]", self.describe(*view), idx.join(", "))
            }
        }
    }

    fn describe_expr_value(&self, e: ExprId) -> String {
        match *self.expr(e) {
            Expr::Binary { op, lhs, rhs, .. } => format!("({} {op} {})", self.describe(lhs), self.describe(rhs)),
            Expr::Unary { op, input, .. } => format!("{op}({})", self.describe(input)),
            _ => format!("i{}", self.expr(e).out().0),
        }
    }

    /// One-line rendering of an expression (`T2[i3] = T1[i3] + 1`).
    pub fn describe_expr(&self, e: ExprId) -> String {
        let d = |v: ValId| self.describe(v);
        match *self.expr(e) {
            Expr::Unary { op, out, input } => format!("{} = {op}({})", d(out), d(input)),
            Expr::Binary { op, out, lhs, rhs } => format!("{} = {} {op} {}", d(out), d(lhs), d(rhs)),
            Expr::Ternary { op, out, a, b, c } => format!("{} = {op}({}, {}, {})", d(out), d(a), d(b), d(c)),
            Expr::Reduction { op, out, input, predicate, warp_allreduce, .. } => {
                let pred = predicate.map(|p| format!(" if {}", d(p))).unwrap_or_default();
                let warp = if warp_allreduce { " warp" } else { "" };
                format!("{} = reduce_{op}({}){warp}{pred}", d(out), d(input))
            }
            Expr::Broadcast { out, input, predicate } => {
                let pred = predicate.map(|p| format!(" if {}", d(p))).unwrap_or_default();
                format!("{} = broadcast({}){pred}", d(out), d(input))
            }
        }
    }
}
