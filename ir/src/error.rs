use snafu::Snafu;

use crate::fusion::{AxisId, ValId};
use crate::types::{BinaryOp, IterType};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Broad classification of a failure.
///
/// Both kinds are fatal for the fusion being lowered; the split only tells the
/// caller whether the input was malformed or merely outside what is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input to a public operation.
    InvariantViolation,
    /// Structurally legal input that lowering does not handle.
    UnsupportedPattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Binding a scalar that is already a compile-time constant.
    #[snafu(display("cannot bind {value}: it is a compile-time constant"))]
    BindConstant { value: String },

    /// Binding a scalar computed by an expression.
    #[snafu(display("cannot bind {value}: it has a defining expression"))]
    BindDerived { value: String },

    /// Binding the same free scalar twice.
    #[snafu(display("{value} is already bound to {existing}, cannot rebind to {requested}"))]
    DoubleBind { value: String, existing: i64, requested: i64 },

    /// Binding a parallel extent to a different value than before.
    #[snafu(display("extent of {parallel_type} is already bound to {existing}, cannot rebind to {requested}"))]
    DoubleBindParallel { parallel_type: String, existing: i64, requested: i64 },

    /// Division or modulo by a statically-known zero.
    #[snafu(display("{op} by zero while evaluating {value}"))]
    DivisionByZero { op: BinaryOp, value: String },

    /// Operator the evaluator does not fold.
    #[snafu(display("unrecognized operator {op} while evaluating {value}"))]
    UnsupportedOperator { op: String, value: String },

    /// A value of the wrong kind was passed where a tensor was required.
    #[snafu(display("{value} is not a tensor"))]
    NotATensor { value: ValId },

    /// A value of the wrong kind was passed where a scalar was required.
    #[snafu(display("{value} is not a scalar"))]
    NotAScalar { value: String },

    /// Start/stop offsets requested on an axis that has a producing transform.
    #[snafu(display("partial split of {axis} is not allowed: only root axes may carry start/stop offsets"))]
    PartialSplitOnNonRoot { axis: AxisId },

    /// Split or merge of an axis whose start is not zero.
    #[snafu(display("{transform} of {axis} is not supported: its start is not zero"))]
    NonZeroStart { axis: AxisId, transform: &'static str },

    /// Split factor that is statically known to be non-positive.
    #[snafu(display("split factor must be positive, got {factor}"))]
    NonPositiveSplitFactor { factor: i64 },

    /// Merge of a reduction axis with a non-reduction axis.
    #[snafu(display("cannot merge {outer} ({outer_type:?}) with {inner} ({inner_type:?}): iteration types differ"))]
    MergeIterTypeMismatch { outer: AxisId, inner: AxisId, outer_type: IterType, inner_type: IterType },

    /// Merge of a gather axis with a non-gather axis.
    #[snafu(display("merging gather axis with non-gather axis ({outer}, {inner}) is not supported"))]
    MergeGatherMismatch { outer: AxisId, inner: AxisId },

    /// Reorder index outside `[-rank, rank)`.
    #[snafu(display("reorder index {index} is out of range for rank {rank}"))]
    ReorderOutOfRange { index: i64, rank: usize },

    /// Reorder map with a repeated source or destination.
    #[snafu(display("reorder map {old2new:?} has duplicate entries"))]
    ReorderDuplicate { old2new: Vec<(i64, i64)> },

    /// Tensor rank beyond the supported ceiling.
    #[snafu(display("tensor rank {rank} exceeds the supported maximum of {max}"))]
    RankTooLarge { rank: usize, max: usize },

    /// Axis position outside the tensor's leaf domain.
    #[snafu(display("axis position {pos} is out of range for {tensor} of rank {rank}"))]
    AxisPositionOutOfRange { tensor: ValId, pos: i64, rank: usize },

    /// Compute-at position beyond the tensor's rank.
    #[snafu(display("compute-at position {pos} is out of range for {tensor} of rank {rank}"))]
    ComputeAtOutOfRange { tensor: ValId, pos: usize, rank: usize },

    /// Tensor operands whose iteration ranks disagree.
    #[snafu(display("operand ranks differ: {lhs} vs {rhs}"))]
    OperandRankMismatch { lhs: usize, rhs: usize },

    /// Broadcast flags inconsistent with the input rank.
    #[snafu(display("broadcast flags {flags:?} do not match input rank {rank}"))]
    BroadcastFlagsMismatch { flags: Vec<bool>, rank: usize },

    /// Reduction over a set of axes that is empty.
    #[snafu(display("reduction of {tensor} needs at least one axis"))]
    EmptyReduction { tensor: ValId },

    /// Combining operator that cannot drive a reduction.
    #[snafu(display("{op} is not a reduction operator"))]
    InvalidReductionOp { op: BinaryOp },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NonZeroStart { .. } | Self::MergeGatherMismatch { .. } => ErrorKind::UnsupportedPattern,
            _ => ErrorKind::InvariantViolation,
        }
    }
}
