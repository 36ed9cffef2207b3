//! Type definitions shared by the fusion IR and the kernel IR.
//!
//! This module contains the fundamental enums used throughout lowering:
//! parallel types, iteration types, memory spaces, data types, constants and
//! the operator sets understood by expressions.

use std::fmt;

use enumset::{EnumSet, EnumSetType};

/// Hardware execution resource an axis is bound to.
#[derive(Debug, Hash, PartialOrd, Ord, Default)]
#[derive(EnumSetType, strum::Display)]
#[enumset(repr = "u16")]
pub enum ParallelType {
    BIDz,
    BIDy,
    BIDx,
    TIDz,
    TIDy,
    TIDx,
    #[strum(serialize = "V")]
    Vectorize,
    #[strum(serialize = "UR")]
    Unroll,
    #[default]
    #[strum(serialize = "S")]
    Serial,
}

/// Bitmask over parallel types.
pub type ParallelTypeBitmap = EnumSet<ParallelType>;

impl ParallelType {
    /// All thread dimensions (`threadIdx.{x,y,z}`).
    pub const THREADS: ParallelTypeBitmap =
        enumset::enum_set!(ParallelType::TIDx | ParallelType::TIDy | ParallelType::TIDz);

    /// All block dimensions (`blockIdx.{x,y,z}`).
    pub const BLOCKS: ParallelTypeBitmap =
        enumset::enum_set!(ParallelType::BIDx | ParallelType::BIDy | ParallelType::BIDz);

    pub const fn is_thread(self) -> bool {
        matches!(self, Self::TIDx | Self::TIDy | Self::TIDz)
    }

    pub const fn is_block(self) -> bool {
        matches!(self, Self::BIDx | Self::BIDy | Self::BIDz)
    }

    /// Thread or block dimension, i.e. a type that maps onto a SIMT launch dimension.
    pub const fn is_thread_or_block(self) -> bool {
        self.is_thread() || self.is_block()
    }

    /// Name of the per-lane index for this dimension (`threadIdx.x`, ...).
    pub const fn index_name(self) -> Option<&'static str> {
        Some(match self {
            Self::TIDx => "threadIdx.x",
            Self::TIDy => "threadIdx.y",
            Self::TIDz => "threadIdx.z",
            Self::BIDx => "blockIdx.x",
            Self::BIDy => "blockIdx.y",
            Self::BIDz => "blockIdx.z",
            _ => return None,
        })
    }

    /// Name of the launch extent for this dimension (`blockDim.x`, ...).
    pub const fn extent_name(self) -> Option<&'static str> {
        Some(match self {
            Self::TIDx => "blockDim.x",
            Self::TIDy => "blockDim.y",
            Self::TIDz => "blockDim.z",
            Self::BIDx => "gridDim.x",
            Self::BIDy => "gridDim.y",
            Self::BIDz => "gridDim.z",
            _ => return None,
        })
    }

    /// Inverse of [`ParallelType::extent_name`].
    pub fn from_extent_name(name: &str) -> Option<Self> {
        Some(match name {
            "blockDim.x" => Self::TIDx,
            "blockDim.y" => Self::TIDy,
            "blockDim.z" => Self::TIDz,
            "gridDim.x" => Self::BIDx,
            "gridDim.y" => Self::BIDy,
            "gridDim.z" => Self::BIDz,
            _ => return None,
        })
    }
}

/// How an axis participates in iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IterType {
    #[default]
    Iteration,
    Reduction,
    Broadcast,
    Gather,
}

impl IterType {
    pub const fn is_reduction(self) -> bool {
        matches!(self, Self::Reduction)
    }

    pub const fn is_broadcast(self) -> bool {
        matches!(self, Self::Broadcast)
    }

    pub const fn is_gather(self) -> bool {
        matches!(self, Self::Gather)
    }
}

/// Memory space a tensor buffer lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// Per-lane register storage.
    #[default]
    Local,
    /// Block-shared memory.
    Shared,
    /// Device memory.
    Global,
}

/// Element type of a scalar or tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int32,
    #[default]
    Int64,
    Float32,
    Float64,
}

impl DataType {
    pub const fn is_int(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// Compile-time constant carried by a scalar value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ConstValue {
    pub const fn dtype(&self) -> DataType {
        match self {
            Self::Int(_) => DataType::Int64,
            Self::Float(_) => DataType::Float64,
            Self::Bool(_) => DataType::Bool,
        }
    }

    /// Integer view of the constant; booleans are 0/1, floats have no integer view.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(v) => Some(*v as i64),
            Self::Float(_) => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnaryOp {
    /// Plain copy.
    Set,
    Neg,
    Cast,
    Abs,
    Exp,
    Sqrt,
}

/// Binary operators.
///
/// Reductions reuse the commutative subset (`Add`, `Mul`, `Max`, `Min`) as
/// their combining operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    CeilDiv,
    And,
    Or,
    Max,
    Min,
    Eq,
    Lt,
}

impl BinaryOp {
    /// Whether the operator produces a boolean.
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Lt)
    }

    /// Whether the operator may combine values in a reduction.
    pub const fn is_reduction_op(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Max | Self::Min)
    }
}

/// Ternary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TernaryOp {
    Where,
}
