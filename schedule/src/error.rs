use snafu::Snafu;
use trellis_ir::{AxisId, ErrorKind, ValId, kir};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(context(false), display("{source}"))]
    Ir { source: trellis_ir::Error },

    #[snafu(display("{mode:?} compute-at map queried before build()"))]
    MapNotBuilt { mode: crate::compute_at_map::MappingMode },

    #[snafu(display("{axis} is not part of the {mode:?} compute-at map"))]
    AxisNotMapped { axis: AxisId, mode: crate::compute_at_map::MappingMode },

    #[snafu(display("kernel axis {axis} is not part of the {mode:?} compute-at map"))]
    KernelAxisNotMapped { axis: kir::AxisId, mode: crate::compute_at_map::MappingMode },

    #[snafu(display("axes {axis} and {other} are mapped together but parallelized as {existing} and {requested}"))]
    ParallelTypeConflict { axis: AxisId, other: AxisId, existing: String, requested: String },

    #[snafu(display("inputs of the expression defining {tensor} are produced by reductions over different {parallel_types} sets"))]
    MismatchedParallelReduction { tensor: ValId, parallel_types: String },

    #[snafu(display("no thread predicate information for {tensor}"))]
    MissingThreadPredicate { tensor: ValId },

    #[snafu(display("no loop structure computed for {tensor}"))]
    MissingLoopStructure { tensor: ValId },

    #[snafu(display("unsupported fusion pattern at {tensor}: {reason}"))]
    UnsupportedPattern { tensor: ValId, reason: String },

    #[snafu(display("scalar expression {expr} has a tensor output"))]
    ScalarOutputExpected { expr: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ir { source } => source.kind(),
            Self::UnsupportedPattern { .. } | Self::MismatchedParallelReduction { .. } => ErrorKind::UnsupportedPattern,
            _ => ErrorKind::InvariantViolation,
        }
    }
}
