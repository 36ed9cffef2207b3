//! Iteration domains and the split/merge primitives.
//!
//! An [`IterDomain`] is one loop dimension. Its valid sub-range is
//! `[start, extent - stop_offset)`. Axes are immutable once created except for
//! the parallel-type and warp-padding annotations; new axes are only produced
//! by [`Fusion::split_axis`] and [`Fusion::merge_axes`], each of which records
//! exactly one [`Transform`] in the fusion's history.

use bon::bon;
use snafu::ensure;

use super::{AxisId, Fusion, TransformId, ValId};
use crate::error::*;
use crate::fusion::transform::Transform;
use crate::types::{IterType, ParallelType};

/// One axis of a tensor's iteration space.
#[derive(Debug, Clone)]
pub struct IterDomain {
    pub(crate) start: ValId,
    pub(crate) extent: ValId,
    pub(crate) stop_offset: ValId,
    pub(crate) parallel_type: ParallelType,
    pub(crate) iter_type: IterType,
    pub(crate) is_rfactor_product: bool,
    pub(crate) padded_to_warp: bool,
    pub(crate) padded_size: Option<i64>,
    pub(crate) definition: Option<TransformId>,
}

impl IterDomain {
    pub fn start(&self) -> ValId {
        self.start
    }

    pub fn extent(&self) -> ValId {
        self.extent
    }

    pub fn stop_offset(&self) -> ValId {
        self.stop_offset
    }

    pub fn parallel_type(&self) -> ParallelType {
        self.parallel_type
    }

    pub fn iter_type(&self) -> IterType {
        self.iter_type
    }

    pub fn is_reduction(&self) -> bool {
        self.iter_type.is_reduction()
    }

    pub fn is_broadcast(&self) -> bool {
        self.iter_type.is_broadcast()
    }

    pub fn is_thread(&self) -> bool {
        self.parallel_type.is_thread_or_block()
    }

    pub fn is_rfactor_product(&self) -> bool {
        self.is_rfactor_product
    }

    /// Whether the extent is padded up to a multiple of the warp size.
    pub fn is_padded_to_warp(&self) -> bool {
        self.padded_to_warp
    }

    /// Concrete size after padding, when one was given.
    pub fn padded_size(&self) -> Option<i64> {
        self.padded_size
    }

    /// Transform that produced this axis; `None` for root axes.
    pub fn definition(&self) -> Option<TransformId> {
        self.definition
    }
}

#[bon]
impl Fusion {
    /// Create a root axis.
    ///
    /// `start` and `stop_offset` default to constant zero.
    #[builder]
    pub fn new_axis(
        &mut self,
        extent: ValId,
        start: Option<ValId>,
        stop_offset: Option<ValId>,
        #[builder(default)] iter_type: IterType,
        #[builder(default)] parallel_type: ParallelType,
        #[builder(default)] is_rfactor_product: bool,
    ) -> AxisId {
        let start = start.unwrap_or_else(|| self.int(0));
        let stop_offset = stop_offset.unwrap_or_else(|| self.int(0));
        self.push_axis(IterDomain {
            start,
            extent,
            stop_offset,
            parallel_type,
            iter_type,
            is_rfactor_product,
            padded_to_warp: false,
            padded_size: None,
            definition: None,
        })
    }
}

impl Fusion {
    /// Whether `axis` has no producing transform.
    pub fn is_root_axis(&self, axis: AxisId) -> bool {
        self.axis(axis).definition.is_none()
    }

    /// Split `axis` by `factor`.
    ///
    /// With `inner_split` the factor-sized piece is the inner (fast-varying)
    /// axis, otherwise it is the outer one. The other piece has extent
    /// `ceilDiv(extent - start_offset - stop_offset, factor)`. Offsets make the
    /// split partial and are only legal on root axes.
    pub fn split_axis(
        &mut self,
        axis: AxisId,
        factor: ValId,
        inner_split: bool,
        start_offset: Option<ValId>,
        stop_offset: Option<ValId>,
    ) -> Result<(AxisId, AxisId)> {
        let input = self.axis(axis).clone();
        ensure!(self.is_zero(input.start), NonZeroStartSnafu { axis, transform: "split" });
        if let Some(f) = self.const_int(factor) {
            ensure!(f > 0, NonPositiveSplitFactorSnafu { factor: f });
        }

        let start_offset = start_offset.unwrap_or_else(|| self.int(0));
        let stop_offset = stop_offset.unwrap_or_else(|| self.int(0));
        let is_partial = !self.is_zero(start_offset) || !self.is_zero(stop_offset);
        ensure!(!is_partial || input.definition.is_none(), PartialSplitOnNonRootSnafu { axis });

        let trimmed = self.sub_scalars(input.extent, start_offset)?;
        let trimmed = self.sub_scalars(trimmed, stop_offset)?;
        let remainder = self.ceil_div(trimmed, factor)?;
        let (outer_extent, inner_extent) = if inner_split { (remainder, factor) } else { (factor, remainder) };

        let mut derived = |extent: ValId| {
            let zero = self.int(0);
            let stop = self.int(0);
            self.push_axis(IterDomain {
                start: zero,
                extent,
                stop_offset: stop,
                parallel_type: input.parallel_type,
                iter_type: input.iter_type,
                is_rfactor_product: input.is_rfactor_product,
                padded_to_warp: false,
                padded_size: None,
                definition: None,
            })
        };
        let outer = derived(outer_extent);
        let inner = derived(inner_extent);

        self.push_transform(Transform::Split {
            input: axis,
            outer,
            inner,
            factor,
            inner_split,
            start_offset,
            stop_offset,
        });
        tracing::trace!(%axis, %outer, %inner, inner_split, is_partial, "split axis");
        Ok((outer, inner))
    }

    /// Merge `outer` and `inner` into one axis of extent `outer * inner`.
    pub fn merge_axes(&mut self, outer: AxisId, inner: AxisId) -> Result<AxisId> {
        let o = self.axis(outer).clone();
        let i = self.axis(inner).clone();
        ensure!(self.is_zero(o.start), NonZeroStartSnafu { axis: outer, transform: "merge" });
        ensure!(self.is_zero(i.start), NonZeroStartSnafu { axis: inner, transform: "merge" });
        ensure!(o.iter_type.is_gather() == i.iter_type.is_gather(), MergeGatherMismatchSnafu { outer, inner });

        let iter_type = self.merged_iter_type(outer, &o, inner, &i)?;
        let extent = self.mul_scalars(o.extent, i.extent)?;
        let zero = self.int(0);
        let stop = self.int(0);
        let merged = self.push_axis(IterDomain {
            start: zero,
            extent,
            stop_offset: stop,
            parallel_type: o.parallel_type,
            iter_type,
            is_rfactor_product: o.is_rfactor_product || i.is_rfactor_product,
            padded_to_warp: false,
            padded_size: None,
            definition: None,
        });
        self.push_transform(Transform::Merge { outer, inner, output: merged });
        tracing::trace!(%outer, %inner, %merged, ?iter_type, "merge axes");
        Ok(merged)
    }

    fn merged_iter_type(&self, outer: AxisId, o: &IterDomain, inner: AxisId, i: &IterDomain) -> Result<IterType> {
        Ok(match (o.iter_type, i.iter_type) {
            (a, b) if a == b => a,
            // A broadcast merged with anything takes the other side's type.
            (IterType::Broadcast, other) | (other, IterType::Broadcast) => other,
            // Trivial (extent-1) reductions may be folded into an iteration axis.
            (IterType::Reduction, _) if self.is_one(o.extent) => i.iter_type,
            (_, IterType::Reduction) if self.is_one(i.extent) => o.iter_type,
            (outer_type, inner_type) => {
                return MergeIterTypeMismatchSnafu { outer, inner, outer_type, inner_type }.fail();
            }
        })
    }

    /// Axis equivalence: equal start, extent, stop offset, parallel type,
    /// iteration type and rfactor flag.
    pub fn axis_same_as(&self, a: AxisId, b: AxisId) -> bool {
        if a == b {
            return true;
        }
        let (x, y) = (self.axis(a), self.axis(b));
        x.parallel_type == y.parallel_type
            && x.iter_type == y.iter_type
            && x.is_rfactor_product == y.is_rfactor_product
            && self.scalar_same_as(x.start, y.start)
            && self.scalar_same_as(x.extent, y.extent)
            && self.scalar_same_as(x.stop_offset, y.stop_offset)
    }

    /// Bind `axis` to a hardware dimension.
    pub fn parallelize_axis(&mut self, axis: AxisId, parallel_type: ParallelType) {
        self.axis_mut(axis).parallel_type = parallel_type;
    }

    /// Mark `axis` as padded to a multiple of the warp size, optionally with the
    /// concrete padded size.
    pub fn pad_axis_to_warp(&mut self, axis: AxisId, padded_size: Option<i64>) {
        let id = self.axis_mut(axis);
        id.padded_to_warp = true;
        id.padded_size = padded_size;
    }
}
