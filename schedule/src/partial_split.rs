//! Start/stop offsets of partially split root axes.
//!
//! A partial split only covers `[start_offset, extent - stop_offset)` of its
//! input. Offsets are only legal on root axes, so the map is keyed by the
//! root axis and holds at most one offset pair per axis.

use std::collections::HashMap;

use trellis_ir::{AxisId, Transform, ValId, kir};

use crate::context::LowerContext;
use crate::error::*;

#[derive(Debug, Clone, Default)]
pub struct PartialSplitMap {
    start: HashMap<AxisId, ValId>,
    stop: HashMap<AxisId, ValId>,
    kir_start: HashMap<kir::AxisId, kir::ValId>,
    kir_stop: HashMap<kir::AxisId, kir::ValId>,
}

impl PartialSplitMap {
    /// Scan every tensor's split history for offset-carrying splits of root axes.
    #[tracing::instrument(skip_all)]
    pub fn build(ctx: &mut LowerContext<'_>) -> Result<Self> {
        let fusion = ctx.fusion();
        let mut map = Self::default();
        for tv in fusion.all_tensors() {
            let view = fusion.tensor_view(tv)?;
            for tr in fusion.transforms_between(view.domain().root(), view.leaf()) {
                let Transform::Split { input, start_offset, stop_offset, .. } = *fusion.transform(tr) else {
                    continue;
                };
                if !fusion.is_root_axis(input) || (fusion.is_zero(start_offset) && fusion.is_zero(stop_offset)) {
                    continue;
                }
                if map.start.contains_key(&input) {
                    continue;
                }
                map.start.insert(input, start_offset);
                map.stop.insert(input, stop_offset);

                let k = ctx.lower_axis(input)?;
                let start = ctx.lower_value(start_offset)?;
                let stop = ctx.lower_value(stop_offset)?;
                map.kir_start.insert(k, start);
                map.kir_stop.insert(k, stop);
            }
        }
        tracing::debug!(partial_splits = map.start.len(), "partial split map built");
        Ok(map)
    }

    /// `None` when `axis` was never partially split.
    pub fn get_start_offset(&self, axis: AxisId) -> Option<ValId> {
        self.start.get(&axis).copied()
    }

    pub fn get_stop_offset(&self, axis: AxisId) -> Option<ValId> {
        self.stop.get(&axis).copied()
    }

    pub fn kir_start_offset(&self, axis: kir::AxisId) -> Option<kir::ValId> {
        self.kir_start.get(&axis).copied()
    }

    pub fn kir_stop_offset(&self, axis: kir::AxisId) -> Option<kir::ValId> {
        self.kir_stop.get(&axis).copied()
    }

    pub fn len(&self) -> usize {
        self.start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }
}
