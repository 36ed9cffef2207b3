//! Global split/merge history.
//!
//! Every derived axis is the output of exactly one [`Transform`]. The history
//! is append-only and ordered by creation, so replaying the transforms between
//! a root domain and a leaf domain in id order always reproduces the leaf.

use std::collections::HashSet;

use smallvec::{SmallVec, smallvec};

use super::{AxisId, Fusion, TransformId, ValId};

/// A recorded axis transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// `input` split into `outer` and `inner`. The factor-sized piece is
    /// `inner` when `inner_split` is set. Non-zero offsets trim the range that
    /// is split and are only ever present when `input` is a root axis.
    Split {
        input: AxisId,
        outer: AxisId,
        inner: AxisId,
        factor: ValId,
        inner_split: bool,
        start_offset: ValId,
        stop_offset: ValId,
    },
    /// `outer` and `inner` fused into `output`.
    Merge { outer: AxisId, inner: AxisId, output: AxisId },
}

impl Transform {
    pub fn inputs(&self) -> SmallVec<[AxisId; 2]> {
        match *self {
            Self::Split { input, .. } => smallvec![input],
            Self::Merge { outer, inner, .. } => smallvec![outer, inner],
        }
    }

    pub fn outputs(&self) -> SmallVec<[AxisId; 2]> {
        match *self {
            Self::Split { outer, inner, .. } => smallvec![outer, inner],
            Self::Merge { output, .. } => smallvec![output],
        }
    }
}

impl Fusion {
    /// Transforms needed to derive `to` from `from`, in creation order.
    ///
    /// Walks definitions backwards from `to`, stopping at axes in `from`.
    /// Transforms that only touch axes outside this path are not included.
    pub fn transforms_between(&self, from: &[AxisId], to: &[AxisId]) -> Vec<TransformId> {
        let stop: HashSet<AxisId> = from.iter().copied().collect();
        let mut seen: HashSet<TransformId> = HashSet::new();
        let mut stack: Vec<AxisId> = to.to_vec();
        while let Some(axis) = stack.pop() {
            if stop.contains(&axis) {
                continue;
            }
            if let Some(def) = self.axis(axis).definition
                && seen.insert(def)
            {
                stack.extend(self.transform(def).inputs());
            }
        }
        let mut ordered: Vec<TransformId> = seen.into_iter().collect();
        ordered.sort_unstable();
        ordered
    }

    /// Root axes that `axis` is derived from, in creation order.
    pub fn root_axes_of(&self, axis: AxisId) -> Vec<AxisId> {
        let mut roots = Vec::new();
        let mut stack = vec![axis];
        let mut seen = HashSet::new();
        while let Some(a) = stack.pop() {
            if !seen.insert(a) {
                continue;
            }
            match self.axis(a).definition {
                Some(def) => stack.extend(self.transform(def).inputs()),
                None => roots.push(a),
            }
        }
        roots.sort_unstable();
        roots
    }
}
