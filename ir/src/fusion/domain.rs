//! Per-tensor domains.

use snafu::ensure;

use super::{AxisId, Fusion};
use crate::error::*;

/// One tensor's iteration space at the current point of its transform history.
///
/// `root` holds the untransformed axes the tensor was created with, `rfactor`
/// the intermediate domain of a multi-stage reduction (if any), and `leaf` the
/// current, scheduled sequence. `contiguity` has one flag per root axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDomain {
    pub(crate) root: Vec<AxisId>,
    pub(crate) rfactor: Option<Vec<AxisId>>,
    pub(crate) leaf: Vec<AxisId>,
    pub(crate) contiguity: Vec<bool>,
}

impl TensorDomain {
    pub fn new(root: Vec<AxisId>) -> Self {
        let contiguity = vec![true; root.len()];
        Self { leaf: root.clone(), root, rfactor: None, contiguity }
    }

    pub fn root(&self) -> &[AxisId] {
        &self.root
    }

    pub fn rfactor(&self) -> Option<&[AxisId]> {
        self.rfactor.as_deref()
    }

    /// The rfactor domain when present, otherwise the root domain.
    pub fn maybe_rfactor(&self) -> &[AxisId] {
        self.rfactor.as_deref().unwrap_or(&self.root)
    }

    pub fn leaf(&self) -> &[AxisId] {
        &self.leaf
    }

    pub fn contiguity(&self) -> &[bool] {
        &self.contiguity
    }

    pub fn rank(&self) -> usize {
        self.leaf.len()
    }

    pub fn axis(&self, pos: usize) -> AxisId {
        self.leaf[pos]
    }

    /// Position of `axis` in the leaf domain.
    pub fn position_of(&self, axis: AxisId) -> Option<usize> {
        self.leaf.iter().position(|&a| a == axis)
    }

    /// Permute the leaf domain. See [`reorder_map`].
    pub fn reorder(&mut self, old2new: &[(i64, i64)]) -> Result<()> {
        let new2old = reorder_map(self.leaf.len(), old2new)?;
        self.leaf = new2old.into_iter().map(|old| self.leaf[old]).collect();
        Ok(())
    }
}

/// Resolve a partial `old -> new` position map into a full `new2old` permutation.
///
/// Negative indices count from the end. Explicitly mapped axes are placed
/// first; the remaining destination slots are then filled in ascending order
/// with the unmapped source axes, keeping their relative order.
///
/// ```
/// # use trellis_ir::fusion::reorder_map;
/// assert_eq!(reorder_map(3, &[(0, 2)]).unwrap(), vec![1, 2, 0]);
/// assert_eq!(reorder_map(3, &[(0, 2), (2, 0)]).unwrap(), vec![2, 1, 0]);
/// ```
pub fn reorder_map(rank: usize, old2new: &[(i64, i64)]) -> Result<Vec<usize>> {
    let normalize = |index: i64| -> Result<usize> {
        let rank_i = rank as i64;
        let resolved = if index < 0 { index + rank_i } else { index };
        ensure!((0..rank_i).contains(&resolved), ReorderOutOfRangeSnafu { index, rank });
        Ok(resolved as usize)
    };

    let mut new2old: Vec<Option<usize>> = vec![None; rank];
    let mut mapped_src = vec![false; rank];
    for &(old, new) in old2new {
        let (old, new) = (normalize(old)?, normalize(new)?);
        ensure!(
            !mapped_src[old] && new2old[new].is_none(),
            ReorderDuplicateSnafu { old2new: old2new.to_vec() }
        );
        mapped_src[old] = true;
        new2old[new] = Some(old);
    }

    let mut unmapped = (0..rank).filter(|&i| !mapped_src[i]);
    Ok(new2old
        .into_iter()
        .map(|slot| slot.or_else(|| unmapped.next()).unwrap_or_default())
        .collect())
}

impl Fusion {
    /// `axes` without reduction axes.
    pub fn no_reductions(&self, axes: &[AxisId]) -> Vec<AxisId> {
        axes.iter().copied().filter(|&a| !self.axis(a).is_reduction()).collect()
    }

    /// `axes` without broadcast axes.
    pub fn no_broadcasts(&self, axes: &[AxisId]) -> Vec<AxisId> {
        axes.iter().copied().filter(|&a| !self.axis(a).is_broadcast()).collect()
    }
}
