//! Axis equivalence classes for loop synthesis, parallelization and indexing.
//!
//! A [`ComputeAtMap`] partitions every axis of a fusion into classes of axes
//! that lowering treats as "the same loop dimension". Three modes differ in
//! which producer/consumer axis pairs are unioned:
//!
//! | Mode       | Pairs unioned                                              |
//! |------------|------------------------------------------------------------|
//! | `Loop`     | all replayed pairs, including forwarded broadcast merges   |
//! | `Index`    | all replayed pairs, without broadcast forwarding           |
//! | `Parallel` | like `Loop`, restricted to producer leaf axes that are     |
//! |            | shared with the consumer (left of the compute-at position) |
//!
//! Each class has a concrete representative: a non-broadcast axis if there
//! is one, then the one with the larger static extent, then the oldest. The
//! map is mirrored over the kernel-IR axes created by the lowering context.

use std::cmp::Reverse;
use std::collections::HashMap;

use itertools::Itertools;
use snafu::OptionExt;
use trellis_ir::{AxisId, ExpressionEvaluator, Fusion, ParallelType, kir};

use crate::context::LowerContext;
use crate::disjoint_set::DisjointSets;
use crate::error::*;
use crate::root_map::{best_effort_replay, pairwise_root_map};

/// Which axis pairs a [`ComputeAtMap`] unions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingMode {
    Parallel,
    Loop,
    Index,
}

#[derive(Debug, Clone)]
pub struct ComputeAtMap {
    mode: MappingMode,
    built: bool,
    sets: DisjointSets<AxisId>,
    /// Class root -> concrete representative.
    concrete: HashMap<AxisId, AxisId>,
    /// Class root -> effective parallel type.
    parallel_types: HashMap<AxisId, ParallelType>,
    kir_to_fusion: HashMap<kir::AxisId, AxisId>,
    fusion_to_kir: HashMap<AxisId, kir::AxisId>,
}

impl ComputeAtMap {
    pub fn new(mode: MappingMode) -> Self {
        Self {
            mode,
            built: false,
            sets: DisjointSets::new(),
            concrete: HashMap::new(),
            parallel_types: HashMap::new(),
            kir_to_fusion: HashMap::new(),
            fusion_to_kir: HashMap::new(),
        }
    }

    pub fn mode(&self) -> MappingMode {
        self.mode
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Build the classes over every axis of the context's fusion and lower
    /// each axis into the kernel so kernel-axis queries resolve.
    #[tracing::instrument(skip_all, fields(mode = ?self.mode))]
    pub fn build(&mut self, ctx: &mut LowerContext<'_>) -> Result<()> {
        let fusion = ctx.fusion();
        for axis in fusion.all_axes() {
            self.sets.insert(axis);
        }

        let mut unions = 0usize;
        for expr in fusion.exprs() {
            let out = fusion.expr(expr).out();
            if !fusion.val(out).is_tensor() {
                continue;
            }
            for input in fusion.expr(expr).inputs() {
                if !fusion.val(input).is_tensor() {
                    continue;
                }
                for (p, c) in self.replayed_pairs(fusion, input, out)? {
                    unions += usize::from(self.sets.union(p, c));
                }
            }
        }
        self.sets.compress();

        let classes = self.sets.classes();
        for (root, members) in &classes {
            let concrete = pick_concrete(fusion, members)?;
            self.concrete.insert(*root, concrete);
            let parallel_type = self.class_parallel_type(fusion, members)?;
            self.parallel_types.insert(*root, parallel_type);
        }

        for (_, members) in &classes {
            for &axis in members {
                let k = ctx.lower_axis(axis)?;
                self.kir_to_fusion.insert(k, axis);
                self.fusion_to_kir.insert(axis, k);
            }
        }

        self.built = true;
        tracing::debug!(axes = self.sets.len(), classes = classes.len(), unions, "compute-at map built");
        Ok(())
    }

    fn replayed_pairs(
        &self,
        fusion: &Fusion,
        producer: trellis_ir::ValId,
        consumer: trellis_ir::ValId,
    ) -> Result<Vec<(AxisId, AxisId)>> {
        let root_pairs = pairwise_root_map(fusion, producer, consumer)?;
        let pairs = best_effort_replay(fusion, producer, consumer, &root_pairs, self.mode != MappingMode::Index)?;
        if self.mode != MappingMode::Parallel {
            return Ok(pairs);
        }
        let producer_tv = fusion.tensor_view(producer)?;
        let shared = &producer_tv.leaf()[..producer_tv.compute_at_pos()];
        Ok(pairs.into_iter().filter(|(p, _)| shared.contains(p)).collect())
    }

    /// The non-serial parallel type of a class. Two different non-serial
    /// types in one class are a conflict in `Parallel` mode; other modes keep
    /// the first one seen.
    fn class_parallel_type(&self, fusion: &Fusion, members: &[AxisId]) -> Result<ParallelType> {
        let mut found: Option<AxisId> = None;
        for &axis in members {
            let pt = fusion.axis(axis).parallel_type();
            if pt == ParallelType::Serial {
                continue;
            }
            match found {
                None => found = Some(axis),
                Some(first) if self.mode == MappingMode::Parallel => {
                    let existing = fusion.axis(first).parallel_type();
                    snafu::ensure!(
                        existing == pt,
                        ParallelTypeConflictSnafu {
                            axis: first,
                            other: axis,
                            existing: existing.to_string(),
                            requested: pt.to_string(),
                        }
                    );
                }
                Some(_) => {}
            }
        }
        Ok(found.map_or(ParallelType::Serial, |a| fusion.axis(a).parallel_type()))
    }

    fn ensure_built(&self) -> Result<()> {
        snafu::ensure!(self.built, MapNotBuiltSnafu { mode: self.mode });
        Ok(())
    }

    fn class_root(&self, axis: AxisId) -> Result<AxisId> {
        self.ensure_built()?;
        self.sets.root(axis).context(AxisNotMappedSnafu { axis, mode: self.mode })
    }

    // ------------------------------------------------------------------
    // Fusion-axis queries
    // ------------------------------------------------------------------

    pub fn are_mapped(&self, a: AxisId, b: AxisId) -> Result<bool> {
        Ok(self.class_root(a)? == self.class_root(b)?)
    }

    pub fn concrete_id(&self, axis: AxisId) -> Result<AxisId> {
        let root = self.class_root(axis)?;
        Ok(self.concrete[&root])
    }

    pub fn parallel_type(&self, axis: AxisId) -> Result<ParallelType> {
        let root = self.class_root(axis)?;
        Ok(self.parallel_types[&root])
    }

    /// Members of the class containing `axis`, oldest first.
    pub fn class_of(&self, axis: AxisId) -> Result<Vec<AxisId>> {
        self.class_root(axis)?;
        Ok(self.sets.class_of(axis))
    }

    pub fn num_classes(&self) -> usize {
        self.concrete.len()
    }

    // ------------------------------------------------------------------
    // Kernel-axis queries
    // ------------------------------------------------------------------

    fn fusion_axis_of(&self, axis: kir::AxisId) -> Result<AxisId> {
        self.ensure_built()?;
        self.kir_to_fusion.get(&axis).copied().context(KernelAxisNotMappedSnafu { axis, mode: self.mode })
    }

    pub fn kir_are_mapped(&self, a: kir::AxisId, b: kir::AxisId) -> Result<bool> {
        self.are_mapped(self.fusion_axis_of(a)?, self.fusion_axis_of(b)?)
    }

    pub fn kir_concrete_id(&self, axis: kir::AxisId) -> Result<kir::AxisId> {
        let concrete = self.concrete_id(self.fusion_axis_of(axis)?)?;
        Ok(self.fusion_to_kir[&concrete])
    }

    pub fn kir_parallel_type(&self, axis: kir::AxisId) -> Result<ParallelType> {
        self.parallel_type(self.fusion_axis_of(axis)?)
    }

    /// Human-readable class listing, one class per line.
    pub fn describe(&self, fusion: &Fusion) -> String {
        self.sets
            .classes()
            .into_iter()
            .map(|(root, members)| {
                let concrete = self.concrete.get(&root).copied().unwrap_or(root);
                let pt = self.parallel_types.get(&root).copied().unwrap_or_default();
                let extent = fusion.describe(fusion.axis(concrete).extent());
                format!("{{{}}} -> {concrete}[{extent}] ({pt})", members.iter().join(", "))
            })
            .join("\n")
    }
}

/// Non-broadcast first, then larger static extent, then lowest id.
fn pick_concrete(fusion: &Fusion, members: &[AxisId]) -> Result<AxisId> {
    let mut ee = ExpressionEvaluator::new(fusion);
    let mut best: Option<((bool, Reverse<Option<i64>>, AxisId), AxisId)> = None;
    for &axis in members {
        let id = fusion.axis(axis);
        let key = (id.is_broadcast(), Reverse(ee.evaluate(id.extent())?), axis);
        if best.as_ref().is_none_or(|(k, _)| key < *k) {
            best = Some((key, axis));
        }
    }
    Ok(best.map_or(members[0], |(_, axis)| axis))
}

/// The three maps lowering needs, built together.
#[derive(Debug, Clone)]
pub struct ComputeAtMaps {
    pub parallel: ComputeAtMap,
    pub loop_map: ComputeAtMap,
    pub index: ComputeAtMap,
}

impl ComputeAtMaps {
    #[tracing::instrument(skip_all)]
    pub fn build(ctx: &mut LowerContext<'_>) -> Result<Self> {
        let mut parallel = ComputeAtMap::new(MappingMode::Parallel);
        let mut loop_map = ComputeAtMap::new(MappingMode::Loop);
        let mut index = ComputeAtMap::new(MappingMode::Index);
        parallel.build(ctx)?;
        loop_map.build(ctx)?;
        index.build(ctx)?;
        Ok(Self { parallel, loop_map, index })
    }
}
