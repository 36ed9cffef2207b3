//! Which parallel lanes hold a tensor's valid value.
//!
//! After a reduction over a thread or block dimension only lane (block) 0 of
//! that dimension holds the result. The dimension is *limited* for the
//! reduction output and for every downstream tensor, until a broadcast on
//! that dimension re-expands the value to all lanes.
//!
//! A dimension is *redundant* for a tensor when the kernel launches lanes
//! along it but the tensor has no axis bound to it: every lane computes the
//! same value, so one lane's write is enough.
//!
//! The map over-approximates: an unneeded guard only idles lanes, a missing
//! one is a race.

use std::collections::HashMap;

use enumset::EnumSet;
use itertools::Itertools;
use smallvec::{SmallVec, smallvec};
use snafu::OptionExt;
use trellis_ir::kir::Kernel;
use trellis_ir::{Expr, Fusion, MemoryType, ParallelType, ParallelTypeBitmap, ValId, kir};

use crate::compute_at_map::ComputeAtMap;
use crate::error::*;

/// Per-tensor predicate facts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateInfo {
    /// Only lane/block 0 of these dimensions holds a valid value.
    pub limited_types: ParallelTypeBitmap,
    /// Every lane of these dimensions computes the same value.
    pub redundant_types: ParallelTypeBitmap,
    /// Reduction outputs that made each limited dimension limited.
    pub source_map: HashMap<ParallelType, SmallVec<[ValId; 2]>>,
}

#[derive(Debug, Clone, Default)]
pub struct ThreadPredicateMap {
    infos: HashMap<ValId, PredicateInfo>,
}

impl ThreadPredicateMap {
    /// Propagate limited/redundant bits through `fusion.exprs()` in order.
    ///
    /// Parallel types are resolved through `parallel_map` so an axis picks up
    /// the binding of its whole class.
    #[tracing::instrument(skip_all)]
    pub fn build(fusion: &Fusion, parallel_map: &ComputeAtMap) -> Result<Self> {
        let mut map = Self::default();

        let mut launched = ParallelTypeBitmap::empty();
        for tv in fusion.all_tensors() {
            for &axis in fusion.tensor_view(tv)?.leaf() {
                launched |= simt_type(parallel_map.parallel_type(axis)?);
            }
        }

        for &input in fusion.inputs() {
            if fusion.val(input).is_tensor() {
                map.infos.entry(input).or_default();
            }
        }

        for expr in fusion.exprs() {
            let out = fusion.expr(expr).out();
            if !fusion.val(out).is_tensor() {
                continue;
            }
            let tensor_inputs: Vec<ValId> =
                fusion.expr(expr).inputs().into_iter().filter(|&v| fusion.val(v).is_tensor()).collect();
            map.check_input_reductions(fusion, parallel_map, out, &tensor_inputs)?;

            let mut limited = ParallelTypeBitmap::empty();
            let mut source_map: HashMap<ParallelType, SmallVec<[ValId; 2]>> = HashMap::new();
            for &input in &tensor_inputs {
                let info = map.infos.entry(input).or_default();
                limited |= info.limited_types;
                for (&pt, sources) in &info.source_map {
                    let entry = source_map.entry(pt).or_default();
                    for &s in sources {
                        if !entry.contains(&s) {
                            entry.push(s);
                        }
                    }
                }
            }

            let leaf = fusion.tensor_view(out)?.leaf();
            if matches!(fusion.expr(expr), Expr::Broadcast { .. }) {
                let mut expanded = ParallelTypeBitmap::empty();
                for &axis in leaf {
                    if fusion.axis(axis).is_broadcast() {
                        expanded |= simt_type(parallel_map.parallel_type(axis)?);
                    }
                }
                limited -= expanded;
            }

            let mut reduced = ParallelTypeBitmap::empty();
            let mut bound = ParallelTypeBitmap::empty();
            for &axis in leaf {
                let pt = simt_type(parallel_map.parallel_type(axis)?);
                if fusion.axis(axis).is_reduction() {
                    reduced |= pt;
                } else if !fusion.axis(axis).is_broadcast() {
                    bound |= pt;
                }
            }
            for pt in reduced {
                source_map.insert(pt, smallvec![out]);
            }
            limited |= reduced;
            source_map.retain(|pt, _| limited.contains(*pt));

            let redundant = launched - bound - reduced - limited;
            tracing::trace!(tensor = %out, ?limited, ?redundant, "thread predicate");
            map.infos.insert(out, PredicateInfo { limited_types: limited, redundant_types: redundant, source_map });
        }

        tracing::debug!(
            tensors = map.infos.len(),
            limited = map.infos.values().filter(|i| !i.limited_types.is_empty()).count(),
            "thread predicate map built"
        );
        Ok(map)
    }

    /// Inputs that are themselves outputs of parallel reductions must agree
    /// on the reduced dimensions.
    fn check_input_reductions(
        &self,
        fusion: &Fusion,
        parallel_map: &ComputeAtMap,
        out: ValId,
        inputs: &[ValId],
    ) -> Result<()> {
        let mut first: Option<ParallelTypeBitmap> = None;
        for &input in inputs {
            let mut reduced = ParallelTypeBitmap::empty();
            for &axis in fusion.tensor_view(input)?.leaf() {
                if fusion.axis(axis).is_reduction() {
                    reduced |= simt_type(parallel_map.parallel_type(axis)?);
                }
            }
            if reduced.is_empty() {
                continue;
            }
            match first {
                None => first = Some(reduced),
                Some(types) if types != reduced => {
                    let parallel_types =
                        [types, reduced].iter().map(|s| format!("{{{}}}", s.iter().join(", "))).join(" vs ");
                    return MismatchedParallelReductionSnafu { tensor: out, parallel_types }.fail();
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn get(&self, tv: ValId) -> Result<&PredicateInfo> {
        self.infos.get(&tv).context(MissingThreadPredicateSnafu { tensor: tv })
    }

    /// Guard for writes of `tv`: `idx == 0` for every limited dimension,
    /// AND-ed together. `None` means no guard is needed.
    pub fn get_predicate(&self, kernel: &mut Kernel, tv: ValId) -> Result<Option<kir::ValId>> {
        let limited = self.get(tv)?.limited_types;
        let mut pred = None;
        for pt in limited {
            let Some(index) = kernel.parallel_index(pt) else { continue };
            let zero = kernel.int(0);
            let is_first = kernel.eq(index, zero);
            pred = Some(kernel.and(pred, is_first));
        }
        Ok(pred)
    }

    /// Dimensions along which writes of `tv` are restricted to one lane.
    pub fn get_predicated_parallel_types(&self, tv: ValId) -> Result<ParallelTypeBitmap> {
        let info = self.get(tv)?;
        Ok(info.limited_types | info.redundant_types)
    }

    /// Broadcast dimensions of `tv` that still need an explicit cross-lane
    /// broadcast: bound to a thread/block dimension on which the broadcast
    /// input is limited. Thread dimensions are exempt when `tv` lives in
    /// shared memory, since every lane of the block can read it directly.
    pub fn get_parallel_broadcast_domains(
        &self,
        fusion: &Fusion,
        parallel_map: &ComputeAtMap,
        tv: ValId,
    ) -> Result<ParallelTypeBitmap> {
        self.get(tv)?;
        let Some(Expr::Broadcast { input, .. }) = fusion.val(tv).definition().map(|e| fusion.expr(e)) else {
            return Ok(ParallelTypeBitmap::empty());
        };
        let view = fusion.tensor_view(tv)?;
        let in_smem = view.memory_type() == MemoryType::Shared;

        let mut broadcast = ParallelTypeBitmap::empty();
        for &axis in view.leaf() {
            if !fusion.axis(axis).is_broadcast() {
                continue;
            }
            let pt = parallel_map.parallel_type(axis)?;
            if pt.is_block() || (pt.is_thread() && !in_smem) {
                broadcast.insert(pt);
            }
        }
        Ok(broadcast & self.get(*input)?.limited_types)
    }
}

fn simt_type(pt: ParallelType) -> ParallelTypeBitmap {
    if pt.is_thread_or_block() { EnumSet::only(pt) } else { EnumSet::empty() }
}
