//! Producer/consumer axis correspondence.
//!
//! Two steps relate the axes of a producer tensor to those of a consumer:
//!
//! 1. [`pairwise_root_map`] pairs the producer's rfactor-or-root axes (minus
//!    reductions) with the consumer's root axes, position by position,
//!    skipping consumer axes that a broadcast introduced.
//! 2. [`best_effort_replay`] pushes those root pairs through the consumer's
//!    transform history, pairing split and merge outputs whenever the
//!    producer applied a matching transform to the paired inputs.
//!
//! Replay is best effort: a transform without a producer counterpart simply
//! ends propagation along that path.

use std::collections::HashMap;

use trellis_ir::{AxisId, Expr, Fusion, Transform, TransformId, ValId};

use crate::error::*;

/// Pair producer rfactor-or-root axes with consumer root axes.
///
/// Reduction axes of the producer are dropped (the consumer never iterates
/// over them). When `consumer` is defined by a broadcast, the root positions
/// the broadcast inserted have no producer counterpart and are skipped.
pub fn pairwise_root_map(fusion: &Fusion, producer: ValId, consumer: ValId) -> Result<Vec<(AxisId, AxisId)>> {
    let producer_axes = fusion.producer_axes(producer)?;
    let consumer_root = fusion.tensor_view(consumer)?.domain().root();

    let new_axes: Vec<bool> = match fusion.val(consumer).definition().map(|e| fusion.expr(e)) {
        Some(Expr::Broadcast { flags, .. }) => flags.to_vec(),
        _ => vec![false; consumer_root.len()],
    };

    let kept = consumer_root.iter().zip(&new_axes).filter(|&(_, &is_new)| !is_new).map(|(&c, _)| c);
    Ok(producer_axes.into_iter().zip(kept).collect())
}

/// Propagate `root_pairs` through the consumer's split/merge history.
///
/// Splits match when factor, direction and offsets agree; merges match when
/// both inputs are paired and the producer merged them in the same order.
/// With `forward_broadcast`, a consumer merge of a paired axis with a
/// broadcast axis also pairs the producer axis with the merge output, so
/// later consumer transforms on that output can keep matching the producer.
///
/// Returned pairs include `root_pairs`; one producer axis may appear in more
/// than one pair.
pub fn best_effort_replay(
    fusion: &Fusion,
    producer: ValId,
    consumer: ValId,
    root_pairs: &[(AxisId, AxisId)],
    forward_broadcast: bool,
) -> Result<Vec<(AxisId, AxisId)>> {
    let producer_tv = fusion.tensor_view(producer)?;
    let consumer_tv = fusion.tensor_view(consumer)?;

    let producer_uses = uses_by_input(
        fusion,
        &fusion.transforms_between(producer_tv.domain().root(), producer_tv.leaf()),
    );
    let consumer_history = fusion.transforms_between(consumer_tv.domain().root(), consumer_tv.leaf());

    let mut pairs = root_pairs.to_vec();
    let mut c2p: HashMap<AxisId, AxisId> = root_pairs.iter().map(|&(p, c)| (c, p)).collect();

    for tr in consumer_history {
        match *fusion.transform(tr) {
            Transform::Split { input, outer, inner, factor, inner_split, start_offset, stop_offset } => {
                let Some(&p_in) = c2p.get(&input) else { continue };
                let Some(&p_tr) = producer_uses.get(&p_in) else { continue };
                let Transform::Split {
                    outer: p_outer,
                    inner: p_inner,
                    factor: p_factor,
                    inner_split: p_inner_split,
                    start_offset: p_start,
                    stop_offset: p_stop,
                    ..
                } = *fusion.transform(p_tr)
                else {
                    continue;
                };
                let matches = inner_split == p_inner_split
                    && fusion.scalar_same_as(factor, p_factor)
                    && fusion.scalar_same_as(start_offset, p_start)
                    && fusion.scalar_same_as(stop_offset, p_stop);
                if matches {
                    for (p, c) in [(p_outer, outer), (p_inner, inner)] {
                        pairs.push((p, c));
                        c2p.insert(c, p);
                    }
                }
            }
            Transform::Merge { outer, inner, output } => {
                let p_outer = c2p.get(&outer).copied();
                let p_inner = c2p.get(&inner).copied();
                if let (Some(po), Some(pi)) = (p_outer, p_inner)
                    && let Some(&p_tr) = producer_uses.get(&po)
                    && let Transform::Merge { outer: mo, inner: mi, output: p_output } = *fusion.transform(p_tr)
                    && mo == po
                    && mi == pi
                {
                    pairs.push((p_output, output));
                    c2p.insert(output, p_output);
                    continue;
                }
                if !forward_broadcast {
                    continue;
                }
                let forwarded = match (p_outer, p_inner) {
                    (Some(po), _) if fusion.axis(inner).is_broadcast() => Some(po),
                    (_, Some(pi)) if fusion.axis(outer).is_broadcast() => Some(pi),
                    _ => None,
                };
                if let Some(p) = forwarded {
                    tracing::trace!(producer = %p, merged = %output, "forwarding broadcast merge");
                    pairs.push((p, output));
                    c2p.insert(output, p);
                }
            }
        }
    }
    Ok(pairs)
}

/// Map each axis to the transform in `history` that consumes it.
fn uses_by_input(fusion: &Fusion, history: &[TransformId]) -> HashMap<AxisId, TransformId> {
    let mut uses = HashMap::new();
    for &tr in history {
        for input in fusion.transform(tr).inputs() {
            uses.insert(input, tr);
        }
    }
    uses
}
