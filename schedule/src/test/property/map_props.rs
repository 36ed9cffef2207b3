//! Property tests for compute-at map laws over random schedules.

use proptest::prelude::*;
use trellis_ir::{AxisId, DataType, Fusion, ParallelType, ValId};

use crate::compute_at_map::{ComputeAtMap, MappingMode};
use crate::context::LowerContext;
use crate::thread_predicate::ThreadPredicateMap;

#[derive(Debug, Clone, Copy)]
enum Op {
    Split { pos: usize, factor: i64 },
    Merge { pos: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..8, 1i64..5).prop_map(|(pos, factor)| Op::Split { pos, factor }),
        (0usize..8).prop_map(|pos| Op::Merge { pos }),
    ]
}

fn arb_mode() -> impl Strategy<Value = MappingMode> {
    prop_oneof![Just(MappingMode::Parallel), Just(MappingMode::Loop), Just(MappingMode::Index)]
}

/// Apply `ops` to `tv`, resolving positions against the current rank.
fn schedule(fusion: &mut Fusion, tv: ValId, ops: &[Op]) {
    for &op in ops {
        let rank = fusion.tensor_view(tv).unwrap().leaf().len();
        match op {
            Op::Split { pos, factor } => {
                fusion.split(tv, (pos % rank) as i64, factor, true).unwrap();
            }
            Op::Merge { pos } if rank > 1 => {
                fusion.merge(tv, (pos % (rank - 1)) as i64).unwrap();
            }
            Op::Merge { .. } => {}
        }
    }
}

/// `T1 = set(T0)`, `T2 = set(T1)`, all three scheduled by `ops`.
fn scheduled_chain(extents: &[i64], ops: &[Op], compute_at: (usize, usize)) -> (Fusion, [ValId; 3]) {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor(extents, DataType::Float32).unwrap();
    fusion.add_input(t0);
    let t1 = fusion.set(t0).unwrap();
    let t2 = fusion.set(t1).unwrap();
    fusion.add_output(t2);
    for tv in [t0, t1, t2] {
        schedule(&mut fusion, tv, ops);
    }
    let rank = fusion.tensor_view(t2).unwrap().leaf().len();
    fusion.set_compute_at(t0, compute_at.0 % (rank + 1)).unwrap();
    fusion.set_compute_at(t1, compute_at.1 % (rank + 1)).unwrap();
    (fusion, [t0, t1, t2])
}

fn leaves(fusion: &Fusion, tensors: &[ValId]) -> Vec<AxisId> {
    tensors.iter().flat_map(|&tv| fusion.tensor_view(tv).unwrap().leaf().to_vec()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Mapping is an equivalence relation over every axis.
    #[test]
    fn mapping_is_equivalence(
        extents in prop::collection::vec(1i64..16, 1..3),
        ops in prop::collection::vec(arb_op(), 0..4),
        compute_at in (0usize..8, 0usize..8),
        mode in arb_mode(),
    ) {
        let (fusion, _) = scheduled_chain(&extents, &ops, compute_at);
        let mut ctx = LowerContext::new(&fusion, 32);
        let mut map = ComputeAtMap::new(mode);
        map.build(&mut ctx).unwrap();

        let axes: Vec<AxisId> = fusion.all_axes().collect();
        for &a in &axes {
            prop_assert!(map.are_mapped(a, a).unwrap());
            for &b in &axes {
                let ab = map.are_mapped(a, b).unwrap();
                prop_assert_eq!(ab, map.are_mapped(b, a).unwrap());
                if !ab {
                    continue;
                }
                for &c in &axes {
                    if map.are_mapped(b, c).unwrap() {
                        prop_assert!(map.are_mapped(a, c).unwrap(), "{} ~ {} ~ {} not transitive", a, b, c);
                    }
                }
            }
        }
    }

    /// The concrete axis belongs to its class and is its own concrete axis.
    #[test]
    fn concrete_is_idempotent(
        extents in prop::collection::vec(1i64..16, 1..3),
        ops in prop::collection::vec(arb_op(), 0..4),
        compute_at in (0usize..8, 0usize..8),
        mode in arb_mode(),
    ) {
        let (fusion, _) = scheduled_chain(&extents, &ops, compute_at);
        let mut ctx = LowerContext::new(&fusion, 32);
        let mut map = ComputeAtMap::new(mode);
        map.build(&mut ctx).unwrap();

        for a in fusion.all_axes() {
            let c = map.concrete_id(a).unwrap();
            prop_assert!(map.are_mapped(a, c).unwrap());
            prop_assert_eq!(map.concrete_id(c).unwrap(), c);
            let k = ctx.kernel_axis(a).unwrap();
            prop_assert_eq!(ctx.fusion_axis(map.kir_concrete_id(k).unwrap()), Some(c));
        }
    }

    /// Identically scheduled tensors map leaf by leaf in the loop map.
    #[test]
    fn identical_schedules_map_leafwise(
        extents in prop::collection::vec(1i64..16, 1..3),
        ops in prop::collection::vec(arb_op(), 0..4),
    ) {
        let (fusion, [t0, t1, t2]) = scheduled_chain(&extents, &ops, (0, 0));
        let mut ctx = LowerContext::new(&fusion, 32);
        let mut map = ComputeAtMap::new(MappingMode::Loop);
        map.build(&mut ctx).unwrap();

        let leaf0 = leaves(&fusion, &[t0]);
        for tv in [t1, t2] {
            for (&a, &b) in leaf0.iter().zip(&leaves(&fusion, &[tv])) {
                prop_assert!(map.are_mapped(a, b).unwrap());
            }
        }
    }

    /// Without reductions no tensor is limited to one lane.
    #[test]
    fn no_reduction_no_limited_types(
        extents in prop::collection::vec(1i64..16, 1..3),
        ops in prop::collection::vec(arb_op(), 0..4),
        bind in prop::sample::select(vec![ParallelType::TIDx, ParallelType::TIDy, ParallelType::BIDx]),
    ) {
        let (mut fusion, tensors) = scheduled_chain(&extents, &ops, (0, 0));
        fusion.parallelize(tensors[2], 0, bind).unwrap();
        let mut ctx = LowerContext::new(&fusion, 32);
        let mut map = ComputeAtMap::new(MappingMode::Loop);
        map.build(&mut ctx).unwrap();

        let tpm = ThreadPredicateMap::build(&fusion, &map).unwrap();
        for tv in tensors {
            prop_assert!(tpm.get(tv).unwrap().limited_types.is_empty());
            prop_assert!(tpm.get_predicate(ctx.kernel_mut(), tv).unwrap().is_none());
        }
    }
}
