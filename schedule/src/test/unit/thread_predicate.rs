use enumset::EnumSet;
use trellis_ir::kir::Stmt;
use trellis_ir::{DataType, ErrorKind, Fusion, MemoryType, ParallelType, ParallelTypeBitmap};

use crate::config::LowerConfig;
use crate::error::Error;
use crate::pipeline::lower_fusion;
use crate::test::helpers::{WarpReduceShape, context_with_maps, warp_reduce_fusion};
use crate::thread_predicate::ThreadPredicateMap;

fn tidx() -> ParallelTypeBitmap {
    EnumSet::only(ParallelType::TIDx)
}

#[test]
fn test_reduction_limits_until_broadcast() {
    let w = warp_reduce_fusion(WarpReduceShape::default());
    let (_ctx, maps) = context_with_maps(&w.fusion);
    let tpm = ThreadPredicateMap::build(&w.fusion, &maps.loop_map).unwrap();

    assert_eq!(tpm.get(w.t0).unwrap().limited_types, EnumSet::empty());

    let t1 = tpm.get(w.t1).unwrap();
    assert_eq!(t1.limited_types, tidx());
    assert_eq!(t1.source_map[&ParallelType::TIDx].as_slice(), &[w.t1]);

    let t2 = tpm.get(w.t2).unwrap();
    assert!(t2.limited_types.is_empty());
    assert!(t2.source_map.is_empty());
    // Every lane holds the same broadcast value.
    assert_eq!(t2.redundant_types, tidx());

    let t3 = tpm.get(w.t3).unwrap();
    assert!(t3.limited_types.is_empty());
    assert!(t3.redundant_types.is_empty());
    assert!(tpm.get_predicated_parallel_types(w.t3).unwrap().is_empty());
}

#[test]
fn test_predicate_expression() {
    let w = warp_reduce_fusion(WarpReduceShape::default());
    let (mut ctx, maps) = context_with_maps(&w.fusion);
    let tpm = ThreadPredicateMap::build(&w.fusion, &maps.loop_map).unwrap();

    let pred = tpm.get_predicate(ctx.kernel_mut(), w.t1).unwrap().unwrap();
    assert_eq!(ctx.kernel().describe(pred), "(threadIdx.x eq 0)");
    assert_eq!(tpm.get_predicate(ctx.kernel_mut(), w.t3).unwrap(), None);
}

#[test]
fn test_missing_tensor() {
    let w = warp_reduce_fusion(WarpReduceShape::default());
    let tpm = ThreadPredicateMap::default();
    let err = tpm.get(w.t1).unwrap_err();
    assert!(matches!(err, Error::MissingThreadPredicate { .. }), "{err}");
}

#[test]
fn test_parallel_broadcast_domains() {
    let local = warp_reduce_fusion(WarpReduceShape::default());
    let (_ctx, maps) = context_with_maps(&local.fusion);
    let tpm = ThreadPredicateMap::build(&local.fusion, &maps.loop_map).unwrap();
    assert_eq!(tpm.get_parallel_broadcast_domains(&local.fusion, &maps.loop_map, local.t2).unwrap(), tidx());
    // Not a broadcast.
    assert!(tpm.get_parallel_broadcast_domains(&local.fusion, &maps.loop_map, local.t3).unwrap().is_empty());

    let shared = warp_reduce_fusion(WarpReduceShape { broadcast_memory: MemoryType::Shared, ..Default::default() });
    let (_ctx, maps) = context_with_maps(&shared.fusion);
    let tpm = ThreadPredicateMap::build(&shared.fusion, &maps.loop_map).unwrap();
    assert!(tpm.get_parallel_broadcast_domains(&shared.fusion, &maps.loop_map, shared.t2).unwrap().is_empty());
}

#[test]
fn test_block_reduction_limits_block_dimension() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor(&[16, 8], DataType::Float32).unwrap();
    fusion.add_input(t0);
    let t1 = fusion.sum(t0, &[0]).unwrap();
    let t2 = fusion.set(t1).unwrap();
    fusion.add_output(t2);
    fusion.parallelize(t1, 0, ParallelType::BIDx).unwrap();
    fusion.parallelize(t1, 1, ParallelType::TIDx).unwrap();
    fusion.parallelize(t2, 0, ParallelType::TIDx).unwrap();

    let (_ctx, maps) = context_with_maps(&fusion);
    let tpm = ThreadPredicateMap::build(&fusion, &maps.loop_map).unwrap();
    let info = tpm.get(t2).unwrap();
    assert_eq!(info.limited_types, EnumSet::only(ParallelType::BIDx));
    assert_eq!(info.source_map[&ParallelType::BIDx].as_slice(), &[t1]);
    assert_eq!(tpm.get_predicated_parallel_types(t2).unwrap(), EnumSet::only(ParallelType::BIDx));
}

#[test]
fn test_mismatched_parallel_reductions() {
    let mut fusion = Fusion::new();
    let a = fusion.tensor(&[4, 8], DataType::Float32).unwrap();
    let b = fusion.tensor(&[4, 8], DataType::Float32).unwrap();
    fusion.add_input(a);
    fusion.add_input(b);
    let ra = fusion.sum(a, &[1]).unwrap();
    let rb = fusion.sum(b, &[1]).unwrap();
    let out = fusion.add(ra, rb).unwrap();
    fusion.add_output(out);
    fusion.parallelize(ra, 1, ParallelType::TIDx).unwrap();
    fusion.parallelize(rb, 1, ParallelType::TIDy).unwrap();

    let (_ctx, maps) = context_with_maps(&fusion);
    let err = ThreadPredicateMap::build(&fusion, &maps.loop_map).unwrap_err();
    assert!(matches!(err, Error::MismatchedParallelReduction { tensor, .. } if tensor == out), "{err}");
    assert_eq!(err.kind(), ErrorKind::UnsupportedPattern);
}

#[test]
fn test_elementwise_consumer_is_guarded() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor(&[4, 32], DataType::Float32).unwrap();
    fusion.add_input(t0);
    let t1 = fusion.sum(t0, &[1]).unwrap();
    let t2 = fusion.set(t1).unwrap();
    fusion.add_output(t2);
    fusion.parallelize(t1, 1, ParallelType::TIDx).unwrap();

    let lowered = lower_fusion(&fusion, &LowerConfig::default()).unwrap();
    let mut guards = Vec::new();
    trellis_ir::kir::visit(&lowered.stmts, &mut |s| {
        if let Stmt::IfThenElse { cond, then_body, .. } = s {
            guards.push((lowered.kernel.describe(*cond), then_body.len()));
        }
    });
    assert_eq!(guards, vec![("(threadIdx.x eq 0)".to_string(), 1)]);
    assert!(lowered.render().contains("if (threadIdx.x eq 0)"));
}
