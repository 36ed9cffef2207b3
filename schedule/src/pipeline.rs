//! End-to-end lowering of a scheduled fusion.
//!
//! # Pipeline Stages
//!
//! 1. Compute-at maps (parallel, loop, index) and the partial-split map
//! 2. Thread-predicate map
//! 3. Loop-nest generation over `fusion.exprs()`
//! 4. Allocation insertion
//! 5. Thread-predicate guards (`LowerConfig::insert_predicates`)
//! 6. Warp-reduce fusion (`LowerConfig::fuse_warp_reduce`)
//!
//! The statement tree is logged at debug level after every stage that
//! changes it.

use trellis_ir::kir::{Kernel, Stmt, render_stmts};
use trellis_ir::{ExprId, Fusion};

use crate::allocation::insert_allocations;
use crate::compute_at_map::ComputeAtMaps;
use crate::config::LowerConfig;
use crate::context::{LowerContext, WarpPaddedInfo};
use crate::error::*;
use crate::loop_nest::LoopNestGenerator;
use crate::partial_split::PartialSplitMap;
use crate::predicate::insert_thread_predicates;
use crate::thread_predicate::ThreadPredicateMap;
use crate::warp_reduce::fuse_warp_reduce;

/// Everything lowering hands to code emission.
#[derive(Debug)]
pub struct LoweredKernel {
    pub kernel: Kernel,
    pub stmts: Vec<Stmt>,
    pub thread_predicates: ThreadPredicateMap,
    pub partial_splits: PartialSplitMap,
    pub warp_padded: WarpPaddedInfo,
}

impl LoweredKernel {
    /// ASCII tree of the statement list.
    pub fn render(&self) -> String {
        render_stmts(&self.kernel, &self.stmts)
    }
}

/// Lower `fusion` using its reachable expressions in creation order.
#[tracing::instrument(skip_all)]
pub fn lower_fusion(fusion: &Fusion, config: &LowerConfig) -> Result<LoweredKernel> {
    lower_fusion_with_order(fusion, &fusion.exprs(), config)
}

/// Lower `fusion` with an externally supplied topological expression order.
#[tracing::instrument(skip_all, fields(exprs = exprs.len(), warp_size = config.warp_size))]
pub fn lower_fusion_with_order(fusion: &Fusion, exprs: &[ExprId], config: &LowerConfig) -> Result<LoweredKernel> {
    let mut ctx = LowerContext::new(fusion, config.warp_size);

    let maps = ComputeAtMaps::build(&mut ctx)?;
    let partial_splits = PartialSplitMap::build(&mut ctx)?;
    let thread_predicates = ThreadPredicateMap::build(fusion, &maps.loop_map)?;

    let mut generator = LoopNestGenerator::new(&maps.parallel, &maps.index);
    let stmts = generator.generate(&mut ctx, exprs)?;
    log_stage(&ctx, "loop nest", &stmts);

    let mut stmts = insert_allocations(&mut ctx, stmts)?;
    log_stage(&ctx, "allocations", &stmts);

    if config.insert_predicates {
        stmts = insert_thread_predicates(&mut ctx, &thread_predicates, stmts)?;
        log_stage(&ctx, "thread predicates", &stmts);
    }

    if config.fuse_warp_reduce {
        stmts = fuse_warp_reduce(&mut ctx, config.warp_size, stmts)?;
        log_stage(&ctx, "warp reduce", &stmts);
    }

    let warp_padded = ctx.warp_padded_info();
    Ok(LoweredKernel { kernel: ctx.into_kernel(), stmts, thread_predicates, partial_splits, warp_padded })
}

fn log_stage(ctx: &LowerContext<'_>, stage: &str, stmts: &[Stmt]) {
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(stage, tree = %render_stmts(ctx.kernel(), stmts), "lowered statements");
    }
}
