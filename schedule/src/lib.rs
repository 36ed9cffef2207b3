//! Loop-nest lowering for Trellis fusions.
//!
//! This crate turns a scheduled [`Fusion`](trellis_ir::Fusion) into a kernel-IR
//! statement list: nested loops, buffer allocations and predicated
//! operations, ready for code emission.
//!
//! # Module Organization
//!
//! - [`context`] - Per-fusion lowering context (fusion → kernel id maps, halo widths)
//! - [`root_map`] - Producer/consumer root mapping and best-effort replay
//! - [`compute_at_map`] - Axis equivalence classes (PARALLEL / LOOP / INDEX)
//! - [`partial_split`] - Offsets of partially split root axes
//! - [`thread_predicate`] - Limited and redundant parallel dimensions per tensor
//! - [`loop_nest`] - Loop-nest synthesis and tensor indexing
//! - [`allocation`] - Buffer allocation for intermediate tensors
//! - [`predicate`] - Thread-predicate guards
//! - [`warp_reduce`] - Warp all-reduce fusion with scoped dead-code elimination
//! - [`pipeline`] - The [`lower_fusion`] driver
//! - [`config`] - Lowering configuration
//!
//! # Example
//!
//! ```
//! use trellis_ir::{DataType, Fusion};
//! use trellis_schedule::{LowerConfig, lower_fusion};
//!
//! let mut fusion = Fusion::new();
//! let x = fusion.tensor(&[4, 8], DataType::Float32).unwrap();
//! let y = fusion.set(x).unwrap();
//! fusion.add_input(x);
//! fusion.add_output(y);
//!
//! let lowered = lower_fusion(&fusion, &LowerConfig::default()).unwrap();
//! assert_eq!(lowered.stmts.len(), 1);
//! ```

pub mod allocation;
pub mod compute_at_map;
pub mod config;
pub mod context;
pub mod disjoint_set;
pub mod error;
pub mod loop_nest;
pub mod partial_split;
pub mod pipeline;
pub mod predicate;
pub mod root_map;
pub mod thread_predicate;
pub mod warp_reduce;


pub use allocation::insert_allocations;
pub use compute_at_map::{ComputeAtMap, ComputeAtMaps, MappingMode};
pub use config::{DEFAULT_WARP_SIZE, LowerConfig};
pub use context::{LowerContext, WarpPaddedInfo};
pub use error::{Error, Result};
pub use loop_nest::LoopNestGenerator;
pub use partial_split::PartialSplitMap;
pub use pipeline::{LoweredKernel, lower_fusion, lower_fusion_with_order};
pub use predicate::insert_thread_predicates;
pub use thread_predicate::{PredicateInfo, ThreadPredicateMap};
pub use warp_reduce::fuse_warp_reduce;
