//! Lowering configuration.
//!
//! Provides typed configuration for the lowering pipeline with a bon builder
//! and environment variable fallbacks.

use bon::bon;

/// Lanes per hardware warp on the default target.
pub const DEFAULT_WARP_SIZE: i64 = 32;

/// Knobs for [`lower_fusion`](crate::lower_fusion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowerConfig {
    /// Lanes per hardware warp. Warp-reduce fusion only fires on axes proven
    /// to span exactly this many lanes.
    pub warp_size: i64,
    /// Run warp-reduce fusion after loop-nest generation.
    pub fuse_warp_reduce: bool,
    /// Guard expressions whose outputs are only valid on lane/block 0.
    pub insert_predicates: bool,
}

impl Default for LowerConfig {
    fn default() -> Self {
        Self { warp_size: DEFAULT_WARP_SIZE, fuse_warp_reduce: true, insert_predicates: true }
    }
}

#[bon]
impl LowerConfig {
    /// Create a lowering configuration with builder pattern.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_WARP_SIZE)] warp_size: i64,
        #[builder(default = true)] fuse_warp_reduce: bool,
        #[builder(default = true)] insert_predicates: bool,
    ) -> Self {
        Self { warp_size, fuse_warp_reduce, insert_predicates }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TRELLIS_WARP_SIZE` - Lanes per warp (default: 32)
    /// * `TRELLIS_NO_WARP_FUSION` - Disable warp-reduce fusion if set
    /// * `TRELLIS_NO_PREDICATES` - Disable thread-predicate guards if set
    pub fn from_env() -> Self {
        let warp_size = std::env::var("TRELLIS_WARP_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&w: &i64| w > 0)
            .unwrap_or(DEFAULT_WARP_SIZE);
        let fuse_warp_reduce = std::env::var("TRELLIS_NO_WARP_FUSION").is_err();
        let insert_predicates = std::env::var("TRELLIS_NO_PREDICATES").is_err();

        Self { warp_size, fuse_warp_reduce, insert_predicates }
    }
}
