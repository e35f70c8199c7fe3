// SPDX-License-Identifier: Apache-2.0

//! Common constants used across implementations
//!
//! This module centralizes digit widths, tile sizes and the thresholds that pick between
//! the sequential and data-parallel host paths.

// =============================================================================
// RADIX SORT
// =============================================================================

/// Bits consumed per digit pass. 16/32/64-bit keys take 2/4/8 passes.
pub const RADIX_BITS: u32 = 8;
pub const RADIX_BUCKETS: usize = 1 << RADIX_BITS;
pub const RADIX_MASK: u64 = (RADIX_BUCKETS as u64) - 1;

// =============================================================================
// HOST BACKEND (rayon lanes)
// =============================================================================

/// Default elements per tile, the host analogue of a thread block's work.
pub const DEFAULT_BLOCK_SIZE: usize = 16384;
pub const MIN_BLOCK_SIZE: usize = 256;
pub const MAX_BLOCK_SIZE: usize = 1 << 24;

/// Upper bound on worker threads accepted from configuration.
pub const MAX_WORKER_THREADS: usize = 1024;

// Below these sizes the fan-out costs more than it saves
pub const PARALLEL_THRESHOLD_SORT: usize = 8192;
pub const PARALLEL_THRESHOLD_SEARCH: usize = 4096;
pub const PARALLEL_THRESHOLD_CHECK: usize = 65536;

// =============================================================================
// GPU/CUDA Constants
// =============================================================================

pub use gpu_constants::*;

mod gpu_constants {
    // Host slices shorter than these stay on the host instead of being staged
    // through device memory
    pub const GPU_THRESHOLD_SORT: usize = 4096;
    pub const GPU_THRESHOLD_SEARCH: usize = 2048;
}

// =============================================================================
// C BOUNDARY
// =============================================================================

pub const BACKEND_CODE_AUTO: i32 = 0;
pub const BACKEND_CODE_HOST: i32 = 1;
pub const BACKEND_CODE_CUDA: i32 = 2;

/// Environment variables read by `EngineConfig::from_env`
pub const ENV_BACKEND: &str = "BUC_BACKEND";
pub const ENV_BLOCK_SIZE: &str = "BUC_BLOCK_SIZE";
pub const ENV_THREADS: &str = "BUC_THREADS";
pub const ENV_CHECK_SORTED: &str = "BUC_CHECK_SORTED";
