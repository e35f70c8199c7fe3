// SPDX-License-Identifier: Apache-2.0

//! BUC library
//!
//! Bulk in-place sort and batched upper/lower bound over device-resident buffers of
//! fixed-width numerics (`i16`, `i32`, `i64`, `u16`, `u32`, `u64`, `f32`, `f64`), with a
//! flat C ABI on top.
//!
//! - Radix sort, ascending, floats in IEEE-754 totalOrder
//! - Batched upper bound (`<=` count) and lower bound (`<` count) per query
//! - Non-owning buffer views; the library never allocates or frees caller memory
//!
//! ## Backends
//! - **Host** is always available: buffers are host memory and the data-parallel work
//!   runs on a `rayon` pool, tiled the way a GPU launch is
//! - **CUDA** is enabled when detected by `build.rs` (requires `nvcc`); buffers are then
//!   CUDA device pointers
//!
//! ## Usage
//!
//! ```rust
//! let config = buc::EngineConfig::host();
//!
//! let mut values = vec![7u32, 3, 5, 3, 1];
//! buc::sort_slice_with(&config, &mut values).unwrap();
//! assert_eq!(values, vec![1, 3, 3, 5, 7]);
//!
//! let mut counts = vec![0i64; 4];
//! buc::upper_bound_slice_with(&config, &values, &[3, 0, 10, 5], &mut counts).unwrap();
//! assert_eq!(counts, vec![3, 0, 5, 4]);
//!
//! let caps = buc::get_hw_capabilities();
//! println!("Has CUDA: {}", caps.has_cuda);
//! ```

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod ffi;
#[cfg(has_cuda)]
pub mod gpu;
pub mod keys;
pub mod search;
pub mod sort;
pub mod types;

pub use types::*;

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
#[path = "tests/sort_tests.rs"]
mod sort_tests;
#[cfg(test)]
#[path = "tests/search_tests.rs"]
mod search_tests;
#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod dispatch_tests;
#[cfg(test)]
#[path = "tests/ffi_tests.rs"]
mod ffi_tests;

// Re-export the main API
pub use config::{global_config, set_global_config, update_global_config, Backend, EngineConfig};
pub use dispatch::{
    get_hw_capabilities, lower_bound, lower_bound_raw, lower_bound_raw_with, lower_bound_slice,
    lower_bound_slice_with, lower_bound_with, sort, sort_raw, sort_raw_with, sort_slice,
    sort_slice_with, sort_with, upper_bound, upper_bound_raw, upper_bound_raw_with,
    upper_bound_slice, upper_bound_slice_with, upper_bound_with, HardwareCapabilities,
};
pub use keys::RadixKey;
