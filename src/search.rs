// SPDX-License-Identifier: Apache-2.0

//! Host-backend batched binary search
//!
//! Every query is resolved by its own binary search over the sorted array. Queries are
//! handed to the worker pool in tiles of `block_size`, the host stand-in for one GPU lane
//! per query; results never depend on neighbouring queries.

use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::constants::{PARALLEL_THRESHOLD_CHECK, PARALLEL_THRESHOLD_SEARCH};
use crate::keys::RadixKey;
use crate::types::{BucError, Result};

/// Which side of a run of equal entries a search lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoundKind {
    /// Past every entry `<= query`.
    Upper = 0,
    /// Before every entry `>= query`.
    Lower = 1,
}

impl BoundKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            BoundKind::Upper => "upper bound",
            BoundKind::Lower => "lower bound",
        }
    }
}

/// Number of entries of `sorted` that are `<= target` in key order.
#[inline]
pub fn upper_bound_one<T: RadixKey>(sorted: &[T], target: T) -> usize {
    let mut left = 0;
    let mut right = sorted.len();

    while left < right {
        let mid = left + (right - left) / 2;
        if sorted[mid].key_le(target) {
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    left
}

/// Number of entries of `sorted` that are `< target` in key order.
#[inline]
pub fn lower_bound_one<T: RadixKey>(sorted: &[T], target: T) -> usize {
    let mut left = 0;
    let mut right = sorted.len();

    while left < right {
        let mid = left + (right - left) / 2;
        if sorted[mid].key_lt(target) {
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    left
}

/// Writes `upper_bound_one(sorted, queries[i])` into `out[i]` for every query.
///
/// # Errors
/// `BucError::Config` for an invalid `config`, `BucError::InvalidArgument` when
/// `out.len() != queries.len()`.
pub fn upper_bound_batch<T: RadixKey>(
    sorted: &[T],
    queries: &[T],
    out: &mut [i64],
    config: &EngineConfig,
) -> Result<()> {
    search_batch(sorted, queries, out, config, upper_bound_one::<T>)
}

/// Writes `lower_bound_one(sorted, queries[i])` into `out[i]` for every query.
pub fn lower_bound_batch<T: RadixKey>(
    sorted: &[T],
    queries: &[T],
    out: &mut [i64],
    config: &EngineConfig,
) -> Result<()> {
    search_batch(sorted, queries, out, config, lower_bound_one::<T>)
}

fn search_batch<T, F>(
    sorted: &[T],
    queries: &[T],
    out: &mut [i64],
    config: &EngineConfig,
    search: F,
) -> Result<()>
where
    T: RadixKey,
    F: Fn(&[T], T) -> usize + Sync,
{
    config.validate()?;
    if out.len() != queries.len() {
        return Err(BucError::InvalidArgument(format!(
            "out has {} slots for {} queries",
            out.len(),
            queries.len()
        )));
    }

    if sorted.is_empty() {
        out.fill(0);
        return Ok(());
    }

    if queries.len() < PARALLEL_THRESHOLD_SEARCH {
        for (slot, &query) in out.iter_mut().zip(queries) {
            *slot = search(sorted, query) as i64;
        }
        return Ok(());
    }

    let block_size = config.block_size;
    config.install(|| {
        out.par_chunks_mut(block_size)
            .zip(queries.par_chunks(block_size))
            .for_each(|(slots, tile)| {
                for (slot, &query) in slots.iter_mut().zip(tile) {
                    *slot = search(sorted, query) as i64;
                }
            });
    })
}

/// Whether `values` is non-decreasing in key order.
pub fn is_sorted<T: RadixKey>(values: &[T], config: &EngineConfig) -> Result<bool> {
    config.validate()?;
    if values.len() < PARALLEL_THRESHOLD_CHECK {
        return Ok(values.windows(2).all(|w| w[0].key_le(w[1])));
    }

    config.install(|| values.par_windows(2).all(|w| w[0].key_le(w[1])))
}
