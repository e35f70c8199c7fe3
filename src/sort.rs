// SPDX-License-Identifier: Apache-2.0

//! Host-backend radix sort
//!
//! LSD radix sort over the order-preserving key image from [`crate::keys`], laid out the
//! way a GPU onesweep-style sort is: the input is cut into tiles of `block_size`
//! elements, and every digit pass runs three phases
//!
//! 1. per-tile digit histograms, one rayon task per tile
//! 2. an exclusive scan over `(digit, tile)` that gives every tile a private write cursor
//!    per digit
//! 3. a stable scatter, again one task per tile, into the ping-pong buffer
//!
//! Tiles never write to the same slot, and each tile scatters its elements in input
//! order, so every pass is stable and the LSD sequence is correct. Passes whose digit is
//! the same for every element are skipped, which makes small-magnitude 64-bit inputs cheap.

use log::debug;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::constants::{PARALLEL_THRESHOLD_SORT, RADIX_BITS, RADIX_BUCKETS};
use crate::keys::RadixKey;
use crate::types::{BucError, Result};

type Histogram = [usize; RADIX_BUCKETS];

/// Destination of the scatter phase, shared by all tile tasks.
///
/// Every task writes only the slots its cursors hand out, which are disjoint by
/// construction of the prefix scan.
struct ScatterTarget<T>(*mut T);

unsafe impl<T: Send> Send for ScatterTarget<T> {}
unsafe impl<T: Send> Sync for ScatterTarget<T> {}

impl<T> ScatterTarget<T> {
    /// # Safety
    /// `index` must be in bounds and written by exactly one task during the pass.
    #[inline(always)]
    unsafe fn write(&self, index: usize, value: T) {
        unsafe { self.0.add(index).write(value) }
    }
}

/// Sorts `values` ascending in key order.
///
/// The key image is a bijection of the element bits, so elements that compare equal are
/// bit-identical and stability is unobservable.
///
/// # Errors
/// * `BucError::Config` - `config` fails [`EngineConfig::validate`]
/// * `BucError::Device` - the scratch buffer cannot be reserved or the worker pool
///   cannot be started
///
/// The input is untouched on every error.
pub fn radix_sort<T: RadixKey>(values: &mut [T], config: &EngineConfig) -> Result<()> {
    let len = values.len();
    config.validate()?;

    if len <= 1 {
        return Ok(());
    }

    if len < PARALLEL_THRESHOLD_SORT {
        values.sort_unstable_by(|a, b| a.key_cmp(b));
        return Ok(());
    }

    let mut scratch: Vec<T> = Vec::new();
    scratch.try_reserve_exact(len).map_err(|e| {
        BucError::Device(format!(
            "scratch allocation of {} {} elements failed: {}",
            len,
            T::ELEMENT_TYPE,
            e
        ))
    })?;
    scratch.extend_from_slice(values);

    let block_size = config.block_size;
    config.install(|| lsd_passes(values, &mut scratch, block_size))?;
    Ok(())
}

fn lsd_passes<T: RadixKey>(values: &mut [T], scratch: &mut [T], block_size: usize) {
    let len = values.len();
    let mut sorted_in_values = true;

    for pass in 0..T::passes() {
        let shift = pass * RADIX_BITS;
        let (src, dst): (&[T], &mut [T]) = if sorted_in_values {
            (&*values, &mut *scratch)
        } else {
            (&*scratch, &mut *values)
        };

        let histograms: Vec<Histogram> = src
            .par_chunks(block_size)
            .map(|tile| tile_histogram(tile, shift))
            .collect();

        let mut totals = [0usize; RADIX_BUCKETS];
        for histogram in &histograms {
            for (total, count) in totals.iter_mut().zip(histogram.iter()) {
                *total += count;
            }
        }
        if totals.iter().any(|&count| count == len) {
            debug!(
                "BUC SORT: pass {} skipped, digit constant across {} elements",
                pass, len
            );
            continue;
        }

        let cursors = scan_cursors(histograms);
        let target = ScatterTarget(dst.as_mut_ptr());
        src.par_chunks(block_size)
            .zip(cursors.into_par_iter())
            .for_each(|(tile, mut cursor)| {
                for &value in tile {
                    let digit = value.digit(shift);
                    unsafe { target.write(cursor[digit], value) };
                    cursor[digit] += 1;
                }
            });

        sorted_in_values = !sorted_in_values;
    }

    if !sorted_in_values {
        values.copy_from_slice(scratch);
    }
}

#[inline]
fn tile_histogram<T: RadixKey>(tile: &[T], shift: u32) -> Histogram {
    let mut histogram = [0usize; RADIX_BUCKETS];
    for &value in tile {
        histogram[value.digit(shift)] += 1;
    }
    histogram
}

/// Turns per-tile counts into per-tile starting offsets, digit-major then tile order.
fn scan_cursors(mut histograms: Vec<Histogram>) -> Vec<Histogram> {
    let mut running = 0usize;
    for digit in 0..RADIX_BUCKETS {
        for histogram in histograms.iter_mut() {
            let count = histogram[digit];
            histogram[digit] = running;
            running += count;
        }
    }
    histograms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_cursors_partition_output() {
        let mut a = [0usize; RADIX_BUCKETS];
        let mut b = [0usize; RADIX_BUCKETS];
        a[0] = 2;
        a[3] = 1;
        b[0] = 1;
        b[3] = 4;
        let cursors = scan_cursors(vec![a, b]);
        assert_eq!(cursors[0][0], 0);
        assert_eq!(cursors[1][0], 2);
        assert_eq!(cursors[0][3], 3);
        assert_eq!(cursors[1][3], 4);
    }
}
