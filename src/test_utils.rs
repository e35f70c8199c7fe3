// SPDX-License-Identifier: Apache-2.0

//! Test-only helpers shared by the `src/tests/*_tests.rs` modules.

use std::cell::RefCell;

use log::{Level, LevelFilter, Log, Metadata, Record};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::EngineConfig;
use crate::constants::{MIN_BLOCK_SIZE, PARALLEL_THRESHOLD_SEARCH, PARALLEL_THRESHOLD_SORT};
use crate::keys::RadixKey;

/// Comfortably past the parallel sort threshold and not a multiple of any tile size.
pub const LARGE_SORT_LEN: usize = PARALLEL_THRESHOLD_SORT * 4 + 17;
/// Query count that takes the parallel search path.
pub const LARGE_QUERY_LEN: usize = PARALLEL_THRESHOLD_SEARCH * 2 + 3;

/// Keeps the crate's trace records per test thread, so tests can assert on what a call
/// logged without seeing records from tests running in parallel.
struct TraceRecorder;

thread_local! {
    static TRACES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

static TRACE_RECORDER: TraceRecorder = TraceRecorder;

impl Log for TraceRecorder {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() == Level::Trace && metadata.target().starts_with("buc")
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            TRACES.with(|traces| traces.borrow_mut().push(record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

pub fn config_test_logger() {
    // Another test may have installed it already
    if log::set_logger(&TRACE_RECORDER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
}

/// Drains the trace messages recorded on this thread.
pub fn take_traces() -> Vec<String> {
    TRACES.with(|traces| std::mem::take(&mut *traces.borrow_mut()))
}

pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Host backend with the smallest tile size, so the parallel paths cut many tiles.
pub fn host_config() -> EngineConfig {
    EngineConfig::host().with_block_size(MIN_BLOCK_SIZE)
}

/// Element types the generic tests are instantiated over.
pub trait TestKey: RadixKey {
    /// Uniform over the bit patterns, so floats include NaNs, infinities and subnormals.
    fn random<R: Rng>(rng: &mut R) -> Self;
    fn from_small(v: i8) -> Self;
}

macro_rules! impl_test_key_int {
    ($($t:ty),*) => {
        $(impl TestKey for $t {
            fn random<R: Rng>(rng: &mut R) -> Self {
                rng.gen()
            }
            fn from_small(v: i8) -> Self {
                v as $t
            }
        })*
    };
}

impl_test_key_int!(i16, i32, i64, u16, u32, u64);

impl TestKey for f32 {
    fn random<R: Rng>(rng: &mut R) -> Self {
        f32::from_bits(rng.gen())
    }
    fn from_small(v: i8) -> Self {
        v as f32
    }
}

impl TestKey for f64 {
    fn random<R: Rng>(rng: &mut R) -> Self {
        f64::from_bits(rng.gen())
    }
    fn from_small(v: i8) -> Self {
        v as f64
    }
}

pub fn random_vec<T: TestKey, R: Rng>(rng: &mut R, len: usize) -> Vec<T> {
    (0..len).map(|_| T::random(rng)).collect()
}

/// Values drawn from sixteen distinct keys, so long runs of duplicates appear.
pub fn few_distinct_vec<T: TestKey, R: Rng>(rng: &mut R, len: usize) -> Vec<T> {
    (0..len).map(|_| T::from_small(rng.gen_range(-8i8..8))).collect()
}

/// Comparison sort on the same key order, the oracle for the radix sort.
pub fn reference_sort<T: RadixKey>(values: &[T]) -> Vec<T> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.key_cmp(b));
    sorted
}

/// Linear count of entries `<= query`.
pub fn reference_upper_bound<T: RadixKey>(sorted: &[T], query: T) -> i64 {
    sorted.iter().filter(|v| v.key_le(query)).count() as i64
}

/// Linear count of entries `< query`.
pub fn reference_lower_bound<T: RadixKey>(sorted: &[T], query: T) -> i64 {
    sorted.iter().filter(|v| v.key_lt(query)).count() as i64
}

/// Element-wise equality on the radix image, which is bit equality (NaN-safe).
pub fn assert_bits_eq<T: RadixKey>(actual: &[T], expected: &[T]) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_eq!(
            a.to_radix(),
            e.to_radix(),
            "bit mismatch at index {}: actual={:?}, expected={:?}",
            i,
            a,
            e
        );
    }
}
