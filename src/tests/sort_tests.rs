// SPDX-License-Identifier: Apache-2.0

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
  use std::ptr;

  use crate::config::{Backend, EngineConfig};
  use crate::constants::*;
  use crate::dispatch::{sort_slice_with, sort_with};
  use crate::sort::radix_sort;
  use crate::test_utils::*;
  use crate::types::{BucError, DeviceArrayMut};

  // =============================================================================
  //   MULTI-PATH TEST HELPERS
  // =============================================================================

  /// Sorts `input` on the sequential or parallel host path (picked by its length) and on
  /// CUDA when available, checking every result against the comparison-sort oracle.
  fn check_sort_paths<T: TestKey>(input: &[T]) {
    let expected = reference_sort(input);

    //  HOST PATH (engine directly)
    let mut values = input.to_vec();
    radix_sort(&mut values, &host_config()).unwrap();
    assert_bits_eq(&values, &expected);

    //  HOST PATH (through dispatch, default tiling)
    let mut values = input.to_vec();
    sort_with(&EngineConfig::host(), DeviceArrayMut::from_mut_slice(&mut values)).unwrap();
    assert_bits_eq(&values, &expected);

    //  GPU PATH (staged through device memory)
    #[cfg(has_cuda)]
    {
      if crate::dispatch::get_hw_capabilities().has_cuda {
        let config = EngineConfig {
          backend: Backend::Cuda,
          ..EngineConfig::default()
        };
        let mut values = input.to_vec();
        sort_slice_with(&config, &mut values).unwrap();
        assert_bits_eq(&values, &expected);
      }
    }
  }

  fn test_sort_dual_paths<T: TestKey>(seed: u64) {
    config_test_logger();
    let mut rng = seeded_rng(seed);

    //  SEQUENTIAL PATH (below PARALLEL_THRESHOLD_SORT)
    let small: Vec<T> = random_vec(&mut rng, 1000);
    check_sort_paths(&small);

    //  PARALLEL PATH (many tiles, ragged last tile)
    let large: Vec<T> = random_vec(&mut rng, LARGE_SORT_LEN);
    check_sort_paths(&large);

    // Long runs of duplicates
    let duplicates: Vec<T> = few_distinct_vec(&mut rng, LARGE_SORT_LEN);
    check_sort_paths(&duplicates);

    // Idempotence: sorting sorted output changes nothing
    let mut once = large.clone();
    radix_sort(&mut once, &host_config()).unwrap();
    let mut twice = once.clone();
    radix_sort(&mut twice, &host_config()).unwrap();
    assert_bits_eq(&twice, &once);
  }

  #[test]
  fn test_sort_i16_dual_paths() {
    test_sort_dual_paths::<i16>(16);
  }

  #[test]
  fn test_sort_i32_dual_paths() {
    test_sort_dual_paths::<i32>(32);
  }

  #[test]
  fn test_sort_i64_dual_paths() {
    test_sort_dual_paths::<i64>(64);
  }

  #[test]
  fn test_sort_u16_dual_paths() {
    test_sort_dual_paths::<u16>(116);
  }

  #[test]
  fn test_sort_u32_dual_paths() {
    test_sort_dual_paths::<u32>(132);
  }

  #[test]
  fn test_sort_u64_dual_paths() {
    test_sort_dual_paths::<u64>(164);
  }

  #[test]
  fn test_sort_f32_dual_paths() {
    test_sort_dual_paths::<f32>(232);
  }

  #[test]
  fn test_sort_f64_dual_paths() {
    test_sort_dual_paths::<f64>(264);
  }

  // =============================================================================
  //  SCENARIOS
  // =============================================================================

  #[test]
  fn test_sort_int16_boundary_scenario() {
    let mut values = vec![5i16, -5, 0];
    sort_with(&EngineConfig::host(), DeviceArrayMut::from_mut_slice(&mut values)).unwrap();
    assert_eq!(values, vec![-5, 0, 5]);

    let mut extremes = vec![i16::MAX, 0, i16::MIN, -1, 1];
    radix_sort(&mut extremes, &host_config()).unwrap();
    assert_eq!(extremes, vec![i16::MIN, -1, 0, 1, i16::MAX]);
  }

  #[test]
  fn test_sort_unsigned_extremes() {
    let mut values = vec![u64::MAX, 0, 1 << 63, (1 << 63) - 1, 1];
    radix_sort(&mut values, &host_config()).unwrap();
    assert_eq!(values, vec![0, 1, (1 << 63) - 1, 1 << 63, u64::MAX]);
  }

  fn f32_specials() -> Vec<f32> {
    vec![
      f32::NAN,
      f32::INFINITY,
      f32::NEG_INFINITY,
      f32::MAX,
      f32::MIN,
      f32::MIN_POSITIVE,
      -f32::MIN_POSITIVE,
      0.0_f32,
      -0.0_f32,
      1.0,
      -1.0,
      -f32::NAN,
      f32::from_bits(0x7FC0_0001), // +NaN variant
      f32::from_bits(0xFFC0_0001), // -NaN variant
      f32::from_bits(0x0000_0001), // smallest subnormal
      f32::from_bits(0x8000_0001), // smallest negative subnormal
    ]
  }

  #[test]
  fn test_sort_f32_total_order() {
    //  SEQUENTIAL PATH
    let mut values = f32_specials();
    let mut expected = values.clone();
    expected.sort_by(f32::total_cmp);
    radix_sort(&mut values, &host_config()).unwrap();
    assert_bits_eq(&values, &expected);

    //  PARALLEL PATH
    let mut values: Vec<f32> = f32_specials().into_iter().cycle().take(LARGE_SORT_LEN).collect();
    let mut expected = values.clone();
    expected.sort_by(f32::total_cmp);
    radix_sort(&mut values, &host_config()).unwrap();
    assert_bits_eq(&values, &expected);
  }

  #[test]
  fn test_sort_f64_total_order() {
    let specials = vec![
      f64::NAN,
      -f64::NAN,
      f64::INFINITY,
      f64::NEG_INFINITY,
      0.0_f64,
      -0.0_f64,
      f64::EPSILON,
      -f64::EPSILON,
      f64::from_bits(1),
      f64::from_bits(0x8000_0000_0000_0001),
      1e300,
      -1e300,
    ];
    let mut values: Vec<f64> = specials.iter().copied().cycle().take(LARGE_SORT_LEN).collect();
    let mut expected = values.clone();
    expected.sort_by(f64::total_cmp);
    radix_sort(&mut values, &host_config()).unwrap();
    assert_bits_eq(&values, &expected);
  }

  #[test]
  fn test_sort_negative_zero_before_positive_zero() {
    let mut values = vec![0.0_f32, -0.0, 0.0, -0.0, 0.0, -0.0];
    radix_sort(&mut values, &host_config()).unwrap();
    assert!(values[..3].iter().all(|v| v.to_bits() == (-0.0_f32).to_bits()));
    assert!(values[3..].iter().all(|v| v.to_bits() == 0.0_f32.to_bits()));
  }

  #[test]
  fn test_sort_constant_digits_are_skipped_correctly() {
    // Only the low byte varies, so six of eight u64 passes are skipped
    let mut rng = seeded_rng(7);
    let input: Vec<u64> = (0..LARGE_SORT_LEN)
      .map(|_| 0xABCD_0000_0000_0000 | u64::from(rand::Rng::gen::<u16>(&mut rng)))
      .collect();
    check_sort_paths(&input);

    let mut constant = vec![42i32; LARGE_SORT_LEN];
    radix_sort(&mut constant, &host_config()).unwrap();
    assert!(constant.iter().all(|&v| v == 42));
  }

  #[test]
  fn test_sort_presorted_and_reversed() {
    let ascending: Vec<i32> = (0..LARGE_SORT_LEN as i32).map(|v| v - 1000).collect();
    check_sort_paths(&ascending);

    let descending: Vec<i32> = ascending.iter().rev().copied().collect();
    let mut values = descending.clone();
    radix_sort(&mut values, &host_config()).unwrap();
    assert_eq!(values, ascending);
  }

  #[test]
  fn test_sort_tile_sizes_and_dedicated_pool() {
    let mut rng = seeded_rng(99);
    let input: Vec<i64> = random_vec(&mut rng, LARGE_SORT_LEN);
    let expected = reference_sort(&input);

    for config in [
      EngineConfig::host().with_block_size(MIN_BLOCK_SIZE),
      EngineConfig::host().with_block_size(1000),
      EngineConfig::host(),
      EngineConfig::host().with_block_size(MAX_BLOCK_SIZE),
      EngineConfig::host().with_worker_threads(3),
    ] {
      let mut values = input.clone();
      radix_sort(&mut values, &config).unwrap();
      assert_bits_eq(&values, &expected);
    }
  }

  // =============================================================================
  //  EDGE CASES AND ERRORS
  // =============================================================================

  #[test]
  fn test_sort_empty_and_single() {
    let mut empty: Vec<u32> = vec![];
    sort_with(&EngineConfig::host(), DeviceArrayMut::from_mut_slice(&mut empty)).unwrap();
    assert!(empty.is_empty());

    // Null base with zero length is a valid empty buffer
    let view = unsafe { DeviceArrayMut::<f64>::from_raw_parts(ptr::null_mut(), 0) };
    sort_with(&EngineConfig::host(), view).unwrap();

    let mut single = vec![-7i16];
    sort_with(&EngineConfig::host(), DeviceArrayMut::from_mut_slice(&mut single)).unwrap();
    assert_eq!(single, vec![-7]);
  }

  #[test]
  fn test_sort_null_buffer_rejected() {
    let view = unsafe { DeviceArrayMut::<i32>::from_raw_parts(ptr::null_mut(), 5) };
    let err = sort_with(&EngineConfig::host(), view).unwrap_err();
    assert!(matches!(err, BucError::InvalidArgument(_)), "got {:?}", err);
  }

  #[test]
  fn test_sort_invalid_config_rejected() {
    let mut values = vec![3u16, 1, 2];
    let config = EngineConfig::host().with_block_size(0);
    let err = sort_slice_with(&config, &mut values).unwrap_err();
    assert!(matches!(err, BucError::Config(_)));
    assert_eq!(values, vec![3, 1, 2]);
  }

  #[test]
  fn test_radix_sort_engine_rejects_invalid_config() {
    // Large enough to reach the tiled passes
    let input: Vec<u32> = (0..20_000u32).rev().collect();
    let mut values = input.clone();
    let err = radix_sort(&mut values, &EngineConfig::host().with_block_size(0)).unwrap_err();
    assert!(matches!(err, BucError::Config(_)), "got {:?}", err);
    assert_eq!(values, input);

    let config = EngineConfig::host().with_worker_threads(0);
    let err = radix_sort(&mut values, &config).unwrap_err();
    assert!(matches!(err, BucError::Config(_)), "got {:?}", err);
  }

  #[test]
  fn test_sort_traces_once_per_call() {
    config_test_logger();
    let mut rng = seeded_rng(77);
    let mut values: Vec<i64> = random_vec(&mut rng, LARGE_SORT_LEN);

    take_traces();
    sort_with(&EngineConfig::host(), DeviceArrayMut::from_mut_slice(&mut values)).unwrap();
    let sort_lines = take_traces()
      .into_iter()
      .filter(|line| line.starts_with("BUC SORT"))
      .count();
    assert_eq!(sort_lines, 1);

    sort_slice_with(&EngineConfig::host(), &mut values).unwrap();
    let sort_lines = take_traces()
      .into_iter()
      .filter(|line| line.starts_with("BUC SORT"))
      .count();
    assert_eq!(sort_lines, 1);
  }

  #[test]
  fn test_sort_cuda_backend_without_device() {
    if crate::dispatch::get_hw_capabilities().has_cuda {
      return;
    }
    let config = EngineConfig {
      backend: Backend::Cuda,
      ..EngineConfig::default()
    };
    let mut values = vec![2i32, 1];
    let err = sort_with(&config, DeviceArrayMut::from_mut_slice(&mut values)).unwrap_err();
    assert!(matches!(err, BucError::Unsupported(_)));
  }
}
