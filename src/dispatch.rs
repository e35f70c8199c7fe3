// SPDX-License-Identifier: Apache-2.0

//! # BUC dispatch framework
//!
//! This module is the public face of the engines. Every entry point runs the same
//! sequence before any work is done:
//!
//! 1. validate the configuration and every view (null base with non-zero length is an
//!    `InvalidArgument`)
//! 2. check lengths (`out.len() == elements.len()` for the searches)
//! 3. resolve the backend from the configuration
//! 4. optionally verify that search input is sorted (`check_sorted`)
//! 5. hand the buffers to the host engine ([`sort`](mod@crate::sort),
//!    [`search`](mod@crate::search)) or to the CUDA wrapper
//!
//! Views are interpreted in the memory space of the resolved backend. The `*_slice`
//! entry points always take host memory and stage it through the device only when the
//! CUDA backend is active and the input is large enough to pay for the copies.

#[cfg(has_cuda)]
use log::debug;
use log::trace;

use crate::config::{global_config, Backend, EngineConfig};
use crate::constants::*;
use crate::keys::RadixKey;
use crate::search::{self, BoundKind};
use crate::sort::radix_sort;
use crate::types::{BucError, DeviceArray, DeviceArrayMut, ElementType, RawDeviceArray, Result};

#[cfg(has_cuda)]
use crate::gpu;

// =============================================================================
//  HARDWARE DETECTION
// =============================================================================

/// What this build and machine can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareCapabilities {
    /// A CUDA wrapper was compiled in and device 0 initialised.
    pub has_cuda: bool,
    /// Workers in rayon's global pool.
    pub worker_threads: usize,
}

impl HardwareCapabilities {
    #[inline]
    pub fn detect() -> Self {
        HardwareCapabilities {
            has_cuda: Self::detect_cuda(),
            worker_threads: rayon::current_num_threads(),
        }
    }

    fn detect_cuda() -> bool {
        use std::sync::atomic::{AtomicU8, Ordering};
        static CUDA_DETECTED: AtomicU8 = AtomicU8::new(2); // 2 = unknown, 1 = true, 0 = false

        let cached = CUDA_DETECTED.load(Ordering::Relaxed);
        if cached != 2 {
            return cached == 1;
        }

        #[cfg(has_cuda)]
        let has_cuda = match gpu::ensure_cuda_initialized() {
            Ok(()) => true,
            Err(e) => {
                debug!("BUC DISPATCH: CUDA compiled in but unavailable: {}", e);
                false
            }
        };
        #[cfg(not(has_cuda))]
        let has_cuda = false;

        CUDA_DETECTED.store(if has_cuda { 1 } else { 0 }, Ordering::Relaxed);
        has_cuda
    }
}

#[inline]
pub fn get_hw_capabilities() -> HardwareCapabilities {
    HardwareCapabilities::detect()
}

// =============================================================================
//  BACKEND RESOLUTION
// =============================================================================

/// Backend an individual call runs on, after `Auto` has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Host,
    #[cfg(has_cuda)]
    Cuda,
}

impl Target {
    /// Whether a host slice of `len` elements should be staged through device memory.
    #[inline]
    fn stages(self, len: usize, threshold: usize) -> bool {
        let device = match self {
            Target::Host => false,
            #[cfg(has_cuda)]
            Target::Cuda => true,
        };
        device && len >= threshold
    }
}

fn resolve_target(config: &EngineConfig) -> Result<Target> {
    config.validate()?;
    let backend = config.backend.resolve()?;
    trace!("BUC DISPATCH: backend {:?} resolved to {:?}", config.backend, backend);
    match backend {
        Backend::Host | Backend::Auto => Ok(Target::Host),
        #[cfg(has_cuda)]
        Backend::Cuda => Ok(Target::Cuda),
        #[cfg(not(has_cuda))]
        Backend::Cuda => Err(BucError::Unsupported(
            "built without the CUDA backend".to_string(),
        )),
    }
}

fn not_sorted(name: &str) -> BucError {
    BucError::PreconditionViolation(format!("{} is not sorted in ascending order", name))
}

fn length_mismatch(out_len: usize, elements_len: usize) -> BucError {
    BucError::InvalidArgument(format!(
        "out has length {} but elements has length {}",
        out_len, elements_len
    ))
}

// =============================================================================
//  SORT
// =============================================================================

/// Sort a buffer in place, ascending, using the process-wide configuration.
///
/// Signed integers sort by value, unsigned integers by value, and floats by IEEE-754
/// totalOrder: `-NaN < -inf < ... < -0.0 < +0.0 < ... < +inf < +NaN`.
///
/// # Arguments
/// * `array` - Buffer in the memory space of the configured backend
///
/// # Errors
/// * `BucError::InvalidArgument` - base address is null while the length is non-zero
/// * `BucError::Device` - the backend failed; the buffer's order is then unspecified
/// * `BucError::Unsupported` - the configuration asks for CUDA on a build without it
///
/// # Examples
/// ```rust
/// use buc::{sort_with, DeviceArrayMut, EngineConfig};
///
/// let mut values = vec![5i32, -1, 3, 3, 0];
/// sort_with(&EngineConfig::host(), DeviceArrayMut::from_mut_slice(&mut values)).unwrap();
/// assert_eq!(values, vec![-1, 0, 3, 3, 5]);
/// ```
#[inline]
pub fn sort<T: RadixKey>(array: DeviceArrayMut<'_, T>) -> Result<()> {
    sort_with(&global_config(), array)
}

/// [`sort`] with an explicit configuration.
pub fn sort_with<T: RadixKey>(config: &EngineConfig, mut array: DeviceArrayMut<'_, T>) -> Result<()> {
    trace!(
        "BUC SORT DISPATCH: type={} len={}",
        T::ELEMENT_TYPE,
        array.len()
    );
    array.validate("array")?;
    let target = resolve_target(config)?;
    if array.len() <= 1 {
        return Ok(());
    }

    match target {
        Target::Host => {
            // Host backend: the view addresses host memory
            let values = unsafe { array.as_host_slice_mut() };
            radix_sort(values, config)
        }
        #[cfg(has_cuda)]
        Target::Cuda => unsafe { gpu::sort_device(array.as_raw()) },
    }
}

/// Sort a host slice in place.
///
/// Unlike [`sort`], the slice is always host memory; with the CUDA backend active and
/// at least `GPU_THRESHOLD_SORT` elements it is copied to the device, sorted there and
/// copied back.
///
/// # Examples
/// ```rust
/// let mut values = vec![2.5f64, f64::NAN, -0.0, 0.0, -3.0];
/// buc::sort_slice_with(&buc::EngineConfig::host(), &mut values).unwrap();
/// assert_eq!(values[0], -3.0);
/// assert!(values[1].is_sign_negative() && values[2].is_sign_positive());
/// assert!(values[4].is_nan());
/// ```
#[inline]
pub fn sort_slice<T: RadixKey>(values: &mut [T]) -> Result<()> {
    sort_slice_with(&global_config(), values)
}

pub fn sort_slice_with<T: RadixKey>(config: &EngineConfig, values: &mut [T]) -> Result<()> {
    trace!(
        "BUC SORT_SLICE DISPATCH: type={} len={}",
        T::ELEMENT_TYPE,
        values.len()
    );
    let target = resolve_target(config)?;
    if target.stages(values.len(), GPU_THRESHOLD_SORT) {
        #[cfg(has_cuda)]
        return sort_staged(values);
    }
    radix_sort(values, config)
}

#[cfg(has_cuda)]
fn sort_staged<T: RadixKey>(values: &mut [T]) -> Result<()> {
    debug!(
        "BUC SORT: staging {} {} elements through device memory",
        values.len(),
        T::ELEMENT_TYPE
    );
    let staged = gpu::StagingBuffer::upload(values)?;
    unsafe { gpu::sort_device(staged.as_raw(T::ELEMENT_TYPE))? };
    staged.download_into(values)
}

// =============================================================================
//  UPPER / LOWER BOUND
// =============================================================================

/// Batched upper bound using the process-wide configuration.
///
/// For every `i`, writes into `out[i]` the number of entries of `array` that are `<=`
/// `elements[i]`, i.e. the insertion point after any run of equal entries. `array` must
/// be sorted ascending in the same order [`sort`] produces; this is not verified unless
/// `check_sorted` is enabled, and results over unsorted input are unspecified.
///
/// # Arguments
/// * `array` - Sorted buffer searched into (may be empty: every count is 0)
/// * `elements` - Query values
/// * `out` - Caller-allocated results, same length as `elements`
///
/// # Errors
/// * `BucError::InvalidArgument` - a null base with non-zero length, or
///   `out.len() != elements.len()`
/// * `BucError::PreconditionViolation` - `check_sorted` is on and `array` is not sorted
/// * `BucError::Device` - the backend failed; `out` is then unspecified
///
/// # Examples
/// ```rust
/// use buc::{upper_bound_with, DeviceArray, DeviceArrayMut, EngineConfig};
///
/// let sorted = [1i32, 3, 3, 5, 7];
/// let queries = [3i32, 0, 10, 5];
/// let mut out = [0i64; 4];
/// upper_bound_with(
///     &EngineConfig::host(),
///     DeviceArray::from_slice(&sorted),
///     DeviceArray::from_slice(&queries),
///     DeviceArrayMut::from_mut_slice(&mut out),
/// )
/// .unwrap();
/// assert_eq!(out, [3, 0, 5, 4]);
/// ```
#[inline]
pub fn upper_bound<T: RadixKey>(
    array: DeviceArray<'_, T>,
    elements: DeviceArray<'_, T>,
    out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    upper_bound_with(&global_config(), array, elements, out)
}

#[inline]
pub fn upper_bound_with<T: RadixKey>(
    config: &EngineConfig,
    array: DeviceArray<'_, T>,
    elements: DeviceArray<'_, T>,
    out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    bound_with(config, BoundKind::Upper, array, elements, out)
}

/// Batched lower bound: `out[i]` is the number of entries of `array` strictly less than
/// `elements[i]`. Same preconditions and errors as [`upper_bound`].
#[inline]
pub fn lower_bound<T: RadixKey>(
    array: DeviceArray<'_, T>,
    elements: DeviceArray<'_, T>,
    out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    lower_bound_with(&global_config(), array, elements, out)
}

#[inline]
pub fn lower_bound_with<T: RadixKey>(
    config: &EngineConfig,
    array: DeviceArray<'_, T>,
    elements: DeviceArray<'_, T>,
    out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    bound_with(config, BoundKind::Lower, array, elements, out)
}

fn bound_with<T: RadixKey>(
    config: &EngineConfig,
    kind: BoundKind,
    array: DeviceArray<'_, T>,
    elements: DeviceArray<'_, T>,
    mut out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    trace!(
        "BUC BOUND DISPATCH: kind={} type={} len={} queries={}",
        kind.label(),
        T::ELEMENT_TYPE,
        array.len(),
        elements.len()
    );
    array.validate("array")?;
    elements.validate("elements")?;
    out.validate("out")?;
    if out.len() != elements.len() {
        return Err(length_mismatch(out.len(), elements.len()));
    }
    let target = resolve_target(config)?;

    match target {
        Target::Host => {
            // Host backend: all three views address host memory
            let sorted = unsafe { array.as_host_slice() };
            if config.check_sorted && !search::is_sorted(sorted, config)? {
                return Err(not_sorted("array"));
            }
            if elements.is_empty() {
                return Ok(());
            }
            let queries = unsafe { elements.as_host_slice() };
            let out = unsafe { out.as_host_slice_mut() };
            bound_host(config, kind, sorted, queries, out)
        }
        #[cfg(has_cuda)]
        Target::Cuda => unsafe {
            if config.check_sorted && !gpu::is_sorted_device(array.as_raw())? {
                return Err(not_sorted("array"));
            }
            gpu::bound_device(kind, out.as_mut_ptr(), array.as_raw(), elements.as_raw())
        },
    }
}

#[inline]
fn bound_host<T: RadixKey>(
    config: &EngineConfig,
    kind: BoundKind,
    sorted: &[T],
    queries: &[T],
    out: &mut [i64],
) -> Result<()> {
    match kind {
        BoundKind::Upper => search::upper_bound_batch(sorted, queries, out, config),
        BoundKind::Lower => search::lower_bound_batch(sorted, queries, out, config),
    }
}

/// Upper bound over host slices; see [`sort_slice`] for when data is staged to the device.
///
/// # Examples
/// ```rust
/// let mut out = [0i64; 3];
/// buc::upper_bound_slice_with(&buc::EngineConfig::host(), &[-5i16, 0, 5], &[-5, 5, -100], &mut out)
///     .unwrap();
/// assert_eq!(out, [1, 3, 0]);
/// ```
#[inline]
pub fn upper_bound_slice<T: RadixKey>(sorted: &[T], queries: &[T], out: &mut [i64]) -> Result<()> {
    upper_bound_slice_with(&global_config(), sorted, queries, out)
}

#[inline]
pub fn upper_bound_slice_with<T: RadixKey>(
    config: &EngineConfig,
    sorted: &[T],
    queries: &[T],
    out: &mut [i64],
) -> Result<()> {
    bound_slice_with(config, BoundKind::Upper, sorted, queries, out)
}

#[inline]
pub fn lower_bound_slice<T: RadixKey>(sorted: &[T], queries: &[T], out: &mut [i64]) -> Result<()> {
    lower_bound_slice_with(&global_config(), sorted, queries, out)
}

#[inline]
pub fn lower_bound_slice_with<T: RadixKey>(
    config: &EngineConfig,
    sorted: &[T],
    queries: &[T],
    out: &mut [i64],
) -> Result<()> {
    bound_slice_with(config, BoundKind::Lower, sorted, queries, out)
}

fn bound_slice_with<T: RadixKey>(
    config: &EngineConfig,
    kind: BoundKind,
    sorted: &[T],
    queries: &[T],
    out: &mut [i64],
) -> Result<()> {
    trace!(
        "BUC BOUND_SLICE DISPATCH: kind={} type={} len={} queries={}",
        kind.label(),
        T::ELEMENT_TYPE,
        sorted.len(),
        queries.len()
    );
    if out.len() != queries.len() {
        return Err(length_mismatch(out.len(), queries.len()));
    }
    let target = resolve_target(config)?;
    if config.check_sorted && !search::is_sorted(sorted, config)? {
        return Err(not_sorted("sorted"));
    }
    if queries.is_empty() {
        return Ok(());
    }

    if target.stages(queries.len(), GPU_THRESHOLD_SEARCH) {
        #[cfg(has_cuda)]
        return bound_staged(kind, sorted, queries, out);
    }
    bound_host(config, kind, sorted, queries, out)
}

#[cfg(has_cuda)]
fn bound_staged<T: RadixKey>(
    kind: BoundKind,
    sorted: &[T],
    queries: &[T],
    out: &mut [i64],
) -> Result<()> {
    debug!(
        "BUC BOUND: staging {} queries over {} {} elements through device memory",
        queries.len(),
        sorted.len(),
        T::ELEMENT_TYPE
    );
    let d_sorted = gpu::StagingBuffer::upload(sorted)?;
    let d_queries = gpu::StagingBuffer::upload(queries)?;
    let d_out = gpu::StagingBuffer::alloc(std::mem::size_of_val(out))?;
    unsafe {
        gpu::bound_device(
            kind,
            d_out.as_raw(ElementType::Int64).address.cast(),
            d_sorted.as_raw(T::ELEMENT_TYPE),
            d_queries.as_raw(T::ELEMENT_TYPE),
        )?;
    }
    d_out.download_into(out)
}

// =============================================================================
//  TAG-DRIVEN ENTRY POINTS
// =============================================================================

/// Instantiates `$body` with `$T` bound to the Rust type behind an [`ElementType`].
macro_rules! with_element_type {
    ($tag:expr, $T:ident => $body:expr) => {
        match $tag {
            ElementType::Int16 => {
                type $T = i16;
                $body
            }
            ElementType::Int32 => {
                type $T = i32;
                $body
            }
            ElementType::Int64 => {
                type $T = i64;
                $body
            }
            ElementType::UInt16 => {
                type $T = u16;
                $body
            }
            ElementType::UInt32 => {
                type $T = u32;
                $body
            }
            ElementType::UInt64 => {
                type $T = u64;
                $body
            }
            ElementType::Float32 => {
                type $T = f32;
                $body
            }
            ElementType::Float64 => {
                type $T = f64;
                $body
            }
        }
    };
}

/// Sort a type-erased buffer.
///
/// # Safety
/// When `array.len > 0`, `array.address` must point to `array.len` elements of
/// `array.element_type` in the memory space of the configured backend, valid for reads
/// and writes for the duration of the call.
pub unsafe fn sort_raw(array: RawDeviceArray) -> Result<()> {
    unsafe { sort_raw_with(&global_config(), array) }
}

/// # Safety
/// See [`sort_raw`].
pub unsafe fn sort_raw_with(config: &EngineConfig, array: RawDeviceArray) -> Result<()> {
    array.validate("array")?;
    with_element_type!(array.element_type, T => {
        let view = unsafe { DeviceArrayMut::<T>::from_raw_parts(array.address.cast(), array.len) };
        sort_with(config, view)
    })
}

/// Upper bound over type-erased buffers. `array` and `elements` must carry the same tag.
///
/// # Safety
/// `array` and `elements` must satisfy the contract of [`sort_raw`] for reads, and `out`
/// must be valid for writes, all in the memory space of the configured backend.
pub unsafe fn upper_bound_raw(
    array: RawDeviceArray,
    elements: RawDeviceArray,
    out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    unsafe { bound_raw_with(&global_config(), BoundKind::Upper, array, elements, out) }
}

/// # Safety
/// See [`upper_bound_raw`].
pub unsafe fn upper_bound_raw_with(
    config: &EngineConfig,
    array: RawDeviceArray,
    elements: RawDeviceArray,
    out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    unsafe { bound_raw_with(config, BoundKind::Upper, array, elements, out) }
}

/// # Safety
/// See [`upper_bound_raw`].
pub unsafe fn lower_bound_raw(
    array: RawDeviceArray,
    elements: RawDeviceArray,
    out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    unsafe { bound_raw_with(&global_config(), BoundKind::Lower, array, elements, out) }
}

/// # Safety
/// See [`upper_bound_raw`].
pub unsafe fn lower_bound_raw_with(
    config: &EngineConfig,
    array: RawDeviceArray,
    elements: RawDeviceArray,
    out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    unsafe { bound_raw_with(config, BoundKind::Lower, array, elements, out) }
}

unsafe fn bound_raw_with(
    config: &EngineConfig,
    kind: BoundKind,
    array: RawDeviceArray,
    elements: RawDeviceArray,
    out: DeviceArrayMut<'_, i64>,
) -> Result<()> {
    if array.element_type != elements.element_type {
        return Err(BucError::InvalidArgument(format!(
            "array holds {} but elements holds {}",
            array.element_type, elements.element_type
        )));
    }
    array.validate("array")?;
    elements.validate("elements")?;
    with_element_type!(array.element_type, T => {
        let (array, elements) = unsafe {
            (
                DeviceArray::<T>::from_raw_parts(array.address.cast_const().cast(), array.len),
                DeviceArray::<T>::from_raw_parts(elements.address.cast_const().cast(), elements.len),
            )
        };
        bound_with(config, kind, array, elements, out)
    })
}
