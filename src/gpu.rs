// SPDX-License-Identifier: Apache-2.0

//! CUDA support for BUC
//!
//! This module contains the CUDA-facing pieces used when `has_cuda` is enabled
//! (detected by `build.rs` when `nvcc` is available).
//!
//! It provides:
//! - Context setup on the device's primary context, so device pointers allocated by the
//!   caller through the CUDA runtime are valid here
//! - Thin wrappers around the kernels in `cuda_wrapper.cu` (radix sort, batched
//!   upper/lower bound, sortedness check), one per element type
//! - Staging helpers that copy host slices through device memory, used by the slice
//!   entry points in [`crate::dispatch`]
//!
//! Kernels run on the default stream and the wrappers synchronise before returning, so
//! every call here is blocking.
use crate::search::BoundKind;
use crate::types::{BucError, ElementType, RawDeviceArray, Result};
use log::debug;
use std::ffi::{c_void, CStr};
use std::ptr;
use std::sync::Mutex;

// CUDA runtime API declarations
unsafe extern "C" {
    fn cudaMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    fn cudaMemcpy(dst: *mut c_void, src: *const c_void, size: usize, kind: i32) -> i32;
    fn cudaFree(ptr: *mut c_void) -> i32;
}

// Kernels compiled from src/cuda_wrapper.cu. Each returns a cudaError_t (0 = success).
unsafe extern "C" {
    fn buc_cuda_radix_sort_int16(d_values: *mut i16, len: usize) -> i32;
    fn buc_cuda_radix_sort_int32(d_values: *mut i32, len: usize) -> i32;
    fn buc_cuda_radix_sort_int64(d_values: *mut i64, len: usize) -> i32;
    fn buc_cuda_radix_sort_uint16(d_values: *mut u16, len: usize) -> i32;
    fn buc_cuda_radix_sort_uint32(d_values: *mut u32, len: usize) -> i32;
    fn buc_cuda_radix_sort_uint64(d_values: *mut u64, len: usize) -> i32;
    fn buc_cuda_radix_sort_float32(d_values: *mut f32, len: usize) -> i32;
    fn buc_cuda_radix_sort_float64(d_values: *mut f64, len: usize) -> i32;

    // mode 0 = upper bound, 1 = lower bound
    fn buc_cuda_bound_int16(mode: i32, d_out: *mut i64, d_sorted: *const i16, len: usize, d_queries: *const i16, queries_len: usize) -> i32;
    fn buc_cuda_bound_int32(mode: i32, d_out: *mut i64, d_sorted: *const i32, len: usize, d_queries: *const i32, queries_len: usize) -> i32;
    fn buc_cuda_bound_int64(mode: i32, d_out: *mut i64, d_sorted: *const i64, len: usize, d_queries: *const i64, queries_len: usize) -> i32;
    fn buc_cuda_bound_uint16(mode: i32, d_out: *mut i64, d_sorted: *const u16, len: usize, d_queries: *const u16, queries_len: usize) -> i32;
    fn buc_cuda_bound_uint32(mode: i32, d_out: *mut i64, d_sorted: *const u32, len: usize, d_queries: *const u32, queries_len: usize) -> i32;
    fn buc_cuda_bound_uint64(mode: i32, d_out: *mut i64, d_sorted: *const u64, len: usize, d_queries: *const u64, queries_len: usize) -> i32;
    fn buc_cuda_bound_float32(mode: i32, d_out: *mut i64, d_sorted: *const f32, len: usize, d_queries: *const f32, queries_len: usize) -> i32;
    fn buc_cuda_bound_float64(mode: i32, d_out: *mut i64, d_sorted: *const f64, len: usize, d_queries: *const f64, queries_len: usize) -> i32;

    // Writes 1 to *h_sorted when non-decreasing in key order, else 0
    fn buc_cuda_is_sorted_int16(d_values: *const i16, len: usize, h_sorted: *mut i32) -> i32;
    fn buc_cuda_is_sorted_int32(d_values: *const i32, len: usize, h_sorted: *mut i32) -> i32;
    fn buc_cuda_is_sorted_int64(d_values: *const i64, len: usize, h_sorted: *mut i32) -> i32;
    fn buc_cuda_is_sorted_uint16(d_values: *const u16, len: usize, h_sorted: *mut i32) -> i32;
    fn buc_cuda_is_sorted_uint32(d_values: *const u32, len: usize, h_sorted: *mut i32) -> i32;
    fn buc_cuda_is_sorted_uint64(d_values: *const u64, len: usize, h_sorted: *mut i32) -> i32;
    fn buc_cuda_is_sorted_float32(d_values: *const f32, len: usize, h_sorted: *mut i32) -> i32;
    fn buc_cuda_is_sorted_float64(d_values: *const f64, len: usize, h_sorted: *mut i32) -> i32;
}

#[cfg(test)]
unsafe extern "C" {
    fn buc_cuda_fail_scratch_alloc(nth: i32);
}

// CUDA driver API declarations for raw FFI
#[repr(C)]
#[allow(non_camel_case_types)]
struct CUctx_st {
    _opaque: u8,
}
type CUcontext = *mut CUctx_st;

struct SendContext(CUcontext);
unsafe impl Send for SendContext {}
unsafe impl Sync for SendContext {}

#[allow(non_camel_case_types)]
type CUresult = i32;

unsafe extern "C" {
    fn cuInit(flags: u32) -> CUresult;
    fn cuDeviceGet(device: *mut i32, ordinal: i32) -> CUresult;
    fn cuDevicePrimaryCtxRetain(ctx: *mut CUcontext, dev: i32) -> CUresult;
    fn cuCtxSetCurrent(ctx: CUcontext) -> CUresult;
    fn cuDeviceGetAttribute(pi: *mut i32, attrib: i32, dev: i32) -> CUresult;
    fn cuDeviceGetName(name: *mut i8, len: i32, dev: i32) -> CUresult;
    fn cuDeviceTotalMem_v2(bytes: *mut usize, dev: i32) -> CUresult;
}

// CUDA memory copy directions
const CUDA_MEMCPY_HOST_TO_DEVICE: i32 = 1;
const CUDA_MEMCPY_DEVICE_TO_HOST: i32 = 2;

// CUDA device attributes for cuDeviceGetAttribute
const CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK: i32 = 1;
const CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT: i32 = 16;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: i32 = 75;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR: i32 = 76;

#[derive(Debug, Clone)]
pub struct GpuDeviceProperties {
    pub name: String,
    pub total_memory: usize,
    pub multiprocessor_count: i32,
    pub max_threads_per_block: i32,
    pub compute_capability_major: i32,
    pub compute_capability_minor: i32,
}

lazy_static::lazy_static! {
  static ref CUDA_CONTEXT: Mutex<Option<SendContext>> = Mutex::new(None);
  static ref GPU_PROPERTIES: Mutex<Option<GpuDeviceProperties>> = Mutex::new(None);
  // Kernels share the default stream and synchronise the whole device
  static ref GPU_LAUNCH_MUTEX: Mutex<()> = Mutex::new(());
}

fn driver_error(call: &str, code: CUresult) -> BucError {
    debug!("BUC GPU: {} failed code={}", call, code);
    BucError::Device(format!("{} failed: {}", call, code))
}

#[inline]
fn check_status(call: &str, status: i32) -> Result<()> {
    if status != 0 {
        debug!("BUC GPU: {} failed cudaError={}", call, status);
        return Err(BucError::Device(format!(
            "{} failed with cudaError {}",
            call, status
        )));
    }
    Ok(())
}

/// Initialise the driver and make device 0's primary context current for this thread.
pub(crate) fn ensure_cuda_initialized() -> Result<()> {
    let mut slot = CUDA_CONTEXT.lock().unwrap_or_else(|e| e.into_inner());
    if slot.is_none() {
        unsafe {
            let result = cuInit(0);
            if result != 0 {
                return Err(driver_error("cuInit", result));
            }

            let mut device = 0;
            let result = cuDeviceGet(&mut device, 0);
            if result != 0 {
                return Err(driver_error("cuDeviceGet", result));
            }

            let mut ctx = ptr::null_mut();
            let result = cuDevicePrimaryCtxRetain(&mut ctx, device);
            if result != 0 {
                return Err(driver_error("cuDevicePrimaryCtxRetain", result));
            }
            debug!("BUC GPU: retained primary context on device {}", device);
            *slot = Some(SendContext(ctx));
        }
    }

    // Always set context current for the calling thread
    if let Some(ref ctx) = *slot {
        let result = unsafe { cuCtxSetCurrent(ctx.0) };
        if result != 0 {
            return Err(driver_error("cuCtxSetCurrent", result));
        }
    }
    Ok(())
}

/// Get GPU device properties (cached after first call)
pub fn get_gpu_properties() -> Result<GpuDeviceProperties> {
    ensure_cuda_initialized()?;

    let mut props_cache = GPU_PROPERTIES.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(ref props) = *props_cache {
        return Ok(props.clone());
    }

    let device = 0i32;
    let mut name_bytes = vec![0i8; 256];
    let result = unsafe { cuDeviceGetName(name_bytes.as_mut_ptr(), 256, device) };
    if result != 0 {
        return Err(driver_error("cuDeviceGetName", result));
    }
    // Fixed-size buffer filled by the driver; read as a C string without taking ownership
    let name = unsafe { CStr::from_ptr(name_bytes.as_ptr()) }
        .to_string_lossy()
        .to_string();

    let mut total_memory = 0usize;
    let result = unsafe { cuDeviceTotalMem_v2(&mut total_memory, device) };
    if result != 0 {
        return Err(driver_error("cuDeviceTotalMem", result));
    }

    let get_attribute = |attr: i32| -> Result<i32> {
        let mut value = 0i32;
        let result = unsafe { cuDeviceGetAttribute(&mut value, attr, device) };
        if result != 0 {
            return Err(driver_error("cuDeviceGetAttribute", result));
        }
        Ok(value)
    };

    let props = GpuDeviceProperties {
        name,
        total_memory,
        multiprocessor_count: get_attribute(CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)?,
        max_threads_per_block: get_attribute(CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)?,
        compute_capability_major: get_attribute(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?,
        compute_capability_minor: get_attribute(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?,
    };
    debug!("BUC GPU: device properties {:?}", props);

    *props_cache = Some(props.clone());
    Ok(props)
}

// =============================================================================
//  KERNEL WRAPPERS (device pointers in, status out)
// =============================================================================

/// Sorts a device-resident buffer in place.
///
/// # Safety
/// `array.address` must be a device pointer to `array.len` elements of
/// `array.element_type`, and the view must have passed `validate`.
pub(crate) unsafe fn sort_device(array: RawDeviceArray) -> Result<()> {
    if array.len <= 1 {
        return Ok(());
    }
    ensure_cuda_initialized()?;

    let _launch = GPU_LAUNCH_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let (a, n) = (array.address, array.len);
    let status = unsafe {
        match array.element_type {
            ElementType::Int16 => buc_cuda_radix_sort_int16(a.cast(), n),
            ElementType::Int32 => buc_cuda_radix_sort_int32(a.cast(), n),
            ElementType::Int64 => buc_cuda_radix_sort_int64(a.cast(), n),
            ElementType::UInt16 => buc_cuda_radix_sort_uint16(a.cast(), n),
            ElementType::UInt32 => buc_cuda_radix_sort_uint32(a.cast(), n),
            ElementType::UInt64 => buc_cuda_radix_sort_uint64(a.cast(), n),
            ElementType::Float32 => buc_cuda_radix_sort_float32(a.cast(), n),
            ElementType::Float64 => buc_cuda_radix_sort_float64(a.cast(), n),
        }
    };
    check_status("radix sort", status)
}

/// Batched binary search over device buffers, one lane per query.
///
/// # Safety
/// All three views must be device pointers of the stated lengths; `out` holds `i64`
/// and `out.len == queries.len` has been checked.
pub(crate) unsafe fn bound_device(
    kind: BoundKind,
    out: *mut i64,
    sorted: RawDeviceArray,
    queries: RawDeviceArray,
) -> Result<()> {
    if queries.len == 0 {
        return Ok(());
    }
    ensure_cuda_initialized()?;

    let _launch = GPU_LAUNCH_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let mode = kind as i32;
    let (s, n) = (sorted.address.cast_const(), sorted.len);
    let (q, m) = (queries.address.cast_const(), queries.len);
    let status = unsafe {
        match sorted.element_type {
            ElementType::Int16 => buc_cuda_bound_int16(mode, out, s.cast(), n, q.cast(), m),
            ElementType::Int32 => buc_cuda_bound_int32(mode, out, s.cast(), n, q.cast(), m),
            ElementType::Int64 => buc_cuda_bound_int64(mode, out, s.cast(), n, q.cast(), m),
            ElementType::UInt16 => buc_cuda_bound_uint16(mode, out, s.cast(), n, q.cast(), m),
            ElementType::UInt32 => buc_cuda_bound_uint32(mode, out, s.cast(), n, q.cast(), m),
            ElementType::UInt64 => buc_cuda_bound_uint64(mode, out, s.cast(), n, q.cast(), m),
            ElementType::Float32 => buc_cuda_bound_float32(mode, out, s.cast(), n, q.cast(), m),
            ElementType::Float64 => buc_cuda_bound_float64(mode, out, s.cast(), n, q.cast(), m),
        }
    };
    check_status(kind.label(), status)
}

/// # Safety
/// `array` must be a validated device view.
pub(crate) unsafe fn is_sorted_device(array: RawDeviceArray) -> Result<bool> {
    if array.len <= 1 {
        return Ok(true);
    }
    ensure_cuda_initialized()?;

    let _launch = GPU_LAUNCH_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let (a, n) = (array.address.cast_const(), array.len);
    let mut sorted = 0i32;
    let status = unsafe {
        match array.element_type {
            ElementType::Int16 => buc_cuda_is_sorted_int16(a.cast(), n, &mut sorted),
            ElementType::Int32 => buc_cuda_is_sorted_int32(a.cast(), n, &mut sorted),
            ElementType::Int64 => buc_cuda_is_sorted_int64(a.cast(), n, &mut sorted),
            ElementType::UInt16 => buc_cuda_is_sorted_uint16(a.cast(), n, &mut sorted),
            ElementType::UInt32 => buc_cuda_is_sorted_uint32(a.cast(), n, &mut sorted),
            ElementType::UInt64 => buc_cuda_is_sorted_uint64(a.cast(), n, &mut sorted),
            ElementType::Float32 => buc_cuda_is_sorted_float32(a.cast(), n, &mut sorted),
            ElementType::Float64 => buc_cuda_is_sorted_float64(a.cast(), n, &mut sorted),
        }
    };
    check_status("sortedness check", status)?;
    Ok(sorted != 0)
}

// =============================================================================
//  STAGING HELPERS (host slices through device memory)
// =============================================================================

/// Device allocation freed on drop, used only for staging host slices.
pub(crate) struct StagingBuffer {
    ptr: *mut c_void,
    bytes: usize,
}

impl StagingBuffer {
    pub(crate) fn alloc(bytes: usize) -> Result<Self> {
        ensure_cuda_initialized()?;
        let mut ptr: *mut c_void = ptr::null_mut();
        if bytes > 0 {
            check_status("cudaMalloc", unsafe { cudaMalloc(&mut ptr, bytes) })?;
        }
        Ok(Self { ptr, bytes })
    }

    pub(crate) fn upload<T: Copy>(values: &[T]) -> Result<Self> {
        let buffer = Self::alloc(std::mem::size_of_val(values))?;
        if buffer.bytes > 0 {
            check_status("cudaMemcpy (host to device)", unsafe {
                cudaMemcpy(
                    buffer.ptr,
                    values.as_ptr().cast(),
                    buffer.bytes,
                    CUDA_MEMCPY_HOST_TO_DEVICE,
                )
            })?;
        }
        Ok(buffer)
    }

    pub(crate) fn download_into<T: Copy>(&self, dst: &mut [T]) -> Result<()> {
        let bytes = std::mem::size_of_val(dst);
        if bytes != self.bytes {
            return Err(BucError::InvalidArgument(format!(
                "staging buffer holds {} bytes, destination {}",
                self.bytes, bytes
            )));
        }
        if bytes > 0 {
            check_status("cudaMemcpy (device to host)", unsafe {
                cudaMemcpy(
                    dst.as_mut_ptr().cast(),
                    self.ptr,
                    bytes,
                    CUDA_MEMCPY_DEVICE_TO_HOST,
                )
            })?;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn as_raw(&self, element_type: ElementType) -> RawDeviceArray {
        RawDeviceArray::new(element_type, self.ptr, self.bytes / element_type.size_of())
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { cudaFree(self.ptr) };
        }
    }
}
