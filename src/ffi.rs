// SPDX-License-Identifier: Apache-2.0

//! C boundary
//!
//! Flat, unmangled exports mirroring `include/buc.h`. The per-type functions return
//! nothing, so failures go to a thread-local side channel instead:
//!
//! - every `buc_*` call clears the channel on entry
//! - a failure stores a non-zero code (see [`BucError::code`]) and a message
//! - `buc_last_error` / `buc_last_error_message` read it back on the same thread
//!
//! Panics never cross the boundary; they are reported as a device error.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_void, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use log::error;

use crate::config::{update_global_config, Backend};
use crate::dispatch;
use crate::keys::RadixKey;
use crate::search::BoundKind;
use crate::types::{BucError, DeviceArray, DeviceArrayMut, ElementType, RawDeviceArray, Result};

thread_local! {
    static LAST_ERROR: RefCell<Option<(c_int, CString)>> = const { RefCell::new(None) };
}

fn set_last_error(err: &BucError) {
    let message = CString::new(err.to_string()).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some((err.code(), message)));
}

fn reset_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Runs `body` with the side channel cleared, recording any error or panic.
/// Returns the recorded code, 0 on success.
pub(crate) fn boundary<F>(op: &str, body: F) -> c_int
where
    F: FnOnce() -> Result<()>,
{
    reset_last_error();
    let outcome = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        Err(BucError::Device(format!(
            "panic in {}: {}",
            op,
            panic_message(&*payload)
        )))
    });

    match outcome {
        Ok(()) => 0,
        Err(e) => {
            error!("BUC FFI: {} failed: {}", op, e);
            set_last_error(&e);
            e.code()
        }
    }
}

fn to_len(name: &str, len: c_int) -> Result<usize> {
    usize::try_from(len)
        .map_err(|_| BucError::InvalidArgument(format!("{} is negative ({})", name, len)))
}

fn to_element_type(type_code: c_int) -> Result<ElementType> {
    ElementType::from_code(type_code)
        .ok_or_else(|| BucError::InvalidArgument(format!("unknown element type code {}", type_code)))
}

/// # Safety
/// Pointers must satisfy the contract of `buc_upper_bound_<t>` in `include/buc.h`.
unsafe fn bound_export<T: RadixKey>(
    kind: BoundKind,
    out: *mut i64,
    buffer: *const T,
    buffer_len: c_int,
    queries: *const T,
    query_len: c_int,
) -> Result<()> {
    let len = to_len("buffer_len", buffer_len)?;
    let query_len = to_len("query_len", query_len)?;
    // out has no length of its own at this boundary: it holds one slot per query
    let (array, elements, out) = unsafe {
        (
            DeviceArray::from_raw_parts(buffer, len),
            DeviceArray::from_raw_parts(queries, query_len),
            DeviceArrayMut::from_raw_parts(out, query_len),
        )
    };
    match kind {
        BoundKind::Upper => dispatch::upper_bound(array, elements, out),
        BoundKind::Lower => dispatch::lower_bound(array, elements, out),
    }
}

macro_rules! export_element_type {
    ($T:ty, $sort:ident, $upper:ident, $lower:ident) => {
        /// # Safety
        /// `buffer` must address `length` elements in the active backend's memory space.
        #[no_mangle]
        pub unsafe extern "C" fn $sort(buffer: *mut $T, length: c_int) {
            boundary(stringify!($sort), || {
                let len = to_len("length", length)?;
                dispatch::sort(unsafe { DeviceArrayMut::from_raw_parts(buffer, len) })
            });
        }

        /// # Safety
        /// `buffer` must hold `buffer_len` sorted elements, `queries` `query_len` elements
        /// and `out` room for `query_len` results, all in the active backend's memory space.
        #[no_mangle]
        pub unsafe extern "C" fn $upper(
            out: *mut i64,
            buffer: *const $T,
            buffer_len: c_int,
            queries: *const $T,
            query_len: c_int,
        ) {
            boundary(stringify!($upper), || unsafe {
                bound_export(BoundKind::Upper, out, buffer, buffer_len, queries, query_len)
            });
        }

        /// # Safety
        /// Same contract as the matching upper-bound export.
        #[no_mangle]
        pub unsafe extern "C" fn $lower(
            out: *mut i64,
            buffer: *const $T,
            buffer_len: c_int,
            queries: *const $T,
            query_len: c_int,
        ) {
            boundary(stringify!($lower), || unsafe {
                bound_export(BoundKind::Lower, out, buffer, buffer_len, queries, query_len)
            });
        }
    };
}

export_element_type!(i16, buc_sort_int16, buc_upper_bound_int16, buc_lower_bound_int16);
export_element_type!(i32, buc_sort_int32, buc_upper_bound_int32, buc_lower_bound_int32);
export_element_type!(i64, buc_sort_int64, buc_upper_bound_int64, buc_lower_bound_int64);
export_element_type!(u16, buc_sort_uint16, buc_upper_bound_uint16, buc_lower_bound_uint16);
export_element_type!(u32, buc_sort_uint32, buc_upper_bound_uint32, buc_lower_bound_uint32);
export_element_type!(u64, buc_sort_uint64, buc_upper_bound_uint64, buc_lower_bound_uint64);
export_element_type!(f32, buc_sort_float32, buc_upper_bound_float32, buc_lower_bound_float32);
export_element_type!(f64, buc_sort_float64, buc_upper_bound_float64, buc_lower_bound_float64);

// =============================================================================
//  TAG-DRIVEN EXPORTS
// =============================================================================

/// # Safety
/// `buffer` must address `length` elements of the type named by `type_code`.
#[no_mangle]
pub unsafe extern "C" fn buc_sort(type_code: c_int, buffer: *mut c_void, length: c_int) {
    boundary("buc_sort", || {
        let element_type = to_element_type(type_code)?;
        let len = to_len("length", length)?;
        unsafe { dispatch::sort_raw(RawDeviceArray::new(element_type, buffer, len)) }
    });
}

/// # Safety
/// See `buc_upper_bound_<t>`; both buffers hold the type named by `type_code`.
unsafe fn bound_tagged(
    kind: BoundKind,
    type_code: c_int,
    out: *mut i64,
    buffer: *const c_void,
    buffer_len: c_int,
    queries: *const c_void,
    query_len: c_int,
) -> Result<()> {
    let element_type = to_element_type(type_code)?;
    let len = to_len("buffer_len", buffer_len)?;
    let query_len = to_len("query_len", query_len)?;
    let array = RawDeviceArray::new(element_type, buffer.cast_mut(), len);
    let elements = RawDeviceArray::new(element_type, queries.cast_mut(), query_len);
    let out = unsafe { DeviceArrayMut::from_raw_parts(out, query_len) };
    match kind {
        BoundKind::Upper => unsafe { dispatch::upper_bound_raw(array, elements, out) },
        BoundKind::Lower => unsafe { dispatch::lower_bound_raw(array, elements, out) },
    }
}

/// # Safety
/// See `buc_upper_bound_<t>`; both buffers hold the type named by `type_code`.
#[no_mangle]
pub unsafe extern "C" fn buc_upper_bound(
    type_code: c_int,
    out: *mut i64,
    buffer: *const c_void,
    buffer_len: c_int,
    queries: *const c_void,
    query_len: c_int,
) {
    boundary("buc_upper_bound", || unsafe {
        bound_tagged(BoundKind::Upper, type_code, out, buffer, buffer_len, queries, query_len)
    });
}

/// # Safety
/// See `buc_upper_bound`.
#[no_mangle]
pub unsafe extern "C" fn buc_lower_bound(
    type_code: c_int,
    out: *mut i64,
    buffer: *const c_void,
    buffer_len: c_int,
    queries: *const c_void,
    query_len: c_int,
) {
    boundary("buc_lower_bound", || unsafe {
        bound_tagged(BoundKind::Lower, type_code, out, buffer, buffer_len, queries, query_len)
    });
}

// =============================================================================
//  ERROR CHANNEL AND SETTINGS
// =============================================================================

/// Code of the last failure on this thread, 0 when the last call succeeded.
#[no_mangle]
pub extern "C" fn buc_last_error() -> c_int {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, |(code, _)| *code))
}

/// Message of the last failure on this thread, or null.
///
/// The string is owned by the library and stays valid until the next `buc_*` call on
/// the same thread.
#[no_mangle]
pub extern "C" fn buc_last_error_message() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |(_, message)| message.as_ptr())
    })
}

#[no_mangle]
pub extern "C" fn buc_clear_last_error() {
    reset_last_error();
}

/// Selects the backend for subsequent calls (0 auto, 1 host, 2 cuda).
/// Returns 0 on success or the error code also stored in the side channel.
#[no_mangle]
pub extern "C" fn buc_set_backend(code: c_int) -> c_int {
    boundary("buc_set_backend", || {
        let backend = Backend::from_code(code)
            .ok_or_else(|| BucError::InvalidArgument(format!("unknown backend code {}", code)))?;
        backend.resolve()?;
        update_global_config(|config| config.backend = backend)
    })
}

/// Turns the sortedness check before upper/lower bound on (non-zero) or off (zero).
#[no_mangle]
pub extern "C" fn buc_set_check_sorted(flag: c_int) {
    boundary("buc_set_check_sorted", || {
        update_global_config(|config| config.check_sorted = flag != 0)
    });
}

/// 1 when the CUDA backend is compiled in and a device is usable, else 0.
#[no_mangle]
pub extern "C" fn buc_has_cuda() -> c_int {
    reset_last_error();
    c_int::from(dispatch::get_hw_capabilities().has_cuda)
}
