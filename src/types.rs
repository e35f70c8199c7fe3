// SPDX-License-Identifier: Apache-2.0

// types.rs for buc
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr;
use thiserror::Error;

use crate::keys::RadixKey;

#[derive(Debug, Error)]
pub enum BucError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl BucError {
    /// Stable code reported through the C side channel. Zero is reserved for success.
    #[inline]
    pub fn code(&self) -> i32 {
        match self {
            BucError::InvalidArgument(_) => 1,
            BucError::Device(_) => 2,
            BucError::PreconditionViolation(_) => 3,
            BucError::Config(_) => 4,
            BucError::Unsupported(_) => 5,
        }
    }
}

pub type Result<T> = std::result::Result<T, BucError>;

/// The eight fixed-width numeric kinds the engines understand.
///
/// Codes are part of the C ABI (`buc_sort`, `buc_upper_bound`) and must not be reordered.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ElementType {
    Int16 = 0,
    Int32 = 1,
    Int64 = 2,
    UInt16 = 3,
    UInt32 = 4,
    UInt64 = 5,
    Float32 = 6,
    Float64 = 7,
}

impl ElementType {
    pub const ALL: [ElementType; 8] = [
        ElementType::Int16,
        ElementType::Int32,
        ElementType::Int64,
        ElementType::UInt16,
        ElementType::UInt32,
        ElementType::UInt64,
        ElementType::Float32,
        ElementType::Float64,
    ];

    #[inline]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(code).ok()?).copied()
    }

    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[inline]
    pub fn size_of(self) -> usize {
        match self {
            ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::UInt64 | ElementType::Float64 => 8,
        }
    }

    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, ElementType::Float32 | ElementType::Float64)
    }

    /// Suffix used by the exported C symbols (`buc_sort_<name>`).
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::UInt16 => "uint16",
            ElementType::UInt32 => "uint32",
            ElementType::UInt64 => "uint64",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only, non-owning view over a buffer in the active backend's memory space.
///
/// The engine never allocates or frees the memory behind a view and never keeps a view
/// past the call it was passed to.
#[derive(Debug, Clone, Copy)]
pub struct DeviceArray<'a, T> {
    ptr: *const T,
    len: usize,
    _marker: PhantomData<&'a [T]>,
}

impl<'a, T: RadixKey> DeviceArray<'a, T> {
    #[inline]
    pub fn from_slice(values: &'a [T]) -> Self {
        Self {
            ptr: values.as_ptr(),
            len: values.len(),
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// When `len > 0`, `ptr` must address `len` initialised elements in the memory space
    /// of the backend the view is handed to, valid for reads for `'a`.
    #[inline]
    pub unsafe fn from_raw_parts(ptr: *const T, len: usize) -> Self {
        Self {
            ptr,
            len,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    #[inline]
    pub fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    /// Rejects a null base address paired with a non-zero length.
    #[inline]
    pub fn validate(&self, name: &str) -> Result<()> {
        check_base(self.ptr.cast(), self.len, name)
    }

    /// Type-erased copy of this view.
    #[inline]
    pub fn as_raw(&self) -> RawDeviceArray {
        RawDeviceArray::new(T::ELEMENT_TYPE, self.ptr.cast_mut().cast(), self.len)
    }

    /// # Safety
    /// The view must address host memory (host backend) and have passed `validate`.
    #[inline]
    pub(crate) unsafe fn as_host_slice(&self) -> &'a [T] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

/// Mutable counterpart of [`DeviceArray`].
#[derive(Debug)]
pub struct DeviceArrayMut<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

impl<'a, T> DeviceArrayMut<'a, T> {
    #[inline]
    pub fn from_mut_slice(values: &'a mut [T]) -> Self {
        Self {
            ptr: values.as_mut_ptr(),
            len: values.len(),
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// When `len > 0`, `ptr` must address `len` elements in the memory space of the
    /// backend the view is handed to, valid for reads and writes for `'a` and not aliased
    /// by any other view passed to the same call.
    #[inline]
    pub unsafe fn from_raw_parts(ptr: *mut T, len: usize) -> Self {
        Self {
            ptr,
            len,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr
    }

    #[inline]
    pub fn validate(&self, name: &str) -> Result<()> {
        check_base(self.ptr.cast_const().cast(), self.len, name)
    }

    /// # Safety
    /// The view must address host memory (host backend) and have passed `validate`.
    #[inline]
    pub(crate) unsafe fn as_host_slice_mut(&mut self) -> &'a mut [T] {
        if self.len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl<T: RadixKey> DeviceArrayMut<'_, T> {
    #[inline]
    pub fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    #[inline]
    pub fn as_raw(&self) -> RawDeviceArray {
        RawDeviceArray::new(T::ELEMENT_TYPE, self.ptr.cast(), self.len)
    }

    /// Reborrows the buffer as a read-only view.
    #[inline]
    pub fn as_view(&self) -> DeviceArray<'_, T> {
        DeviceArray {
            ptr: self.ptr.cast_const(),
            len: self.len,
            _marker: PhantomData,
        }
    }
}

/// Type-erased view: element tag, base address, length.
///
/// This is the shape buffers have at the C boundary; [`crate::dispatch::sort_raw`] and
/// friends turn it back into a typed view by matching on the tag.
#[derive(Debug, Clone, Copy)]
pub struct RawDeviceArray {
    pub element_type: ElementType,
    pub address: *mut c_void,
    pub len: usize,
}

impl RawDeviceArray {
    #[inline]
    pub fn new(element_type: ElementType, address: *mut c_void, len: usize) -> Self {
        Self {
            element_type,
            address,
            len,
        }
    }

    #[inline]
    pub fn empty(element_type: ElementType) -> Self {
        Self::new(element_type, ptr::null_mut(), 0)
    }

    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.len * self.element_type.size_of()
    }

    #[inline]
    pub fn validate(&self, name: &str) -> Result<()> {
        check_base(self.address.cast_const(), self.len, name)
    }
}

#[inline]
fn check_base(ptr: *const c_void, len: usize, name: &str) -> Result<()> {
    if ptr.is_null() && len > 0 {
        return Err(BucError::InvalidArgument(format!(
            "{} is null but has length {}",
            name, len
        )));
    }
    Ok(())
}
