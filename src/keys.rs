// SPDX-License-Identifier: Apache-2.0

//! Order-preserving radix keys for the eight supported element types
//!
//! Every element is mapped to an unsigned integer whose natural order matches the order
//! the engines promise for the element type:
//!
//! - unsigned integers map to themselves
//! - signed integers flip the sign bit, so negatives land below zero
//! - floats flip the sign bit when positive and every bit when negative, which yields the
//!   IEEE-754 totalOrder (`-NaN < -inf < ... < -0.0 < +0.0 < ... < +inf < +NaN`)
//!
//! The sort reads digits straight out of this image and the searches compare images, so
//! both engines agree on where NaNs and signed zeros go.

use std::cmp::Ordering;

use crate::constants::{RADIX_BITS, RADIX_MASK};
use crate::types::ElementType;

mod private {
    pub trait Sealed {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Element types the sort and search engines accept.
///
/// Sealed: only the eight fixed-width numerics listed in [`ElementType`] implement it.
pub trait RadixKey: private::Sealed + Copy + Send + Sync + std::fmt::Debug + 'static {
    const ELEMENT_TYPE: ElementType;
    /// Width of the key in bits (16, 32 or 64).
    const KEY_BITS: u32;

    /// Unsigned image of `self`; `a.to_radix() <= b.to_radix()` iff `a <= b` in key order.
    fn to_radix(self) -> u64;

    /// Radix digit starting at bit `shift`.
    #[inline(always)]
    fn digit(self, shift: u32) -> usize {
        ((self.to_radix() >> shift) & RADIX_MASK) as usize
    }

    #[inline(always)]
    fn key_cmp(&self, other: &Self) -> Ordering {
        self.to_radix().cmp(&other.to_radix())
    }

    #[inline(always)]
    fn key_le(self, other: Self) -> bool {
        self.to_radix() <= other.to_radix()
    }

    #[inline(always)]
    fn key_lt(self, other: Self) -> bool {
        self.to_radix() < other.to_radix()
    }

    /// Number of digit passes a full LSD sort needs for this type.
    #[inline]
    fn passes() -> u32 {
        Self::KEY_BITS / RADIX_BITS
    }
}

impl RadixKey for u16 {
    const ELEMENT_TYPE: ElementType = ElementType::UInt16;
    const KEY_BITS: u32 = 16;

    #[inline(always)]
    fn to_radix(self) -> u64 {
        self as u64
    }
}

impl RadixKey for u32 {
    const ELEMENT_TYPE: ElementType = ElementType::UInt32;
    const KEY_BITS: u32 = 32;

    #[inline(always)]
    fn to_radix(self) -> u64 {
        self as u64
    }
}

impl RadixKey for u64 {
    const ELEMENT_TYPE: ElementType = ElementType::UInt64;
    const KEY_BITS: u32 = 64;

    #[inline(always)]
    fn to_radix(self) -> u64 {
        self
    }
}

impl RadixKey for i16 {
    const ELEMENT_TYPE: ElementType = ElementType::Int16;
    const KEY_BITS: u32 = 16;

    #[inline(always)]
    fn to_radix(self) -> u64 {
        ((self as u16) ^ 0x8000) as u64
    }
}

impl RadixKey for i32 {
    const ELEMENT_TYPE: ElementType = ElementType::Int32;
    const KEY_BITS: u32 = 32;

    #[inline(always)]
    fn to_radix(self) -> u64 {
        ((self as u32) ^ 0x8000_0000) as u64
    }
}

impl RadixKey for i64 {
    const ELEMENT_TYPE: ElementType = ElementType::Int64;
    const KEY_BITS: u32 = 64;

    #[inline(always)]
    fn to_radix(self) -> u64 {
        (self as u64) ^ 0x8000_0000_0000_0000
    }
}

impl RadixKey for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::Float32;
    const KEY_BITS: u32 = 32;

    #[inline(always)]
    fn to_radix(self) -> u64 {
        let bits = self.to_bits();
        // All-ones mask for negatives, sign bit only for positives
        let mask = ((bits as i32) >> 31) as u32 | 0x8000_0000;
        (bits ^ mask) as u64
    }
}

impl RadixKey for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::Float64;
    const KEY_BITS: u32 = 64;

    #[inline(always)]
    fn to_radix(self) -> u64 {
        let bits = self.to_bits();
        let mask = ((bits as i64) >> 63) as u64 | 0x8000_0000_0000_0000;
        bits ^ mask
    }
}
