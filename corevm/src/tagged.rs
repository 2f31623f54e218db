//! Value: one arena cell, either a small integer or an object reference
//!
//! The collector only ever cares about references. Fixnums are stored inline
//! and can be skipped, which is why liveness records only name slots that may
//! hold references, but a relocating collector still has to tolerate being
//! handed a fixnum.

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueTag {
    Fixnum = 0b0,
    Reference = 0b01,
}

pub const OBJECT_TAG_MASK: u64 = 0b11;

/// A generic Value
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Value(u64);

impl Value {
    #[must_use]
    pub fn from_fixnum(value: i64) -> Self {
        let casted = value.cast_unsigned();
        Self(casted << 1)
    }

    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self(value << 1)
    }

    #[must_use]
    pub fn from_usize(value: usize) -> Self {
        Self::from_u64(value as u64)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Tags an aligned address as a reference.
    #[must_use]
    pub fn from_address(address: u64) -> Self {
        debug_assert_eq!(
            address & OBJECT_TAG_MASK,
            0,
            "address must be aligned so low 2 bits are free"
        );
        Self(address | ValueTag::Reference as u64)
    }

    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self::from_address(ptr as u64)
    }

    #[inline]
    #[must_use]
    pub fn is_fixnum(&self) -> bool {
        self.0 & 0b1 == ValueTag::Fixnum as u64
    }

    #[inline]
    #[must_use]
    pub fn is_object(&self) -> bool {
        self.0 & OBJECT_TAG_MASK == ValueTag::Reference as u64
    }

    #[must_use]
    pub fn as_fixnum(self) -> Option<i64> {
        if self.is_fixnum() {
            return Some(self.0.cast_signed() >> 1);
        }
        None
    }

    /// Untagged address of a reference
    #[must_use]
    pub fn as_address(self) -> Option<u64> {
        if self.is_object() {
            return Some(self.0 & !OBJECT_TAG_MASK);
        }
        None
    }

    #[must_use]
    pub fn as_ptr<T>(self) -> Option<*mut T> {
        self.as_address().map(|address| address as *mut T)
    }
}
