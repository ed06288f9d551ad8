//! Tagged value words.
//!
//! Managed values fit in a single 64-bit word so that frame slots, saved
//! register copies and the deoptimizer's frame-copy buffer can all hold the
//! same representation. The low bit is the tag:
//!
//! | Bit 0 | Kind       | Payload                        |
//! |-------|------------|--------------------------------|
//! | 0     | Smi        | 63-bit signed integer (<< 1)   |
//! | 1     | Heap ref   | object-table index (<< 1) | 1  |
//!
//! Doubles and 64-bit integers that do not fit the Smi range are heap
//! objects; optimized code may hold them unboxed in registers, in which case
//! the deoptimizer re-boxes them (see the deferred-box machinery in the VM
//! crate).

use std::fmt;

/// Size of one stack/frame word in bytes.
pub const WORD_SIZE: usize = 8;

/// A raw frame/register word. Holds either a tagged [`Value`], a raw address
/// (return addresses, frame pointers, pc markers) or an unboxed payload.
pub type RawWord = i64;

/// Number of payload bits available to a Smi.
const SMI_BITS: u32 = 63;

/// Largest Smi-representable integer.
pub const SMI_MAX: i64 = (1 << (SMI_BITS - 1)) - 1;
/// Smallest Smi-representable integer.
pub const SMI_MIN: i64 = -(1 << (SMI_BITS - 1));

// =============================================================================
// Object references
// =============================================================================

/// A handle to a heap object: an index into the isolate heap's object table.
///
/// Index 0 is always the preallocated null instance, so `ObjectRef::NULL`
/// doubles as the null value without a separate tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(u32);

impl ObjectRef {
    /// The null object (heap slot 0).
    pub const NULL: ObjectRef = ObjectRef(0);

    /// Create a reference from a heap index.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Heap index of this reference.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this is the null object.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjectRef(null)")
        } else {
            write!(f, "ObjectRef({})", self.0)
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A tagged 64-bit managed value word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value {
    bits: RawWord,
}

impl Value {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// The null value (tagged reference to heap slot 0).
    #[inline]
    #[must_use]
    pub const fn null() -> Self {
        Self { bits: 1 }
    }

    /// Create a Smi value. The payload must fit in 63 bits.
    #[inline]
    #[must_use]
    pub const fn smi(v: i64) -> Self {
        debug_assert!(Self::is_smi_value(v));
        Self { bits: v << 1 }
    }

    /// Create a value from a heap reference.
    #[inline]
    #[must_use]
    pub const fn from_ref(r: ObjectRef) -> Self {
        Self {
            bits: ((r.0 as i64) << 1) | 1,
        }
    }

    /// Reconstruct a value from its raw word (e.g. out of a frame slot).
    #[inline]
    #[must_use]
    pub const fn from_raw(bits: RawWord) -> Self {
        Self { bits }
    }

    /// Whether `v` fits the Smi payload.
    #[inline]
    #[must_use]
    pub const fn is_smi_value(v: i64) -> bool {
        v >= SMI_MIN && v <= SMI_MAX
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Raw tagged word.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> RawWord {
        self.bits
    }

    /// Whether this value is a Smi.
    #[inline]
    #[must_use]
    pub const fn is_smi(self) -> bool {
        self.bits & 1 == 0
    }

    /// Whether this value is a heap reference (including null).
    #[inline]
    #[must_use]
    pub const fn is_ref(self) -> bool {
        self.bits & 1 != 0
    }

    /// Whether this value is the null object.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.bits == 1
    }

    /// Smi payload, if this is a Smi.
    #[inline]
    #[must_use]
    pub const fn as_smi(self) -> Option<i64> {
        if self.is_smi() { Some(self.bits >> 1) } else { None }
    }

    /// Heap reference, if this is one.
    #[inline]
    #[must_use]
    pub const fn as_ref(self) -> Option<ObjectRef> {
        if self.is_ref() {
            Some(ObjectRef((self.bits >> 1) as u32))
        } else {
            None
        }
    }

    /// Heap reference without the tag check. Asserts in debug builds.
    #[inline]
    #[must_use]
    pub const fn ref_unchecked(self) -> ObjectRef {
        debug_assert!(self.is_ref());
        ObjectRef((self.bits >> 1) as u32)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = self.as_smi() {
            write!(f, "Smi({v})")
        } else if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{:?}", self.ref_unchecked())
        }
    }
}

impl From<ObjectRef> for Value {
    #[inline]
    fn from(r: ObjectRef) -> Self {
        Value::from_ref(r)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smi_round_trip() {
        for v in [0i64, 1, -1, 42, SMI_MAX, SMI_MIN] {
            let val = Value::smi(v);
            assert!(val.is_smi());
            assert_eq!(val.as_smi(), Some(v));
            assert_eq!(Value::from_raw(val.raw()), val);
        }
    }

    #[test]
    fn test_ref_round_trip() {
        let r = ObjectRef::from_index(17);
        let val = Value::from_ref(r);
        assert!(val.is_ref());
        assert!(!val.is_smi());
        assert_eq!(val.as_ref(), Some(r));
    }

    #[test]
    fn test_null_is_slot_zero() {
        assert!(Value::null().is_null());
        assert_eq!(Value::null().as_ref(), Some(ObjectRef::NULL));
        assert_eq!(Value::from_ref(ObjectRef::NULL), Value::null());
    }

    #[test]
    fn test_smi_range() {
        assert!(Value::is_smi_value(SMI_MAX));
        assert!(Value::is_smi_value(SMI_MIN));
        assert!(!Value::is_smi_value(i64::MAX));
        assert!(!Value::is_smi_value(i64::MIN));
    }
}
