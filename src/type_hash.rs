//! Deterministic hash-based identity for bound types.
//!
//! Every bound type is identified by a [`TypeHash`] computed from its
//! registered name. The hash is written into the type's metatable and into
//! the header of every userdata carrying a value of that type, so a value
//! coming back from the runtime can be checked against the type the host
//! expects without trusting the runtime's own type tags.
//!
//! # Examples
//!
//! ```
//! use luaw::TypeHash;
//!
//! let a = TypeHash::from_name("Vec2");
//! let b = TypeHash::from_name("Vec2");
//! assert_eq!(a, b);
//! assert_ne!(a, TypeHash::from_name("Vec3"));
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain marker mixed into every type hash.
pub(crate) const TYPE_DOMAIN: u64 = 0x2fac10b63a6cc57c;

/// A deterministic 64-bit hash identifying a bound type by name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Create a type hash from a registered type name.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeHash(TYPE_DOMAIN ^ xxh64(name.as_bytes(), 0))
    }

    /// Check if this is the empty hash.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The hash as stored in a runtime integer slot.
    #[inline]
    pub(crate) const fn to_lua_integer(self) -> i64 {
        self.0 as i64
    }

    /// Recover a hash from a runtime integer slot.
    #[inline]
    pub(crate) const fn from_lua_integer(value: i64) -> Self {
        TypeHash(value as u64)
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl Default for TypeHash {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_hash() {
        assert_eq!(TypeHash::from_name("Animal"), TypeHash::from_name("Animal"));
    }

    #[test]
    fn different_names_differ() {
        assert_ne!(TypeHash::from_name("Animal"), TypeHash::from_name("Dog"));
        assert_ne!(TypeHash::from_name("dog"), TypeHash::from_name("Dog"));
    }

    #[test]
    fn lua_integer_round_trip_keeps_high_bit() {
        let hash = TypeHash(0xdead_beef_0000_0001 | (1 << 63));
        assert_eq!(TypeHash::from_lua_integer(hash.to_lua_integer()), hash);
    }

    #[test]
    fn empty_hash() {
        assert!(TypeHash::EMPTY.is_empty());
        assert!(TypeHash::default().is_empty());
        assert!(!TypeHash::from_name("x").is_empty());
    }

    #[test]
    fn display_is_hex() {
        let hash = TypeHash(0x10);
        assert_eq!(hash.to_string(), "0x0000000000000010");
        assert_eq!(format!("{:?}", hash), "TypeHash(0x0000000000000010)");
    }
}
