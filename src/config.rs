//! Runtime instance configuration.
//!
//! ```
//! use luaw::{Config, Libs};
//!
//! let config = Config::default()
//!     .with_libs(Libs::BASE | Libs::MATH | Libs::STRING)
//!     .with_type_function(true);
//! assert!(config.libs.contains(Libs::MATH));
//! ```

use bitflags::bitflags;

bitflags! {
    /// Standard libraries to open in a new instance.
    ///
    /// Bits outside the named libraries are ignored when opening. `ALL`
    /// opens every standard library in one call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Libs: u16 {
        const NONE = 0;
        const BASE = 1 << 1;
        const COROUTINE = 1 << 2;
        const DEBUG = 1 << 3;
        const IO = 1 << 4;
        const MATH = 1 << 5;
        const OS = 1 << 6;
        const PACKAGE = 1 << 7;
        const STRING = 1 << 8;
        const TABLE = 1 << 9;
        const UTF8 = 1 << 10;
        const ALL = 0xFFFF;
    }
}

impl Libs {
    /// Build a selection from a raw mask, keeping unknown bits.
    pub const fn from_mask(mask: u16) -> Self {
        Libs::from_bits_retain(mask)
    }
}

impl Default for Libs {
    fn default() -> Self {
        Libs::ALL
    }
}

/// Settings for a runtime instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Libraries opened when the instance is created.
    pub libs: Libs,
    /// Verify type tags when pulling `Ptr<T>` values.
    pub checked_pointers: bool,
    /// Replace the global `type` so bound userdata report their name.
    pub type_function: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            libs: Libs::ALL,
            checked_pointers: cfg!(feature = "safety"),
            type_function: false,
        }
    }
}

impl Config {
    /// Set the libraries opened at creation.
    pub fn with_libs(mut self, libs: Libs) -> Self {
        self.libs = libs;
        self
    }

    /// Enable or disable tag verification for `Ptr<T>` pulls.
    pub fn with_checked_pointers(mut self, checked: bool) -> Self {
        self.checked_pointers = checked;
        self
    }

    /// Install the `type()` override at creation.
    pub fn with_type_function(mut self, enabled: bool) -> Self {
        self.type_function = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_bits_match_mask_layout() {
        assert_eq!(Libs::BASE.bits(), 2);
        assert_eq!(Libs::UTF8.bits(), 1 << 10);
        assert_eq!(Libs::ALL.bits(), 0xFFFF);
        assert!(Libs::NONE.is_empty());
    }

    #[test]
    fn unknown_bits_are_retained_but_not_all() {
        let libs = Libs::from_mask(Libs::MATH.bits() | (1 << 13));
        assert!(libs.contains(Libs::MATH));
        assert!(!libs.contains(Libs::BASE));
        assert!(!libs.is_all());
        assert!(Libs::ALL.is_all());
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.libs, Libs::ALL);
        assert_eq!(config.checked_pointers, cfg!(feature = "safety"));
        assert!(!config.type_function);
    }

    #[test]
    fn builder_methods() {
        let config = Config::default()
            .with_libs(Libs::NONE)
            .with_checked_pointers(false)
            .with_type_function(true);
        assert_eq!(config.libs, Libs::NONE);
        assert!(!config.checked_pointers);
        assert!(config.type_function);
    }
}
