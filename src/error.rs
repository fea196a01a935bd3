//! Error types for the binding layer.
//!
//! ```text
//! Error (crate-wide)
//! ├── ConversionError   - a stack value could not become the requested host type
//! ├── SafetyError       - a pointer failed the type-tag check
//! ├── RegistrationError - a type could not be bound
//! └── runtime, handle and callback failures
//! ```
//!
//! Conversion failures inside adapted calls are turned into runtime errors
//! by the callback trampoline; everywhere else they are returned as `Err`.

use std::ffi::NulError;
use std::fmt;

use thiserror::Error;

use crate::stack::Status;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ============================================================================
// Conversion Errors
// ============================================================================

/// A stack value could not be converted into the requested host type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The value has the wrong runtime kind.
    #[error("{expected} expected, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// The value is a number without an exact integer representation.
    #[error("number has no integer representation for {target_type}")]
    NotAnInteger { target_type: &'static str },

    /// The value is an integer outside the range of the target type.
    #[error("value {value} out of range for {target_type}")]
    IntegerOverflow {
        value: i128,
        target_type: &'static str,
    },

    /// The string is not valid UTF-8.
    #[error("string expected, got invalid UTF-8")]
    InvalidUtf8,
}

impl ConversionError {
    /// The kind tag the conversion expected.
    pub fn expected_kind(&self) -> &'static str {
        match self {
            ConversionError::TypeMismatch { expected, .. } => expected,
            ConversionError::NotAnInteger { .. } | ConversionError::IntegerOverflow { .. } => {
                "number"
            }
            ConversionError::InvalidUtf8 => "string",
        }
    }
}

// ============================================================================
// Safety Errors
// ============================================================================

/// A pointer crossing the boundary failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyError {
    /// The pointer is tagged with a type unrelated to the expected one.
    #[error("{expected} expected, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// The pointer carries no type tag at all.
    #[error("{expected} expected, got untagged pointer")]
    Untagged { expected: &'static str },

    /// A pointer taken from the stack was pushed without being vouched for.
    #[error("pointer to {type_name} was taken from the runtime and is not vouched for")]
    Unvouched { type_name: &'static str },
}

impl SafetyError {
    /// The type name the check expected.
    pub fn expected_kind(&self) -> &'static str {
        match self {
            SafetyError::TypeMismatch { expected, .. } | SafetyError::Untagged { expected } => {
                expected
            }
            SafetyError::Unvouched { type_name } => type_name,
        }
    }
}

// ============================================================================
// Registration Errors
// ============================================================================

/// A host type could not be bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The name is already used by a different host type or by a foreign metatable.
    #[error("type name '{name}' is already bound to a different type")]
    NameConflict { name: &'static str },

    /// The host type needs stronger alignment than runtime userdata provides.
    #[error("type '{name}' requires alignment {align}, userdata guarantees {max}")]
    OverAligned {
        name: &'static str,
        align: usize,
        max: usize,
    },

    /// The parent type must be declared before the child links to it.
    #[error("parent type '{parent}' of '{child}' is not declared")]
    ParentNotDeclared {
        child: &'static str,
        parent: &'static str,
    },

    /// The type has not been declared in this instance.
    #[error("type '{name}' is not declared")]
    NotDeclared { name: &'static str },

    /// The metamethod is managed by the binder and cannot be replaced.
    #[error("metamethod '{name}' is reserved")]
    ReservedMetamethod { name: String },

    /// Linking the parent would make the chain loop back onto the child.
    #[error("linking '{child}' to '{parent}' creates an inheritance cycle")]
    InheritanceCycle {
        child: &'static str,
        parent: &'static str,
    },
}

// ============================================================================
// Crate Error
// ============================================================================

/// Any failure produced by the binding layer.
#[derive(Debug, Error)]
pub enum Error {
    /// A value could not be converted.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// An adapted call could not extract one of its arguments.
    #[error("bad argument #{position} ({source})")]
    Argument { position: i32, source: Box<Error> },

    /// A pointer failed the safety check.
    #[error(transparent)]
    Safety(#[from] SafetyError),

    /// A type could not be bound.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The runtime reported an error; the message is passed through unmodified.
    #[error("{message}")]
    Script { status: Status, message: String },

    /// A handle was used with an instance other than the one it came from.
    #[error("handle belongs to a different runtime instance")]
    ForeignInstance,

    /// The instance owning a handle has been closed.
    #[error("runtime instance has been closed")]
    InstanceClosed,

    /// A slot id no longer refers to a live value.
    #[error("handle slot {index} is no longer live")]
    StaleHandle { index: u32 },

    /// The runtime state was not created through this crate.
    #[error("runtime state was not initialized by luaw")]
    NotInitialized,

    /// A table key was nil or NaN.
    #[error("table index is nil or NaN")]
    InvalidKey,

    /// One or more table entries failed to convert during iteration.
    #[error("{} table entries failed to convert; first: {}", .failures.len(), FirstFailure(.failures))]
    Iteration { failures: Vec<Error> },

    /// A userdata is already borrowed in a conflicting way.
    #[error("{type_name} is already {}borrowed", borrow_prefix(.mutable))]
    Borrow {
        type_name: &'static str,
        mutable: bool,
    },

    /// A userdata was used after its destructor ran.
    #[error("{type_name} has already been finalized")]
    Finalized { type_name: &'static str },

    /// A host function reported a failure.
    #[error("{message}")]
    Callback { message: String },

    /// A host function panicked.
    #[error("host function panicked: {message}")]
    Panic { message: String },

    /// A name passed to the runtime contains an interior nul byte.
    #[error("string contains an interior nul byte: {0}")]
    InvalidString(#[from] NulError),

    /// Reading a script from disk failed.
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),

    /// The runtime stack cannot grow by the requested number of slots.
    #[error("stack overflow: cannot grow by {0} slots")]
    StackOverflow(i32),

    /// A stack index outside the current frame.
    #[error("stack index {index} is outside the frame of {top} values")]
    InvalidIndex { index: i32, top: i32 },
}

fn borrow_prefix(mutable: &bool) -> &'static str {
    if *mutable { "mutably " } else { "" }
}

struct FirstFailure<'a>(&'a [Error]);

impl fmt::Display for FirstFailure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.first() {
            Some(error) => write!(f, "{error}"),
            None => f.write_str("none"),
        }
    }
}

impl Error {
    /// Wrap an extraction failure with the stack position it happened at.
    pub(crate) fn argument(position: i32, error: impl Into<Error>) -> Self {
        Error::Argument {
            position,
            source: Box::new(error.into()),
        }
    }

    /// A free-form failure raised from host code.
    pub fn callback(message: impl fmt::Display) -> Self {
        Error::Callback {
            message: message.to_string(),
        }
    }

    /// The kind tag a failed conversion expected, e.g. `"bool"` or a bound type name.
    pub fn expected_kind(&self) -> Option<&'static str> {
        match self {
            Error::Conversion(error) => Some(error.expected_kind()),
            Error::Safety(error) => Some(error.expected_kind()),
            Error::Argument { source, .. } => source.expected_kind(),
            Error::Borrow { type_name, .. } | Error::Finalized { type_name } => Some(type_name),
            _ => None,
        }
    }

    /// True for errors raised by the runtime itself.
    pub fn is_script(&self) -> bool {
        matches!(self, Error::Script { .. })
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Callback { message }
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Callback {
            message: message.to_owned(),
        }
    }
}
