//! Procedural macros for `luaw`.
//!
//! # Macros
//!
//! - `#[derive(UserType)]` - Implement `UserType` (and `Inherits` when a
//!   parent field is marked)
//!
//! # Example
//!
//! ```ignore
//! use luaw::UserType;
//!
//! #[derive(Clone, PartialEq, UserType)]
//! #[luaw(name = "Point", operators(add, eq))]
//! pub struct Point {
//!     pub x: f64,
//!     pub y: f64,
//! }
//! ```

use proc_macro::TokenStream;

mod attrs;
mod derive_user_type;

/// Derive the `UserType` trait for a type.
///
/// # Attributes
///
/// - `#[luaw(name = "...")]` - Override the runtime type name (default: the
///   Rust type name)
/// - `#[luaw(operators(add, sub, mul, div, unm, eq, lt, le))]` - Operators
///   installed by `TypeBinder::add_detected_operators`
///
/// # Field Attributes
///
/// - `#[luaw(parent)]` - The field holds the parent type; generates
///   `Inherits` with upcasts to that field. At most one field may be marked.
///
/// # Example
///
/// ```ignore
/// #[derive(UserType)]
/// struct Animal {
///     legs: u32,
/// }
///
/// #[derive(UserType)]
/// struct Dog {
///     #[luaw(parent)]
///     animal: Animal,
///     name: String,
/// }
/// ```
#[proc_macro_derive(UserType, attributes(luaw))]
pub fn derive_user_type(input: TokenStream) -> TokenStream {
    derive_user_type::derive_user_type_impl(input)
}
