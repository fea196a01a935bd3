//! Bindings between Rust host code and an embedded Lua 5.4 runtime.
//!
//! The crate moves values across the boundary ([`ToLua`], [`FromLua`]),
//! keeps runtime tables and functions alive behind shared handles
//! ([`Table`], [`Function`]), wraps host closures as runtime functions, and
//! exposes host types with methods, members, operators and single
//! inheritance ([`Lua::bind`]).
//!
//! # Example
//!
//! ```no_run
//! use luaw::{Lua, UserType};
//!
//! #[derive(Clone, UserType)]
//! #[luaw(operators(add, eq))]
//! struct Vec2 {
//!     x: f64,
//!     y: f64,
//! }
//!
//! impl std::ops::Add for Vec2 {
//!     type Output = Vec2;
//!     fn add(self, rhs: Vec2) -> Vec2 {
//!         Vec2 { x: self.x + rhs.x, y: self.y + rhs.y }
//!     }
//! }
//!
//! impl PartialEq for Vec2 {
//!     fn eq(&self, other: &Vec2) -> bool {
//!         self.x == other.x && self.y == other.y
//!     }
//! }
//!
//! let lua = Lua::new()?;
//! lua.bind::<Vec2>()?
//!     .add_constructor(|x: f64, y: f64| Vec2 { x, y })?
//!     .add_member("x", |v: &mut Vec2| &mut v.x)?
//!     .add_detected_operators()?;
//! lua.exec("local v = Vec2(1, 2) + Vec2(3, 4) result = v:x()")?;
//! assert_eq!(lua.get_global::<f64>("result")?, 4.0);
//! # Ok::<(), luaw::Error>(())
//! ```
//!
//! # Features
//!
//! - `safety` (default): verify type tags on `Ptr<T>` pulls by default.
//! - `macros` (default): `#[derive(UserType)]`.
//! - `profiling`: instrument calls with `profiling` scopes.

extern crate self as luaw;

mod binder;
mod callback;
mod config;
mod convert;
mod error;
mod function;
mod instance;
mod lua;
mod operators;
mod reference;
mod stack;
mod table;
mod type_hash;
mod type_registry;
mod userdata;

pub use mlua_sys as ffi;

pub use binder::TypeBinder;
pub use callback::{HostFunction, HostMethod, HostMethodMut, Signature};
pub use config::{Config, Libs};
pub use convert::{FromLua, FromLuaMulti, Nil, ToLua, ToLuaMulti};
pub use error::{ConversionError, Error, RegistrationError, Result, SafetyError};
pub use function::Function;
pub use instance::{InstanceId, SlotId};
pub use lua::Lua;
pub use operators::{OperatorSet, Operators};
pub use reference::Reference;
pub use stack::{LuaType, Stack, StackGuard, Status};
pub use table::Table;
pub use type_hash::TypeHash;
pub use type_registry::{ConstructorKind, TypeDescriptor};
pub use userdata::{Inherits, Ptr, UserType};

#[cfg(feature = "macros")]
pub use luaw_macros::UserType;

pub mod prelude {
    pub use crate::{
        Config, Error, FromLua, Function, Inherits, Libs, Lua, Nil, OperatorSet, Ptr, Result,
        Table, ToLua, UserType,
    };
}
