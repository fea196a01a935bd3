//! Conversion between host values and runtime stack slots.
//!
//! [`ToLua`] pushes a host value; [`FromLua`] reads one from a stack
//! position. Numbers always travel as the runtime's native float; integer
//! pulls additionally require an exact integer representation within range.
//! Strings accept numbers and numbers accept numeric strings, as the runtime
//! itself does.
//!
//! The multi-value traits [`ToLuaMulti`] and [`FromLuaMulti`] describe
//! argument lists and call results.

use std::borrow::Cow;
use std::ffi::c_int;

use mlua_sys as ffi;

use crate::error::{ConversionError, Error, Result};
use crate::stack::{LuaType, Stack, push_str, read_bytes};

/// Push a host value onto the stack.
pub trait ToLua {
    /// Place `self` on top of `stack`.
    fn push(self, stack: &Stack<'_>) -> Result<()>;
}

/// Read a host value from a stack position.
pub trait FromLua: Sized {
    /// Kind tag reported when the value at the position does not fit.
    const EXPECTED: &'static str;

    /// Convert the value at `index` without removing it.
    fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self>;
}

/// A list of values pushed as arguments or results.
pub trait ToLuaMulti {
    /// Push every value left to right and return how many were pushed.
    fn push_multi(self, stack: &Stack<'_>) -> Result<i32>;
}

/// The results of a call.
pub trait FromLuaMulti: Sized {
    /// Number of results requested from the runtime.
    const COUNT: i32;

    /// Read the results starting at absolute position `first`.
    fn from_results(stack: &Stack<'_>, first: i32) -> Result<Self>;
}

/// The nil value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Nil;

pub(crate) fn mismatch(stack: &Stack<'_>, index: i32, expected: &'static str) -> Error {
    Error::Conversion(ConversionError::TypeMismatch {
        expected,
        actual: stack.type_name(index),
    })
}

// ============================================================================
// Booleans and nil
// ============================================================================

impl ToLua for bool {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        stack.reserve(1)?;
        unsafe { ffi::lua_pushboolean(stack.as_ptr(), self as c_int) };
        Ok(())
    }
}

impl FromLua for bool {
    const EXPECTED: &'static str = "bool";

    fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
        match stack.type_of(index) {
            LuaType::Boolean => Ok(unsafe { ffi::lua_toboolean(stack.as_ptr(), index) } != 0),
            _ => Err(mismatch(stack, index, Self::EXPECTED)),
        }
    }
}

impl ToLua for Nil {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        stack.reserve(1)?;
        unsafe { ffi::lua_pushnil(stack.as_ptr()) };
        Ok(())
    }
}

impl FromLua for Nil {
    const EXPECTED: &'static str = "nil";

    fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
        if stack.type_of(index).is_nil_or_none() {
            Ok(Nil)
        } else {
            Err(mismatch(stack, index, Self::EXPECTED))
        }
    }
}

// ============================================================================
// Numbers
// ============================================================================

macro_rules! impl_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToLua for $ty {
                #[inline]
                fn push(self, stack: &Stack<'_>) -> Result<()> {
                    let value = ffi::lua_Integer::try_from(self).map_err(|_| {
                        ConversionError::IntegerOverflow {
                            value: self as i128,
                            target_type: "integer",
                        }
                    })?;
                    stack.reserve(1)?;
                    unsafe { ffi::lua_pushinteger(stack.as_ptr(), value) };
                    Ok(())
                }
            }

            impl FromLua for $ty {
                const EXPECTED: &'static str = "number";

                fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
                    if stack.type_of(index).is_nil_or_none() {
                        return Err(mismatch(stack, index, Self::EXPECTED));
                    }
                    let mut is_integer: c_int = 0;
                    let value = unsafe {
                        ffi::lua_tointegerx(stack.as_ptr(), index, &mut is_integer)
                    };
                    if is_integer == 0 {
                        if unsafe { ffi::lua_isnumber(stack.as_ptr(), index) } != 0 {
                            return Err(ConversionError::NotAnInteger {
                                target_type: stringify!($ty),
                            }
                            .into());
                        }
                        return Err(mismatch(stack, index, Self::EXPECTED));
                    }
                    <$ty>::try_from(value).map_err(|_| {
                        ConversionError::IntegerOverflow {
                            value: value as i128,
                            target_type: stringify!($ty),
                        }
                        .into()
                    })
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_float {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToLua for $ty {
                #[inline]
                fn push(self, stack: &Stack<'_>) -> Result<()> {
                    stack.reserve(1)?;
                    unsafe { ffi::lua_pushnumber(stack.as_ptr(), self as ffi::lua_Number) };
                    Ok(())
                }
            }

            impl FromLua for $ty {
                const EXPECTED: &'static str = "number";

                fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
                    if stack.type_of(index).is_nil_or_none() {
                        return Err(mismatch(stack, index, Self::EXPECTED));
                    }
                    let mut is_number: c_int = 0;
                    let value = unsafe {
                        ffi::lua_tonumberx(stack.as_ptr(), index, &mut is_number)
                    };
                    if is_number == 0 {
                        return Err(mismatch(stack, index, Self::EXPECTED));
                    }
                    Ok(value as $ty)
                }
            }
        )*
    };
}

impl_float!(f32, f64);

// ============================================================================
// Strings
// ============================================================================

impl ToLua for &str {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        stack.reserve(1)?;
        unsafe { push_str(stack.as_ptr(), self) };
        Ok(())
    }
}

impl ToLua for String {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        self.as_str().push(stack)
    }
}

impl ToLua for &String {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        self.as_str().push(stack)
    }
}

impl ToLua for Box<str> {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        (&*self).push(stack)
    }
}

impl ToLua for Cow<'_, str> {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        (&*self).push(stack)
    }
}

impl FromLua for String {
    const EXPECTED: &'static str = "string";

    fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
        let state = stack.as_ptr();
        match stack.type_of(index) {
            LuaType::String => {
                let bytes = unsafe { read_bytes(state, index) }
                    .ok_or_else(|| mismatch(stack, index, Self::EXPECTED))?;
                String::from_utf8(bytes.to_vec()).map_err(|_| ConversionError::InvalidUtf8.into())
            }
            LuaType::Number => {
                // Converting in place would turn the slot itself into a string.
                let index = stack.abs_index(index);
                stack.reserve(1)?;
                let text = unsafe {
                    ffi::lua_pushvalue(state, index);
                    let text = read_bytes(state, -1)
                        .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
                    ffi::lua_settop(state, -2);
                    text
                };
                text.ok_or_else(|| mismatch(stack, index, Self::EXPECTED))
            }
            _ => Err(mismatch(stack, index, Self::EXPECTED)),
        }
    }
}

// ============================================================================
// Options
// ============================================================================

impl<T: ToLua> ToLua for Option<T> {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        match self {
            Some(value) => value.push(stack),
            None => Nil.push(stack),
        }
    }
}

impl<T: FromLua> FromLua for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
        if stack.type_of(index).is_nil_or_none() {
            Ok(None)
        } else {
            T::from_stack(stack, index).map(Some)
        }
    }
}

// ============================================================================
// Multiple values
// ============================================================================

impl ToLuaMulti for () {
    #[inline]
    fn push_multi(self, _stack: &Stack<'_>) -> Result<i32> {
        Ok(0)
    }
}

impl<T: ToLua> ToLuaMulti for T {
    #[inline]
    fn push_multi(self, stack: &Stack<'_>) -> Result<i32> {
        self.push(stack)?;
        Ok(1)
    }
}

impl<T: ToLuaMulti, E: Into<Error>> ToLuaMulti for std::result::Result<T, E> {
    fn push_multi(self, stack: &Stack<'_>) -> Result<i32> {
        match self {
            Ok(values) => values.push_multi(stack),
            Err(error) => Err(error.into()),
        }
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: ToLua),+> ToLuaMulti for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push_multi(self, stack: &Stack<'_>) -> Result<i32> {
                let ($($name,)+) = self;
                let mut count = 0;
                $(
                    $name.push(stack)?;
                    count += 1;
                )+
                Ok(count)
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);
impl_tuple!(A, B, C, D, E);
impl_tuple!(A, B, C, D, E, F);
impl_tuple!(A, B, C, D, E, F, G);
impl_tuple!(A, B, C, D, E, F, G, H);
impl_tuple!(A, B, C, D, E, F, G, H, I);
impl_tuple!(A, B, C, D, E, F, G, H, I, J);
impl_tuple!(A, B, C, D, E, F, G, H, I, J, K);
impl_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);

impl FromLuaMulti for () {
    const COUNT: i32 = 0;

    #[inline]
    fn from_results(_stack: &Stack<'_>, _first: i32) -> Result<Self> {
        Ok(())
    }
}

impl<T: FromLua> FromLuaMulti for T {
    const COUNT: i32 = 1;

    #[inline]
    fn from_results(stack: &Stack<'_>, first: i32) -> Result<Self> {
        T::from_stack(stack, first)
    }
}
