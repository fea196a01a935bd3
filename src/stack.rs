//! A typed view of the runtime's evaluation stack.
//!
//! [`Stack`] wraps a raw state pointer for the duration of a borrow of the
//! owning [`Lua`](crate::Lua) or of a single callback invocation. Indices
//! follow the runtime convention: `1` is the first value of the current
//! frame and negative indices count from the top.

use std::ffi::{CStr, c_int};
use std::marker::PhantomData;
use std::ptr::NonNull;

use mlua_sys as ffi;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, Result};

/// The dynamic type tag of a stack value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum LuaType {
    None = -1,
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
}

impl LuaType {
    /// The name the runtime uses for this tag.
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }

    /// True for `None` and `Nil`.
    pub fn is_nil_or_none(self) -> bool {
        matches!(self, LuaType::None | LuaType::Nil)
    }
}

/// Status code returned by loading and protected calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Yield = 1,
    RuntimeError = 2,
    SyntaxError = 3,
    MemoryError = 4,
    HandlerError = 5,
    FileError = 6,
}

impl Status {
    /// Map a raw status code, treating unknown codes as runtime errors.
    pub fn from_code(code: c_int) -> Self {
        Status::try_from(code).unwrap_or(Status::RuntimeError)
    }
}

/// The evaluation stack of one runtime state.
#[derive(Clone, Copy)]
pub struct Stack<'l> {
    state: NonNull<ffi::lua_State>,
    _marker: PhantomData<&'l ffi::lua_State>,
}

impl std::fmt::Debug for Stack<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("state", &self.state)
            .field("top", &self.top())
            .finish()
    }
}

impl<'l> Stack<'l> {
    /// Wrap a raw state.
    ///
    /// # Safety
    ///
    /// `state` must point to a live state for the whole of `'l`.
    pub(crate) unsafe fn from_raw(state: NonNull<ffi::lua_State>) -> Self {
        Self {
            state,
            _marker: PhantomData,
        }
    }

    /// The raw state pointer.
    #[inline]
    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    /// Index of the top value, which is also the number of values in the frame.
    #[inline]
    pub fn top(&self) -> i32 {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    /// Set the top, discarding values above it or filling with nils.
    ///
    /// Negative indices count from the top, so `-1` keeps every value.
    pub fn set_top(&self, index: i32) -> Result<()> {
        let top = self.top();
        if index < 0 {
            if index < -(top + 1) {
                return Err(Error::InvalidIndex { index, top });
            }
        } else if index > top {
            self.reserve(index - top)?;
        }
        unsafe { ffi::lua_settop(self.as_ptr(), index) };
        Ok(())
    }

    /// Pop `n` values, clamped to the current height.
    pub fn pop(&self, n: i32) {
        let n = n.min(self.top());
        if n > 0 {
            unsafe { ffi::lua_settop(self.as_ptr(), -n - 1) }
        }
    }

    /// Remove the value at `index`, shifting the values above it down.
    pub fn remove(&self, index: i32) -> Result<()> {
        let top = self.top();
        if !(1..=top).contains(&index) && !(-top..=-1).contains(&index) {
            return Err(Error::InvalidIndex { index, top });
        }
        unsafe { ffi::lua_remove(self.as_ptr(), index) };
        Ok(())
    }

    /// Whether `index` names a value the runtime will accept: a position
    /// within the current frame, the registry, or an upvalue slot.
    pub fn is_valid_index(&self, index: i32) -> bool {
        if index > 0 {
            return index <= self.top();
        }
        if index > ffi::LUA_REGISTRYINDEX {
            return index < 0 && -index <= self.top();
        }
        ffi::LUA_REGISTRYINDEX - index <= 256
    }

    /// Convert a relative index into an absolute one.
    #[inline]
    pub fn abs_index(&self, index: i32) -> i32 {
        unsafe { ffi::lua_absindex(self.as_ptr(), index) }
    }

    /// Make room for `extra` more values.
    pub fn reserve(&self, extra: i32) -> Result<()> {
        if extra <= 0 {
            return Ok(());
        }
        if unsafe { ffi::lua_checkstack(self.as_ptr(), extra) } == 0 {
            return Err(Error::StackOverflow(extra));
        }
        Ok(())
    }

    /// The type tag of the value at `index`; `None` outside the frame.
    pub fn type_of(&self, index: i32) -> LuaType {
        if !self.is_valid_index(index) {
            return LuaType::None;
        }
        let raw = unsafe { ffi::lua_type(self.as_ptr(), index) };
        LuaType::try_from(raw).unwrap_or(LuaType::None)
    }

    /// The name used when reporting what was found at `index`.
    ///
    /// Userdata with a `__name` metafield report that name, as the runtime's
    /// own argument errors do.
    pub fn type_name(&self, index: i32) -> String {
        if !self.is_valid_index(index) || self.reserve(2).is_err() {
            return self.type_of(index).name().to_owned();
        }
        let index = self.abs_index(index);
        let state = self.as_ptr();
        unsafe {
            if ffi::lua_getmetatable(state, index) != 0 {
                push_str(state, "__name");
                ffi::lua_rawget(state, -2);
                let name = if ffi::lua_type(state, -1) == ffi::LUA_TSTRING {
                    read_bytes(state, -1).map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                } else {
                    None
                };
                ffi::lua_settop(state, -3);
                if let Some(name) = name {
                    return name;
                }
            }
        }
        self.type_of(index).name().to_owned()
    }

    /// Pop the top value if it is a string and return it; otherwise leave the
    /// stack untouched and return an empty string.
    pub fn pop_error_message(&self) -> String {
        let state = self.as_ptr();
        unsafe {
            if self.top() > 0 && ffi::lua_type(state, -1) == ffi::LUA_TSTRING {
                let message = read_bytes(state, -1)
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .unwrap_or_default();
                ffi::lua_settop(state, -2);
                message
            } else {
                String::new()
            }
        }
    }

    /// Pop the error object left by a failed protected call and describe it.
    pub(crate) fn pop_error_object(&self) -> String {
        let message = match self.type_of(-1) {
            LuaType::String | LuaType::Number => {
                let state = self.as_ptr();
                unsafe {
                    ffi::lua_pushvalue(state, -1);
                    let text = read_bytes(state, -1)
                        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                        .unwrap_or_default();
                    ffi::lua_settop(state, -2);
                    text
                }
            }
            other => format!("(error object is a {} value)", other.name()),
        };
        self.pop(1);
        message
    }

    /// Record the current height and restore it when the guard drops.
    pub fn guard(&self) -> StackGuard<'l> {
        StackGuard {
            stack: *self,
            top: self.top(),
        }
    }
}

/// Restores the stack height it was created at when dropped.
///
/// Only shrinks: values popped below the saved height are not refilled.
#[must_use = "the guard restores the stack when dropped"]
pub struct StackGuard<'l> {
    stack: Stack<'l>,
    top: i32,
}

impl StackGuard<'_> {
    /// The height that will be restored.
    pub fn saved_top(&self) -> i32 {
        self.top
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        if self.stack.top() > self.top {
            unsafe { ffi::lua_settop(self.stack.as_ptr(), self.top) };
        }
    }
}

// ============================================================================
// Raw helpers
// ============================================================================

/// Push a Rust string as an owned runtime string.
#[inline]
pub(crate) unsafe fn push_str(state: *mut ffi::lua_State, text: &str) {
    unsafe {
        ffi::lua_pushlstring(state, text.as_ptr().cast(), text.len());
    }
}

/// Borrow the bytes of the string at `index`.
///
/// The value must already be a string; numbers would be converted in place.
pub(crate) unsafe fn read_bytes<'a>(state: *mut ffi::lua_State, index: c_int) -> Option<&'a [u8]> {
    let mut len = 0usize;
    let ptr = unsafe { ffi::lua_tolstring(state, index, &mut len) };
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) })
    }
}

/// Set `table[key] = top` without invoking metamethods, popping the value.
pub(crate) unsafe fn raw_set_field(state: *mut ffi::lua_State, table: c_int, key: &str) {
    unsafe {
        let table = ffi::lua_absindex(state, table);
        push_str(state, key);
        ffi::lua_insert(state, -2);
        ffi::lua_rawset(state, table);
    }
}

/// Push `table[key]` without invoking metamethods and return its type.
pub(crate) unsafe fn raw_get_field(state: *mut ffi::lua_State, table: c_int, key: &str) -> c_int {
    unsafe {
        let table = ffi::lua_absindex(state, table);
        push_str(state, key);
        ffi::lua_rawget(state, table)
    }
}

/// Push the globals table.
pub(crate) unsafe fn push_globals(state: *mut ffi::lua_State) {
    unsafe {
        ffi::lua_rawgeti(
            state,
            ffi::LUA_REGISTRYINDEX,
            ffi::LUA_RIDX_GLOBALS as ffi::lua_Integer,
        );
    }
}

/// Name of a raw type code as a static string.
pub(crate) fn raw_type_name(state: *mut ffi::lua_State, code: c_int) -> &'static str {
    let name = unsafe { ffi::lua_typename(state, code) };
    if name.is_null() {
        return "no value";
    }
    unsafe { CStr::from_ptr(name) }.to_str().unwrap_or("userdata")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lua_type_from_raw_codes() {
        assert_eq!(LuaType::try_from(-1), Ok(LuaType::None));
        assert_eq!(LuaType::try_from(ffi::LUA_TSTRING), Ok(LuaType::String));
        assert_eq!(LuaType::try_from(ffi::LUA_TUSERDATA), Ok(LuaType::Userdata));
        assert!(LuaType::try_from(42).is_err());
    }

    #[test]
    fn lua_type_names() {
        assert_eq!(LuaType::Boolean.name(), "boolean");
        assert_eq!(LuaType::LightUserdata.name(), "userdata");
        assert_eq!(LuaType::None.name(), "no value");
        assert!(LuaType::Nil.is_nil_or_none());
        assert!(!LuaType::Table.is_nil_or_none());
    }

    #[test]
    fn status_codes_match_runtime() {
        assert_eq!(Status::from_code(ffi::LUA_OK), Status::Ok);
        assert_eq!(Status::from_code(ffi::LUA_ERRRUN), Status::RuntimeError);
        assert_eq!(Status::from_code(ffi::LUA_ERRSYNTAX), Status::SyntaxError);
        assert_eq!(Status::from_code(ffi::LUA_ERRMEM), Status::MemoryError);
        assert_eq!(Status::from_code(99), Status::RuntimeError);
        assert_eq!(i32::from(Status::FileError), 6);
    }
}
