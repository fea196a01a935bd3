//! Handles to runtime tables.

use std::ffi::c_int;

use mlua_sys as ffi;

use crate::convert::{FromLua, ToLua, mismatch};
use crate::error::{Error, Result};
use crate::lua::Lua;
use crate::reference::Reference;
use crate::stack::{LuaType, Stack};

/// A shared handle to a runtime table.
///
/// All indexing is raw: metamethods on the table are never invoked, so no
/// script code can run (or fail) underneath a table operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table(Reference);

impl Table {
    /// Create an empty table in `lua`.
    pub fn new(lua: &Lua) -> Result<Self> {
        let stack = lua.stack();
        let _guard = stack.guard();
        stack.reserve(1)?;
        unsafe { ffi::lua_createtable(stack.as_ptr(), 0, 0) };
        Table::from_stack(&stack, -1)
    }

    /// The underlying handle.
    pub fn reference(&self) -> &Reference {
        &self.0
    }

    /// Border of the sequence part, as the `#` operator without `__len`.
    pub fn len(&self) -> Result<usize> {
        self.0
            .with_value(|stack, table| Ok(unsafe { ffi::lua_rawlen(stack.as_ptr(), table) } as usize))
    }

    /// True when the table has no entries at all.
    pub fn is_empty(&self) -> Result<bool> {
        self.0.with_value(|stack, table| {
            let state = stack.as_ptr();
            unsafe {
                ffi::lua_pushnil(state);
                Ok(ffi::lua_next(state, table) == 0)
            }
        })
    }

    /// Read `table[key]`.
    pub fn get<K: ToLua, V: FromLua>(&self, key: K) -> Result<V> {
        self.0.with_value(|stack, table| {
            push_key(stack, key)?;
            unsafe { ffi::lua_rawget(stack.as_ptr(), table) };
            V::from_stack(stack, -1)
        })
    }

    /// Write `table[key] = value`.
    pub fn set<K: ToLua, V: ToLua>(&self, key: K, value: V) -> Result<()> {
        self.0.with_value(|stack, table| {
            push_key(stack, key)?;
            value.push(stack)?;
            unsafe { ffi::lua_rawset(stack.as_ptr(), table) };
            Ok(())
        })
    }

    /// True when `table[key]` is not nil.
    pub fn contains_key<K: ToLua>(&self, key: K) -> Result<bool> {
        self.0.with_value(|stack, table| {
            push_key(stack, key)?;
            let kind = unsafe { ffi::lua_rawget(stack.as_ptr(), table) };
            Ok(kind != ffi::LUA_TNIL)
        })
    }

    /// Append `value` after the current border.
    pub fn push<V: ToLua>(&self, value: V) -> Result<()> {
        self.0.with_value(|stack, table| {
            let next = unsafe { ffi::lua_rawlen(stack.as_ptr(), table) } as ffi::lua_Integer + 1;
            value.push(stack)?;
            unsafe { ffi::lua_rawseti(stack.as_ptr(), table, next) };
            Ok(())
        })
    }

    /// Convert every entry into a `(key, value)` pair.
    ///
    /// Every entry is attempted; if any fails, all failures are returned
    /// together in one [`Error::Iteration`].
    pub fn pairs<K: FromLua, V: FromLua>(&self) -> Result<Vec<(K, V)>> {
        self.0.with_value(|stack, table| {
            let state = stack.as_ptr();
            let mut pairs = Vec::new();
            let mut failures = Vec::new();
            unsafe { ffi::lua_pushnil(state) };
            while unsafe { ffi::lua_next(state, table) } != 0 {
                let key = K::from_stack(stack, -2);
                let value = V::from_stack(stack, -1);
                match (key, value) {
                    (Ok(key), Ok(value)) => pairs.push((key, value)),
                    (key, value) => {
                        failures.extend(key.err());
                        failures.extend(value.err());
                    }
                }
                stack.pop(1);
            }
            if failures.is_empty() {
                Ok(pairs)
            } else {
                tracing::debug!(failures = failures.len(), "table iteration failed");
                Err(Error::Iteration { failures })
            }
        })
    }

    /// Visit every entry.
    ///
    /// All entries are converted before the first call; if any conversion
    /// fails `f` is never invoked.
    pub fn for_each<K: FromLua, V: FromLua>(&self, mut f: impl FnMut(K, V)) -> Result<()> {
        for (key, value) in self.pairs::<K, V>()? {
            f(key, value);
        }
        Ok(())
    }

    /// The values at `1..=len()` in order.
    pub fn sequence_values<V: FromLua>(&self) -> Result<Vec<V>> {
        self.0.with_value(|stack, table| {
            let state = stack.as_ptr();
            let len = unsafe { ffi::lua_rawlen(state, table) } as ffi::lua_Integer;
            let mut values = Vec::with_capacity(len as usize);
            for position in 1..=len {
                unsafe { ffi::lua_rawgeti(state, table, position) };
                let value = V::from_stack(stack, -1);
                stack.pop(1);
                values.push(value?);
            }
            Ok(values)
        })
    }
}

/// Push `key`, rejecting nil and NaN.
fn push_key<K: ToLua>(stack: &Stack<'_>, key: K) -> Result<()> {
    key.push(stack)?;
    let state = stack.as_ptr();
    let invalid = match stack.type_of(-1) {
        LuaType::Nil | LuaType::None => true,
        LuaType::Number => {
            let mut is_number: c_int = 0;
            let value = unsafe { ffi::lua_tonumberx(state, -1, &mut is_number) };
            value.is_nan()
        }
        _ => false,
    };
    if invalid {
        stack.pop(1);
        return Err(Error::InvalidKey);
    }
    Ok(())
}

impl ToLua for Table {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        self.0.push(stack)
    }
}

impl ToLua for &Table {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        self.0.push(stack)
    }
}

impl FromLua for Table {
    const EXPECTED: &'static str = "table";

    fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
        match stack.type_of(index) {
            LuaType::Table => Reference::from_stack(stack, index).map(Table),
            _ => Err(mismatch(stack, index, Self::EXPECTED)),
        }
    }
}
