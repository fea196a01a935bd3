//! Handles to runtime functions.

use mlua_sys as ffi;

use crate::callback::{Callback, HostFunction};
use crate::convert::{FromLua, FromLuaMulti, ToLua, ToLuaMulti, mismatch};
use crate::error::{Error, Result};
use crate::lua::Lua;
use crate::reference::Reference;
use crate::stack::{LuaType, Stack, Status};

/// Name reported in argument errors for functions created without one.
const ANONYMOUS: &str = "?";

/// Extra stack space reserved for a call's arguments.
const CALL_RESERVE: i32 = 16;

/// A shared handle to a runtime function, script-defined or host-wrapped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function(Reference);

impl Function {
    /// Wrap a host closure as a runtime function value.
    pub fn wrap<F, Args, R>(lua: &Lua, f: F) -> Result<Self>
    where
        F: HostFunction<Args, R>,
    {
        Self::wrap_named(lua, ANONYMOUS, f)
    }

    /// As [`Function::wrap`], reporting `name` in argument errors.
    pub fn wrap_named<F, Args, R>(lua: &Lua, name: &str, f: F) -> Result<Self>
    where
        F: HostFunction<Args, R>,
    {
        let stack = lua.stack();
        let _guard = stack.guard();
        Callback::from_function(name, f).push(&stack)?;
        Function::from_stack(&stack, -1)
    }

    /// The underlying handle.
    pub fn reference(&self) -> &Reference {
        &self.0
    }

    /// Call the function in protected mode.
    ///
    /// Arguments are pushed left to right; exactly `R::COUNT` results are
    /// requested. The stack is left as it was found.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call<R: FromLuaMulti>(&self, args: impl ToLuaMulti) -> Result<R> {
        let stack = self.0.instance().stack()?;
        let _guard = stack.guard();
        stack.reserve(CALL_RESERVE)?;
        self.0.push(&stack)?;
        let nargs = args.push_multi(&stack)?;
        let code = unsafe { ffi::lua_pcall(stack.as_ptr(), nargs, R::COUNT, 0) };
        if code != ffi::LUA_OK {
            let status = Status::from_code(code);
            let message = stack.pop_error_object();
            tracing::debug!(?status, %message, "script call failed");
            return Err(Error::Script { status, message });
        }
        R::from_results(&stack, stack.top() - R::COUNT + 1)
    }
}

impl ToLua for Function {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        self.0.push(stack)
    }
}

impl ToLua for &Function {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        self.0.push(stack)
    }
}

impl FromLua for Function {
    const EXPECTED: &'static str = "function";

    fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
        match stack.type_of(index) {
            LuaType::Function => Reference::from_stack(stack, index).map(Function),
            _ => Err(mismatch(stack, index, Self::EXPECTED)),
        }
    }
}
