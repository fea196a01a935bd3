//! The runtime instance owned by host code.

use std::ffi::{CStr, CString, c_int};
use std::fmt;
use std::io;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use mlua_sys as ffi;

use crate::binder::TypeBinder;
use crate::callback::{Callback, HostFunction};
use crate::config::{Config, Libs};
use crate::convert::{FromLua, FromLuaMulti, ToLua, ToLuaMulti};
use crate::error::{Error, Result};
use crate::function::Function;
use crate::instance::{Instance, InstanceId};
use crate::stack::{Stack, Status, push_globals, push_str, raw_set_field, raw_type_name};
use crate::table::Table;
use crate::type_registry::TypeDescriptor;
use crate::userdata::{UserType, header_at};

/// Opener and global name for each library bit, in opening order.
const LIBRARIES: [(Libs, &CStr, ffi::lua_CFunction); 10] = [
    (Libs::BASE, c"_G", ffi::luaopen_base),
    (Libs::PACKAGE, c"package", ffi::luaopen_package),
    (Libs::COROUTINE, c"coroutine", ffi::luaopen_coroutine),
    (Libs::TABLE, c"table", ffi::luaopen_table),
    (Libs::IO, c"io", ffi::luaopen_io),
    (Libs::OS, c"os", ffi::luaopen_os),
    (Libs::STRING, c"string", ffi::luaopen_string),
    (Libs::MATH, c"math", ffi::luaopen_math),
    (Libs::UTF8, c"utf8", ffi::luaopen_utf8),
    (Libs::DEBUG, c"debug", ffi::luaopen_debug),
];

/// An embedded runtime state together with its bindings.
///
/// Handles created from this instance stay valid Rust values after it is
/// dropped; using them then fails with [`Error::InstanceClosed`].
///
/// ```no_run
/// use luaw::Lua;
///
/// let lua = Lua::new()?;
/// lua.register_function("double", |x: f64| x * 2.0)?;
/// lua.exec("result = double(21)")?;
/// assert_eq!(lua.get_global::<i32>("result")?, 42);
/// # Ok::<(), luaw::Error>(())
/// ```
pub struct Lua {
    state: NonNull<ffi::lua_State>,
    instance: Rc<Instance>,
}

impl fmt::Debug for Lua {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lua")
            .field("id", &self.instance.id())
            .field("config", self.instance.config())
            .finish_non_exhaustive()
    }
}

impl Lua {
    /// Create an instance with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn with_config(config: Config) -> Result<Self> {
        let state = NonNull::new(unsafe { ffi::luaL_newstate() })
            .ok_or_else(|| Error::Io(io::Error::from(io::ErrorKind::OutOfMemory)))?;
        let libs = config.libs;
        let type_function = config.type_function;
        let instance = unsafe { Instance::install(state, config) };
        let lua = Self { state, instance };
        lua.open_libs(libs)?;
        if type_function {
            lua.register_type_function()?;
        }
        tracing::debug!(instance = %lua.id(), ?libs, "created instance");
        Ok(lua)
    }

    pub fn id(&self) -> InstanceId {
        self.instance.id()
    }

    pub fn config(&self) -> &Config {
        self.instance.config()
    }

    /// The main evaluation stack.
    pub fn stack(&self) -> Stack<'_> {
        unsafe { Stack::from_raw(self.state) }
    }

    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    pub(crate) fn instance(&self) -> &Rc<Instance> {
        &self.instance
    }

    /// Open the standard libraries selected by `libs`. Unknown bits are ignored.
    pub fn open_libs(&self, libs: Libs) -> Result<()> {
        let stack = self.stack();
        let _guard = stack.guard();
        stack.reserve(4)?;
        let state = self.as_ptr();
        if libs.is_all() {
            unsafe { ffi::luaL_openlibs(state) };
            return Ok(());
        }
        for (flag, name, open) in LIBRARIES {
            if libs.contains(flag) {
                unsafe {
                    ffi::luaL_requiref(state, name.as_ptr(), open, 1);
                    ffi::lua_settop(state, -2);
                }
            }
        }
        Ok(())
    }

    /// Compile and run a chunk. The chunk is named after its source text.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn exec(&self, source: &str) -> Result<()> {
        let source = CString::new(source)?;
        let stack = self.stack();
        let _guard = stack.guard();
        stack.reserve(2)?;
        let code = unsafe { ffi::luaL_loadstring(self.as_ptr(), source.as_ptr()) };
        self.run_loaded(&stack, code)
    }

    /// Compile and run the chunk in the file at `path`.
    pub fn exec_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let chunk_name = CString::new(format!("@{}", path.display()))?;
        let stack = self.stack();
        let _guard = stack.guard();
        stack.reserve(2)?;
        let code = unsafe {
            ffi::luaL_loadbufferx(
                self.as_ptr(),
                bytes.as_ptr().cast(),
                bytes.len(),
                chunk_name.as_ptr(),
                ptr::null(),
            )
        };
        self.run_loaded(&stack, code)
    }

    fn run_loaded(&self, stack: &Stack<'_>, load_code: c_int) -> Result<()> {
        let code = if load_code == ffi::LUA_OK {
            unsafe { ffi::lua_pcall(self.as_ptr(), 0, 0, 0) }
        } else {
            load_code
        };
        if code == ffi::LUA_OK {
            return Ok(());
        }
        let status = Status::from_code(code);
        let message = stack.pop_error_object();
        tracing::debug!(?status, %message, "chunk failed");
        Err(Error::Script { status, message })
    }

    // ------------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------------

    pub fn set_global<V: ToLua>(&self, name: &str, value: V) -> Result<()> {
        let stack = self.stack();
        let _guard = stack.guard();
        stack.reserve(3)?;
        let state = self.as_ptr();
        unsafe { push_globals(state) };
        value.push(&stack)?;
        unsafe { raw_set_field(state, -2, name) };
        Ok(())
    }

    pub fn get_global<V: FromLua>(&self, name: &str) -> Result<V> {
        let stack = self.stack();
        let _guard = stack.guard();
        stack.reserve(3)?;
        let state = self.as_ptr();
        unsafe {
            push_globals(state);
            push_str(state, name);
            ffi::lua_rawget(state, -2);
        }
        V::from_stack(&stack, -1)
    }

    /// Handle to the globals table.
    pub fn globals(&self) -> Result<Table> {
        let stack = self.stack();
        let _guard = stack.guard();
        stack.reserve(1)?;
        unsafe { push_globals(self.as_ptr()) };
        Table::from_stack(&stack, -1)
    }

    pub fn create_table(&self) -> Result<Table> {
        Table::new(self)
    }

    pub fn create_function<F, Args, R>(&self, f: F) -> Result<Function>
    where
        F: HostFunction<Args, R>,
    {
        Function::wrap(self, f)
    }

    /// Expose a host closure as the global function `name`.
    pub fn register_function<F, Args, R>(&self, name: &str, f: F) -> Result<()>
    where
        F: HostFunction<Args, R>,
    {
        let stack = self.stack();
        let _guard = stack.guard();
        stack.reserve(2)?;
        let state = self.as_ptr();
        unsafe { push_globals(state) };
        Callback::from_function(name, f).push(&stack)?;
        unsafe { raw_set_field(state, -2, name) };
        tracing::debug!(instance = %self.id(), name, "registered global function");
        Ok(())
    }

    /// Call the global function `name`.
    pub fn call_function<R: FromLuaMulti>(&self, name: &str, args: impl ToLuaMulti) -> Result<R> {
        self.get_global::<Function>(name)?.call(args)
    }

    // ------------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------------

    /// Declare `T` and return a builder for its members.
    pub fn bind<T: UserType>(&self) -> Result<TypeBinder<'_, T>> {
        TypeBinder::new(self)
    }

    /// What this instance records about the type registered as `name`.
    pub fn type_descriptor(&self, name: &str) -> Option<TypeDescriptor> {
        self.instance.types().get_by_name(name).cloned()
    }

    /// Replace the global `type` so bound userdata report their registered
    /// name. Every other value keeps the builtin answer.
    pub fn register_type_function(&self) -> Result<()> {
        let stack = self.stack();
        let _guard = stack.guard();
        stack.reserve(2)?;
        let state = self.as_ptr();
        unsafe {
            push_globals(state);
            ffi::lua_pushcclosure(state, bound_type_name, 0);
            raw_set_field(state, -2, "type");
        }
        Ok(())
    }

    /// Number of live handle slots.
    pub fn live_slots(&self) -> usize {
        self.instance.live_slots()
    }

    /// Run a full garbage collection cycle.
    pub fn gc_collect(&self) {
        unsafe {
            ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOLLECT, 0);
        }
    }
}

impl Drop for Lua {
    fn drop(&mut self) {
        // Handles outliving the state must stop touching it first.
        self.instance.close();
        unsafe { ffi::lua_close(self.state.as_ptr()) };
    }
}

unsafe extern "C-unwind" fn bound_type_name(state: *mut ffi::lua_State) -> c_int {
    unsafe { ffi::luaL_checkany(state, 1) };
    let stack = unsafe { Stack::from_raw(NonNull::new_unchecked(state)) };
    if header_at(&stack, 1).is_some() {
        let name = stack.type_name(1);
        unsafe { push_str(state, &name) };
    } else {
        let code = unsafe { ffi::lua_type(state, 1) };
        unsafe { push_str(state, raw_type_name(state, code)) };
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_library_has_an_opener() {
        let covered = LIBRARIES
            .iter()
            .fold(Libs::NONE, |acc, (flag, _, _)| acc | *flag);
        assert_eq!(
            covered,
            Libs::BASE
                | Libs::COROUTINE
                | Libs::DEBUG
                | Libs::IO
                | Libs::MATH
                | Libs::OS
                | Libs::PACKAGE
                | Libs::STRING
                | Libs::TABLE
                | Libs::UTF8
        );
    }

    #[test]
    fn stack_starts_empty_and_stays_balanced() -> Result<()> {
        let lua = Lua::with_config(Config::default().with_libs(Libs::NONE))?;
        assert_eq!(lua.stack().top(), 0);
        lua.exec("x = 1")?;
        lua.set_global("y", 2)?;
        let _: i32 = lua.get_global("y")?;
        assert_eq!(lua.stack().top(), 0);
        Ok(())
    }
}
