//! Host closures exposed as runtime functions.
//!
//! Every wrapped closure becomes a runtime C closure whose single upvalue is
//! a full userdata owning the boxed [`Callback`]. The runtime always enters
//! through [`trampoline`], which recovers the callback, runs it with panics
//! caught, and converts failures into runtime errors.
//!
//! Argument extraction is generated per arity by `macro_rules!` impls of
//! [`HostFunction`], [`HostMethod`] and [`HostMethodMut`]. Extraction stops
//! at the first parameter that fails to convert and the host closure is not
//! called:
//!
//! ```text
//! [string "c_func('String')"]:1: bad argument #1 to 'c_func' (number expected, got string)
//! ```

use std::any::Any;
use std::ffi::{c_int, c_void};
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use mlua_sys as ffi;

use crate::convert::{FromLua, ToLuaMulti};
use crate::error::{Error, Result};
use crate::stack::{Stack, push_str, raw_set_field};
use crate::userdata::{self, UserType};

// ============================================================================
// Signature
// ============================================================================

/// Declared parameter kinds of a wrapped closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    receiver: Option<&'static str>,
    params: Vec<&'static str>,
    first: i32,
}

impl Signature {
    /// A signature whose parameters start at stack position 1.
    pub fn new(params: Vec<&'static str>) -> Self {
        Self {
            receiver: None,
            params,
            first: 1,
        }
    }

    /// Add a receiver, which takes the first position.
    pub fn with_receiver(mut self, receiver: &'static str) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Move the first parameter to another stack position.
    pub fn starting_at(mut self, first: i32) -> Self {
        self.first = first;
        self
    }

    pub fn receiver(&self) -> Option<&'static str> {
        self.receiver
    }

    pub fn params(&self) -> &[&'static str] {
        &self.params
    }

    /// Number of declared parameters, excluding the receiver.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Stack position of the receiver, or of the first parameter without one.
    pub fn first(&self) -> i32 {
        self.first
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(receiver) = self.receiver {
            write!(f, "{receiver}:")?;
        }
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(param)?;
        }
        f.write_str(")")
    }
}

// ============================================================================
// Callback
// ============================================================================

type CallbackFn = dyn Fn(&Stack<'_>) -> Result<i32>;

/// A host closure ready to be installed as a runtime function.
pub(crate) struct Callback {
    name: Box<str>,
    signature: Signature,
    func: Box<CallbackFn>,
}

/// Payload of the upvalue userdata. Emptied by `__gc`.
struct CallbackCell(Option<Callback>);

static CALLBACK_METATABLE_KEY: u8 = 0;

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl Callback {
    pub(crate) fn new(
        name: &str,
        signature: Signature,
        func: impl Fn(&Stack<'_>) -> Result<i32> + 'static,
    ) -> Self {
        tracing::debug!(name, %signature, "wrapped host function");
        Self {
            name: name.into(),
            signature,
            func: Box::new(func),
        }
    }

    /// Wrap a free function whose parameters start at position 1.
    pub(crate) fn from_function<F, Args, R>(name: &str, f: F) -> Self
    where
        F: HostFunction<Args, R>,
    {
        Self::from_function_at(name, f, 1)
    }

    /// Wrap a free function whose parameters start at `first`.
    pub(crate) fn from_function_at<F, Args, R>(name: &str, f: F, first: i32) -> Self
    where
        F: HostFunction<Args, R>,
    {
        let signature = F::signature().starting_at(first);
        Self::new(name, signature, move |stack| f.invoke(stack, first))
    }

    /// Wrap a method taking `&T` from position 1.
    pub(crate) fn from_method<T, F, Args, R>(name: &str, f: F) -> Self
    where
        T: UserType,
        F: HostMethod<T, Args, R>,
    {
        Self::new(name, F::signature(), move |stack| f.invoke(stack, 1))
    }

    /// Wrap a method taking `&mut T` from position 1.
    pub(crate) fn from_method_mut<T, F, Args, R>(name: &str, f: F) -> Self
    where
        T: UserType,
        F: HostMethodMut<T, Args, R>,
    {
        Self::new(name, F::signature(), move |stack| f.invoke(stack, 1))
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Push the callback as a runtime closure.
    pub(crate) fn push(self, stack: &Stack<'_>) -> Result<()> {
        stack.reserve(3)?;
        let state = stack.as_ptr();
        unsafe {
            let raw = ffi::lua_newuserdatauv(state, mem::size_of::<CallbackCell>(), 0)
                as *mut CallbackCell;
            raw.write(CallbackCell(Some(self)));
            push_callback_metatable(state);
            ffi::lua_setmetatable(state, -2);
            ffi::lua_pushcclosure(state, trampoline, 1);
        }
        Ok(())
    }
}

unsafe fn push_callback_metatable(state: *mut ffi::lua_State) {
    let key = ptr::addr_of!(CALLBACK_METATABLE_KEY).cast::<c_void>();
    unsafe {
        if ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, key) == ffi::LUA_TTABLE {
            return;
        }
        ffi::lua_settop(state, -2);
        ffi::lua_createtable(state, 0, 2);
        ffi::lua_pushcclosure(state, finalize_callback, 0);
        raw_set_field(state, -2, "__gc");
        ffi::lua_pushboolean(state, 0);
        raw_set_field(state, -2, "__metatable");
        ffi::lua_pushvalue(state, -1);
        ffi::lua_rawsetp(state, ffi::LUA_REGISTRYINDEX, key);
    }
}

unsafe extern "C-unwind" fn finalize_callback(state: *mut ffi::lua_State) -> c_int {
    let cell = unsafe { ffi::lua_touserdata(state, 1) } as *mut CallbackCell;
    if let Some(cell) = unsafe { cell.as_mut() } {
        let callback = cell.0.take();
        // A panicking destructor must not unwind into the collector.
        let _ = panic::catch_unwind(AssertUnwindSafe(move || drop(callback)));
    }
    0
}

/// Entry point for every wrapped host function.
pub(crate) unsafe extern "C-unwind" fn trampoline(state: *mut ffi::lua_State) -> c_int {
    match unsafe { dispatch(state) } {
        Some(count) => count,
        // Every Rust value of the call has been dropped by now.
        None => unsafe { ffi::lua_error(state) },
    }
}

/// Run the callback behind the current closure.
///
/// Returns the result count, or `None` after pushing an error message.
unsafe fn dispatch(state: *mut ffi::lua_State) -> Option<c_int> {
    let stack = unsafe { Stack::from_raw(NonNull::new_unchecked(state)) };
    let cell = unsafe { ffi::lua_touserdata(state, ffi::lua_upvalueindex(1)) } as *const CallbackCell;
    let Some(callback) = unsafe { cell.as_ref() }.and_then(|cell| cell.0.as_ref()) else {
        push_error(&stack, "?", &Error::callback("host function has been finalized"));
        return None;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (callback.func)(&stack)));
    let error = match outcome {
        Ok(Ok(count)) => return Some(count),
        Ok(Err(error)) => error,
        Err(payload) => Error::Panic {
            message: panic_message(payload.as_ref()),
        },
    };
    tracing::debug!(
        name = callback.name(),
        signature = %callback.signature(),
        %error,
        "host function failed"
    );
    push_error(&stack, callback.name(), &error);
    None
}

/// Push the message the runtime will raise for `error`.
fn push_error(stack: &Stack<'_>, name: &str, error: &Error) {
    let state = stack.as_ptr();
    unsafe {
        ffi::lua_checkstack(state, 3);
        match error {
            Error::Script { message, .. } => push_str(state, message),
            Error::Argument { position, source } => {
                ffi::luaL_where(state, 1);
                push_str(
                    state,
                    &format!("bad argument #{position} to '{name}' ({source})"),
                );
                ffi::lua_concat(state, 2);
            }
            other => {
                ffi::luaL_where(state, 1);
                push_str(state, &other.to_string());
                ffi::lua_concat(state, 2);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

// ============================================================================
// Arity adapters
// ============================================================================

/// A host closure callable with arguments pulled from the stack.
pub trait HostFunction<Args, R>: 'static {
    /// Declared parameter kinds.
    fn signature() -> Signature;

    /// Extract arguments starting at `first`, call, and push the result.
    fn invoke(&self, stack: &Stack<'_>, first: i32) -> Result<i32>;
}

/// A host closure taking `&T` as receiver.
pub trait HostMethod<T, Args, R>: 'static {
    fn signature() -> Signature;

    /// Borrow the receiver at `first`, extract the rest, call, and push the result.
    fn invoke(&self, stack: &Stack<'_>, first: i32) -> Result<i32>;
}

/// A host closure taking `&mut T` as receiver.
pub trait HostMethodMut<T, Args, R>: 'static {
    fn signature() -> Signature;

    fn invoke(&self, stack: &Stack<'_>, first: i32) -> Result<i32>;
}

macro_rules! impl_host_callables {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg,)*> HostFunction<($($arg,)*), Ret> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: ToLuaMulti,
            $($arg: FromLua,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$(<$arg as FromLua>::EXPECTED),*])
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn invoke(&self, stack: &Stack<'_>, first: i32) -> Result<i32> {
                let mut position = first;
                $(
                    let $arg = <$arg as FromLua>::from_stack(stack, position)
                        .map_err(|error| Error::argument(position, error))?;
                    position += 1;
                )*
                (self)($($arg),*).push_multi(stack)
            }
        }

        impl<Func, Ret, This, $($arg,)*> HostMethod<This, ($($arg,)*), Ret> for Func
        where
            Func: Fn(&This, $($arg),*) -> Ret + 'static,
            This: UserType,
            Ret: ToLuaMulti,
            $($arg: FromLua,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$(<$arg as FromLua>::EXPECTED),*]).with_receiver(This::NAME)
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn invoke(&self, stack: &Stack<'_>, first: i32) -> Result<i32> {
                let this = userdata::borrow::<This>(stack, first)
                    .map_err(|error| Error::argument(first, error))?;
                let mut position = first + 1;
                $(
                    let $arg = <$arg as FromLua>::from_stack(stack, position)
                        .map_err(|error| Error::argument(position, error))?;
                    position += 1;
                )*
                let result = (self)(&*this, $($arg),*);
                drop(this);
                result.push_multi(stack)
            }
        }

        impl<Func, Ret, This, $($arg,)*> HostMethodMut<This, ($($arg,)*), Ret> for Func
        where
            Func: Fn(&mut This, $($arg),*) -> Ret + 'static,
            This: UserType,
            Ret: ToLuaMulti,
            $($arg: FromLua,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$(<$arg as FromLua>::EXPECTED),*]).with_receiver(This::NAME)
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn invoke(&self, stack: &Stack<'_>, first: i32) -> Result<i32> {
                let mut this = userdata::borrow_mut::<This>(stack, first)
                    .map_err(|error| Error::argument(first, error))?;
                let mut position = first + 1;
                $(
                    let $arg = <$arg as FromLua>::from_stack(stack, position)
                        .map_err(|error| Error::argument(position, error))?;
                    position += 1;
                )*
                let result = (self)(&mut *this, $($arg),*);
                drop(this);
                result.push_multi(stack)
            }
        }
    };
}

impl_host_callables!();
impl_host_callables!(A);
impl_host_callables!(A, B);
impl_host_callables!(A, B, C);
impl_host_callables!(A, B, C, D);
impl_host_callables!(A, B, C, D, E);
impl_host_callables!(A, B, C, D, E, F);
impl_host_callables!(A, B, C, D, E, F, G);
impl_host_callables!(A, B, C, D, E, F, G, H);
impl_host_callables!(A, B, C, D, E, F, G, H, I);
impl_host_callables!(A, B, C, D, E, F, G, H, I, J);
