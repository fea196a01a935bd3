//! Host values living inside runtime userdata.
//!
//! Every userdata created by this crate starts with a [`Header`]: the type
//! tag, a pointer to the payload, whether the runtime owns the payload, and
//! a borrow flag. Owned values are stored inline right after the header;
//! pointers pushed with [`Ptr`] carry only the header and point at host
//! memory.
//!
//! A userdata is recognised as ours when its metatable carries the tag under
//! a private key. Receivers and by-value pulls always check that tag and
//! walk the single-parent chain to reach the requested type; `Ptr<T>` pulls
//! do so only when [`Config::checked_pointers`](crate::Config) is on.

use std::any::TypeId;
use std::cell::Cell;
use std::ffi::{c_int, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use mlua_sys as ffi;

use crate::binder::declare;
use crate::convert::{FromLua, ToLua, mismatch};
use crate::error::{Error, Result, SafetyError};
use crate::instance::Instance;
use crate::operators::OperatorSet;
use crate::stack::{LuaType, Stack, raw_get_field};
use crate::type_hash::TypeHash;
use crate::type_registry::UpcastFn;

/// Strongest alignment userdata memory is guaranteed to have.
pub(crate) const MAX_ALIGN: usize = 8;

static TAG_KEY: u8 = 0;

#[inline]
pub(crate) fn tag_key() -> *const c_void {
    ptr::addr_of!(TAG_KEY).cast()
}

// ============================================================================
// Traits
// ============================================================================

/// A host type that can be exposed to scripts.
///
/// Usually implemented with `#[derive(UserType)]`.
pub trait UserType: 'static {
    /// Name of the global type table and key of the instance metatable.
    const NAME: &'static str;

    /// Declare the operators the type supports.
    fn operators(ops: &mut OperatorSet<Self>)
    where
        Self: Sized,
    {
        let _ = ops;
    }
}

/// Single-parent inheritance between bound types.
pub trait Inherits: UserType + Sized {
    type Parent: UserType;

    fn upcast(&self) -> &Self::Parent;

    fn upcast_mut(&mut self) -> &mut Self::Parent;
}

/// Type-erased [`Inherits::upcast_mut`].
pub(crate) unsafe fn upcast_erased<C: Inherits>(ptr: *mut ()) -> *mut () {
    let child = unsafe { &mut *ptr.cast::<C>() };
    (child.upcast_mut() as *mut C::Parent).cast()
}

// ============================================================================
// Layout
// ============================================================================

#[repr(C)]
pub(crate) struct Header {
    tag: TypeHash,
    ptr: *mut (),
    owned: bool,
    live: bool,
    borrow: Cell<isize>,
}

impl Header {
    fn new(tag: TypeHash, ptr: *mut (), owned: bool) -> Self {
        Self {
            tag,
            ptr,
            owned,
            live: true,
            borrow: Cell::new(0),
        }
    }
}

#[repr(C)]
struct OwnedCell<T> {
    header: Header,
    value: MaybeUninit<T>,
}

/// Push the instance metatable registered under `name`.
unsafe fn push_metatable(state: *mut ffi::lua_State, name: &str) -> Result<()> {
    if unsafe { raw_get_field(state, ffi::LUA_REGISTRYINDEX, name) } != ffi::LUA_TTABLE {
        unsafe { ffi::lua_settop(state, -2) };
        return Err(Error::callback(format!("no metatable registered for '{name}'")));
    }
    Ok(())
}

/// Move `value` into a fresh runtime-owned userdata, declaring `T` if needed.
pub(crate) fn push_owned<T: UserType>(stack: &Stack<'_>, value: T) -> Result<()> {
    let instance = Instance::from_stack(stack)?;
    let tag = declare::<T>(stack, &instance)?;
    stack.reserve(3)?;
    let state = stack.as_ptr();
    unsafe {
        let cell = ffi::lua_newuserdatauv(state, mem::size_of::<OwnedCell<T>>(), 0)
            .cast::<OwnedCell<T>>();
        cell.write(OwnedCell {
            header: Header::new(tag, ptr::null_mut(), true),
            value: MaybeUninit::new(value),
        });
        (*cell).header.ptr = (*cell).value.as_mut_ptr().cast();
        if let Err(error) = push_metatable(state, T::NAME) {
            // Without a metatable no finalizer would ever run.
            ptr::drop_in_place((*cell).value.as_mut_ptr());
            (*cell).header.live = false;
            ffi::lua_settop(state, -2);
            return Err(error);
        }
        ffi::lua_setmetatable(state, -2);
    }
    Ok(())
}

/// Push a header-only userdata pointing at host memory.
unsafe fn push_borrowed(state: *mut ffi::lua_State, tag: TypeHash, name: &str, ptr: *mut ()) -> Result<()> {
    unsafe {
        let header = ffi::lua_newuserdatauv(state, mem::size_of::<Header>(), 0).cast::<Header>();
        header.write(Header::new(tag, ptr, false));
        if let Err(error) = push_metatable(state, name) {
            ffi::lua_settop(state, -2);
            return Err(error);
        }
        ffi::lua_setmetatable(state, -2);
    }
    Ok(())
}

/// The header of our userdata at `index`, or `None` for anything else.
pub(crate) fn header_at(stack: &Stack<'_>, index: i32) -> Option<NonNull<Header>> {
    if stack.type_of(index) != LuaType::Userdata {
        return None;
    }
    let state = stack.as_ptr();
    let index = stack.abs_index(index);
    if stack.reserve(2).is_err() {
        return None;
    }
    unsafe {
        if ffi::lua_getmetatable(state, index) == 0 {
            return None;
        }
        let kind = ffi::lua_rawgetp(state, -1, tag_key());
        let mut is_integer: c_int = 0;
        let tag = ffi::lua_tointegerx(state, -1, &mut is_integer);
        ffi::lua_settop(state, -3);
        if kind != ffi::LUA_TNUMBER || is_integer == 0 {
            return None;
        }
        let header = NonNull::new(ffi::lua_touserdata(state, index).cast::<Header>())?;
        (header.as_ref().tag == TypeHash::from_lua_integer(tag)).then_some(header)
    }
}

fn apply_upcasts(path: &[UpcastFn], mut ptr: *mut ()) -> *mut () {
    for step in path {
        ptr = unsafe { step(ptr) };
    }
    ptr
}

/// Locate the `T` inside the userdata at `index`, upcasting as needed.
fn resolve<T: UserType>(stack: &Stack<'_>, index: i32) -> Result<(NonNull<Header>, NonNull<T>)> {
    let Some(header) = header_at(stack, index) else {
        return Err(mismatch(stack, index, T::NAME));
    };
    let (tag, payload, live) = {
        let header = unsafe { header.as_ref() };
        (header.tag, header.ptr, header.live)
    };
    if !live {
        return Err(Error::Finalized { type_name: T::NAME });
    }
    let target = TypeHash::from_name(T::NAME);
    let instance = Instance::from_stack(stack)?;
    let path = {
        let types = instance.types();
        // The name must be bound to this very host type, not a namesake.
        let bound_here = types
            .get(target)
            .is_some_and(|descriptor| descriptor.type_id == TypeId::of::<T>());
        if bound_here { types.upcast_path(tag, target) } else { None }
    };
    let payload = match path {
        Some(path) => apply_upcasts(&path, payload),
        None => return Err(mismatch(stack, index, T::NAME)),
    };
    let payload = NonNull::new(payload.cast::<T>()).ok_or_else(|| mismatch(stack, index, T::NAME))?;
    Ok((header, payload))
}

// ============================================================================
// Borrows
// ============================================================================

/// Shared borrow of a value inside a userdata.
pub(crate) struct UserRef<'s, T> {
    header: NonNull<Header>,
    value: NonNull<T>,
    _marker: PhantomData<&'s T>,
}

impl<T> Deref for UserRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.value.as_ref() }
    }
}

impl<T> Drop for UserRef<'_, T> {
    fn drop(&mut self) {
        let flag = unsafe { &self.header.as_ref().borrow };
        flag.set(flag.get() - 1);
    }
}

impl<T: fmt::Debug> fmt::Debug for UserRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Exclusive borrow of a value inside a userdata.
pub(crate) struct UserRefMut<'s, T> {
    header: NonNull<Header>,
    value: NonNull<T>,
    _marker: PhantomData<&'s mut T>,
}

impl<T> Deref for UserRefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.value.as_ref() }
    }
}

impl<T> DerefMut for UserRefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.value.as_mut() }
    }
}

impl<T> Drop for UserRefMut<'_, T> {
    fn drop(&mut self) {
        unsafe { self.header.as_ref() }.borrow.set(0);
    }
}

/// Borrow the `T` at `index` for reading.
pub(crate) fn borrow<'s, T: UserType>(stack: &Stack<'s>, index: i32) -> Result<UserRef<'s, T>> {
    let (header, value) = resolve::<T>(stack, index)?;
    let flag = unsafe { &header.as_ref().borrow };
    let current = flag.get();
    if current < 0 {
        return Err(Error::Borrow {
            type_name: T::NAME,
            mutable: true,
        });
    }
    flag.set(current + 1);
    Ok(UserRef {
        header,
        value,
        _marker: PhantomData,
    })
}

/// Borrow the `T` at `index` for writing.
pub(crate) fn borrow_mut<'s, T: UserType>(stack: &Stack<'s>, index: i32) -> Result<UserRefMut<'s, T>> {
    let (header, value) = resolve::<T>(stack, index)?;
    let flag = unsafe { &header.as_ref().borrow };
    let current = flag.get();
    if current != 0 {
        return Err(Error::Borrow {
            type_name: T::NAME,
            mutable: current < 0,
        });
    }
    flag.set(-1);
    Ok(UserRefMut {
        header,
        value,
        _marker: PhantomData,
    })
}

impl<T: UserType> ToLua for T {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        push_owned(stack, self)
    }
}

impl<T: UserType + Clone> FromLua for T {
    const EXPECTED: &'static str = T::NAME;

    fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
        let value = borrow::<T>(stack, index)?;
        Ok((*value).clone())
    }
}

/// Runs the destructor of an owned `T` when the runtime collects it.
pub(crate) unsafe extern "C-unwind" fn finalize<T: UserType>(state: *mut ffi::lua_State) -> c_int {
    let Some(state) = NonNull::new(state) else {
        return 0;
    };
    let stack = unsafe { Stack::from_raw(state) };
    let Some(mut header) = header_at(&stack, 1) else {
        return 0;
    };
    let header = unsafe { header.as_mut() };
    if header.tag != TypeHash::from_name(T::NAME) || !header.owned || !header.live {
        return 0;
    }
    header.live = false;
    let cell = (header as *mut Header).cast::<OwnedCell<T>>();
    let _ = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        ptr::drop_in_place((*cell).value.as_mut_ptr());
    }));
    0
}

// ============================================================================
// Pointers
// ============================================================================

/// A raw host pointer crossing the boundary.
///
/// Pushed as a tagged header-only userdata when `T` is bound in the target
/// instance, and as an untagged light userdata otherwise. The pointee is
/// never owned or freed by the runtime.
///
/// Scripts dereference a pushed pointer whenever they call a bound method on
/// it, so only the `unsafe` constructors produce pointers that can be pushed.
/// A pointer pulled from the stack refers to memory the host has not vouched
/// for; pushing it fails with [`SafetyError::Unvouched`] until
/// [`Ptr::vouch`] is called.
pub struct Ptr<T> {
    ptr: NonNull<T>,
    vouched: bool,
}

impl<T> Ptr<T> {
    /// # Safety
    ///
    /// Once pushed, the pointee must stay alive and valid for `T` for as long
    /// as any script can reach the pushed value. No other reference to the
    /// pointee may be used while a script call that can reach it is running.
    pub unsafe fn new(ptr: NonNull<T>) -> Self {
        Self { ptr, vouched: true }
    }

    /// # Safety
    ///
    /// Same contract as [`Ptr::new`]. The borrow of `value` ends here, so the
    /// caller must keep `value` in place and untouched while scripts use it.
    pub unsafe fn from_mut(value: &mut T) -> Self {
        unsafe { Self::new(NonNull::from(value)) }
    }

    /// `None` for null pointers.
    ///
    /// # Safety
    ///
    /// Same contract as [`Ptr::new`].
    pub unsafe fn from_raw(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| unsafe { Self::new(ptr) })
    }

    /// Whether this pointer may be pushed to a runtime.
    pub fn is_vouched(self) -> bool {
        self.vouched
    }

    /// Allow a pointer pulled from the stack to be pushed again.
    ///
    /// # Safety
    ///
    /// Same contract as [`Ptr::new`]. Pointers into runtime-owned userdata
    /// become dangling once that userdata is collected.
    pub unsafe fn vouch(self) -> Self {
        Self {
            vouched: true,
            ..self
        }
    }

    pub fn as_ptr(self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// # Safety
    ///
    /// The pointee must be alive, of type `T`, and not mutably aliased for `'a`.
    pub unsafe fn as_ref<'a>(self) -> &'a T {
        unsafe { self.ptr.as_ref() }
    }

    /// # Safety
    ///
    /// The pointee must be alive, of type `T`, and not aliased at all for `'a`.
    pub unsafe fn as_mut<'a>(mut self) -> &'a mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ptr<T> {}

impl<T> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for Ptr<T> {}

impl<T> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ptr").field(&self.ptr).finish()
    }
}

impl<T: 'static> ToLua for Ptr<T> {
    fn push(self, stack: &Stack<'_>) -> Result<()> {
        if !self.vouched {
            return Err(SafetyError::Unvouched {
                type_name: std::any::type_name::<T>(),
            }
            .into());
        }
        let instance = Instance::from_stack(stack)?;
        let bound = instance
            .types()
            .get_by_type_id(TypeId::of::<T>())
            .map(|descriptor| (descriptor.hash(), descriptor.name()));
        stack.reserve(3)?;
        let state = stack.as_ptr();
        match bound {
            Some((tag, name)) => unsafe { push_borrowed(state, tag, name, self.ptr.as_ptr().cast()) },
            None => {
                unsafe { ffi::lua_pushlightuserdata(state, self.ptr.as_ptr().cast()) };
                Ok(())
            }
        }
    }
}

impl<T: 'static> FromLua for Ptr<T> {
    const EXPECTED: &'static str = "userdata";

    fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
        let kind = stack.type_of(index);
        if kind != LuaType::LightUserdata && kind != LuaType::Userdata {
            return Err(mismatch(stack, index, Self::EXPECTED));
        }

        let instance = Instance::from_stack(stack)?;
        let checked = instance.config().checked_pointers;
        let (target, expected) = instance
            .types()
            .get_by_type_id(TypeId::of::<T>())
            .map(|descriptor| (Some(descriptor.hash()), descriptor.name()))
            .unwrap_or((None, std::any::type_name::<T>()));

        let raw = match header_at(stack, index) {
            Some(header) => {
                let header = unsafe { header.as_ref() };
                let actual = instance.types().name_of(header.tag).unwrap_or("userdata");
                if header.owned && !header.live {
                    return Err(Error::Finalized { type_name: actual });
                }
                let path = target.and_then(|target| instance.types().upcast_path(header.tag, target));
                match path {
                    Some(path) => apply_upcasts(&path, header.ptr),
                    None if checked => {
                        return Err(SafetyError::TypeMismatch {
                            expected,
                            actual: actual.to_owned(),
                        }
                        .into());
                    }
                    None => header.ptr,
                }
            }
            None => {
                // Light pointers and foreign userdata carry no tag.
                if checked && (target.is_some() || kind == LuaType::Userdata) {
                    return Err(SafetyError::Untagged { expected }.into());
                }
                unsafe { ffi::lua_touserdata(stack.as_ptr(), index) }.cast()
            }
        };
        NonNull::new(raw.cast::<T>())
            .map(|ptr| Ptr {
                ptr,
                vouched: false,
            })
            .ok_or_else(|| mismatch(stack, index, Self::EXPECTED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fits_userdata_alignment() {
        assert!(mem::align_of::<Header>() <= MAX_ALIGN);
        assert!(mem::align_of::<OwnedCell<u64>>() <= MAX_ALIGN);
    }

    #[test]
    fn owned_cell_payload_follows_header() {
        let offset = mem::offset_of!(OwnedCell<u32>, value);
        assert_eq!(offset, mem::size_of::<Header>());
    }

    #[test]
    fn ptr_identity() {
        let mut value = 5u32;
        let a = unsafe { Ptr::from_mut(&mut value) };
        let b = a;
        assert_eq!(a, b);
        assert!(a.is_vouched());
        assert_eq!(a.as_ptr(), &mut value as *mut u32);
        assert!(unsafe { Ptr::<u32>::from_raw(ptr::null_mut()) }.is_none());
    }
}
