//! Fluent registration of host types.
//!
//! Declaring a type creates two runtime tables:
//!
//! - the *type table*, stored in the global named `T::NAME`, holding methods,
//!   members and static functions. Its own metatable carries the
//!   constructor (`__call`) and, once a parent is linked, an `__index`
//!   falling through to the parent's type table;
//! - the *instance metatable*, stored in the registry under `T::NAME`,
//!   shared by every userdata of the type. It carries `__index` (the type
//!   table), `__name`, the type tag, operators and `__gc` when `T` needs
//!   dropping.
//!
//! # Example
//!
//! ```ignore
//! lua.bind::<Vec2>()?
//!     .add_constructor(|x: f64, y: f64| Vec2 { x, y })?
//!     .add_method("length", |v: &Vec2| (v.x * v.x + v.y * v.y).sqrt())?
//!     .add_member("x", |v: &mut Vec2| &mut v.x)?
//!     .add_detected_operators()?;
//! ```

use std::any::TypeId;
use std::ffi::CString;
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use mlua_sys as ffi;

use crate::callback::{Callback, HostFunction, HostMethod, HostMethodMut, Signature};
use crate::convert::{FromLua, ToLua, ToLuaMulti};
use crate::error::{Error, RegistrationError, Result};
use crate::instance::Instance;
use crate::lua::Lua;
use crate::operators::OperatorSet;
use crate::stack::{Stack, push_globals, raw_get_field, raw_set_field};
use crate::type_hash::TypeHash;
use crate::type_registry::{ConstructorKind, ParentLink, TypeDescriptor};
use crate::userdata::{Inherits, MAX_ALIGN, UserType, borrow_mut, finalize, tag_key, upcast_erased};

/// Metamethods the binder manages itself.
const RESERVED_METAMETHODS: [&str; 4] = ["__index", "__gc", "__name", "__metatable"];

/// Declare `T` in the instance if it is not declared yet, returning its tag.
#[cfg_attr(feature = "profiling", profiling::function)]
pub(crate) fn declare<T: UserType>(stack: &Stack<'_>, instance: &Instance) -> Result<TypeHash> {
    let hash = TypeHash::from_name(T::NAME);
    if let Some(descriptor) = instance.types().get(hash) {
        if descriptor.type_id != TypeId::of::<T>() {
            return Err(RegistrationError::NameConflict { name: T::NAME }.into());
        }
        return Ok(hash);
    }

    let align = mem::align_of::<T>();
    if align > MAX_ALIGN {
        return Err(RegistrationError::OverAligned {
            name: T::NAME,
            align,
            max: MAX_ALIGN,
        }
        .into());
    }

    let name = CString::new(T::NAME)?;
    let has_destructor = mem::needs_drop::<T>();
    let _guard = stack.guard();
    stack.reserve(6)?;
    let state = stack.as_ptr();
    unsafe {
        if ffi::luaL_newmetatable(state, name.as_ptr()) == 0 {
            // Something else already owns this registry name.
            return Err(RegistrationError::NameConflict { name: T::NAME }.into());
        }
        let metatable = stack.top();

        ffi::lua_createtable(state, 0, 0);
        let type_table = stack.top();
        ffi::lua_createtable(state, 0, 2);
        ffi::lua_setmetatable(state, type_table);

        ffi::lua_pushvalue(state, type_table);
        raw_set_field(state, metatable, "__index");
        ffi::lua_pushinteger(state, hash.to_lua_integer());
        ffi::lua_rawsetp(state, metatable, tag_key());
        if has_destructor {
            ffi::lua_pushcclosure(state, finalize::<T>, 0);
            raw_set_field(state, metatable, "__gc");
        }

        push_globals(state);
        ffi::lua_pushvalue(state, type_table);
        raw_set_field(state, -2, T::NAME);
    }

    instance
        .types_mut()
        .insert(TypeDescriptor::new(T::NAME, TypeId::of::<T>(), has_destructor));
    tracing::debug!(
        type_name = T::NAME,
        %hash,
        destructor = has_destructor,
        "declared user type"
    );
    Ok(hash)
}

/// Which table of a bound type a callback is installed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    TypeTable,
    ClassMetatable,
    Metatable,
}

/// Push the requested table of the type registered as `name`.
unsafe fn push_target(state: *mut ffi::lua_State, name: &'static str, target: Target) -> Result<()> {
    unsafe {
        if raw_get_field(state, ffi::LUA_REGISTRYINDEX, name) != ffi::LUA_TTABLE {
            return Err(RegistrationError::NotDeclared { name }.into());
        }
        if target == Target::Metatable {
            return Ok(());
        }
        if raw_get_field(state, -1, "__index") != ffi::LUA_TTABLE {
            return Err(RegistrationError::NotDeclared { name }.into());
        }
        if target == Target::ClassMetatable && ffi::lua_getmetatable(state, -1) == 0 {
            return Err(RegistrationError::NotDeclared { name }.into());
        }
    }
    Ok(())
}

/// Builder returned by [`Lua::bind`].
///
/// Every step returns the builder again so calls chain with `?`.
pub struct TypeBinder<'l, T: UserType> {
    lua: &'l Lua,
    instance: Rc<Instance>,
    hash: TypeHash,
    _marker: PhantomData<fn() -> T>,
}

impl<'l, T: UserType> TypeBinder<'l, T> {
    pub(crate) fn new(lua: &'l Lua) -> Result<Self> {
        let instance = lua.instance().clone();
        let hash = declare::<T>(&lua.stack(), &instance)?;
        Ok(Self {
            lua,
            instance,
            hash,
            _marker: PhantomData,
        })
    }

    /// Snapshot of what is recorded for `T` so far.
    pub fn descriptor(&self) -> Option<TypeDescriptor> {
        self.instance.types().get(self.hash).cloned()
    }

    fn install(&self, target: Target, key: &str, callback: Callback) -> Result<()> {
        let stack = self.lua.stack();
        let _guard = stack.guard();
        stack.reserve(8)?;
        let state = stack.as_ptr();
        unsafe {
            push_target(state, T::NAME, target)?;
            let table = stack.top();
            callback.push(&stack)?;
            raw_set_field(state, table, key);
        }
        Ok(())
    }

    fn set_constructor(self, kind: ConstructorKind, callback: Callback) -> Result<Self> {
        self.install(Target::ClassMetatable, "__call", callback)?;
        let previous = {
            let mut types = self.instance.types_mut();
            let descriptor = types
                .get_mut(self.hash)
                .ok_or(RegistrationError::NotDeclared { name: T::NAME })?;
            mem::replace(&mut descriptor.constructor, kind)
        };
        if previous != ConstructorKind::None {
            tracing::warn!(
                type_name = T::NAME,
                ?previous,
                replacement = ?kind,
                "constructor registered twice, keeping the latest"
            );
        }
        Ok(self)
    }

    /// Make `T(...)` construct a value. Arguments start after the type table.
    pub fn add_constructor<F, Args>(self, f: F) -> Result<Self>
    where
        F: HostFunction<Args, T>,
    {
        let callback = Callback::from_function_at(T::NAME, f, 2);
        self.set_constructor(ConstructorKind::Explicit, callback)
    }

    /// As [`add_constructor`](Self::add_constructor), using `T::default()`
    /// when called without arguments.
    pub fn add_constructor_with_default<F, Args>(self, f: F) -> Result<Self>
    where
        T: Default,
        F: HostFunction<Args, T>,
    {
        let signature = F::signature().starting_at(2);
        let callback = Callback::new(T::NAME, signature, move |stack: &Stack<'_>| {
            if stack.top() < 2 {
                T::default().push_multi(stack)
            } else {
                f.invoke(stack, 2)
            }
        });
        self.set_constructor(ConstructorKind::WithDefault, callback)
    }

    /// Add a method called as `value:name(...)` with `&T` as receiver.
    pub fn add_method<F, Args, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: HostMethod<T, Args, R>,
    {
        self.install(Target::TypeTable, name, Callback::from_method(name, f))?;
        Ok(self)
    }

    /// Add a method called as `value:name(...)` with `&mut T` as receiver.
    pub fn add_method_mut<F, Args, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: HostMethodMut<T, Args, R>,
    {
        self.install(Target::TypeTable, name, Callback::from_method_mut(name, f))?;
        Ok(self)
    }

    /// Add a function called as `T.name(...)` without a receiver.
    pub fn add_static_method<F, Args, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: HostFunction<Args, R>,
    {
        self.install(Target::TypeTable, name, Callback::from_function(name, f))?;
        Ok(self)
    }

    /// Expose a field through an accessor.
    ///
    /// `value:name()` reads the field, `value:name(x)` writes it.
    pub fn add_member<V, F>(self, name: &str, accessor: F) -> Result<Self>
    where
        V: FromLua + ToLua + Clone,
        F: Fn(&mut T) -> &mut V + 'static,
    {
        let signature = Signature::new(vec![V::EXPECTED]).with_receiver(T::NAME);
        let callback = Callback::new(name, signature, move |stack: &Stack<'_>| {
            let mut this = borrow_mut::<T>(stack, 1).map_err(|error| Error::argument(1, error))?;
            if stack.top() >= 2 {
                let value = V::from_stack(stack, 2).map_err(|error| Error::argument(2, error))?;
                *accessor(&mut *this) = value;
                Ok(0)
            } else {
                let value = accessor(&mut *this).clone();
                drop(this);
                value.push(stack)?;
                Ok(1)
            }
        });
        self.install(Target::TypeTable, name, callback)?;
        Ok(self)
    }

    /// Install a metamethod such as `__tostring` with `&T` as receiver.
    pub fn add_metamethod<F, Args, R>(self, name: &str, f: F) -> Result<Self>
    where
        F: HostMethod<T, Args, R>,
    {
        if RESERVED_METAMETHODS.contains(&name) {
            return Err(RegistrationError::ReservedMetamethod {
                name: name.to_owned(),
            }
            .into());
        }
        self.install(Target::Metatable, name, Callback::from_method(name, f))?;
        Ok(self)
    }

    /// Install the operators `T` declares in [`UserType::operators`].
    pub fn add_detected_operators(self) -> Result<Self> {
        let mut ops = OperatorSet::<T>::new();
        T::operators(&mut ops);
        let declared = ops.declared();
        for (op, callback) in ops.into_entries() {
            if let Some(key) = op.metamethod() {
                self.install(Target::Metatable, key, callback)?;
            }
        }
        if let Some(descriptor) = self.instance.types_mut().get_mut(self.hash) {
            descriptor.operators |= declared;
        }
        tracing::debug!(type_name = T::NAME, operators = ?declared, "installed operators");
        Ok(self)
    }

    /// Link `T` to its parent type, which must already be declared.
    ///
    /// Lookups missing on `T`'s type table fall through to the parent's, and
    /// values of `T` are accepted wherever the parent is expected.
    pub fn add_parent_type(self) -> Result<Self>
    where
        T: Inherits,
    {
        let parent = <T::Parent as UserType>::NAME;
        let parent_hash = TypeHash::from_name(parent);
        {
            let types = self.instance.types();
            let parent_declared = types
                .get(parent_hash)
                .is_some_and(|descriptor| descriptor.type_id == TypeId::of::<T::Parent>());
            if !parent_declared {
                return Err(RegistrationError::ParentNotDeclared {
                    child: T::NAME,
                    parent,
                }
                .into());
            }
            if types.is_same_or_ancestor(parent_hash, self.hash) {
                return Err(RegistrationError::InheritanceCycle {
                    child: T::NAME,
                    parent,
                }
                .into());
            }
            let linked = types
                .get(self.hash)
                .and_then(|descriptor| descriptor.parent)
                .is_some_and(|link| link.hash == parent_hash);
            if linked {
                drop(types);
                return Ok(self);
            }
        }

        {
            let stack = self.lua.stack();
            let _guard = stack.guard();
            stack.reserve(8)?;
            let state = stack.as_ptr();
            unsafe {
                push_target(state, T::NAME, Target::ClassMetatable)?;
                let class_metatable = stack.top();
                push_target(state, parent, Target::TypeTable)?;
                raw_set_field(state, class_metatable, "__index");
            }
        }

        if let Some(descriptor) = self.instance.types_mut().get_mut(self.hash) {
            descriptor.parent = Some(ParentLink {
                hash: parent_hash,
                name: parent,
                upcast: upcast_erased::<T>,
            });
        }
        tracing::debug!(type_name = T::NAME, parent, "linked parent type");
        Ok(self)
    }
}
