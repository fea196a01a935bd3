//! Per-state bookkeeping shared by every handle of one runtime instance.
//!
//! An [`Instance`] record is created for each state owned by a
//! [`Lua`](crate::Lua). Its address is stored in the state's registry so any
//! code holding only a raw stack can find it again. Handles keep the record
//! alive through `Rc`; once the state closes the record stays behind with a
//! null state pointer so late handle operations fail instead of touching
//! freed memory.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use mlua_sys as ffi;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::stack::Stack;
use crate::type_registry::TypeRegistry;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

static INSTANCE_KEY: u8 = 0;
static SLOTS_KEY: u8 = 0;

#[inline]
fn instance_key() -> *const c_void {
    ptr::addr_of!(INSTANCE_KEY).cast()
}

#[inline]
fn slots_key() -> *const c_void {
    ptr::addr_of!(SLOTS_KEY).cast()
}

/// Process-wide unique identifier of a runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Slot arena
// ============================================================================

/// Identity of one persistent slot: index plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Index into the slots table (1-based).
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when the id was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotEntry {
    generation: u32,
    occupied: bool,
}

/// Host-side bookkeeping for the slots table.
#[derive(Debug, Default)]
pub(crate) struct SlotArena {
    entries: Vec<SlotEntry>,
    free: Vec<u32>,
    live: usize,
}

impl SlotArena {
    pub(crate) fn allocate(&mut self) -> SlotId {
        let position = match self.free.pop() {
            Some(position) => position,
            None => {
                self.entries.push(SlotEntry::default());
                (self.entries.len() - 1) as u32
            }
        };
        let entry = &mut self.entries[position as usize];
        entry.occupied = true;
        self.live += 1;
        SlotId {
            index: position + 1,
            generation: entry.generation,
        }
    }

    /// Mark the slot free and bump its generation. Returns false for stale ids.
    pub(crate) fn release(&mut self, slot: SlotId) -> bool {
        let position = slot.index.wrapping_sub(1);
        match self.entries.get_mut(position as usize) {
            Some(entry) if entry.occupied && entry.generation == slot.generation => {
                entry.occupied = false;
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(position);
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_live(&self, slot: SlotId) -> bool {
        self.entries
            .get(slot.index.wrapping_sub(1) as usize)
            .is_some_and(|entry| entry.occupied && entry.generation == slot.generation)
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }
}

// ============================================================================
// Instance
// ============================================================================

/// Bookkeeping for one runtime state.
pub(crate) struct Instance {
    id: InstanceId,
    state: Cell<*mut ffi::lua_State>,
    config: Config,
    slots: RefCell<SlotArena>,
    types: RefCell<TypeRegistry>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("live_slots", &self.slots.borrow().live())
            .finish()
    }
}

impl Instance {
    /// Create the record and install it, plus an empty slots table, into the
    /// state's registry.
    ///
    /// # Safety
    ///
    /// `state` must be a live state that outlives the returned record's use
    /// through [`Instance::state`], i.e. [`Instance::close`] must be called
    /// before the state is closed.
    pub(crate) unsafe fn install(state: NonNull<ffi::lua_State>, config: Config) -> Rc<Self> {
        let instance = Rc::new(Self {
            id: InstanceId::next(),
            state: Cell::new(state.as_ptr()),
            config,
            slots: RefCell::new(SlotArena::default()),
            types: RefCell::new(TypeRegistry::default()),
        });
        let raw = state.as_ptr();
        unsafe {
            ffi::lua_pushlightuserdata(raw, Rc::as_ptr(&instance) as *mut c_void);
            ffi::lua_rawsetp(raw, ffi::LUA_REGISTRYINDEX, instance_key());
            ffi::lua_createtable(raw, 0, 0);
            ffi::lua_rawsetp(raw, ffi::LUA_REGISTRYINDEX, slots_key());
        }
        tracing::debug!(instance = %instance.id, "installed instance record");
        instance
    }

    /// Find the record of the state behind `stack`.
    pub(crate) fn from_stack(stack: &Stack<'_>) -> Result<Rc<Self>> {
        stack.reserve(1)?;
        let state = stack.as_ptr();
        let raw = unsafe {
            ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, instance_key());
            let raw = ffi::lua_touserdata(state, -1);
            ffi::lua_settop(state, -2);
            raw
        };
        if raw.is_null() {
            return Err(Error::NotInitialized);
        }
        // The owning `Lua` holds a strong count for as long as the state can run code.
        unsafe {
            Rc::increment_strong_count(raw as *const Instance);
            Ok(Rc::from_raw(raw as *const Instance))
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }

    #[inline]
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// The live state, or `InstanceClosed`.
    pub(crate) fn state(&self) -> Result<NonNull<ffi::lua_State>> {
        NonNull::new(self.state.get()).ok_or(Error::InstanceClosed)
    }

    /// A stack over the main state.
    ///
    /// The returned stack must not outlive the owning `Lua`; callers use it
    /// within one operation only.
    pub(crate) fn stack(&self) -> Result<Stack<'_>> {
        let state = self.state()?;
        Ok(unsafe { Stack::from_raw(state) })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.get().is_null()
    }

    /// Detach from the state. Every later state access reports `InstanceClosed`.
    pub(crate) fn close(&self) {
        self.state.set(ptr::null_mut());
        tracing::debug!(instance = %self.id, "closed instance");
    }

    pub(crate) fn types(&self) -> Ref<'_, TypeRegistry> {
        self.types.borrow()
    }

    pub(crate) fn types_mut(&self) -> RefMut<'_, TypeRegistry> {
        self.types.borrow_mut()
    }

    pub(crate) fn live_slots(&self) -> usize {
        self.slots.borrow().live()
    }

    // ------------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------------

    /// Copy the value at `index` into a fresh slot.
    pub(crate) fn store(&self, stack: &Stack<'_>, index: i32) -> Result<SlotId> {
        let index = stack.abs_index(index);
        stack.reserve(2)?;
        let slot = self.slots.borrow_mut().allocate();
        let state = stack.as_ptr();
        unsafe {
            ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, slots_key());
            ffi::lua_pushvalue(state, index);
            ffi::lua_rawseti(state, -2, slot.index as ffi::lua_Integer);
            ffi::lua_settop(state, -2);
        }
        tracing::trace!(instance = %self.id, slot = slot.index, generation = slot.generation, "stored slot");
        Ok(slot)
    }

    /// Push the value held by `slot`.
    pub(crate) fn push_slot(&self, stack: &Stack<'_>, slot: SlotId) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InstanceClosed);
        }
        if !self.slots.borrow().is_live(slot) {
            return Err(Error::StaleHandle { index: slot.index });
        }
        stack.reserve(2)?;
        let state = stack.as_ptr();
        unsafe {
            ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, slots_key());
            ffi::lua_rawgeti(state, -1, slot.index as ffi::lua_Integer);
            ffi::lua_remove(state, -2);
        }
        Ok(())
    }

    /// Clear `slot` so its value becomes collectable. A no-op once closed.
    pub(crate) fn release(&self, slot: SlotId) {
        let Ok(state) = self.state() else {
            return;
        };
        if !self.slots.borrow_mut().release(slot) {
            return;
        }
        let state = state.as_ptr();
        unsafe {
            if ffi::lua_checkstack(state, 2) == 0 {
                return;
            }
            ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, slots_key());
            ffi::lua_pushnil(state);
            ffi::lua_rawseti(state, -2, slot.index as ffi::lua_Integer);
            ffi::lua_settop(state, -2);
        }
        tracing::trace!(instance = %self.id, slot = slot.index, "released slot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_one_based_and_reused() {
        let mut arena = SlotArena::default();
        let a = arena.allocate();
        let b = arena.allocate();
        assert_eq!(a.index(), 1);
        assert_eq!(b.index(), 2);
        assert_eq!(arena.live(), 2);

        assert!(arena.release(a));
        let c = arena.allocate();
        assert_eq!(c.index(), 1);
        assert_ne!(c.generation(), a.generation());
        assert_ne!(c, a);
    }

    #[test]
    fn stale_ids_never_alias() {
        let mut arena = SlotArena::default();
        let first = arena.allocate();
        assert!(arena.release(first));
        let second = arena.allocate();

        assert!(!arena.is_live(first));
        assert!(arena.is_live(second));
        assert!(!arena.release(first));
        assert_eq!(arena.live(), 1);
    }

    #[test]
    fn double_release_is_ignored() {
        let mut arena = SlotArena::default();
        let slot = arena.allocate();
        assert!(arena.release(slot));
        assert!(!arena.release(slot));
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn unknown_index_is_not_live() {
        let arena = SlotArena::default();
        let bogus = SlotId {
            index: 7,
            generation: 0,
        };
        assert!(!arena.is_live(bogus));
    }

    #[test]
    fn instance_ids_are_unique() {
        let a = InstanceId::next();
        let b = InstanceId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}
