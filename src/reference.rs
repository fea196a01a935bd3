//! Persistent handles to runtime-owned values.
//!
//! A [`Reference`] keeps one runtime value reachable from the registry for
//! as long as any clone of the handle exists. Clones share one slot; the
//! slot is cleared and its generation bumped when the last clone drops.

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::instance::{Instance, InstanceId, SlotId};
use crate::stack::Stack;

struct Inner {
    instance: Rc<Instance>,
    slot: SlotId,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.instance.release(self.slot);
    }
}

/// Shared owning handle to a value held in the instance's slot table.
#[derive(Clone)]
pub struct Reference {
    inner: Rc<Inner>,
}

impl Reference {
    /// Promote the value at `index` into a fresh slot.
    pub fn from_stack(stack: &Stack<'_>, index: i32) -> Result<Self> {
        if !stack.is_valid_index(index) {
            return Err(Error::InvalidIndex {
                index,
                top: stack.top(),
            });
        }
        let instance = Instance::from_stack(stack)?;
        let slot = instance.store(stack, index)?;
        Ok(Self {
            inner: Rc::new(Inner { instance, slot }),
        })
    }

    /// Push the referenced value onto `stack`.
    ///
    /// Fails without pushing anything when `stack` belongs to another
    /// instance or the owning instance has closed.
    pub fn push(&self, stack: &Stack<'_>) -> Result<()> {
        let owner = &self.inner.instance;
        if owner.is_closed() {
            return Err(Error::InstanceClosed);
        }
        let here = Instance::from_stack(stack)?;
        if here.id() != owner.id() {
            tracing::warn!(
                handle = %owner.id(),
                target = %here.id(),
                "rejected handle from a different instance"
            );
            return Err(Error::ForeignInstance);
        }
        owner.push_slot(stack, self.inner.slot)
    }

    /// Id of the instance the value lives in.
    pub fn instance_id(&self) -> InstanceId {
        self.inner.instance.id()
    }

    /// Slot identity shared by every clone.
    pub fn slot(&self) -> SlotId {
        self.inner.slot
    }

    /// Number of live clones of this handle.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub(crate) fn instance(&self) -> &Rc<Instance> {
        &self.inner.instance
    }

    /// Run `f` with the referenced value pushed on the instance's main stack.
    ///
    /// `f` receives the absolute index of the value. The stack is restored
    /// to its previous height afterwards, whether `f` succeeds or not.
    pub(crate) fn with_value<R>(&self, f: impl FnOnce(&Stack<'_>, i32) -> Result<R>) -> Result<R> {
        let stack = self.inner.instance.stack()?;
        let _guard = stack.guard();
        stack.reserve(4)?;
        self.inner.instance.push_slot(&stack, self.inner.slot)?;
        let index = stack.top();
        f(&stack, index)
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
            || (self.instance_id() == other.instance_id() && self.slot() == other.slot())
    }
}

impl Eq for Reference {}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("instance", &self.instance_id())
            .field("slot", &self.slot().index())
            .field("generation", &self.slot().generation())
            .finish()
    }
}
