//! Per-instance registry of bound types.

use std::any::TypeId;

use rustc_hash::FxHashMap;

use crate::operators::Operators;
use crate::type_hash::TypeHash;

/// Type-erased upcast from a child payload pointer to its parent's.
pub(crate) type UpcastFn = unsafe fn(*mut ()) -> *mut ();

/// Link from a bound type to its single parent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParentLink {
    pub(crate) hash: TypeHash,
    pub(crate) name: &'static str,
    pub(crate) upcast: UpcastFn,
}

/// Constructor state of a bound type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstructorKind {
    /// Scripts cannot construct the type.
    #[default]
    None,
    /// A constructor taking the declared arguments.
    Explicit,
    /// As `Explicit`, falling back to `Default` when called without arguments.
    WithDefault,
}

/// Everything the binding layer records about one bound type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub(crate) name: &'static str,
    pub(crate) hash: TypeHash,
    pub(crate) type_id: TypeId,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) has_destructor: bool,
    pub(crate) constructor: ConstructorKind,
    pub(crate) operators: Operators,
}

impl TypeDescriptor {
    pub(crate) fn new(name: &'static str, type_id: TypeId, has_destructor: bool) -> Self {
        Self {
            name,
            hash: TypeHash::from_name(name),
            type_id,
            parent: None,
            has_destructor,
            constructor: ConstructorKind::None,
            operators: Operators::empty(),
        }
    }

    /// Registered name, which is also the global type-table name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Tag written into the metatable and every userdata header.
    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    /// Name of the parent type, if linked.
    pub fn parent(&self) -> Option<&'static str> {
        self.parent.map(|link| link.name)
    }

    /// Whether collection runs the host destructor.
    pub fn has_destructor(&self) -> bool {
        self.has_destructor
    }

    pub fn constructor(&self) -> ConstructorKind {
        self.constructor
    }

    /// Operators installed as metamethods.
    pub fn operators(&self) -> Operators {
        self.operators
    }
}

/// Bound types keyed by hash, with a secondary index by host `TypeId`.
#[derive(Debug, Default)]
pub(crate) struct TypeRegistry {
    types: FxHashMap<TypeHash, TypeDescriptor>,
    by_type_id: FxHashMap<TypeId, TypeHash>,
}

impl TypeRegistry {
    pub(crate) fn get(&self, hash: TypeHash) -> Option<&TypeDescriptor> {
        self.types.get(&hash)
    }

    pub(crate) fn get_mut(&mut self, hash: TypeHash) -> Option<&mut TypeDescriptor> {
        self.types.get_mut(&hash)
    }

    pub(crate) fn get_by_name(&self, name: &str) -> Option<&TypeDescriptor> {
        self.get(TypeHash::from_name(name))
    }

    pub(crate) fn get_by_type_id(&self, type_id: TypeId) -> Option<&TypeDescriptor> {
        self.by_type_id
            .get(&type_id)
            .and_then(|hash| self.types.get(hash))
    }

    pub(crate) fn insert(&mut self, descriptor: TypeDescriptor) {
        self.by_type_id.insert(descriptor.type_id, descriptor.hash);
        self.types.insert(descriptor.hash, descriptor);
    }

    pub(crate) fn name_of(&self, hash: TypeHash) -> Option<&'static str> {
        self.types.get(&hash).map(|descriptor| descriptor.name)
    }

    pub(crate) fn len(&self) -> usize {
        self.types.len()
    }

    /// Upcasts leading from `from` to `to`, in application order.
    ///
    /// Returns an empty path when the types are equal and `None` when `to`
    /// is not an ancestor of `from`.
    pub(crate) fn upcast_path(&self, from: TypeHash, to: TypeHash) -> Option<Vec<UpcastFn>> {
        let mut path = Vec::new();
        let mut current = from;
        // A chain can never be longer than the number of bound types.
        for _ in 0..=self.types.len() {
            if current == to {
                return Some(path);
            }
            let link = self.types.get(&current)?.parent?;
            path.push(link.upcast);
            current = link.hash;
        }
        None
    }

    /// True if `ancestor` appears on the parent chain of `hash`, or equals it.
    pub(crate) fn is_same_or_ancestor(&self, hash: TypeHash, ancestor: TypeHash) -> bool {
        self.upcast_path(hash, ancestor).is_some()
    }
}
