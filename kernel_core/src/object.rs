//! # Object Registry
//!
//! Every addressable kernel object is reachable by its identifier through
//! exactly one registry.
//!
//! ## Design
//!
//! - [`Registry`] is an identifier-ordered index (`BTreeMap`), so lookup is
//!   logarithmic and deterministic.
//! - [`ObjectPool`] couples a registry with the [`IdAllocator`] of its
//!   object kind. Creating an object allocates the identifier and
//!   registers the object in one step; destroying unregisters first and
//!   only then returns the identifier, so no two live objects ever share
//!   one.
//! - Cross-references between objects are identifiers looked up here,
//!   never borrowed pointers. A stale identifier simply fails to resolve.

use crate::id_alloc::IdAllocator;
use core_types::ObjectId;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Registry<T> {
    entries: BTreeMap<ObjectId, T>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registers `object` under `id`
    ///
    /// Registering an identifier twice is an invariant violation.
    pub fn insert(&mut self, id: ObjectId, object: T) {
        if self.entries.contains_key(&id) {
            crate::fatal!("{} registered twice", id);
        }
        self.entries.insert(id, object);
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<T> {
        self.entries.remove(&id)
    }

    pub fn lookup(&self, id: ObjectId) -> Option<&T> {
        self.entries.get(&id)
    }

    pub fn lookup_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Objects in identifier order
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.entries.iter().map(|(id, object)| (*id, object))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectId, &mut T)> {
        self.entries.iter_mut().map(|(id, object)| (*id, object))
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier allocator and registry of one object kind
#[derive(Debug, Clone)]
pub struct ObjectPool<T> {
    ids: IdAllocator,
    registry: Registry<T>,
}

impl<T> ObjectPool<T> {
    /// Pool for at most `max` objects, identified `1..=max`
    pub fn new(max: u32) -> Self {
        Self {
            ids: IdAllocator::new(ObjectId::MIN, max),
            registry: Registry::new(),
        }
    }

    /// Returns true if no further object fits
    pub fn is_full(&self) -> bool {
        self.ids.live() >= self.ids.capacity()
    }

    /// Allocates an identifier and registers the object built for it
    pub fn create(&mut self, build: impl FnOnce(ObjectId) -> T) -> ObjectId {
        let id = ObjectId(self.ids.alloc());
        self.registry.insert(id, build(id));
        id
    }

    /// Unregisters the object, then frees its identifier
    pub fn destroy(&mut self, id: ObjectId) -> Option<T> {
        let object = self.registry.remove(id)?;
        self.ids.free(id.0);
        Some(object)
    }

    pub fn get(&self, id: ObjectId) -> Option<&T> {
        self.registry.lookup(id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        self.registry.lookup_mut(id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.registry.contains(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.registry.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectId, &mut T)> {
        self.registry.iter_mut()
    }
}
