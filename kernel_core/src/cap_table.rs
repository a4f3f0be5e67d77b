//! Per-domain capability table
//!
//! Maps the domain-local [`CapId`]s to kernel objects and counts the
//! references the domain holds on each name. A name has two counters:
//!
//! - `holders`: references the domain owns
//! - `in_flight`: references delivered by IPC that the receiving thread
//!   has not acknowledged yet
//!
//! Acknowledging moves one reference from `in_flight` to `holders`.
//! Releasing drops one reference; the name and its identifier are freed
//! exactly when both counters reach zero. Delivering an object the domain
//! already names reuses the existing name.

use crate::id_alloc::IdAllocator;
use core_types::{CapId, ObjectRef};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapEntry {
    pub object: ObjectRef,
    pub holders: u32,
    pub in_flight: u32,
}

impl CapEntry {
    fn references(&self) -> u32 {
        self.holders + self.in_flight
    }
}

/// Outcome of releasing one reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other references keep the name alive
    Retained,
    /// That was the last reference; the name is gone
    Freed,
}

#[derive(Debug, Clone)]
pub struct CapabilityTable {
    ids: IdAllocator,
    entries: BTreeMap<CapId, CapEntry>,
    by_object: BTreeMap<ObjectRef, CapId>,
}

impl CapabilityTable {
    /// Table for at most `max_caps` names, numbered from 1
    pub fn new(max_caps: u32) -> Self {
        Self {
            ids: IdAllocator::new(1, max_caps),
            entries: BTreeMap::new(),
            by_object: BTreeMap::new(),
        }
    }

    fn entry_for(&mut self, object: ObjectRef) -> Option<(CapId, &mut CapEntry)> {
        let cap = match self.by_object.get(&object) {
            Some(cap) => *cap,
            None => {
                if self.ids.live() >= self.ids.capacity() {
                    return None;
                }
                let cap = CapId(self.ids.alloc());
                self.entries.insert(
                    cap,
                    CapEntry {
                        object,
                        holders: 0,
                        in_flight: 0,
                    },
                );
                self.by_object.insert(object, cap);
                cap
            }
        };
        self.entries.get_mut(&cap).map(|entry| (cap, entry))
    }

    /// Adds an owned reference to `object`, returning its name
    ///
    /// Returns `None` if the table is full.
    pub fn insert(&mut self, object: ObjectRef) -> Option<CapId> {
        let (cap, entry) = self.entry_for(object)?;
        entry.holders += 1;
        Some(cap)
    }

    /// Adds an unacknowledged reference delivered by IPC
    pub fn deliver(&mut self, object: ObjectRef) -> Option<CapId> {
        let (cap, entry) = self.entry_for(object)?;
        entry.in_flight += 1;
        Some(cap)
    }

    /// Turns one delivered reference into an owned one
    pub fn ack(&mut self, cap: CapId) -> bool {
        match self.entries.get_mut(&cap) {
            Some(entry) if entry.in_flight > 0 => {
                entry.in_flight -= 1;
                entry.holders += 1;
                true
            }
            _ => false,
        }
    }

    /// Drops one reference, owned ones first
    pub fn release(&mut self, cap: CapId) -> Option<Release> {
        let entry = self.entries.get_mut(&cap)?;
        if entry.holders > 0 {
            entry.holders -= 1;
        } else if entry.in_flight > 0 {
            entry.in_flight -= 1;
        }
        if entry.references() > 0 {
            return Some(Release::Retained);
        }
        let object = entry.object;
        self.remove(cap, object);
        Some(Release::Freed)
    }

    fn remove(&mut self, cap: CapId, object: ObjectRef) {
        self.entries.remove(&cap);
        self.by_object.remove(&object);
        self.ids.free(cap.0);
    }

    /// Forgets every reference to a destroyed object
    pub fn purge(&mut self, object: ObjectRef) -> Option<CapId> {
        let cap = self.by_object.get(&object).copied()?;
        self.remove(cap, object);
        Some(cap)
    }

    pub fn resolve(&self, cap: CapId) -> Option<ObjectRef> {
        self.entries.get(&cap).map(|entry| entry.object)
    }

    pub fn entry(&self, cap: CapId) -> Option<&CapEntry> {
        self.entries.get(&cap)
    }

    /// Name of `object` in this domain, if any
    pub fn name_of(&self, object: ObjectRef) -> Option<CapId> {
        self.by_object.get(&object).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
