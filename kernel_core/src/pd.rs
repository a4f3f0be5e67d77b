//! Protection domains
//!
//! A protection domain is an address space plus the capability table of
//! the threads running in it. Its identifier doubles as the address-space
//! id the translation cache is flushed for.

use crate::cap_table::CapabilityTable;
use core_types::{AddressSpaceId, ObjectId};

#[derive(Debug, Clone)]
pub struct Pd {
    id: ObjectId,
    label: String,
    caps: CapabilityTable,
}

impl Pd {
    pub fn new(id: ObjectId, label: impl Into<String>, max_caps: u32) -> Self {
        Self {
            id,
            label: label.into(),
            caps: CapabilityTable::new(max_caps),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn asid(&self) -> AddressSpaceId {
        AddressSpaceId(self.id.0)
    }

    pub fn caps(&self) -> &CapabilityTable {
        &self.caps
    }

    pub fn caps_mut(&mut self) -> &mut CapabilityTable {
        &mut self.caps
    }
}
