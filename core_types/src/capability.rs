//! Capability names and object references
//!
//! A capability is the pair of a kernel object and a protection domain
//! that may address it. Inside the domain it is named by a [`CapId`]; the
//! kernel translates that name into an [`ObjectRef`] on every syscall that
//! takes a capability argument.
//!
//! ## Design Principles
//!
//! 1. **Unforgeable**: a `CapId` only resolves if the kernel put it into the
//!    domain's capability table
//! 2. **Local**: the same object usually has different `CapId`s in
//!    different domains
//! 3. **Typed at resolution**: the object kind is checked by the kernel,
//!    not trusted from the caller

use crate::ids::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain-local name of a capability
///
/// `CapId` is `repr(transparent)` because it is stored inline in the
/// per-thread transfer window.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct CapId(pub u32);

impl CapId {
    /// Name that never resolves
    pub const INVALID: CapId = CapId(0);

    /// Returns true unless this is the invalid name
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Encodes the name as a trap argument word
    pub fn as_word(&self) -> usize {
        self.0 as usize
    }

    /// Decodes a trap argument word, rejecting values wider than a name
    pub fn from_word(word: usize) -> Option<Self> {
        u32::try_from(word).ok().map(CapId)
    }
}

impl fmt::Display for CapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cap({})", self.0)
    }
}

/// Kind of a kernel object
///
/// Every kind has its own identifier space, so an [`ObjectId`] is only
/// meaningful together with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Thread,
    ProtectionDomain,
    SignalReceiver,
    SignalContext,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Thread => "thread",
            ObjectKind::ProtectionDomain => "pd",
            ObjectKind::SignalReceiver => "signal-receiver",
            ObjectKind::SignalContext => "signal-context",
        };
        f.write_str(name)
    }
}

/// A kernel object identifier tagged with its kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub id: ObjectId,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, id: ObjectId) -> Self {
        Self { kind, id }
    }

    pub fn thread(id: ObjectId) -> Self {
        Self::new(ObjectKind::Thread, id)
    }

    pub fn pd(id: ObjectId) -> Self {
        Self::new(ObjectKind::ProtectionDomain, id)
    }

    pub fn signal_receiver(id: ObjectId) -> Self {
        Self::new(ObjectKind::SignalReceiver, id)
    }

    pub fn signal_context(id: ObjectId) -> Self {
        Self::new(ObjectKind::SignalContext, id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_id_word_roundtrip() {
        let cap = CapId(17);
        assert_eq!(CapId::from_word(cap.as_word()), Some(cap));
    }

    #[test]
    fn test_cap_id_rejects_wide_word() {
        assert_eq!(CapId::from_word(u32::MAX as usize + 1), None);
    }

    #[test]
    fn test_invalid_cap_id() {
        assert!(!CapId::INVALID.is_valid());
        assert!(!CapId::default().is_valid());
        assert!(CapId(1).is_valid());
    }

    #[test]
    fn test_object_ref_kinds_differ() {
        let a = ObjectRef::thread(ObjectId(1));
        let b = ObjectRef::signal_context(ObjectId(1));
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "thread#1");
        assert_eq!(b.to_string(), "signal-context#1");
    }
}
