//! Identifiers for kernel entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kernel-global identifier of a kernel object
///
/// Identifiers are handed out by the kernel's identifier allocators from a
/// bounded range starting at [`ObjectId::MIN`]. The value `0` is never
/// allocated and serves as the "no object" marker in raw ABI words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Lowest identifier an allocator hands out
    pub const MIN: u32 = 1;

    /// Marker for "no object"
    pub const INVALID: ObjectId = ObjectId(0);

    /// Returns the raw value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns true unless this is the invalid marker
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.0)
    }
}

/// Index of a physical processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CpuId(pub usize);

impl CpuId {
    /// The processor that boots the system and runs core
    pub const BOOT: CpuId = CpuId(0);
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cpu({})", self.0)
    }
}

/// Tag of a translation context, as understood by the MMU
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddressSpaceId(pub u32);

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asid({})", self.0)
    }
}

/// Interrupt request line as numbered by the interrupt controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IrqNumber(pub u32);

impl fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Irq({})", self.0)
    }
}
