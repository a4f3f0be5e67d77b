//! Simulated translation cache
//!
//! Records every local flush so tests can check that each processor
//! flushed an address space exactly once per barrier.

use core_types::{AddressSpaceId, CpuId};
use hal::TranslationCache;

#[derive(Debug, Default)]
pub struct SimMmu {
    flushes: spin::Mutex<Vec<(CpuId, AddressSpaceId)>>,
}

impl SimMmu {
    pub fn new() -> Self {
        Self::default()
    }

    /// All flushes, in the order they happened
    pub fn flushes(&self) -> Vec<(CpuId, AddressSpaceId)> {
        self.flushes.lock().clone()
    }

    /// Number of flushes of `asid` performed by `cpu`
    pub fn flush_count(&self, cpu: CpuId, asid: AddressSpaceId) -> usize {
        self.flushes
            .lock()
            .iter()
            .filter(|(c, a)| *c == cpu && *a == asid)
            .count()
    }
}

impl TranslationCache for SimMmu {
    fn flush_address_space(&self, cpu: CpuId, asid: AddressSpaceId) {
        self.flushes.lock().push((cpu, asid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flushes_are_recorded() {
        let mmu = SimMmu::new();
        mmu.flush_address_space(CpuId(0), AddressSpaceId(3));
        mmu.flush_address_space(CpuId(1), AddressSpaceId(3));
        mmu.flush_address_space(CpuId(1), AddressSpaceId(3));
        assert_eq!(mmu.flush_count(CpuId(0), AddressSpaceId(3)), 1);
        assert_eq!(mmu.flush_count(CpuId(1), AddressSpaceId(3)), 2);
        assert_eq!(mmu.flushes().len(), 3);
    }
}
