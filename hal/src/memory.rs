//! Translation cache abstraction

use core_types::{AddressSpaceId, CpuId};

/// Translation cache (TLB) maintenance
///
/// The kernel core does not encode page tables. It only needs to drop
/// cached translations of one address space on one processor after the
/// address space changed.
pub trait TranslationCache: Send + Sync {
    /// Invalidates all cached translations of `asid` on `cpu`
    ///
    /// Must be idempotent: flushing an address space with nothing cached
    /// is a no-op.
    fn flush_address_space(&self, cpu: CpuId, asid: AddressSpaceId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCache {
        flushes: Mutex<Vec<(CpuId, AddressSpaceId)>>,
    }

    impl TranslationCache for RecordingCache {
        fn flush_address_space(&self, cpu: CpuId, asid: AddressSpaceId) {
            self.flushes.lock().unwrap().push((cpu, asid));
        }
    }

    #[test]
    fn test_flush_is_recorded_per_cpu() {
        let cache = RecordingCache::default();
        cache.flush_address_space(CpuId(0), AddressSpaceId(3));
        cache.flush_address_space(CpuId(1), AddressSpaceId(3));

        let flushes = cache.flushes.lock().unwrap();
        assert_eq!(
            *flushes,
            vec![(CpuId(0), AddressSpaceId(3)), (CpuId(1), AddressSpaceId(3))]
        );
    }
}
