//! Kernel configuration

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};

/// Upper bound on processors; processor sets are 64-bit masks
pub const MAX_CPUS: usize = 64;

/// Upper bound on every per-kind object limit and on the capabilities of
/// one domain; each bound sizes an identifier bitmap up front
pub const MAX_OBJECT_LIMIT: u32 = 1 << 20;

/// Static kernel configuration
///
/// Object limits bound the live objects of each kind. Creating an object
/// beyond its limit is reported as [`KernelError::ResourceExhausted`]
/// before the identifier allocator is ever asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub cpu_count: usize,
    pub quantum_ticks: u64,
    pub max_threads: u32,
    pub max_pds: u32,
    pub max_signal_receivers: u32,
    pub max_signal_contexts: u32,
    pub max_caps_per_pd: u32,
    /// Events each audit trail keeps before dropping its older half
    pub audit_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cpu_count: 2,
            quantum_ticks: 10,
            max_threads: 256,
            max_pds: 256,
            max_signal_receivers: 256,
            max_signal_contexts: 256,
            max_caps_per_pd: 1024,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl KernelConfig {
    /// Default configuration with `cpu_count` processors
    pub fn with_cpus(cpu_count: usize) -> Self {
        Self {
            cpu_count,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, KernelError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| KernelError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), KernelError> {
        if self.cpu_count == 0 || self.cpu_count > MAX_CPUS {
            return Err(KernelError::InvalidConfig(format!(
                "cpu_count must be within 1..={}, got {}",
                MAX_CPUS, self.cpu_count
            )));
        }
        if self.quantum_ticks == 0 {
            return Err(KernelError::InvalidConfig(
                "quantum_ticks must be positive".to_string(),
            ));
        }
        if self.audit_capacity == 0 {
            return Err(KernelError::InvalidConfig(
                "audit_capacity must be positive".to_string(),
            ));
        }
        let limits = [
            ("max_threads", self.max_threads),
            ("max_pds", self.max_pds),
            ("max_signal_receivers", self.max_signal_receivers),
            ("max_signal_contexts", self.max_signal_contexts),
            ("max_caps_per_pd", self.max_caps_per_pd),
        ];
        for (name, value) in limits {
            if value == 0 || value > MAX_OBJECT_LIMIT {
                return Err(KernelError::InvalidConfig(format!(
                    "{} must be within 1..={}, got {}",
                    name, MAX_OBJECT_LIMIT, value
                )));
            }
        }
        Ok(())
    }
}
