//! Test utilities
//!
//! [`SimBoard`] wires a [`Kernel`] to the simulated interrupt controller,
//! timers and translation cache, and offers the few steps every test
//! repeats: letting pending interrupts run, advancing time and bringing
//! up domains and threads.

use crate::config::KernelConfig;
use crate::mmu::SimMmu;
use crate::pic::SimPic;
use crate::timer::SimTimer;
use crate::{Kernel, Platform};
use core_types::{CapId, CpuId, IrqNumber, ObjectId, ObjectRef};
use hal::InterruptController;
use kernel_api::{KernelApi, KernelError};
use std::sync::Arc;

/// Upper bound on interrupts handled by one [`SimBoard::settle`]
const SETTLE_LIMIT: usize = 10_000;

pub struct SimBoard {
    pub kernel: Kernel,
    pub pic: Arc<SimPic>,
    pub timer: Arc<SimTimer>,
    pub mmu: Arc<SimMmu>,
}

impl SimBoard {
    pub fn new(cpu_count: usize) -> Result<Self, KernelError> {
        Self::with_config(KernelConfig::with_cpus(cpu_count))
    }

    pub fn with_config(config: KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;
        let pic = Arc::new(SimPic::new(config.cpu_count));
        let timer = Arc::new(SimTimer::new(Arc::clone(&pic), config.cpu_count));
        let mmu = Arc::new(SimMmu::new());
        let platform = Platform {
            pic: pic.clone(),
            timer: timer.clone(),
            mmu: mmu.clone(),
        };
        Ok(Self {
            kernel: Kernel::new(config, platform)?,
            pic,
            timer,
            mmu,
        })
    }

    pub fn cpus(&self) -> impl Iterator<Item = CpuId> {
        (0..self.kernel.cpu_count()).map(CpuId)
    }

    /// Enters every processor once, then handles interrupts until none
    /// is pending anywhere
    ///
    /// Returns the number of interrupts handled.
    pub fn settle(&mut self) -> Result<usize, KernelError> {
        let cpus: Vec<CpuId> = self.cpus().collect();
        for cpu in &cpus {
            self.kernel.interrupt(*cpu)?;
        }
        let mut handled = 0;
        while handled < SETTLE_LIMIT {
            let Some(cpu) = cpus.iter().copied().find(|cpu| self.pic.has_pending(*cpu)) else {
                break;
            };
            if self.kernel.interrupt(cpu)?.is_some() {
                handled += 1;
            }
        }
        Ok(handled)
    }

    /// Lets `ticks` pass on `cpu` and settles
    pub fn tick(&mut self, cpu: CpuId, ticks: u64) -> Result<(), KernelError> {
        self.timer.advance(cpu, ticks);
        self.settle().map(|_| ())
    }

    /// Raises a device interrupt line on `cpu` and settles
    pub fn raise_irq(&mut self, cpu: CpuId, irq: IrqNumber) -> Result<(), KernelError> {
        self.pic.raise(cpu, irq);
        self.settle().map(|_| ())
    }

    /// Creates and starts a thread, then settles
    pub fn spawn(&mut self, pd: ObjectId, cpu: CpuId, label: &str) -> Result<ObjectId, KernelError> {
        let thread = self.kernel.create_thread(pd, cpu, label)?;
        self.kernel.start_thread(thread)?;
        self.settle()?;
        Ok(thread)
    }

    /// Grants `pd` a capability to `object`
    pub fn grant(&mut self, pd: ObjectId, object: ObjectRef) -> Result<CapId, KernelError> {
        self.kernel.grant(pd, object)
    }

    /// Rotates the run queue of the thread's processor until it runs
    ///
    /// Returns false if the thread is not runnable.
    pub fn run(&mut self, thread: ObjectId) -> Result<bool, KernelError> {
        let Some(cpu) = self.kernel.thread(thread).map(|t| t.affinity()) else {
            return Ok(false);
        };
        self.settle()?;
        let rounds = self.kernel.thread_count() + 1;
        for _ in 0..rounds {
            if self.kernel.current_thread(cpu) == Some(thread) {
                return Ok(true);
            }
            let quota = self
                .kernel
                .cpu(cpu)
                .map(|c| c.scheduler().remaining_quota())
                .unwrap_or(0);
            self.tick(cpu, quota)?;
        }
        Ok(self.kernel.current_thread(cpu) == Some(thread))
    }

    /// Processor with pending interrupts, if any
    pub fn pending_cpu(&self) -> Option<CpuId> {
        self.cpus().find(|cpu| self.pic.has_pending(*cpu))
    }

    /// Ends pending requests without entering the kernel
    ///
    /// Models a processor that is not taking interrupts for a while.
    pub fn drop_pending(&self, cpu: CpuId) -> usize {
        let mut dropped = 0;
        while let Some(irq) = self.pic.take_request(cpu) {
            self.pic.finish_request(cpu, irq);
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawned_thread_runs_on_its_cpu() {
        let mut board = SimBoard::new(2).unwrap();
        let pd = board.kernel.create_pd("init").unwrap();
        let thread = board.spawn(pd, CpuId(1), "worker").unwrap();

        assert_eq!(board.kernel.current_thread(CpuId(1)), Some(thread));
        assert_eq!(board.kernel.current_thread(CpuId(0)), None);
        assert_eq!(board.pic.doorbells_sent(CpuId(1)), 1);
    }

    #[test]
    fn test_run_rotates_to_thread() {
        let mut board = SimBoard::new(1).unwrap();
        let pd = board.kernel.create_pd("init").unwrap();
        let a = board.spawn(pd, CpuId(0), "a").unwrap();
        let b = board.spawn(pd, CpuId(0), "b").unwrap();

        assert_eq!(board.kernel.current_thread(CpuId(0)), Some(a));
        assert!(board.run(b).unwrap());
        assert_eq!(board.kernel.current_thread(CpuId(0)), Some(b));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(
            SimBoard::new(0),
            Err(KernelError::InvalidConfig(_))
        ));
    }
}
