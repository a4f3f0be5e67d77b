//! # Simulated Interrupt Controller
//!
//! Deterministic interrupt controller for testing. Interrupt requests
//! only become pending when a test (or a simulated device) raises them,
//! and a processor only sees them when the kernel takes them in
//! [`crate::Kernel::interrupt`].
//!
//! A line that is already pending on a processor is not queued twice.

use core_types::{CpuId, IrqNumber};
use hal::InterruptController;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Interrupt line used for inter-processor doorbells, never routable to
/// a signal context
pub const DOORBELL_IRQ: IrqNumber = IrqNumber(1);

#[derive(Debug)]
pub struct SimPic {
    pending: Vec<spin::Mutex<VecDeque<IrqNumber>>>,
    doorbells: Vec<AtomicUsize>,
    finished: Vec<AtomicUsize>,
}

impl SimPic {
    pub fn new(cpu_count: usize) -> Self {
        Self {
            pending: (0..cpu_count)
                .map(|_| spin::Mutex::new(VecDeque::new()))
                .collect(),
            doorbells: (0..cpu_count).map(|_| AtomicUsize::new(0)).collect(),
            finished: (0..cpu_count).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Makes `irq` pending on `cpu`
    pub fn raise(&self, cpu: CpuId, irq: IrqNumber) {
        let mut pending = self.pending[cpu.0].lock();
        if !pending.contains(&irq) {
            pending.push_back(irq);
        }
    }

    pub fn has_pending(&self, cpu: CpuId) -> bool {
        !self.pending[cpu.0].lock().is_empty()
    }

    pub fn pending(&self, cpu: CpuId) -> Vec<IrqNumber> {
        self.pending[cpu.0].lock().iter().copied().collect()
    }

    /// Doorbells rung at `cpu` so far
    pub fn doorbells_sent(&self, cpu: CpuId) -> usize {
        self.doorbells[cpu.0].load(Ordering::Acquire)
    }

    /// End-of-interrupt signals from `cpu` so far
    pub fn finished(&self, cpu: CpuId) -> usize {
        self.finished[cpu.0].load(Ordering::Acquire)
    }
}

impl InterruptController for SimPic {
    fn take_request(&self, cpu: CpuId) -> Option<IrqNumber> {
        self.pending[cpu.0].lock().pop_front()
    }

    fn is_ip_interrupt(&self, irq: IrqNumber, _cpu: CpuId) -> bool {
        irq == DOORBELL_IRQ
    }

    fn finish_request(&self, cpu: CpuId, _irq: IrqNumber) {
        self.finished[cpu.0].fetch_add(1, Ordering::AcqRel);
    }

    fn trigger_ip_interrupt(&self, target: CpuId) {
        self.doorbells[target.0].fetch_add(1, Ordering::AcqRel);
        self.raise(target, DOORBELL_IRQ);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_and_take() {
        let pic = SimPic::new(2);
        pic.raise(CpuId(1), IrqNumber(40));
        assert!(!pic.has_pending(CpuId(0)));
        assert_eq!(pic.take_request(CpuId(1)), Some(IrqNumber(40)));
        assert_eq!(pic.take_request(CpuId(1)), None);
    }

    #[test]
    fn test_pending_line_is_not_queued_twice() {
        let pic = SimPic::new(1);
        pic.raise(CpuId(0), IrqNumber(40));
        pic.raise(CpuId(0), IrqNumber(40));
        pic.raise(CpuId(0), IrqNumber(41));
        assert_eq!(pic.pending(CpuId(0)), vec![IrqNumber(40), IrqNumber(41)]);
    }

    #[test]
    fn test_doorbell() {
        let pic = SimPic::new(2);
        pic.trigger_ip_interrupt(CpuId(1));
        assert_eq!(pic.doorbells_sent(CpuId(1)), 1);
        let irq = pic.take_request(CpuId(1)).unwrap();
        assert!(pic.is_ip_interrupt(irq, CpuId(1)));
        pic.finish_request(CpuId(1), irq);
        assert_eq!(pic.finished(CpuId(1)), 1);
    }
}
