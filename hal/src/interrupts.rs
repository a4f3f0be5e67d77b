//! Interrupt controller abstraction

use core_types::{CpuId, IrqNumber};

/// Interrupt controller as seen by the kernel's interrupt dispatch
///
/// Inter-processor interrupts ("doorbells") are ordinary interrupt
/// requests that the controller can tell apart from device and timer
/// lines.
pub trait InterruptController: Send + Sync {
    /// Takes the highest-priority pending request of `cpu`, if any
    fn take_request(&self, cpu: CpuId) -> Option<IrqNumber>;

    /// Returns whether `irq` is the doorbell of `cpu`
    fn is_ip_interrupt(&self, irq: IrqNumber, cpu: CpuId) -> bool;

    /// Signals end-of-interrupt for `irq` on `cpu`
    fn finish_request(&self, cpu: CpuId, irq: IrqNumber);

    /// Rings the doorbell of `target`
    fn trigger_ip_interrupt(&self, target: CpuId);
}
