//! # Timer Device
//!
//! Hardware abstraction for the per-processor scheduling timer.
//!
//! ## Philosophy
//!
//! **Time is a service, not a global variable.**
//!
//! The kernel programs a one-shot countdown on every exit to user level and
//! reads back the remaining value on the next entry. The difference is the
//! time consumed by the client that ran in between.
//!
//! ## Design Principles
//!
//! 1. **One-shot**: the timer fires once when the countdown reaches zero
//! 2. **Non-blocking**: reading the value returns immediately
//! 3. **Frequency-agnostic**: ticks are whatever the board defines
//!
//! ## Not For
//!
//! - Wall-clock time (dates, times, timezones)
//! - Sleeping or blocking operations

use core_types::{CpuId, IrqNumber};

/// Per-processor one-shot timer
///
/// # Examples
///
/// ```
/// use core_types::CpuId;
/// use hal::TimerDevice;
///
/// fn consumed<T: TimerDevice>(timer: &T, cpu: CpuId, programmed: u64) -> u64 {
///     programmed.saturating_sub(timer.value(cpu))
/// }
/// ```
pub trait TimerDevice: Send + Sync {
    /// Interrupt line the timer of `cpu` raises when it expires
    fn interrupt_id(&self, cpu: CpuId) -> IrqNumber;

    /// Starts a countdown of `ticks` on `cpu`, replacing any running one
    fn start_one_shot(&self, cpu: CpuId, ticks: u64);

    /// Remaining ticks of the countdown on `cpu`
    fn value(&self, cpu: CpuId) -> u64;
}
