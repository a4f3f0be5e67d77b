//! # Simulated Timer Device
//!
//! Deterministic per-processor one-shot timers for testing.
//!
//! ## Philosophy
//!
//! **Determinism enables thorough testing.**
//!
//! Time only advances when a test says so. A timer that counts down to
//! zero raises its interrupt line at the [`SimPic`] once and then stays
//! at zero until it is programmed again.

use crate::pic::SimPic;
use core_types::{CpuId, IrqNumber};
use hal::TimerDevice;
use std::sync::Arc;

/// Interrupt line of every processor's local timer
pub const TIMER_IRQ: IrqNumber = IrqNumber(30);

#[derive(Debug, Clone, Copy, Default)]
struct Countdown {
    remaining: u64,
    armed: bool,
    elapsed: u64,
}

#[derive(Debug)]
pub struct SimTimer {
    pic: Arc<SimPic>,
    timers: Vec<spin::Mutex<Countdown>>,
}

impl SimTimer {
    pub fn new(pic: Arc<SimPic>, cpu_count: usize) -> Self {
        Self {
            pic,
            timers: (0..cpu_count)
                .map(|_| spin::Mutex::new(Countdown::default()))
                .collect(),
        }
    }

    /// Advances the timer of `cpu` by `delta` ticks
    ///
    /// Raises the timer interrupt if the countdown reaches zero.
    pub fn advance(&self, cpu: CpuId, delta: u64) {
        let fired = {
            let mut timer = self.timers[cpu.0].lock();
            timer.elapsed = timer.elapsed.saturating_add(delta);
            if !timer.armed {
                false
            } else {
                timer.remaining = timer.remaining.saturating_sub(delta);
                timer.armed = timer.remaining > 0;
                !timer.armed
            }
        };
        if fired {
            self.pic.raise(cpu, TIMER_IRQ);
        }
    }

    /// Ticks that passed on `cpu` since boot
    pub fn elapsed(&self, cpu: CpuId) -> u64 {
        self.timers[cpu.0].lock().elapsed
    }

    pub fn is_armed(&self, cpu: CpuId) -> bool {
        self.timers[cpu.0].lock().armed
    }
}

impl TimerDevice for SimTimer {
    fn interrupt_id(&self, _cpu: CpuId) -> IrqNumber {
        TIMER_IRQ
    }

    fn start_one_shot(&self, cpu: CpuId, ticks: u64) {
        let mut timer = self.timers[cpu.0].lock();
        timer.remaining = ticks;
        timer.armed = ticks > 0;
    }

    fn value(&self, cpu: CpuId) -> u64 {
        self.timers[cpu.0].lock().remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::InterruptController;

    fn timer(cpus: usize) -> (Arc<SimPic>, SimTimer) {
        let pic = Arc::new(SimPic::new(cpus));
        let timer = SimTimer::new(Arc::clone(&pic), cpus);
        (pic, timer)
    }

    #[test]
    fn test_unarmed_timer_does_not_fire() {
        let (pic, timer) = timer(1);
        timer.advance(CpuId(0), 100);
        assert!(!pic.has_pending(CpuId(0)));
        assert_eq!(timer.elapsed(CpuId(0)), 100);
    }

    #[test]
    fn test_one_shot_fires_once() {
        let (pic, timer) = timer(1);
        timer.start_one_shot(CpuId(0), 10);
        timer.advance(CpuId(0), 4);
        assert_eq!(timer.value(CpuId(0)), 6);
        assert!(!pic.has_pending(CpuId(0)));

        timer.advance(CpuId(0), 6);
        assert_eq!(pic.take_request(CpuId(0)), Some(TIMER_IRQ));
        assert!(!timer.is_armed(CpuId(0)));

        timer.advance(CpuId(0), 50);
        assert!(!pic.has_pending(CpuId(0)));
    }

    #[test]
    fn test_timers_are_per_cpu() {
        let (pic, timer) = timer(2);
        timer.start_one_shot(CpuId(0), 5);
        timer.start_one_shot(CpuId(1), 5);
        timer.advance(CpuId(1), 5);
        assert!(!pic.has_pending(CpuId(0)));
        assert!(pic.has_pending(CpuId(1)));
        assert_eq!(timer.value(CpuId(0)), 5);
    }
}
