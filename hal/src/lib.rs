//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the hardware seams the kernel core consumes.
//!
//! ## Philosophy
//!
//! **The core never touches a device register.**
//!
//! Board bring-up and drivers live elsewhere. The kernel only needs three
//! things from the platform: an interrupt controller that can ring a
//! doorbell on another processor, a per-processor one-shot timer, and a
//! way to drop stale translations for one address space.
//!
//! ## Design Principles
//!
//! 1. **Per-processor arguments**: every operation names the processor it
//!    acts on, so one device object can serve all processors
//! 2. **Shared references**: implementations are `Send + Sync` because
//!    every processor's kernel reaches the same controller
//! 3. **Testable**: the kernel ships simulated implementations of every trait

pub mod interrupts;
pub mod memory;
pub mod timer;

pub use interrupts::InterruptController;
pub use memory::TranslationCache;
pub use timer::TimerDevice;
