//! Resilience Test Utilities
//!
//! Shared setup for the integration tests in `tests/`.
//!
//! ## Test Philosophy
//!
//! - **Protocols end to end**: every test drives the kernel only through
//!   traps and interrupts, the way threads and devices do
//! - **Deterministic**: time and interrupts only move when a test says so
//! - **No dangling effects**: cancelled or destroyed parties must never
//!   hear from the kernel again

use core_types::{CapId, CpuId, ObjectId, ObjectRef};
use kernel_api::KernelError;
use kernel_core::test_utils::SimBoard;

/// Creates a settled board with `cpus` processors
pub fn test_bootstrap(cpus: usize) -> SimBoard {
    match SimBoard::new(cpus) {
        Ok(board) => board,
        Err(err) => panic!("bootstrap with {} processors failed: {}", cpus, err),
    }
}

/// A thread together with the domain it lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub pd: ObjectId,
    pub thread: ObjectId,
    pub cpu: CpuId,
}

/// Creates a domain with one running thread on `cpu`
pub fn spawn_actor(board: &mut SimBoard, label: &str, cpu: CpuId) -> Result<Actor, KernelError> {
    let pd = board.kernel.create_pd(label)?;
    spawn_in(board, pd, label, cpu)
}

/// Starts another thread in an existing domain
pub fn spawn_in(
    board: &mut SimBoard,
    pd: ObjectId,
    label: &str,
    cpu: CpuId,
) -> Result<Actor, KernelError> {
    let thread = board.spawn(pd, cpu, label)?;
    Ok(Actor { pd, thread, cpu })
}

/// Gives `holder`'s domain a capability naming `target`'s thread
pub fn thread_cap(board: &mut SimBoard, holder: &Actor, target: &Actor) -> Result<CapId, KernelError> {
    board.grant(holder.pd, ObjectRef::thread(target.thread))
}
