//! # Kernel API
//!
//! This crate defines the boundary between user threads and the kernel
//! core.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Synchronous request/reply over a per-thread transfer window
//! - Coalescing asynchronous signals
//! - Capability names resolved by the kernel on every call
//! - A translation-flush barrier across all processors
//!
//! ## Design Goals
//!
//! 1. **Narrow trap ABI**: one call-id word and at most five argument words
//!    in, one signed word out ([`abi`])
//! 2. **Testability**: [`KernelApi`] can be implemented by a simulated
//!    kernel and driven from plain `#[test]` functions
//! 3. **Explicit blocking**: a trap either returns a value or leaves the
//!    caller blocked; the user-level wrappers in [`userland`] surface both
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - POSIX (no fork, exec, files)
//! - An RPC framework (sessions and typed interfaces live above `call`)

pub mod abi;
pub mod error;
pub mod kernel;
pub mod sync;
pub mod userland;

pub use abi::{
    AbiError, CallId, RawCall, SignalData, Syscall, MAX_CALL_ARGS, RESULT_CANCELLED,
    RESULT_FAILED, RESULT_OK,
};
pub use error::KernelError;
pub use kernel::{KernelApi, TrapReturn};
pub use sync::{CancelableLock, LockError, LockOutcome, LockState};
pub use userland::Completion;
