//! Kernel error types

use crate::abi::AbiError;
use core_types::{CapId, CpuId, IrqNumber, ObjectId, ObjectKind, ObjectRef};
use thiserror::Error;

/// Expected run-time conditions reported by the kernel
///
/// Resource exhaustion below the object limits and broken invariants are
/// not represented here: the kernel halts on those instead of returning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    /// Processor index outside the configured set
    #[error("Invalid processor: {0}")]
    InvalidCpu(CpuId),

    /// No thread is running on the processor that trapped
    #[error("No thread running on {0}")]
    NoCurrentThread(CpuId),

    /// The object does not exist (any more)
    #[error("Unknown object: {0}")]
    UnknownObject(ObjectRef),

    /// The capability name does not resolve in the caller's domain
    #[error("Invalid capability: {0}")]
    InvalidCapability(CapId),

    /// The capability resolves to an object of another kind
    #[error("Capability {cap} does not name a {expected}")]
    WrongObjectKind { cap: CapId, expected: ObjectKind },

    /// A blocking operation was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// The kernel rejected the call
    #[error("Kernel call failed")]
    CallFailed,

    /// The signal context has been killed
    #[error("Signal context killed")]
    SignalContextKilled,

    /// Adding the submission would overflow the pending count
    #[error("Signal submission count overflow")]
    SignalOverflow,

    /// The thread already waits at a signal receiver
    #[error("Signal handler already attached")]
    HandlerAlreadyAttached,

    /// The context was destroyed before the kill completed
    #[error("Signal context kill failed")]
    KillFailed,

    /// The thread is not in a state this operation applies to
    #[error("Invalid state of thread {0}")]
    InvalidThreadState(ObjectId),

    /// The domain's capability table has no free name left
    #[error("Capability table of domain {0} is full")]
    CapTableFull(ObjectId),

    /// The IPC primitive is not allowed in the thread's IPC state
    #[error("Invalid IPC state for this operation")]
    InvalidIpcState,

    /// The object is still referenced and cannot be destroyed
    #[error("Object in use: {0}")]
    ObjectInUse(ObjectRef),

    /// The configured limit for this object kind is reached
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(ObjectKind),

    /// The interrupt line is taken by the kernel itself
    #[error("Interrupt {0} is reserved")]
    ReservedIrq(IrqNumber),

    /// The kernel configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The raw call could not be decoded
    #[error("ABI error: {0}")]
    Abi(#[from] AbiError),
}
