//! Kernel API trait

use crate::abi::RawCall;
use crate::KernelError;
use core_types::{CpuId, ObjectId};
use ipc::TransferWindow;

/// What a trap did to the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapReturn {
    /// The caller is still runnable and received this result word
    Returned(isize),
    /// The caller is blocked; its result word is written when it resumes
    Blocked,
}

/// The kernel as seen from user level
///
/// Multiple implementations are possible:
/// - Simulated kernel (for testing)
/// - A real trap handler
///
/// # Design Principles
///
/// **One entry primitive**: everything a thread asks of the kernel goes
/// through [`KernelApi::trap`] on the processor it runs on.
///
/// **Window, not arguments**: message content travels in the thread's
/// transfer window, which user code fills before and reads after the trap.
///
/// # Example
///
/// ```
/// use core_types::CpuId;
/// use kernel_api::{KernelApi, KernelError, Syscall, TrapReturn};
///
/// fn pause<K: KernelApi>(kernel: &mut K, cpu: CpuId) -> Result<bool, KernelError> {
///     let outcome = kernel.trap(cpu, Syscall::PauseCurrentThread.encode())?;
///     Ok(outcome == TrapReturn::Blocked)
/// }
/// ```
pub trait KernelApi {
    /// Executes a kernel call on behalf of the thread running on `cpu`
    fn trap(&mut self, cpu: CpuId, call: RawCall) -> Result<TrapReturn, KernelError>;

    /// Thread currently selected to run on `cpu`
    fn current_thread(&self, cpu: CpuId) -> Option<ObjectId>;

    /// Transfer window of `thread`
    fn window(&self, thread: ObjectId) -> Result<&TransferWindow, KernelError>;

    /// Transfer window of `thread`, for user code filling in a message
    fn window_mut(&mut self, thread: ObjectId) -> Result<&mut TransferWindow, KernelError>;

    /// Result word of the last kernel call of `thread`
    fn return_value(&self, thread: ObjectId) -> Result<isize, KernelError>;
}
