//! User-level side of the kernel calls
//!
//! These wrappers do what a thread's runtime does around each trap: fill
//! the transfer window, trap, and after resumption interpret the result
//! word and unpack the window. Every function acts for the thread that is
//! currently running on `cpu`.
//!
//! Blocking primitives come in two halves. The first half traps and
//! returns [`Completion::Blocked`] if the thread had to wait; once the
//! kernel resumed the thread and it runs again, the second half
//! (`finish_call`, `take_request`, `take_signal`, `finish_kill`,
//! `lock_woken`) collects the outcome.

use crate::abi::{SignalData, Syscall, RESULT_CANCELLED, RESULT_OK};
use crate::kernel::{KernelApi, TrapReturn};
use crate::sync::{CancelableLock, LockOutcome};
use crate::KernelError;
use core_types::{CapId, CpuId, ObjectId};
use ipc::{Msgbuf, Truncation};

/// Outcome of a primitive that may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<T> {
    Ready(T),
    Blocked,
}

impl<T> Completion<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Completion::Blocked)
    }
}

fn current<K: KernelApi>(kernel: &K, cpu: CpuId) -> Result<ObjectId, KernelError> {
    kernel
        .current_thread(cpu)
        .ok_or(KernelError::NoCurrentThread(cpu))
}

fn check(word: isize) -> Result<(), KernelError> {
    match word {
        RESULT_CANCELLED => Err(KernelError::Cancelled),
        w if w < RESULT_OK => Err(KernelError::CallFailed),
        _ => Ok(()),
    }
}

fn completion<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    call: Syscall,
) -> Result<Completion<()>, KernelError> {
    match kernel.trap(cpu, call.encode())? {
        TrapReturn::Blocked => Ok(Completion::Blocked),
        TrapReturn::Returned(word) => check(word).map(Completion::Ready),
    }
}

fn immediate<K: KernelApi>(kernel: &mut K, cpu: CpuId, call: Syscall) -> Result<isize, KernelError> {
    match kernel.trap(cpu, call.encode())? {
        TrapReturn::Returned(word) => check(word).map(|_| word),
        TrapReturn::Blocked => Err(KernelError::CallFailed),
    }
}

/// Unpacks the window into `buf` and acknowledges each imported capability
fn receive<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    thread: ObjectId,
    buf: &mut Msgbuf,
) -> Result<Truncation, KernelError> {
    let truncation = kernel.window(thread)?.unmarshal(buf);
    for &cap in buf.caps() {
        if cap.is_valid() {
            ack_cap(kernel, cpu, cap)?;
        }
    }
    Ok(truncation)
}

/// Sends a request and blocks until the reply arrives
///
/// Returns what marshaling dropped from `msg`.
pub fn call<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    destination: CapId,
    msg: &Msgbuf,
) -> Result<Truncation, KernelError> {
    let me = current(kernel, cpu)?;
    let truncation = {
        let window = kernel.window_mut(me)?;
        window.set_destination(destination.0 as u64);
        window.marshal(msg)
    };
    match kernel.trap(cpu, Syscall::SendRequestMsg { destination }.encode())? {
        TrapReturn::Blocked => Ok(truncation),
        TrapReturn::Returned(word) => check(word).map(|_| truncation),
    }
}

/// Collects the reply of a call after the caller was resumed
///
/// A call cancelled before the reply arrived yields
/// [`KernelError::Cancelled`], never an empty reply.
pub fn finish_call<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    reply: &mut Msgbuf,
) -> Result<Truncation, KernelError> {
    let me = current(kernel, cpu)?;
    check(kernel.return_value(me)?)?;
    receive(kernel, cpu, me, reply)
}

/// Waits for the next request
pub fn await_request<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
) -> Result<Completion<()>, KernelError> {
    completion(kernel, cpu, Syscall::AwaitRequestMsg)
}

/// Unpacks a received request, returning the requesting thread
pub fn take_request<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    request: &mut Msgbuf,
) -> Result<ObjectId, KernelError> {
    let me = current(kernel, cpu)?;
    check(kernel.return_value(me)?)?;
    let requester = ObjectId(kernel.window(me)?.destination() as u32);
    receive(kernel, cpu, me, request)?;
    Ok(requester)
}

/// Replies to the current request and waits for the next one
pub fn reply_and_wait<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    reply: &Msgbuf,
) -> Result<Completion<()>, KernelError> {
    let me = current(kernel, cpu)?;
    kernel.window_mut(me)?.marshal(reply);
    completion(kernel, cpu, Syscall::SendReplyMsg { await_next: true })
}

/// Replies to the current request without waiting for another
pub fn reply<K: KernelApi>(kernel: &mut K, cpu: CpuId, reply: &Msgbuf) -> Result<(), KernelError> {
    let me = current(kernel, cpu)?;
    kernel.window_mut(me)?.marshal(reply);
    immediate(kernel, cpu, Syscall::SendReplyMsg { await_next: false }).map(|_| ())
}

fn read_signal<K: KernelApi>(kernel: &K, thread: ObjectId) -> Result<SignalData, KernelError> {
    SignalData::from_bytes(kernel.window(thread)?.data()).ok_or(KernelError::CallFailed)
}

/// Waits at a signal receiver
pub fn await_signal<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    receiver: CapId,
) -> Result<Completion<SignalData>, KernelError> {
    let me = current(kernel, cpu)?;
    match completion(kernel, cpu, Syscall::AwaitSignal { receiver })? {
        Completion::Blocked => Ok(Completion::Blocked),
        Completion::Ready(()) => read_signal(kernel, me).map(Completion::Ready),
    }
}

/// Reads the signal delivered to a resumed waiter
pub fn take_signal<K: KernelApi>(kernel: &K, cpu: CpuId) -> Result<SignalData, KernelError> {
    let me = current(kernel, cpu)?;
    check(kernel.return_value(me)?)?;
    read_signal(kernel, me)
}

pub fn submit_signal<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    context: CapId,
    count: u32,
) -> Result<(), KernelError> {
    immediate(kernel, cpu, Syscall::SubmitSignal { context, count }).map(|_| ())
}

pub fn ack_signal<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    context: CapId,
) -> Result<(), KernelError> {
    immediate(kernel, cpu, Syscall::AckSignal { context }).map(|_| ())
}

/// Kills a signal context, blocking while a delivery is unacknowledged
pub fn kill_signal_context<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    context: CapId,
) -> Result<Completion<()>, KernelError> {
    completion(kernel, cpu, Syscall::KillSignalContext { context })
}

/// Collects the outcome of a kill that had to wait
pub fn finish_kill<K: KernelApi>(kernel: &K, cpu: CpuId) -> Result<(), KernelError> {
    let me = current(kernel, cpu)?;
    match kernel.return_value(me)? {
        RESULT_OK => Ok(()),
        RESULT_CANCELLED => Err(KernelError::Cancelled),
        _ => Err(KernelError::KillFailed),
    }
}

pub fn ack_cap<K: KernelApi>(kernel: &mut K, cpu: CpuId, cap: CapId) -> Result<(), KernelError> {
    immediate(kernel, cpu, Syscall::AckCap { cap }).map(|_| ())
}

pub fn delete_cap<K: KernelApi>(kernel: &mut K, cpu: CpuId, cap: CapId) -> Result<(), KernelError> {
    immediate(kernel, cpu, Syscall::DeleteCap { cap }).map(|_| ())
}

pub fn pause<K: KernelApi>(kernel: &mut K, cpu: CpuId) -> Result<Completion<()>, KernelError> {
    completion(kernel, cpu, Syscall::PauseCurrentThread)
}

/// Resumes a thread of the same domain, cancelling whatever it waits for
///
/// Returns false if the thread was not waiting for anything cancellable.
pub fn resume<K: KernelApi>(kernel: &mut K, cpu: CpuId, thread: CapId) -> Result<bool, KernelError> {
    immediate(kernel, cpu, Syscall::ResumeLocalThread { thread }).map(|word| word == 1)
}

pub fn yield_thread<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    donate_to: Option<CapId>,
) -> Result<(), KernelError> {
    immediate(kernel, cpu, Syscall::YieldThread { donate_to }).map(|_| ())
}

/// Flushes the translations of a domain everywhere, blocking until done
pub fn update_pd<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    pd: CapId,
) -> Result<Completion<()>, KernelError> {
    completion(kernel, cpu, Syscall::UpdatePd { pd })
}

/// A thread as it appears in a [`CancelableLock`]
///
/// `cap` is how the other threads of the domain name this thread when
/// they hand the lock over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockApplicant {
    pub thread: ObjectId,
    pub cap: CapId,
}

/// Takes the lock, pausing the current thread if it is held
pub fn lock<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    lock: &mut CancelableLock<LockApplicant>,
    me: LockApplicant,
) -> Result<Completion<()>, KernelError> {
    match lock.lock(me).map_err(|_| KernelError::CallFailed)? {
        LockOutcome::Acquired => Ok(Completion::Ready(())),
        LockOutcome::MustWait => match pause(kernel, cpu)? {
            Completion::Blocked => Ok(Completion::Blocked),
            Completion::Ready(()) => lock_woken(lock, me).map(Completion::Ready),
        },
    }
}

/// Checks, after waking from a lock wait, whether the lock was handed over
///
/// A wake-up that did not come from the owner withdraws the applicant and
/// reports [`KernelError::Cancelled`].
pub fn lock_woken(
    lock: &mut CancelableLock<LockApplicant>,
    me: LockApplicant,
) -> Result<(), KernelError> {
    if lock.owner() == Some(me) {
        return Ok(());
    }
    lock.cancel(me);
    Err(KernelError::Cancelled)
}

/// Releases the lock and wakes the applicant it was handed to
pub fn unlock<K: KernelApi>(
    kernel: &mut K,
    cpu: CpuId,
    lock: &mut CancelableLock<LockApplicant>,
    me: LockApplicant,
) -> Result<(), KernelError> {
    if let Some(next) = lock.unlock(me).map_err(|_| KernelError::CallFailed)? {
        resume(kernel, cpu, next.cap)?;
    }
    Ok(())
}
