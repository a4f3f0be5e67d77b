//! Syscall gate
//!
//! Every decoded kernel call of a user thread passes through here. The
//! gate resolves capability arguments in the caller's domain and runs
//! the operation. Failures never propagate past the gate: they are
//! logged, recorded in the audit trail and turned into [`RESULT_FAILED`]
//! for the caller.
//!
//! A call either leaves the caller runnable with its result word set, or
//! blocks it; the blocked caller gets its result word when it is resumed.

use crate::audit::KernelEvent;
use crate::ipc_node::IpcState;
use crate::signal::KillOutcome;
use crate::smp::FlushRequest;
use crate::thread::ThreadState;
use crate::Kernel;
use core_types::{CapId, CpuId, ObjectId, ObjectKind, ObjectRef};
use kernel_api::{CallId, KernelError, Syscall, RESULT_FAILED, RESULT_OK};

impl Kernel {
    /// Resolves `cap` in the domain of `thread` to an object of `kind`
    pub(crate) fn resolve_cap(
        &self,
        thread: ObjectId,
        cap: CapId,
        kind: ObjectKind,
    ) -> Result<ObjectId, KernelError> {
        let pd = self
            .threads
            .get(thread)
            .map(|t| t.pd())
            .ok_or(KernelError::UnknownObject(ObjectRef::thread(thread)))?;
        let object = self
            .pds
            .get(pd)
            .and_then(|pd| pd.caps().resolve(cap))
            .ok_or(KernelError::InvalidCapability(cap))?;
        if object.kind != kind {
            return Err(KernelError::WrongObjectKind {
                cap,
                expected: kind,
            });
        }
        Ok(object.id)
    }

    /// Resolves a thread capability that must name a thread of the caller's domain
    fn resolve_local_thread(&self, thread: ObjectId, cap: CapId) -> Result<ObjectId, KernelError> {
        let target = self.resolve_cap(thread, cap, ObjectKind::Thread)?;
        let same_pd = match (self.threads.get(thread), self.threads.get(target)) {
            (Some(a), Some(b)) => a.pd() == b.pd(),
            _ => false,
        };
        if !same_pd {
            return Err(KernelError::InvalidCapability(cap));
        }
        Ok(target)
    }

    /// Runs one decoded kernel call of `thread` on `cpu`
    pub(crate) fn syscall(&mut self, cpu: CpuId, thread: ObjectId, call: Syscall) {
        if let Err(err) = self.dispatch(cpu, thread, call) {
            self.reject(thread, call.call_id(), err);
        }
    }

    fn reject(&mut self, thread: ObjectId, call: CallId, err: KernelError) {
        log::warn!("{:?} of {} rejected: {}", call, thread, err);
        self.record(KernelEvent::SyscallRejected {
            thread,
            call,
            reason: err.to_string(),
        });
        self.set_return(thread, RESULT_FAILED);
    }

    fn dispatch(&mut self, cpu: CpuId, thread: ObjectId, call: Syscall) -> Result<(), KernelError> {
        match call {
            Syscall::PauseCurrentThread => {
                self.block(thread, ThreadState::AwaitsResume);
            }
            Syscall::ResumeLocalThread { thread: cap } => {
                let target = self.resolve_local_thread(thread, cap)?;
                let resumed = self.resume_thread(cpu, target);
                self.set_return(thread, if resumed { 1 } else { 0 });
            }
            Syscall::YieldThread { donate_to } => {
                if let Some(cap) = donate_to {
                    let target = self.resolve_local_thread(thread, cap)?;
                    let paused = self
                        .threads
                        .get(target)
                        .map(|t| t.state == ThreadState::AwaitsResume)
                        .unwrap_or(false);
                    if paused {
                        self.activate(cpu, target, RESULT_OK);
                    }
                }
                let scheduler = &mut self.cpus[cpu.0].scheduler;
                if scheduler.head() == Some(thread) {
                    scheduler.yield_occupation();
                }
                self.set_return(thread, RESULT_OK);
            }
            Syscall::SendRequestMsg { destination } => {
                let callee = self.resolve_cap(thread, destination, ObjectKind::Thread)?;
                if callee == thread {
                    return Err(KernelError::InvalidIpcState);
                }
                self.ipc_send_request(cpu, thread, callee)?;
                self.block(thread, ThreadState::AwaitsIpc);
            }
            Syscall::SendReplyMsg { await_next } => {
                let state = self
                    .threads
                    .get(thread)
                    .map(|t| t.ipc().state())
                    .unwrap_or(IpcState::Inactive);
                match state {
                    IpcState::PrepareReply => self.ipc_send_reply(cpu, thread)?,
                    IpcState::Inactive if await_next => {}
                    _ => return Err(KernelError::InvalidIpcState),
                }
                if await_next {
                    self.await_request(thread)?;
                } else {
                    self.set_return(thread, RESULT_OK);
                }
            }
            Syscall::AwaitRequestMsg => {
                self.await_request(thread)?;
            }
            Syscall::AwaitSignal { receiver } => {
                let receiver = self.resolve_cap(thread, receiver, ObjectKind::SignalReceiver)?;
                let mut out = Vec::new();
                self.signals.await_signal(receiver, thread, &mut out)?;
                self.block(thread, ThreadState::AwaitsSignal);
                self.apply_signal_notifications(cpu, out);
            }
            Syscall::SubmitSignal { context, count } => {
                let context = self.resolve_cap(thread, context, ObjectKind::SignalContext)?;
                let mut out = Vec::new();
                self.signals.submit(context, count, &mut out)?;
                self.record(KernelEvent::SignalSubmitted { context, count });
                self.apply_signal_notifications(cpu, out);
                self.set_return(thread, RESULT_OK);
            }
            Syscall::AckSignal { context } => {
                let context = self.resolve_cap(thread, context, ObjectKind::SignalContext)?;
                let mut out = Vec::new();
                self.signals.ack(context, &mut out)?;
                self.apply_signal_notifications(cpu, out);
                self.set_return(thread, RESULT_OK);
            }
            Syscall::KillSignalContext { context } => {
                let context = self.resolve_cap(thread, context, ObjectKind::SignalContext)?;
                match self.signals.kill(context, thread)? {
                    KillOutcome::Completed => {
                        self.record(KernelEvent::KillCompleted { context });
                        self.set_return(thread, RESULT_OK);
                    }
                    KillOutcome::Pending => {
                        self.record(KernelEvent::KillPending {
                            context,
                            killer: thread,
                        });
                        self.block(thread, ThreadState::AwaitsSignalContextKill);
                    }
                }
            }
            Syscall::AckCap { cap } => {
                let pd = self.pd_of(thread)?;
                let acked = self
                    .pds
                    .get_mut(pd)
                    .map(|pd| pd.caps_mut().ack(cap))
                    .unwrap_or(false);
                if !acked {
                    return Err(KernelError::InvalidCapability(cap));
                }
                self.set_return(thread, RESULT_OK);
            }
            Syscall::DeleteCap { cap } => {
                let pd = self.pd_of(thread)?;
                self.pds
                    .get_mut(pd)
                    .and_then(|pd| pd.caps_mut().release(cap))
                    .ok_or(KernelError::InvalidCapability(cap))?;
                self.set_return(thread, RESULT_OK);
            }
            Syscall::UpdatePd { pd } => {
                let pd = self.resolve_cap(thread, pd, ObjectKind::ProtectionDomain)?;
                self.request_flush(cpu, thread, pd)?;
            }
        }
        Ok(())
    }

    fn pd_of(&self, thread: ObjectId) -> Result<ObjectId, KernelError> {
        self.threads
            .get(thread)
            .map(|t| t.pd())
            .ok_or(KernelError::UnknownObject(ObjectRef::thread(thread)))
    }

    fn await_request(&mut self, thread: ObjectId) -> Result<(), KernelError> {
        if self.ipc_await_request(thread)? {
            self.set_return(thread, RESULT_OK);
        } else {
            self.block(thread, ThreadState::AwaitsIpc);
        }
        Ok(())
    }

    /// Starts the translation-flush barrier for the address space of `pd`
    ///
    /// The initiator leaves scheduling, every other processor is rung and
    /// the initiator's own processor votes right away. The initiator runs
    /// again once the last online processor voted.
    fn request_flush(&mut self, cpu: CpuId, thread: ObjectId, pd: ObjectId) -> Result<(), KernelError> {
        let asid = self
            .pds
            .get(pd)
            .map(|pd| pd.asid())
            .ok_or(KernelError::UnknownObject(ObjectRef::pd(pd)))?;
        if let Some(t) = self.threads.get_mut(thread) {
            t.flush = Some(asid);
        }
        self.block(thread, ThreadState::AwaitsFlush);
        self.record(KernelEvent::FlushRequested {
            initiator: thread,
            asid,
        });
        self.smp.post_flush(FlushRequest::new(thread, asid));

        let others: Vec<CpuId> = self.smp.online().iter().filter(|c| *c != cpu).collect();
        for target in others {
            self.ring_doorbell(cpu, target);
        }
        self.process_flush_work(cpu);
        Ok(())
    }
}
