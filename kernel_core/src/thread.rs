//! Threads
//!
//! A thread is the schedulable unit ("processor client") of the kernel.
//! It lives in one protection domain, is pinned to one processor, owns a
//! transfer window and carries the state of its IPC node.

use crate::audit::KernelEvent;
use crate::ipc_node::IpcNode;
use crate::Kernel;
use core_types::{AddressSpaceId, CpuId, ObjectId};
use ipc::TransferWindow;
use kernel_api::{RESULT_CANCELLED, RESULT_OK};
use serde::{Deserialize, Serialize};

/// Thread states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadState {
    /// Created but never started
    AwaitsStart,
    /// Runnable; queued or running on its processor
    Active,
    /// Blocked in a call, or waiting for a request
    AwaitsIpc,
    /// Blocked at a signal receiver
    AwaitsSignal,
    /// Blocked until a killed signal context is acknowledged
    AwaitsSignalContextKill,
    /// Paused until another thread resumes it
    AwaitsResume,
    /// Blocked until every processor flushed an address space
    AwaitsFlush,
}

impl ThreadState {
    /// Blocking states another thread may cancel
    pub fn is_cancellable_wait(&self) -> bool {
        matches!(
            self,
            ThreadState::AwaitsIpc
                | ThreadState::AwaitsSignal
                | ThreadState::AwaitsSignalContextKill
                | ThreadState::AwaitsResume
        )
    }
}

#[derive(Debug)]
pub struct Thread {
    id: ObjectId,
    label: String,
    pd: ObjectId,
    affinity: CpuId,
    pub(crate) state: ThreadState,
    pub(crate) return_value: isize,
    pub(crate) window: Box<TransferWindow>,
    pub(crate) ipc: IpcNode,
    /// Address space of a flush this thread waits for
    pub(crate) flush: Option<AddressSpaceId>,
}

impl Thread {
    pub(crate) fn new(id: ObjectId, label: impl Into<String>, pd: ObjectId, affinity: CpuId) -> Self {
        Self {
            id,
            label: label.into(),
            pd,
            affinity,
            state: ThreadState::AwaitsStart,
            return_value: RESULT_OK,
            window: TransferWindow::boxed(),
            ipc: IpcNode::new(),
            flush: None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pd(&self) -> ObjectId {
        self.pd
    }

    pub fn affinity(&self) -> CpuId {
        self.affinity
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Result word of the thread's last kernel call
    pub fn return_value(&self) -> isize {
        self.return_value
    }

    pub fn window(&self) -> &TransferWindow {
        &self.window
    }

    pub fn ipc(&self) -> &IpcNode {
        &self.ipc
    }

    pub fn pending_flush(&self) -> Option<AddressSpaceId> {
        self.flush
    }
}

impl Kernel {
    /// Makes `thread` runnable with `result` as its return value
    ///
    /// `executing` is the processor whose kernel performs the activation;
    /// threads pinned elsewhere are handed over through the remote path.
    pub(crate) fn activate(&mut self, executing: CpuId, thread: ObjectId, result: isize) {
        let Some(t) = self.threads.get_mut(thread) else {
            log::warn!("activation of vanished {}", thread);
            return;
        };
        t.state = ThreadState::Active;
        t.return_value = result;
        let target = t.affinity;
        self.record(KernelEvent::ThreadResumed { thread, result });
        self.schedule(executing, thread, target);
    }

    /// Takes the thread out of scheduling in a blocking state
    pub(crate) fn block(&mut self, thread: ObjectId, state: ThreadState) {
        let Some(t) = self.threads.get_mut(thread) else {
            return;
        };
        t.state = state;
        let cpu = t.affinity;
        self.cpus[cpu.0].scheduler.remove(thread);
        self.record(KernelEvent::ThreadBlocked { thread, state });
    }

    pub(crate) fn set_return(&mut self, thread: ObjectId, value: isize) {
        if let Some(t) = self.threads.get_mut(thread) {
            t.return_value = value;
        }
    }

    /// Cancels whatever `thread` waits for and makes it runnable
    ///
    /// A paused thread resumes with a normal result; a cancelled call,
    /// request wait, signal wait or kill wait resumes with
    /// [`RESULT_CANCELLED`]. A thread waiting for a flush, or not waiting
    /// at all, is left alone and `false` is returned.
    pub(crate) fn resume_thread(&mut self, executing: CpuId, thread: ObjectId) -> bool {
        let Some(state) = self.threads.get(thread).map(|t| t.state) else {
            return false;
        };
        match state {
            ThreadState::AwaitsResume => {
                self.activate(executing, thread, RESULT_OK);
            }
            ThreadState::AwaitsIpc => {
                self.ipc_cancel_waiting(thread);
                self.record(KernelEvent::IpcCancelled { thread });
                self.activate(executing, thread, RESULT_CANCELLED);
            }
            ThreadState::AwaitsSignal => {
                self.signals.cancel_handler(thread);
                self.record(KernelEvent::SignalWaitCancelled { thread });
                self.activate(executing, thread, RESULT_CANCELLED);
            }
            ThreadState::AwaitsSignalContextKill => {
                self.signals.cancel_killer(thread);
                self.record(KernelEvent::SignalWaitCancelled { thread });
                self.activate(executing, thread, RESULT_CANCELLED);
            }
            ThreadState::AwaitsStart | ThreadState::Active | ThreadState::AwaitsFlush => {
                return false;
            }
        }
        true
    }
}
