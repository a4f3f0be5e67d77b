//! Synchronous IPC between threads
//!
//! Every thread carries an [`IpcNode`]. A caller sends a request to a
//! callee and waits for the reply; a server waits for requests, prepares
//! a reply and sends it back. Requests that arrive while the server is
//! busy queue up in arrival order.
//!
//! Message content moves between the transfer windows of the two threads.
//! Capabilities are translated on the way: a name valid in the sender's
//! domain becomes a delivered, not yet acknowledged, name in the
//! receiver's domain.

use crate::audit::KernelEvent;
use crate::thread::ThreadState;
use crate::Kernel;
use core_types::{CapId, CpuId, ObjectId};
use kernel_api::{KernelError, RESULT_FAILED, RESULT_OK};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpcState {
    Inactive,
    /// Sent a request, waiting for the reply
    AwaitReply,
    /// Waiting for the next request
    AwaitRequest,
    /// Holding a request, preparing the reply
    PrepareReply,
    /// Holding a request and waiting for the reply of a nested call
    PrepareAndAwaitReply,
}

#[derive(Debug)]
pub struct IpcNode {
    state: IpcState,
    /// Callers whose requests were not received yet
    request_queue: VecDeque<ObjectId>,
    /// Caller whose request is being handled
    caller: Option<ObjectId>,
    /// Node this one waits on for a reply
    callee: Option<ObjectId>,
}

impl IpcNode {
    pub fn new() -> Self {
        Self {
            state: IpcState::Inactive,
            request_queue: VecDeque::new(),
            caller: None,
            callee: None,
        }
    }

    pub fn state(&self) -> IpcState {
        self.state
    }

    pub fn caller(&self) -> Option<ObjectId> {
        self.caller
    }

    pub fn callee(&self) -> Option<ObjectId> {
        self.callee
    }

    pub fn pending_requests(&self) -> usize {
        self.request_queue.len()
    }

    pub fn can_send_request(&self) -> bool {
        matches!(self.state, IpcState::Inactive | IpcState::PrepareReply)
    }

    pub fn can_await_request(&self) -> bool {
        self.state == IpcState::Inactive
    }

    fn awaits_reply(&self) -> bool {
        matches!(
            self.state,
            IpcState::AwaitReply | IpcState::PrepareAndAwaitReply
        )
    }

    /// State after the reply wait ended, with or without a reply
    fn leave_reply_wait(&mut self) {
        self.callee = None;
        self.state = match self.state {
            IpcState::PrepareAndAwaitReply => IpcState::PrepareReply,
            _ => IpcState::Inactive,
        };
    }
}

impl Default for IpcNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    fn ipc_node_mut(&mut self, thread: ObjectId) -> Option<&mut IpcNode> {
        self.threads.get_mut(thread).map(|t| &mut t.ipc)
    }

    /// Copies the window of `from` into the window of `to`
    ///
    /// Capability names are translated from the sender's domain into the
    /// receiver's. A name that does not resolve, or that does not fit into
    /// the receiver's table, arrives as [`CapId::INVALID`].
    pub(crate) fn ipc_transfer(&mut self, from: ObjectId, to: ObjectId) {
        let Some(src) = self.threads.get(from) else {
            return;
        };
        let data = src.window.data().to_vec();
        let exception_code = src.window.exception_code();
        let src_caps = src.window.caps().to_vec();
        let src_pd = src.pd();
        let Some(dst_pd) = self.threads.get(to).map(|t| t.pd()) else {
            return;
        };

        let objects: Vec<_> = match self.pds.get(src_pd) {
            Some(pd) => src_caps.iter().map(|cap| pd.caps().resolve(*cap)).collect(),
            None => Vec::new(),
        };
        let mut caps = Vec::with_capacity(objects.len());
        if let Some(pd) = self.pds.get_mut(dst_pd) {
            for object in objects {
                let name = match object {
                    Some(object) => pd.caps_mut().deliver(object).unwrap_or_else(|| {
                        log::warn!("capability table of {} full, dropping {}", dst_pd, object);
                        CapId::INVALID
                    }),
                    None => CapId::INVALID,
                };
                caps.push(name);
            }
        }

        let Some(dst) = self.threads.get_mut(to) else {
            return;
        };
        dst.window.load(&data, &caps);
        dst.window.set_exception_code(exception_code);
        dst.window.set_destination(from.0 as u64);
        self.record(KernelEvent::MessageTransferred {
            from,
            to,
            bytes: data.len(),
            caps: caps.len(),
        });
    }

    /// Lets `server` take the request of `caller`
    fn ipc_receive_request(&mut self, server: ObjectId, caller: ObjectId) {
        self.ipc_transfer(caller, server);
        if let Some(node) = self.ipc_node_mut(server) {
            node.caller = Some(caller);
            node.state = IpcState::PrepareReply;
        }
    }

    /// Sends the request in `caller`'s window to `callee`
    ///
    /// The caller must already be blocked. A callee waiting for requests
    /// receives it at once and is woken; otherwise the request queues.
    pub(crate) fn ipc_send_request(
        &mut self,
        executing: CpuId,
        caller: ObjectId,
        callee: ObjectId,
    ) -> Result<(), KernelError> {
        let node = self
            .ipc_node_mut(caller)
            .ok_or(KernelError::InvalidIpcState)?;
        if !node.can_send_request() {
            return Err(KernelError::InvalidIpcState);
        }
        node.state = match node.state {
            IpcState::PrepareReply => IpcState::PrepareAndAwaitReply,
            _ => IpcState::AwaitReply,
        };
        node.callee = Some(callee);
        self.record(KernelEvent::IpcRequest { caller, callee });

        let callee_waits = self
            .threads
            .get(callee)
            .map(|t| t.ipc.state == IpcState::AwaitRequest)
            .unwrap_or(false);
        if callee_waits {
            self.ipc_receive_request(callee, caller);
            self.activate(executing, callee, RESULT_OK);
        } else if let Some(node) = self.ipc_node_mut(callee) {
            node.request_queue.push_back(caller);
        }
        Ok(())
    }

    /// Takes the oldest queued request or starts waiting for one
    ///
    /// Returns true if a request was received right away.
    pub(crate) fn ipc_await_request(&mut self, server: ObjectId) -> Result<bool, KernelError> {
        let node = self
            .ipc_node_mut(server)
            .ok_or(KernelError::InvalidIpcState)?;
        if !node.can_await_request() {
            return Err(KernelError::InvalidIpcState);
        }
        match node.request_queue.pop_front() {
            Some(caller) => {
                self.ipc_receive_request(server, caller);
                Ok(true)
            }
            None => {
                node.state = IpcState::AwaitRequest;
                Ok(false)
            }
        }
    }

    /// Sends the reply in `server`'s window to the caller being handled
    ///
    /// A caller that was cancelled meanwhile is gone; the reply is then
    /// dropped without error.
    pub(crate) fn ipc_send_reply(
        &mut self,
        executing: CpuId,
        server: ObjectId,
    ) -> Result<(), KernelError> {
        let node = self
            .ipc_node_mut(server)
            .ok_or(KernelError::InvalidIpcState)?;
        if node.state != IpcState::PrepareReply {
            return Err(KernelError::InvalidIpcState);
        }
        node.state = IpcState::Inactive;
        let Some(caller) = node.caller.take() else {
            return Ok(());
        };

        self.ipc_transfer(server, caller);
        if let Some(node) = self.ipc_node_mut(caller) {
            node.leave_reply_wait();
        }
        self.record(KernelEvent::IpcReply { server, caller });
        self.activate(executing, caller, RESULT_OK);
        Ok(())
    }

    /// Withdraws a thread from whatever IPC wait it is in
    ///
    /// No partner is notified. A callee currently handling the request
    /// simply loses its caller.
    pub(crate) fn ipc_cancel_waiting(&mut self, thread: ObjectId) {
        let Some(node) = self.ipc_node_mut(thread) else {
            return;
        };
        match node.state {
            IpcState::AwaitRequest => node.state = IpcState::Inactive,
            IpcState::AwaitReply | IpcState::PrepareAndAwaitReply => {
                let callee = node.callee;
                node.leave_reply_wait();
                if let Some(callee) = callee {
                    self.ipc_detach_caller(callee, thread);
                }
            }
            IpcState::Inactive | IpcState::PrepareReply => {}
        }
    }

    /// Removes `caller` from the queue or the hands of `callee`
    fn ipc_detach_caller(&mut self, callee: ObjectId, caller: ObjectId) {
        if let Some(node) = self.ipc_node_mut(callee) {
            node.request_queue.retain(|c| *c != caller);
            if node.caller == Some(caller) {
                node.caller = None;
            }
        }
    }

    /// Fails every partner of a thread that is being destroyed
    pub(crate) fn ipc_teardown(&mut self, executing: CpuId, thread: ObjectId) {
        let Some(node) = self.ipc_node_mut(thread) else {
            return;
        };
        let queued: Vec<ObjectId> = node.request_queue.drain(..).collect();
        let handled = node.caller.take();
        let callee = if node.awaits_reply() { node.callee } else { None };
        node.state = IpcState::Inactive;
        node.callee = None;

        if let Some(callee) = callee {
            self.ipc_detach_caller(callee, thread);
        }
        for caller in queued.into_iter().chain(handled) {
            let waiting = self
                .threads
                .get(caller)
                .map(|t| t.state == ThreadState::AwaitsIpc)
                .unwrap_or(false);
            if let Some(node) = self.ipc_node_mut(caller) {
                node.leave_reply_wait();
            }
            if waiting {
                self.activate(executing, caller, RESULT_FAILED);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_inactive() {
        let node = IpcNode::new();
        assert_eq!(node.state(), IpcState::Inactive);
        assert!(node.can_send_request());
        assert!(node.can_await_request());
        assert_eq!(node.pending_requests(), 0);
    }

    #[test]
    fn test_nested_call_returns_to_prepare_reply() {
        let mut node = IpcNode::new();
        node.state = IpcState::PrepareAndAwaitReply;
        node.callee = Some(ObjectId(3));
        node.leave_reply_wait();
        assert_eq!(node.state(), IpcState::PrepareReply);
        assert_eq!(node.callee(), None);
        assert!(node.can_send_request());
        assert!(!node.can_await_request());
    }

    #[test]
    fn test_plain_call_returns_to_inactive() {
        let mut node = IpcNode::new();
        node.state = IpcState::AwaitReply;
        node.leave_reply_wait();
        assert_eq!(node.state(), IpcState::Inactive);
    }
}
