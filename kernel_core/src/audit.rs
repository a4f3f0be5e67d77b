//! Kernel Audit Trail
//!
//! Records what the kernel did, in order, for verification in tests.
//!
//! ## Philosophy
//!
//! - Test-facing: this is NOT the log output, `log` covers that
//! - Deterministic: events carry the kernel entry counter, not wall time
//! - Queryable: tests assert on the trail to verify protocol properties
//! - Bounded: a full trail drops its older half, so a long-running kernel
//!   keeps only the recent past
//!
//! ## Example
//!
//! ```
//! use kernel_core::audit::{KernelAuditLog, KernelEvent};
//! use core_types::{ObjectId, ObjectRef};
//!
//! let mut log = KernelAuditLog::new();
//! log.record(3, KernelEvent::ObjectCreated { object: ObjectRef::thread(ObjectId(1)) });
//!
//! assert!(log.has_event(|e| matches!(e, KernelEvent::ObjectCreated { .. })));
//! assert_eq!(log.get_events()[0].entry, 3);
//! ```

use crate::thread::ThreadState;
use core_types::{AddressSpaceId, CpuId, IrqNumber, ObjectId, ObjectRef};
use kernel_api::CallId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum KernelEvent {
    ObjectCreated {
        object: ObjectRef,
    },
    ObjectDestroyed {
        object: ObjectRef,
    },
    ThreadBlocked {
        thread: ObjectId,
        state: ThreadState,
    },
    ThreadResumed {
        thread: ObjectId,
        result: isize,
    },
    /// An inter-processor interrupt was sent
    DoorbellSent {
        from: CpuId,
        to: CpuId,
    },
    /// A remote insert found a doorbell already pending
    DoorbellSuppressed {
        to: CpuId,
    },
    FlushRequested {
        initiator: ObjectId,
        asid: AddressSpaceId,
    },
    FlushVoted {
        cpu: CpuId,
        asid: AddressSpaceId,
    },
    /// `initiator` is `None` when the initiating thread was destroyed
    /// while the request was in flight
    FlushCompleted {
        initiator: Option<ObjectId>,
        asid: AddressSpaceId,
    },
    /// A destroyed initiator left its flush request to complete unattended
    FlushDetached {
        initiator: ObjectId,
        asid: AddressSpaceId,
    },
    SignalSubmitted {
        context: ObjectId,
        count: u32,
    },
    SignalDelivered {
        receiver: ObjectId,
        context: ObjectId,
        thread: ObjectId,
        count: u32,
    },
    SignalWaitCancelled {
        thread: ObjectId,
    },
    KillPending {
        context: ObjectId,
        killer: ObjectId,
    },
    KillCompleted {
        context: ObjectId,
    },
    KillFailed {
        context: ObjectId,
        killer: ObjectId,
    },
    IpcRequest {
        caller: ObjectId,
        callee: ObjectId,
    },
    IpcReply {
        server: ObjectId,
        caller: ObjectId,
    },
    IpcCancelled {
        thread: ObjectId,
    },
    /// Window contents copied from one thread to another
    MessageTransferred {
        from: ObjectId,
        to: ObjectId,
        bytes: usize,
        caps: usize,
    },
    DeviceInterrupt {
        irq: IrqNumber,
        context: Option<ObjectId>,
    },
    SyscallRejected {
        thread: ObjectId,
        call: CallId,
        reason: String,
    },
}

/// A single audit event with the kernel entry it happened in
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub entry: u64,
    pub event: KernelEvent,
}

/// Default bound of an audit trail, in events
pub const DEFAULT_AUDIT_CAPACITY: usize = 4096;

/// Appends `item`, first discarding the older half of a full trail
///
/// Returns the number of discarded items.
pub(crate) fn push_bounded<T>(events: &mut Vec<T>, capacity: usize, item: T) -> usize {
    let mut dropped = 0;
    if events.len() >= capacity {
        dropped = events.len() - capacity / 2;
        events.drain(..dropped);
    }
    events.push(item);
    dropped
}

#[derive(Debug)]
pub struct KernelAuditLog {
    events: Vec<AuditRecord>,
    capacity: usize,
    dropped: u64,
}

impl Default for KernelAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelAuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// Trail keeping at most `capacity` events (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn record(&mut self, entry: u64, event: KernelEvent) {
        let dropped = push_bounded(&mut self.events, self.capacity, AuditRecord { entry, event });
        self.dropped += dropped as u64;
    }

    /// Events discarded to keep the trail bounded
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn get_events(&self) -> &[AuditRecord] {
        &self.events
    }

    /// Counts events matching the predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&KernelEvent) -> bool,
    {
        self.events.iter().filter(|r| predicate(&r.event)).count()
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&KernelEvent) -> bool,
    {
        self.events.iter().any(|r| predicate(&r.event))
    }

    /// Events touching one thread, in order
    pub fn events_for_thread(&self, thread: ObjectId) -> Vec<&KernelEvent> {
        self.events
            .iter()
            .map(|r| &r.event)
            .filter(|e| match e {
                KernelEvent::ThreadBlocked { thread: t, .. }
                | KernelEvent::ThreadResumed { thread: t, .. }
                | KernelEvent::SignalWaitCancelled { thread: t }
                | KernelEvent::IpcCancelled { thread: t }
                | KernelEvent::SignalDelivered { thread: t, .. }
                | KernelEvent::SyscallRejected { thread: t, .. } => *t == thread,
                KernelEvent::FlushRequested { initiator, .. }
                | KernelEvent::FlushDetached { initiator, .. } => *initiator == thread,
                KernelEvent::FlushCompleted { initiator, .. } => *initiator == Some(thread),
                KernelEvent::KillPending { killer, .. } | KernelEvent::KillFailed { killer, .. } => {
                    *killer == thread
                }
                KernelEvent::IpcRequest { caller, callee } => *caller == thread || *callee == thread,
                KernelEvent::IpcReply { server, caller } => *server == thread || *caller == thread,
                KernelEvent::MessageTransferred { from, to, .. } => *from == thread || *to == thread,
                KernelEvent::ObjectCreated { object } | KernelEvent::ObjectDestroyed { object } => {
                    *object == ObjectRef::thread(thread)
                }
                _ => false,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Exports the trail as a JSON array
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_log_creation() {
        let log = KernelAuditLog::new();
        assert_eq!(log.len(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_count_and_query() {
        let mut log = KernelAuditLog::new();
        log.record(1, KernelEvent::DoorbellSent { from: CpuId(0), to: CpuId(1) });
        log.record(1, KernelEvent::DoorbellSuppressed { to: CpuId(1) });
        log.record(2, KernelEvent::DoorbellSent { from: CpuId(0), to: CpuId(1) });

        assert_eq!(
            log.count_events(|e| matches!(e, KernelEvent::DoorbellSent { .. })),
            2
        );
        assert!(!log.has_event(|e| matches!(e, KernelEvent::FlushRequested { .. })));
        assert_eq!(log.get_events()[2].entry, 2);
    }

    #[test]
    fn test_full_trail_drops_oldest_half() {
        let mut log = KernelAuditLog::with_capacity(4);
        for entry in 0..5 {
            log.record(entry, KernelEvent::DoorbellSuppressed { to: CpuId(1) });
        }
        let entries: Vec<u64> = log.get_events().iter().map(|r| r.entry).collect();
        assert_eq!(entries, vec![2, 3, 4]);
        assert_eq!(log.dropped(), 2);

        log.record(5, KernelEvent::DoorbellSuppressed { to: CpuId(1) });
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_events_for_thread() {
        let mut log = KernelAuditLog::new();
        let a = ObjectId(1);
        let b = ObjectId(2);
        log.record(1, KernelEvent::IpcRequest { caller: a, callee: b });
        log.record(1, KernelEvent::ThreadBlocked { thread: a, state: ThreadState::AwaitsIpc });
        log.record(2, KernelEvent::ThreadResumed { thread: b, result: 0 });

        assert_eq!(log.events_for_thread(a).len(), 2);
        assert_eq!(log.events_for_thread(b).len(), 2);
        assert!(log.events_for_thread(ObjectId(3)).is_empty());
    }

    #[test]
    fn test_json_export() {
        let mut log = KernelAuditLog::new();
        log.record(
            7,
            KernelEvent::SignalSubmitted {
                context: ObjectId(4),
                count: 2,
            },
        );
        let json = log.to_json().unwrap();
        assert!(json.contains("SignalSubmitted"));
        assert!(json.contains("\"entry\": 7"));
    }

    #[test]
    fn test_clear() {
        let mut log = KernelAuditLog::new();
        log.record(0, KernelEvent::IpcCancelled { thread: ObjectId(1) });
        log.clear();
        assert!(log.is_empty());
    }
}
