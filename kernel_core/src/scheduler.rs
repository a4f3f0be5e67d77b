//! Per-Processor Scheduler
//!
//! Each processor owns one scheduler and nothing but that processor's
//! kernel touches it. Clients pinned to another processor reach it only
//! through the remote inbox in [`crate::smp`].
//!
//! ## Philosophy
//!
//! - **Mechanism, not policy**: plain round-robin, every client gets the
//!   same quantum.
//! - **Determinism first**: same entries + same consumed time => same schedule.
//! - **No hidden yields**: rotation only happens when a quantum is used up
//!   or a client yields.
//!
//! ## Design
//!
//! - The head of the run queue is the running client; the rest are queued.
//! - Every entry carries the remainder of its quantum. Consumed time is
//!   charged to the head; a depleted head is refilled and moved to the tail.
//! - `yield_occupation` depletes the head without removing it, so it gets
//!   to run again after everybody else.
//! - An empty queue means the processor idles.

use crate::audit::{push_bounded, DEFAULT_AUDIT_CAPACITY};
use core_types::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Scheduling state of a client as seen by one processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientState {
    Unscheduled,
    Queued,
    Running,
}

/// Reason a client lost the processor while staying runnable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationReason {
    QuantumExpired,
    Yielded,
}

/// Scheduling event for audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    /// Client became the running one
    ClientSelected { client: ObjectId, time: u64 },
    /// Running client moved to the tail of the queue
    ClientRotated {
        client: ObjectId,
        reason: RotationReason,
        time: u64,
    },
    /// No client left to run
    Idle { time: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Share {
    client: ObjectId,
    remaining: u64,
}

#[derive(Debug)]
pub struct Scheduler {
    quantum: u64,
    queue: VecDeque<Share>,
    time: u64,
    last_selected: Option<ObjectId>,
    audit_log: Vec<ScheduleEvent>,
    audit_capacity: usize,
}

impl Scheduler {
    pub fn new(quantum: u64) -> Self {
        Self::with_audit_capacity(quantum, DEFAULT_AUDIT_CAPACITY)
    }

    /// Scheduler whose event trail keeps at most `capacity` events
    pub fn with_audit_capacity(quantum: u64, capacity: usize) -> Self {
        Self {
            quantum,
            queue: VecDeque::new(),
            time: 0,
            last_selected: None,
            audit_log: Vec::new(),
            audit_capacity: capacity.max(1),
        }
    }

    pub fn quantum(&self) -> u64 {
        self.quantum
    }

    /// Time consumed on this processor so far
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Appends a client with a fresh quantum; no-op if already present
    pub fn insert(&mut self, client: ObjectId) -> bool {
        if self.contains(client) {
            return false;
        }
        self.queue.push_back(Share {
            client,
            remaining: self.quantum,
        });
        true
    }

    pub fn remove(&mut self, client: ObjectId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|share| share.client != client);
        self.queue.len() != before
    }

    pub fn contains(&self, client: ObjectId) -> bool {
        self.queue.iter().any(|share| share.client == client)
    }

    pub fn head(&self) -> Option<ObjectId> {
        self.queue.front().map(|share| share.client)
    }

    pub fn client_state(&self, client: ObjectId) -> ClientState {
        match self.head() {
            Some(head) if head == client => ClientState::Running,
            _ if self.contains(client) => ClientState::Queued,
            _ => ClientState::Unscheduled,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn rotate(&mut self, reason: RotationReason) {
        if let Some(mut share) = self.queue.pop_front() {
            share.remaining = self.quantum;
            self.push_event(ScheduleEvent::ClientRotated {
                client: share.client,
                reason,
                time: self.time,
            });
            self.queue.push_back(share);
        }
    }

    /// Charges `consumed` ticks to the running client
    pub fn update(&mut self, consumed: u64) {
        self.time = self.time.saturating_add(consumed);
        let Some(head) = self.queue.front_mut() else {
            return;
        };
        head.remaining = head.remaining.saturating_sub(consumed);
        if head.remaining == 0 {
            self.rotate(RotationReason::QuantumExpired);
        }
    }

    /// Gives up the rest of the running client's quantum
    pub fn yield_occupation(&mut self) {
        if let Some(head) = self.queue.front_mut() {
            head.remaining = 0;
            self.rotate(RotationReason::Yielded);
        }
    }

    /// Ticks left for the running client, or a full quantum when idle
    pub fn remaining_quota(&self) -> u64 {
        self.queue
            .front()
            .map(|share| share.remaining)
            .unwrap_or(self.quantum)
    }

    /// Picks the client to return to and records changes of occupation
    pub fn select(&mut self) -> Option<ObjectId> {
        let head = self.head();
        if head != self.last_selected {
            let event = match head {
                Some(client) => ScheduleEvent::ClientSelected {
                    client,
                    time: self.time,
                },
                None => ScheduleEvent::Idle { time: self.time },
            };
            self.push_event(event);
            self.last_selected = head;
        }
        head
    }

    fn push_event(&mut self, event: ScheduleEvent) {
        push_bounded(&mut self.audit_log, self.audit_capacity, event);
    }

    pub fn audit_log(&self) -> &[ScheduleEvent] {
        &self.audit_log
    }

    pub fn clear_audit_log(&mut self) {
        self.audit_log.clear();
    }
}
