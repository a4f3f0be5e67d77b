//! Signal subsystem
//!
//! Signals are coalescing liveness notifications. A *context* belongs to
//! one *receiver* and collects submissions; a thread waiting at the
//! receiver (a *handler*) gets the context's imprint together with the
//! number of submissions since the last delivery, not one wake-up per
//! submission.
//!
//! Context state is `{submits, ack, killed}`:
//!
//! - `ack` is set while no delivery is outstanding. Delivery clears it and
//!   the receiving thread sets it again with `ack`. A context is
//!   deliverable when it has submissions, is acknowledged and is alive.
//! - `kill` while a delivery is outstanding registers the killer, which
//!   is notified once the delivery is acknowledged.
//!
//! Deliverable contexts and waiting handlers are two independent FIFOs
//! per receiver. Delivery pops one of each until either runs dry.
//!
//! The subsystem never touches threads or schedulers. Everything that
//! must happen to a thread is reported as a [`SignalNotification`] and
//! applied by the kernel.

use crate::object::ObjectPool;
use core_types::{ObjectId, ObjectKind, ObjectRef};
use kernel_api::{KernelError, SignalData};
use std::collections::{BTreeMap, VecDeque};

/// Effect of a signal operation on a waiting thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalNotification {
    /// A handler received a signal
    Delivered {
        thread: ObjectId,
        receiver: ObjectId,
        context: ObjectId,
        data: SignalData,
    },
    /// A waiting killer's context was acknowledged
    KillDone { thread: ObjectId, context: ObjectId },
    /// A waiting killer's context was destroyed first
    KillFailed { thread: ObjectId, context: ObjectId },
    /// The receiver a handler waited at was destroyed
    WaitAborted { thread: ObjectId, receiver: ObjectId },
}

/// Result of a kill request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The context is dead; nothing to wait for
    Completed,
    /// A delivery is unacknowledged; the killer must wait
    Pending,
}

#[derive(Debug)]
pub struct SignalReceiver {
    id: ObjectId,
    contexts: Vec<ObjectId>,
    deliverable: VecDeque<ObjectId>,
    handlers: VecDeque<ObjectId>,
}

impl SignalReceiver {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn contexts(&self) -> &[ObjectId] {
        &self.contexts
    }

    /// Threads waiting here, oldest first
    pub fn handlers(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.handlers.iter().copied()
    }

    /// Contexts waiting for a handler, oldest first
    pub fn deliverable(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.deliverable.iter().copied()
    }
}

#[derive(Debug)]
pub struct SignalContext {
    id: ObjectId,
    receiver: ObjectId,
    imprint: u64,
    submits: u32,
    ack: bool,
    killed: bool,
    killer: Option<ObjectId>,
}

impl SignalContext {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn receiver(&self) -> ObjectId {
        self.receiver
    }

    pub fn imprint(&self) -> u64 {
        self.imprint
    }

    /// Submissions since the last delivery
    pub fn submits(&self) -> u32 {
        self.submits
    }

    pub fn acknowledged(&self) -> bool {
        self.ack
    }

    pub fn killed(&self) -> bool {
        self.killed
    }

    pub fn killer(&self) -> Option<ObjectId> {
        self.killer
    }

    fn is_deliverable(&self) -> bool {
        self.ack && !self.killed && self.submits > 0
    }
}

#[derive(Debug)]
pub struct SignalSubsystem {
    receivers: ObjectPool<SignalReceiver>,
    contexts: ObjectPool<SignalContext>,
    /// Waiting handler thread -> receiver
    handlers: BTreeMap<ObjectId, ObjectId>,
    /// Waiting killer thread -> context
    killers: BTreeMap<ObjectId, ObjectId>,
}

impl SignalSubsystem {
    pub fn new(max_receivers: u32, max_contexts: u32) -> Self {
        Self {
            receivers: ObjectPool::new(max_receivers),
            contexts: ObjectPool::new(max_contexts),
            handlers: BTreeMap::new(),
            killers: BTreeMap::new(),
        }
    }

    pub fn receiver(&self, id: ObjectId) -> Option<&SignalReceiver> {
        self.receivers.get(id)
    }

    pub fn context(&self, id: ObjectId) -> Option<&SignalContext> {
        self.contexts.get(id)
    }

    /// Receiver `thread` waits at, if any
    pub fn handler_of(&self, thread: ObjectId) -> Option<ObjectId> {
        self.handlers.get(&thread).copied()
    }

    /// Context `thread` waits to see killed, if any
    pub fn killer_of(&self, thread: ObjectId) -> Option<ObjectId> {
        self.killers.get(&thread).copied()
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    fn unknown_context(id: ObjectId) -> KernelError {
        KernelError::UnknownObject(ObjectRef::signal_context(id))
    }

    fn unknown_receiver(id: ObjectId) -> KernelError {
        KernelError::UnknownObject(ObjectRef::signal_receiver(id))
    }

    pub fn new_receiver(&mut self) -> Result<ObjectId, KernelError> {
        if self.receivers.is_full() {
            return Err(KernelError::ResourceExhausted(ObjectKind::SignalReceiver));
        }
        Ok(self.receivers.create(|id| SignalReceiver {
            id,
            contexts: Vec::new(),
            deliverable: VecDeque::new(),
            handlers: VecDeque::new(),
        }))
    }

    pub fn new_context(&mut self, receiver: ObjectId, imprint: u64) -> Result<ObjectId, KernelError> {
        if !self.receivers.contains(receiver) {
            return Err(Self::unknown_receiver(receiver));
        }
        if self.contexts.is_full() {
            return Err(KernelError::ResourceExhausted(ObjectKind::SignalContext));
        }
        let id = self.contexts.create(|id| SignalContext {
            id,
            receiver,
            imprint,
            submits: 0,
            ack: true,
            killed: false,
            killer: None,
        });
        if let Some(r) = self.receivers.get_mut(receiver) {
            r.contexts.push(id);
        }
        Ok(id)
    }

    /// Queues the context at its receiver if it can be delivered
    fn mark_deliverable(&mut self, context: ObjectId, out: &mut Vec<SignalNotification>) {
        let Some(c) = self.contexts.get(context) else {
            return;
        };
        if !c.is_deliverable() {
            return;
        }
        let receiver = c.receiver;
        if let Some(r) = self.receivers.get_mut(receiver) {
            if !r.deliverable.contains(&context) {
                r.deliverable.push_back(context);
            }
        }
        self.listen(receiver, out);
    }

    /// Pairs deliverable contexts with waiting handlers
    fn listen(&mut self, receiver: ObjectId, out: &mut Vec<SignalNotification>) {
        loop {
            let Some(r) = self.receivers.get_mut(receiver) else {
                return;
            };
            if r.deliverable.is_empty() || r.handlers.is_empty() {
                return;
            }
            let (Some(context), Some(thread)) = (r.deliverable.pop_front(), r.handlers.pop_front())
            else {
                return;
            };
            self.handlers.remove(&thread);

            let Some(c) = self.contexts.get_mut(context) else {
                crate::fatal!("deliverable context {} is not registered", context);
            };
            let data = SignalData {
                imprint: c.imprint,
                count: c.submits,
            };
            c.submits = 0;
            c.ack = false;
            out.push(SignalNotification::Delivered {
                thread,
                receiver,
                context,
                data,
            });
        }
    }

    /// Adds `count` submissions to a context
    pub fn submit(
        &mut self,
        context: ObjectId,
        count: u32,
        out: &mut Vec<SignalNotification>,
    ) -> Result<(), KernelError> {
        let c = self
            .contexts
            .get_mut(context)
            .ok_or_else(|| Self::unknown_context(context))?;
        if c.killed {
            return Err(KernelError::SignalContextKilled);
        }
        c.submits = c
            .submits
            .checked_add(count)
            .ok_or(KernelError::SignalOverflow)?;
        self.mark_deliverable(context, out);
        Ok(())
    }

    /// Acknowledges the last delivery of a context
    pub fn ack(
        &mut self,
        context: ObjectId,
        out: &mut Vec<SignalNotification>,
    ) -> Result<(), KernelError> {
        let c = self
            .contexts
            .get_mut(context)
            .ok_or_else(|| Self::unknown_context(context))?;
        if c.ack {
            return Ok(());
        }
        c.ack = true;
        if !c.killed {
            self.mark_deliverable(context, out);
            return Ok(());
        }
        if let Some(thread) = c.killer.take() {
            self.killers.remove(&thread);
            out.push(SignalNotification::KillDone { thread, context });
        }
        Ok(())
    }

    /// Stops all further delivery from a context
    ///
    /// With a delivery outstanding the kill completes only when that
    /// delivery is acknowledged; `killer` is notified then.
    pub fn kill(&mut self, context: ObjectId, killer: ObjectId) -> Result<KillOutcome, KernelError> {
        let c = self
            .contexts
            .get_mut(context)
            .ok_or_else(|| Self::unknown_context(context))?;
        if c.killed {
            return Ok(KillOutcome::Completed);
        }
        c.killed = true;
        if c.ack {
            c.submits = 0;
            let receiver = c.receiver;
            if let Some(r) = self.receivers.get_mut(receiver) {
                r.deliverable.retain(|id| *id != context);
            }
            return Ok(KillOutcome::Completed);
        }
        if self.killers.contains_key(&killer) {
            crate::fatal!("{} waits for two kills at once", killer);
        }
        c.killer = Some(killer);
        self.killers.insert(killer, context);
        Ok(KillOutcome::Pending)
    }

    /// Attaches `thread` as a handler and delivers if a context is ready
    pub fn await_signal(
        &mut self,
        receiver: ObjectId,
        thread: ObjectId,
        out: &mut Vec<SignalNotification>,
    ) -> Result<(), KernelError> {
        if self.handlers.contains_key(&thread) {
            return Err(KernelError::HandlerAlreadyAttached);
        }
        let r = self
            .receivers
            .get_mut(receiver)
            .ok_or_else(|| Self::unknown_receiver(receiver))?;
        r.handlers.push_back(thread);
        self.handlers.insert(thread, receiver);
        self.listen(receiver, out);
        Ok(())
    }

    /// Detaches a waiting handler without any other effect
    pub fn cancel_handler(&mut self, thread: ObjectId) -> bool {
        let Some(receiver) = self.handlers.remove(&thread) else {
            return false;
        };
        if let Some(r) = self.receivers.get_mut(receiver) {
            r.handlers.retain(|t| *t != thread);
        }
        true
    }

    /// Detaches a waiting killer without any other effect
    ///
    /// The context stays killed.
    pub fn cancel_killer(&mut self, thread: ObjectId) -> bool {
        let Some(context) = self.killers.remove(&thread) else {
            return false;
        };
        if let Some(c) = self.contexts.get_mut(context) {
            if c.killer == Some(thread) {
                c.killer = None;
            }
        }
        true
    }

    /// Removes every wait of a thread that is going away
    pub fn forget_thread(&mut self, thread: ObjectId) {
        self.cancel_handler(thread);
        self.cancel_killer(thread);
    }

    /// Destroys a context
    ///
    /// A killer still waiting for it is told the kill failed.
    pub fn destroy_context(
        &mut self,
        context: ObjectId,
        out: &mut Vec<SignalNotification>,
    ) -> Result<(), KernelError> {
        let c = self
            .contexts
            .destroy(context)
            .ok_or_else(|| Self::unknown_context(context))?;
        if let Some(thread) = c.killer {
            self.killers.remove(&thread);
            out.push(SignalNotification::KillFailed { thread, context });
        }
        if let Some(r) = self.receivers.get_mut(c.receiver) {
            r.contexts.retain(|id| *id != context);
            r.deliverable.retain(|id| *id != context);
        }
        Ok(())
    }

    /// Destroys a receiver along with its contexts
    ///
    /// Returns the destroyed contexts. Handlers still waiting are aborted.
    pub fn destroy_receiver(
        &mut self,
        receiver: ObjectId,
        out: &mut Vec<SignalNotification>,
    ) -> Result<Vec<ObjectId>, KernelError> {
        let contexts = self
            .receivers
            .get(receiver)
            .map(|r| r.contexts.clone())
            .ok_or_else(|| Self::unknown_receiver(receiver))?;
        for context in &contexts {
            self.destroy_context(*context, out)?;
        }
        if let Some(r) = self.receivers.destroy(receiver) {
            for thread in r.handlers {
                self.handlers.remove(&thread);
                out.push(SignalNotification::WaitAborted { thread, receiver });
            }
        }
        Ok(contexts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: ObjectId = ObjectId(101);
    const T2: ObjectId = ObjectId(102);

    fn setup() -> (SignalSubsystem, ObjectId, ObjectId) {
        let mut signals = SignalSubsystem::new(8, 8);
        let receiver = signals.new_receiver().unwrap();
        let context = signals.new_context(receiver, 0xfeed).unwrap();
        (signals, receiver, context)
    }

    fn delivered_count(out: &[SignalNotification]) -> Vec<u32> {
        out.iter()
            .filter_map(|n| match n {
                SignalNotification::Delivered { data, .. } => Some(data.count),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_submissions_coalesce() {
        let (mut signals, receiver, context) = setup();
        let mut out = Vec::new();
        for _ in 0..5 {
            signals.submit(context, 1, &mut out).unwrap();
        }
        assert!(out.is_empty());

        signals.await_signal(receiver, T1, &mut out).unwrap();
        assert_eq!(
            out,
            vec![SignalNotification::Delivered {
                thread: T1,
                receiver,
                context,
                data: SignalData {
                    imprint: 0xfeed,
                    count: 5
                },
            }]
        );
        assert_eq!(signals.handler_of(T1), None);
        assert_eq!(signals.context(context).unwrap().submits(), 0);
    }

    #[test]
    fn test_no_second_delivery_before_ack() {
        let (mut signals, receiver, context) = setup();
        let mut out = Vec::new();
        signals.await_signal(receiver, T1, &mut out).unwrap();
        signals.submit(context, 1, &mut out).unwrap();
        assert_eq!(delivered_count(&out), vec![1]);

        out.clear();
        signals.await_signal(receiver, T1, &mut out).unwrap();
        signals.submit(context, 2, &mut out).unwrap();
        assert!(out.is_empty());

        signals.ack(context, &mut out).unwrap();
        assert_eq!(delivered_count(&out), vec![2]);
    }

    #[test]
    fn test_ack_twice_is_noop() {
        let (mut signals, _, context) = setup();
        let mut out = Vec::new();
        signals.ack(context, &mut out).unwrap();
        signals.ack(context, &mut out).unwrap();
        assert!(out.is_empty());
        assert!(signals.context(context).unwrap().acknowledged());
    }

    #[test]
    fn test_fifo_on_both_sides() {
        let mut signals = SignalSubsystem::new(8, 8);
        let receiver = signals.new_receiver().unwrap();
        let a = signals.new_context(receiver, 1).unwrap();
        let b = signals.new_context(receiver, 2).unwrap();
        let mut out = Vec::new();

        signals.submit(b, 1, &mut out).unwrap();
        signals.submit(a, 1, &mut out).unwrap();
        signals.await_signal(receiver, T1, &mut out).unwrap();
        signals.await_signal(receiver, T2, &mut out).unwrap();

        let pairs: Vec<(ObjectId, ObjectId)> = out
            .iter()
            .filter_map(|n| match n {
                SignalNotification::Delivered {
                    thread, context, ..
                } => Some((*thread, *context)),
                _ => None,
            })
            .collect();
        assert_eq!(pairs, vec![(T1, b), (T2, a)]);
    }

    #[test]
    fn test_handler_attached_twice_is_rejected() {
        let (mut signals, receiver, _) = setup();
        let mut out = Vec::new();
        signals.await_signal(receiver, T1, &mut out).unwrap();
        assert_eq!(
            signals.await_signal(receiver, T1, &mut out),
            Err(KernelError::HandlerAlreadyAttached)
        );
    }

    #[test]
    fn test_kill_with_ack_completes_immediately() {
        let (mut signals, receiver, context) = setup();
        let mut out = Vec::new();
        signals.submit(context, 3, &mut out).unwrap();

        assert_eq!(signals.kill(context, T2), Ok(KillOutcome::Completed));
        assert_eq!(signals.receiver(receiver).unwrap().deliverable().count(), 0);
        assert_eq!(
            signals.submit(context, 1, &mut out),
            Err(KernelError::SignalContextKilled)
        );

        // nothing is delivered from a dead context
        signals.await_signal(receiver, T1, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_kill_waits_for_ack() {
        let (mut signals, receiver, context) = setup();
        let mut out = Vec::new();
        signals.await_signal(receiver, T1, &mut out).unwrap();
        signals.submit(context, 1, &mut out).unwrap();
        out.clear();

        assert_eq!(signals.kill(context, T2), Ok(KillOutcome::Pending));
        assert!(signals.context(context).is_some());
        assert_eq!(signals.killer_of(T2), Some(context));
        assert!(out.is_empty());

        signals.ack(context, &mut out).unwrap();
        assert_eq!(
            out,
            vec![SignalNotification::KillDone {
                thread: T2,
                context
            }]
        );
        assert_eq!(signals.killer_of(T2), None);
        // still registered until its owner destroys it
        assert!(signals.context(context).is_some());
    }

    #[test]
    fn test_kill_twice_is_noop() {
        let (mut signals, _, context) = setup();
        assert_eq!(signals.kill(context, T1), Ok(KillOutcome::Completed));
        assert_eq!(signals.kill(context, T2), Ok(KillOutcome::Completed));
    }

    #[test]
    fn test_destroy_context_fails_pending_killer() {
        let (mut signals, receiver, context) = setup();
        let mut out = Vec::new();
        signals.await_signal(receiver, T1, &mut out).unwrap();
        signals.submit(context, 1, &mut out).unwrap();
        signals.kill(context, T2).unwrap();
        out.clear();

        signals.destroy_context(context, &mut out).unwrap();
        assert_eq!(
            out,
            vec![SignalNotification::KillFailed {
                thread: T2,
                context
            }]
        );
        assert!(signals.receiver(receiver).unwrap().contexts().is_empty());
    }

    #[test]
    fn test_cancelled_waits_get_no_notification() {
        let (mut signals, receiver, context) = setup();
        let mut out = Vec::new();

        signals.await_signal(receiver, T1, &mut out).unwrap();
        signals.submit(context, 1, &mut out).unwrap();
        out.clear();
        signals.kill(context, T2).unwrap();
        assert!(signals.cancel_killer(T2));

        signals.await_signal(receiver, T1, &mut out).unwrap();
        assert!(signals.cancel_handler(T1));

        signals.destroy_receiver(receiver, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_destroy_receiver_aborts_handlers() {
        let (mut signals, receiver, context) = setup();
        let mut out = Vec::new();
        signals.await_signal(receiver, T1, &mut out).unwrap();

        let destroyed = signals.destroy_receiver(receiver, &mut out).unwrap();
        assert_eq!(destroyed, vec![context]);
        assert_eq!(
            out,
            vec![SignalNotification::WaitAborted {
                thread: T1,
                receiver
            }]
        );
        assert_eq!(signals.context_count(), 0);
        assert_eq!(signals.handler_of(T1), None);
    }

    #[test]
    fn test_submit_overflow() {
        let (mut signals, _, context) = setup();
        let mut out = Vec::new();
        signals.submit(context, u32::MAX, &mut out).unwrap();
        assert_eq!(
            signals.submit(context, 1, &mut out),
            Err(KernelError::SignalOverflow)
        );
        assert_eq!(signals.context(context).unwrap().submits(), u32::MAX);
    }

    #[test]
    fn test_context_limit() {
        let mut signals = SignalSubsystem::new(1, 1);
        let receiver = signals.new_receiver().unwrap();
        assert_eq!(
            signals.new_receiver(),
            Err(KernelError::ResourceExhausted(ObjectKind::SignalReceiver))
        );
        signals.new_context(receiver, 0).unwrap();
        assert_eq!(
            signals.new_context(receiver, 0),
            Err(KernelError::ResourceExhausted(ObjectKind::SignalContext))
        );
    }
}
