//! # Kernel Core
//!
//! The capability microkernel: identifiers and object registries,
//! per-processor schedulers with their SMP coordination, coalescing
//! signals and synchronous IPC over per-thread transfer windows.
//!
//! ## Execution model
//!
//! Every processor runs a single-threaded, run-to-completion kernel. It
//! is entered either by a trap of the thread running on it
//! ([`KernelApi::trap`]) or by an interrupt ([`Kernel::interrupt`]), and
//! left by selecting the next thread and programming the timer with that
//! thread's remaining quantum.
//!
//! [`Kernel`] holds the state of all processors. Entry points take
//! `&mut self`, so entries of different processors are serialized here;
//! the parts that real processors share concurrently (remote inboxes,
//! doorbell flags, the flush work-list) still go through the
//! concurrency-safe structures in [`smp`].
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! The platform is injected as trait objects ([`Platform`]); the crate
//! ships deterministic simulated devices and a [`test_utils::SimBoard`]
//! that drives them from plain `#[test]` functions.
//!
//! ## Failure model
//!
//! Expected conditions are [`KernelError`]s. Broken invariants (an
//! exhausted identifier space, freeing an identifier twice) halt through
//! the crate's `fatal!` path, which logs before it panics.

/// Reports a broken kernel invariant and halts
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}
pub(crate) use fatal;

pub mod audit;
pub mod cap_table;
pub mod config;
pub mod id_alloc;
pub mod ipc_node;
pub mod mmu;
pub mod object;
pub mod pd;
pub mod pic;
pub mod scheduler;
pub mod signal;
pub mod smp;
mod syscall_gate;
pub mod test_utils;
pub mod thread;
pub mod timer;

use audit::{KernelAuditLog, KernelEvent};
use config::KernelConfig;
use core_types::{CapId, CpuId, IrqNumber, ObjectId, ObjectKind, ObjectRef};
use hal::{InterruptController, TimerDevice, TranslationCache};
use ipc::TransferWindow;
use kernel_api::{
    KernelApi, KernelError, RawCall, Syscall, TrapReturn, RESULT_FAILED, RESULT_OK,
};
use object::ObjectPool;
use pd::Pd;
use scheduler::Scheduler;
use signal::{SignalNotification, SignalSubsystem};
use smp::{Cpu, SmpShared};
use std::collections::BTreeMap;
use std::sync::Arc;
use thread::{Thread, ThreadState};

/// Processor that executes privileged core-level operations
pub const ROOT_CPU: CpuId = CpuId::BOOT;

/// Devices the kernel drives
#[derive(Clone)]
pub struct Platform {
    pub pic: Arc<dyn InterruptController>,
    pub timer: Arc<dyn TimerDevice>,
    pub mmu: Arc<dyn TranslationCache>,
}

pub struct Kernel {
    config: KernelConfig,
    platform: Platform,
    cpus: Vec<Cpu>,
    smp: Arc<SmpShared>,
    pds: ObjectPool<Pd>,
    threads: ObjectPool<Thread>,
    signals: SignalSubsystem,
    irq_routes: BTreeMap<IrqNumber, ObjectId>,
    audit: KernelAuditLog,
    /// Kernel entries so far, over all processors
    entries: u64,
}

impl Kernel {
    pub fn new(config: KernelConfig, platform: Platform) -> Result<Self, KernelError> {
        config.validate()?;
        let cpus = (0..config.cpu_count)
            .map(|n| {
                let scheduler =
                    Scheduler::with_audit_capacity(config.quantum_ticks, config.audit_capacity);
                Cpu::new(CpuId(n), scheduler)
            })
            .collect();
        Ok(Self {
            smp: Arc::new(SmpShared::new(config.cpu_count)),
            pds: ObjectPool::new(config.max_pds),
            threads: ObjectPool::new(config.max_threads),
            signals: SignalSubsystem::new(config.max_signal_receivers, config.max_signal_contexts),
            irq_routes: BTreeMap::new(),
            audit: KernelAuditLog::with_capacity(config.audit_capacity),
            entries: 0,
            cpus,
            platform,
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpu(&self, cpu: CpuId) -> Option<&Cpu> {
        self.cpus.get(cpu.0)
    }

    pub fn smp(&self) -> &SmpShared {
        &self.smp
    }

    pub fn thread(&self, id: ObjectId) -> Option<&Thread> {
        self.threads.get(id)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn pd(&self, id: ObjectId) -> Option<&Pd> {
        self.pds.get(id)
    }

    pub fn signals(&self) -> &SignalSubsystem {
        &self.signals
    }

    pub fn audit_log(&self) -> &KernelAuditLog {
        &self.audit
    }

    pub fn clear_audit_log(&mut self) {
        self.audit.clear();
    }

    /// Kernel entries so far, over all processors
    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub(crate) fn record(&mut self, event: KernelEvent) {
        self.audit.record(self.entries, event);
    }

    fn check_cpu(&self, cpu: CpuId) -> Result<(), KernelError> {
        if cpu.0 < self.cpus.len() {
            Ok(())
        } else {
            Err(KernelError::InvalidCpu(cpu))
        }
    }

    fn object_exists(&self, object: ObjectRef) -> bool {
        match object.kind {
            ObjectKind::Thread => self.threads.contains(object.id),
            ObjectKind::ProtectionDomain => self.pds.contains(object.id),
            ObjectKind::SignalReceiver => self.signals.receiver(object.id).is_some(),
            ObjectKind::SignalContext => self.signals.context(object.id).is_some(),
        }
    }

    /// Forgets every capability naming `object`, in every domain
    fn purge_caps(&mut self, object: ObjectRef) {
        for (_, pd) in self.pds.iter_mut() {
            pd.caps_mut().purge(object);
        }
    }

    fn created(&mut self, object: ObjectRef) {
        log::debug!("created {}", object);
        self.record(KernelEvent::ObjectCreated { object });
    }

    fn destroyed(&mut self, object: ObjectRef) {
        log::debug!("destroyed {}", object);
        self.record(KernelEvent::ObjectDestroyed { object });
    }

    pub fn create_pd(&mut self, label: &str) -> Result<ObjectId, KernelError> {
        if self.pds.is_full() {
            return Err(KernelError::ResourceExhausted(ObjectKind::ProtectionDomain));
        }
        let max_caps = self.config.max_caps_per_pd;
        let id = self.pds.create(|id| Pd::new(id, label, max_caps));
        self.created(ObjectRef::pd(id));
        Ok(id)
    }

    /// Destroys a domain that no thread lives in any more
    pub fn destroy_pd(&mut self, pd: ObjectId) -> Result<(), KernelError> {
        let object = ObjectRef::pd(pd);
        if !self.pds.contains(pd) {
            return Err(KernelError::UnknownObject(object));
        }
        if self.threads.iter().any(|(_, t)| t.pd() == pd) {
            return Err(KernelError::ObjectInUse(object));
        }
        self.purge_caps(object);
        self.pds.destroy(pd);
        self.destroyed(object);
        Ok(())
    }

    /// Creates a thread in `pd`, pinned to `cpu`; it runs once started
    pub fn create_thread(
        &mut self,
        pd: ObjectId,
        cpu: CpuId,
        label: &str,
    ) -> Result<ObjectId, KernelError> {
        self.check_cpu(cpu)?;
        if !self.pds.contains(pd) {
            return Err(KernelError::UnknownObject(ObjectRef::pd(pd)));
        }
        if self.threads.is_full() {
            return Err(KernelError::ResourceExhausted(ObjectKind::Thread));
        }
        let id = self.threads.create(|id| Thread::new(id, label, pd, cpu));
        self.created(ObjectRef::thread(id));
        Ok(id)
    }

    /// Makes a freshly created thread runnable
    ///
    /// A thread pinned to another processor than [`ROOT_CPU`] is handed
    /// over through that processor's inbox and doorbell.
    pub fn start_thread(&mut self, thread: ObjectId) -> Result<(), KernelError> {
        let state = self
            .threads
            .get(thread)
            .map(|t| t.state())
            .ok_or(KernelError::UnknownObject(ObjectRef::thread(thread)))?;
        if state != ThreadState::AwaitsStart {
            return Err(KernelError::InvalidThreadState(thread));
        }
        self.activate(ROOT_CPU, thread, RESULT_OK);
        Ok(())
    }

    /// Destroys a thread in whatever state it is
    ///
    /// IPC partners waiting on it fail with [`RESULT_FAILED`]; its own
    /// handler and killer waits vanish without notification.
    pub fn destroy_thread(&mut self, thread: ObjectId) -> Result<(), KernelError> {
        let object = ObjectRef::thread(thread);
        let cpu = self
            .threads
            .get(thread)
            .map(|t| t.affinity())
            .ok_or(KernelError::UnknownObject(object))?;
        self.ipc_teardown(ROOT_CPU, thread);
        self.signals.forget_thread(thread);
        for asid in self.smp.detach_flushes(thread) {
            self.record(KernelEvent::FlushDetached {
                initiator: thread,
                asid,
            });
        }
        let local = &mut self.cpus[cpu.0];
        local.scheduler.remove(thread);
        if local.current == Some(thread) {
            local.current = None;
        }
        self.purge_caps(object);
        self.threads.destroy(thread);
        self.destroyed(object);
        Ok(())
    }

    pub fn create_signal_receiver(&mut self) -> Result<ObjectId, KernelError> {
        let id = self.signals.new_receiver()?;
        self.created(ObjectRef::signal_receiver(id));
        Ok(id)
    }

    /// Creates a context of `receiver`; deliveries carry `imprint`
    pub fn create_signal_context(
        &mut self,
        receiver: ObjectId,
        imprint: u64,
    ) -> Result<ObjectId, KernelError> {
        let id = self.signals.new_context(receiver, imprint)?;
        self.created(ObjectRef::signal_context(id));
        Ok(id)
    }

    fn forget_context(&mut self, context: ObjectId) {
        let object = ObjectRef::signal_context(context);
        self.purge_caps(object);
        self.irq_routes.retain(|_, routed| *routed != context);
        self.destroyed(object);
    }

    pub fn destroy_signal_context(&mut self, context: ObjectId) -> Result<(), KernelError> {
        let mut out = Vec::new();
        self.signals.destroy_context(context, &mut out)?;
        self.forget_context(context);
        self.apply_signal_notifications(ROOT_CPU, out);
        Ok(())
    }

    /// Destroys a receiver and all of its contexts
    pub fn destroy_signal_receiver(&mut self, receiver: ObjectId) -> Result<(), KernelError> {
        let mut out = Vec::new();
        let contexts = self.signals.destroy_receiver(receiver, &mut out)?;
        for context in contexts {
            self.forget_context(context);
        }
        let object = ObjectRef::signal_receiver(receiver);
        self.purge_caps(object);
        self.destroyed(object);
        self.apply_signal_notifications(ROOT_CPU, out);
        Ok(())
    }

    /// Gives `pd` an owned capability to `object`
    pub fn grant(&mut self, pd: ObjectId, object: ObjectRef) -> Result<CapId, KernelError> {
        if !self.object_exists(object) {
            return Err(KernelError::UnknownObject(object));
        }
        self.pds
            .get_mut(pd)
            .ok_or(KernelError::UnknownObject(ObjectRef::pd(pd)))?
            .caps_mut()
            .insert(object)
            .ok_or(KernelError::CapTableFull(pd))
    }

    /// Routes a device interrupt line to a signal context
    ///
    /// Doorbell and timer lines of any processor never reach device
    /// dispatch and are refused with [`KernelError::ReservedIrq`].
    pub fn route_irq(&mut self, irq: IrqNumber, context: ObjectId) -> Result<(), KernelError> {
        let reserved = self.smp.online().iter().any(|cpu| {
            self.platform.pic.is_ip_interrupt(irq, cpu)
                || self.platform.timer.interrupt_id(cpu) == irq
        });
        if reserved {
            return Err(KernelError::ReservedIrq(irq));
        }
        if self.signals.context(context).is_none() {
            return Err(KernelError::UnknownObject(ObjectRef::signal_context(context)));
        }
        self.irq_routes.insert(irq, context);
        Ok(())
    }

    /// Makes `thread` runnable on its processor `target`
    ///
    /// From the target processor itself this is a local insert. From any
    /// other processor the thread goes to the target's inbox and the
    /// target's doorbell is rung, unless one is already pending.
    pub(crate) fn schedule(&mut self, executing: CpuId, thread: ObjectId, target: CpuId) {
        if executing == target {
            self.cpus[target.0].scheduler.insert(thread);
            return;
        }
        let ring = self.smp.remote_insert(target, thread);
        self.doorbell(executing, target, ring);
    }

    /// Rings the doorbell of `target` unless one is already pending
    pub(crate) fn ring_doorbell(&mut self, executing: CpuId, target: CpuId) {
        let ring = self.smp.request_doorbell(target);
        self.doorbell(executing, target, ring);
    }

    fn doorbell(&mut self, from: CpuId, to: CpuId, ring: bool) {
        if ring {
            self.platform.pic.trigger_ip_interrupt(to);
            self.record(KernelEvent::DoorbellSent { from, to });
        } else {
            self.record(KernelEvent::DoorbellSuppressed { to });
        }
    }

    /// Inserts the threads other processors handed to `cpu`
    fn drain_inbox(&mut self, cpu: CpuId) {
        for thread in self.smp.take_inbox(cpu) {
            let runnable = self
                .threads
                .get(thread)
                .map(|t| t.state() == ThreadState::Active && t.affinity() == cpu)
                .unwrap_or(false);
            if runnable {
                self.cpus[cpu.0].scheduler.insert(thread);
            }
        }
    }

    /// Votes on all pending flushes and resumes the initiators of
    /// completed ones
    pub(crate) fn process_flush_work(&mut self, cpu: CpuId) {
        let mmu = Arc::clone(&self.platform.mmu);
        let pass = self
            .smp
            .vote_flushes(cpu, |asid| mmu.flush_address_space(cpu, asid));
        for asid in pass.voted {
            self.record(KernelEvent::FlushVoted { cpu, asid });
        }
        for request in pass.completed {
            self.record(KernelEvent::FlushCompleted {
                initiator: request.initiator,
                asid: request.asid,
            });
            let Some(initiator) = request.initiator else {
                continue;
            };
            let waiting = match self.threads.get_mut(initiator) {
                Some(t) if t.state == ThreadState::AwaitsFlush && t.flush == Some(request.asid) => {
                    t.flush = None;
                    true
                }
                _ => false,
            };
            if waiting {
                self.activate(cpu, initiator, RESULT_OK);
            }
        }
    }

    pub(crate) fn apply_signal_notifications(
        &mut self,
        executing: CpuId,
        notifications: Vec<SignalNotification>,
    ) {
        for notification in notifications {
            match notification {
                SignalNotification::Delivered {
                    thread,
                    receiver,
                    context,
                    data,
                } => {
                    if let Some(t) = self.threads.get_mut(thread) {
                        t.window.load(&data.to_bytes(), &[]);
                    }
                    self.record(KernelEvent::SignalDelivered {
                        receiver,
                        context,
                        thread,
                        count: data.count,
                    });
                    self.activate(executing, thread, RESULT_OK);
                }
                SignalNotification::KillDone { thread, context } => {
                    self.record(KernelEvent::KillCompleted { context });
                    self.activate(executing, thread, RESULT_OK);
                }
                SignalNotification::KillFailed { thread, context } => {
                    self.record(KernelEvent::KillFailed {
                        context,
                        killer: thread,
                    });
                    self.activate(executing, thread, RESULT_FAILED);
                }
                SignalNotification::WaitAborted { thread, .. } => {
                    self.activate(executing, thread, RESULT_FAILED);
                }
            }
        }
    }

    /// Kernel entry: accounts the time the running thread consumed and
    /// takes part in pending flushes
    fn begin_entry(&mut self, cpu: CpuId) {
        self.entries += 1;
        let remaining = self.platform.timer.value(cpu);
        let local = &mut self.cpus[cpu.0];
        let consumed = local.programmed.saturating_sub(remaining);
        local.programmed = remaining;
        local.scheduler.update(consumed);
        self.process_flush_work(cpu);
    }

    /// Kernel exit: selects the next thread and programs its quantum
    fn end_entry(&mut self, cpu: CpuId) {
        let local = &mut self.cpus[cpu.0];
        local.current = local.scheduler.select();
        let quota = local.scheduler.remaining_quota();
        local.programmed = quota;
        self.platform.timer.start_one_shot(cpu, quota);
    }

    /// Takes and handles one pending interrupt of `cpu`
    ///
    /// Returns the interrupt handled, or `None` if nothing was pending.
    /// The kernel is entered and left either way.
    pub fn interrupt(&mut self, cpu: CpuId) -> Result<Option<IrqNumber>, KernelError> {
        self.check_cpu(cpu)?;
        self.begin_entry(cpu);
        let pic = Arc::clone(&self.platform.pic);
        let irq = pic.take_request(cpu);
        if let Some(irq) = irq {
            let timer = irq == self.platform.timer.interrupt_id(cpu);
            // timer expiry is already accounted on entry
            if !timer && pic.is_ip_interrupt(irq, cpu) {
                self.smp.acknowledge_doorbell(cpu);
                self.drain_inbox(cpu);
            } else if !timer {
                self.device_interrupt(cpu, irq);
            }
            pic.finish_request(cpu, irq);
        }
        self.end_entry(cpu);
        Ok(irq)
    }

    fn device_interrupt(&mut self, cpu: CpuId, irq: IrqNumber) {
        let context = self.irq_routes.get(&irq).copied();
        self.record(KernelEvent::DeviceInterrupt { irq, context });
        let Some(context) = context else {
            log::warn!("unrouted interrupt {} on {}", irq, cpu);
            return;
        };
        let mut out = Vec::new();
        match self.signals.submit(context, 1, &mut out) {
            Ok(()) => self.apply_signal_notifications(cpu, out),
            Err(err) => log::warn!("interrupt {} not submitted to {}: {}", irq, context, err),
        }
    }

    fn current(&self, cpu: CpuId) -> Result<ObjectId, KernelError> {
        self.cpus[cpu.0]
            .current
            .filter(|t| {
                self.threads
                    .get(*t)
                    .map(|t| t.state() == ThreadState::Active)
                    .unwrap_or(false)
            })
            .ok_or(KernelError::NoCurrentThread(cpu))
    }
}

impl KernelApi for Kernel {
    fn trap(&mut self, cpu: CpuId, call: RawCall) -> Result<TrapReturn, KernelError> {
        self.check_cpu(cpu)?;
        let thread = self.current(cpu)?;
        let call = Syscall::decode(&call)?;

        self.begin_entry(cpu);
        self.syscall(cpu, thread, call);
        let outcome = match self.threads.get(thread) {
            Some(t) if t.state() == ThreadState::Active => TrapReturn::Returned(t.return_value()),
            _ => TrapReturn::Blocked,
        };
        self.end_entry(cpu);
        Ok(outcome)
    }

    fn current_thread(&self, cpu: CpuId) -> Option<ObjectId> {
        self.cpus.get(cpu.0).and_then(|_| self.current(cpu).ok())
    }

    fn window(&self, thread: ObjectId) -> Result<&TransferWindow, KernelError> {
        self.threads
            .get(thread)
            .map(|t| t.window())
            .ok_or(KernelError::UnknownObject(ObjectRef::thread(thread)))
    }

    fn window_mut(&mut self, thread: ObjectId) -> Result<&mut TransferWindow, KernelError> {
        self.threads
            .get_mut(thread)
            .map(|t| &mut *t.window)
            .ok_or(KernelError::UnknownObject(ObjectRef::thread(thread)))
    }

    fn return_value(&self, thread: ObjectId) -> Result<isize, KernelError> {
        self.threads
            .get(thread)
            .map(|t| t.return_value())
            .ok_or(KernelError::UnknownObject(ObjectRef::thread(thread)))
    }
}
