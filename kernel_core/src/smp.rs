//! SMP coordination: remote scheduling and the translation-flush barrier.
//!
//! Processors never touch each other's scheduler. The only state shared
//! between processor kernels lives in [`SmpShared`]:
//!
//! - one inbox per processor, where other processors drop clients they
//!   want scheduled there;
//! - one "doorbell pending" flag per processor, so a burst of remote
//!   inserts costs a single inter-processor interrupt;
//! - the flush work-list, whose items collect one vote per online
//!   processor before the initiator may continue.
//!
//! Each of these is safe under concurrent mutation from several
//! processors. Everything else is reached only by the owning processor.

use crate::scheduler::Scheduler;
use core_types::{AddressSpaceId, CpuId, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set of processors, one bit each
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSet(u64);

impl CpuSet {
    pub fn empty() -> Self {
        Self(0)
    }

    /// Processors `0..count`
    pub fn first(count: usize) -> Self {
        if count >= 64 {
            Self(u64::MAX)
        } else {
            Self((1u64 << count) - 1)
        }
    }

    pub fn insert(&mut self, cpu: CpuId) {
        self.0 |= 1u64 << cpu.0;
    }

    pub fn contains(&self, cpu: CpuId) -> bool {
        self.0 & (1u64 << cpu.0) != 0
    }

    pub fn is_superset_of(&self, other: CpuSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        (0..64).map(CpuId).filter(move |cpu| self.contains(*cpu))
    }
}

/// A pending cross-processor flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRequest {
    /// Thread to resume on completion, cleared if it is destroyed first
    pub initiator: Option<ObjectId>,
    pub asid: AddressSpaceId,
    votes: CpuSet,
}

impl FlushRequest {
    pub fn new(initiator: ObjectId, asid: AddressSpaceId) -> Self {
        Self {
            initiator: Some(initiator),
            asid,
            votes: CpuSet::empty(),
        }
    }

    pub fn votes(&self) -> CpuSet {
        self.votes
    }
}

/// What one processor did while walking the work-list
#[derive(Debug, Default)]
pub struct FlushPass {
    /// Address spaces this processor flushed and voted for
    pub voted: Vec<AddressSpaceId>,
    /// Requests every online processor has now voted for
    pub completed: Vec<FlushRequest>,
}

#[derive(Debug, Default)]
pub struct FlushWorkList {
    items: Vec<FlushRequest>,
}

impl FlushWorkList {
    pub fn append(&mut self, request: FlushRequest) {
        self.items.push(request);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Unlinks `initiator` from its pending requests
    ///
    /// The items stay on the list and still collect their votes, so the
    /// stale translations are dropped everywhere, but their completion
    /// resumes nobody. Returns the address spaces of the detached items.
    pub fn detach(&mut self, initiator: ObjectId) -> Vec<AddressSpaceId> {
        self.items
            .iter_mut()
            .filter(|item| item.initiator == Some(initiator))
            .map(|item| {
                item.initiator = None;
                item.asid
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Flushes and votes on every item `cpu` has not voted for yet
    ///
    /// Items that now carry a vote from every processor in `online` are
    /// removed and returned in [`FlushPass::completed`].
    pub fn vote(
        &mut self,
        cpu: CpuId,
        online: CpuSet,
        mut flush: impl FnMut(AddressSpaceId),
    ) -> FlushPass {
        let mut pass = FlushPass::default();
        for item in &mut self.items {
            if item.votes.contains(cpu) {
                continue;
            }
            flush(item.asid);
            item.votes.insert(cpu);
            pass.voted.push(item.asid);
        }
        let (done, pending): (Vec<_>, Vec<_>) = self
            .items
            .drain(..)
            .partition(|item| item.votes.is_superset_of(online));
        self.items = pending;
        pass.completed = done;
        pass
    }
}

/// State shared by all processor kernels
#[derive(Debug)]
pub struct SmpShared {
    online: CpuSet,
    doorbell_pending: Vec<AtomicBool>,
    inboxes: Vec<spin::Mutex<VecDeque<ObjectId>>>,
    flush_work: spin::Mutex<FlushWorkList>,
}

impl SmpShared {
    pub fn new(cpu_count: usize) -> Self {
        Self {
            online: CpuSet::first(cpu_count),
            doorbell_pending: (0..cpu_count).map(|_| AtomicBool::new(false)).collect(),
            inboxes: (0..cpu_count)
                .map(|_| spin::Mutex::new(VecDeque::new()))
                .collect(),
            flush_work: spin::Mutex::new(FlushWorkList::default()),
        }
    }

    pub fn online(&self) -> CpuSet {
        self.online
    }

    pub fn cpu_count(&self) -> usize {
        self.doorbell_pending.len()
    }

    /// Marks a doorbell to `target` as pending
    ///
    /// Returns true if the caller must actually send the interrupt, false
    /// if one is already on its way.
    pub fn request_doorbell(&self, target: CpuId) -> bool {
        !self.doorbell_pending[target.0].swap(true, Ordering::AcqRel)
    }

    pub fn doorbell_pending(&self, cpu: CpuId) -> bool {
        self.doorbell_pending[cpu.0].load(Ordering::Acquire)
    }

    /// Clears the pending flag; called by `cpu` before it drains its inbox
    pub fn acknowledge_doorbell(&self, cpu: CpuId) {
        self.doorbell_pending[cpu.0].store(false, Ordering::Release);
    }

    /// Queues `client` for `target`, returning whether to ring the doorbell
    pub fn remote_insert(&self, target: CpuId, client: ObjectId) -> bool {
        self.inboxes[target.0].lock().push_back(client);
        self.request_doorbell(target)
    }

    pub fn take_inbox(&self, cpu: CpuId) -> VecDeque<ObjectId> {
        std::mem::take(&mut *self.inboxes[cpu.0].lock())
    }

    pub fn post_flush(&self, request: FlushRequest) {
        self.flush_work.lock().append(request);
    }

    pub fn detach_flushes(&self, initiator: ObjectId) -> Vec<AddressSpaceId> {
        self.flush_work.lock().detach(initiator)
    }

    pub fn pending_flushes(&self) -> usize {
        self.flush_work.lock().len()
    }

    pub fn vote_flushes(&self, cpu: CpuId, flush: impl FnMut(AddressSpaceId)) -> FlushPass {
        self.flush_work.lock().vote(cpu, self.online, flush)
    }
}

/// Processor-local kernel state
#[derive(Debug)]
pub struct Cpu {
    id: CpuId,
    pub(crate) scheduler: Scheduler,
    /// Ticks programmed into the timer on the last exit
    pub(crate) programmed: u64,
    pub(crate) current: Option<ObjectId>,
}

impl Cpu {
    pub fn new(id: CpuId, scheduler: Scheduler) -> Self {
        Self {
            id,
            scheduler,
            programmed: 0,
            current: None,
        }
    }

    pub fn id(&self) -> CpuId {
        self.id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Thread selected on the last exit to user level
    pub fn current(&self) -> Option<ObjectId> {
        self.current
    }
}
