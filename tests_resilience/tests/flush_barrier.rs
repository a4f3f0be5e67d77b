//! Translation Flush Barrier Integration Tests
//!
//! A domain update must not return before every online processor dropped
//! the stale translations of its address space.

use core_types::{CpuId, ObjectRef};
use kernel_api::userland::{self, Completion};
use kernel_api::KernelApi;
use kernel_core::audit::KernelEvent;
use kernel_core::thread::ThreadState;
use tests_resilience::{spawn_actor, spawn_in, test_bootstrap, thread_cap};

const CPU0: CpuId = CpuId(0);
const CPU1: CpuId = CpuId(1);
const CPU2: CpuId = CpuId(2);

#[test]
fn test_every_processor_flushes_exactly_once() {
    for cpus in 1..=8 {
        let mut board = test_bootstrap(cpus);
        let actor = spawn_actor(&mut board, "pager", CPU0).unwrap();
        let pd_cap = board.grant(actor.pd, ObjectRef::pd(actor.pd)).unwrap();
        let asid = board.kernel.pd(actor.pd).unwrap().asid();

        let outcome = userland::update_pd(&mut board.kernel, CPU0, pd_cap).unwrap();
        if cpus == 1 {
            assert_eq!(outcome, Completion::Ready(()));
        } else {
            assert_eq!(outcome, Completion::Blocked);
        }
        board.settle().unwrap();

        for cpu in board.cpus() {
            assert_eq!(board.mmu.flush_count(cpu, asid), 1, "{} of {}", cpu, cpus);
        }
        assert_eq!(board.kernel.current_thread(CPU0), Some(actor.thread));
        assert_eq!(board.kernel.smp().pending_flushes(), 0);

        let log = board.kernel.audit_log();
        assert_eq!(
            log.count_events(|e| matches!(e, KernelEvent::FlushVoted { .. })),
            cpus
        );
        assert_eq!(
            log.count_events(|e| matches!(e, KernelEvent::FlushCompleted { .. })),
            1
        );
    }
}

#[test]
fn test_initiator_waits_for_last_vote() {
    let mut board = test_bootstrap(3);
    let actor = spawn_actor(&mut board, "pager", CPU0).unwrap();
    let pd_cap = board.grant(actor.pd, ObjectRef::pd(actor.pd)).unwrap();
    let asid = board.kernel.pd(actor.pd).unwrap().asid();

    userland::update_pd(&mut board.kernel, CPU0, pd_cap).unwrap();
    assert_eq!(board.pic.pending(CPU1).len(), 1);
    assert_eq!(board.pic.pending(CPU2).len(), 1);

    board.kernel.interrupt(CPU1).unwrap();
    assert_eq!(board.mmu.flush_count(CPU1, asid), 1);
    assert_eq!(
        board.kernel.thread(actor.thread).unwrap().state(),
        ThreadState::AwaitsFlush
    );
    assert_eq!(board.kernel.thread(actor.thread).unwrap().pending_flush(), Some(asid));

    board.kernel.interrupt(CPU2).unwrap();
    assert_eq!(
        board.kernel.thread(actor.thread).unwrap().state(),
        ThreadState::Active
    );
    // handed back to its own processor through the doorbell
    assert_eq!(board.kernel.current_thread(CPU0), None);
    board.settle().unwrap();
    assert_eq!(board.kernel.current_thread(CPU0), Some(actor.thread));
    assert_eq!(board.kernel.thread(actor.thread).unwrap().pending_flush(), None);
}

#[test]
fn test_silent_processor_holds_the_barrier() {
    let mut board = test_bootstrap(2);
    let actor = spawn_actor(&mut board, "pager", CPU0).unwrap();
    let pd_cap = board.grant(actor.pd, ObjectRef::pd(actor.pd)).unwrap();

    userland::update_pd(&mut board.kernel, CPU0, pd_cap).unwrap();
    assert_eq!(board.drop_pending(CPU1), 1);
    board.kernel.interrupt(CPU0).unwrap();
    assert_eq!(
        board.kernel.thread(actor.thread).unwrap().state(),
        ThreadState::AwaitsFlush
    );

    // any later entry of the silent processor casts its vote
    board.tick(CPU1, 1).unwrap();
    assert_eq!(board.kernel.current_thread(CPU0), Some(actor.thread));
}

#[test]
fn test_concurrent_flushes_complete_independently() {
    let mut board = test_bootstrap(3);
    let first = spawn_actor(&mut board, "first", CPU0).unwrap();
    let second = spawn_actor(&mut board, "second", CPU1).unwrap();
    let first_cap = board.grant(first.pd, ObjectRef::pd(first.pd)).unwrap();
    let second_cap = board.grant(second.pd, ObjectRef::pd(second.pd)).unwrap();
    let first_asid = board.kernel.pd(first.pd).unwrap().asid();
    let second_asid = board.kernel.pd(second.pd).unwrap().asid();

    userland::update_pd(&mut board.kernel, CPU0, first_cap).unwrap();
    userland::update_pd(&mut board.kernel, CPU1, second_cap).unwrap();
    board.settle().unwrap();

    for cpu in board.cpus() {
        assert_eq!(board.mmu.flush_count(cpu, first_asid), 1);
        assert_eq!(board.mmu.flush_count(cpu, second_asid), 1);
    }
    assert_eq!(board.kernel.current_thread(CPU0), Some(first.thread));
    assert_eq!(board.kernel.current_thread(CPU1), Some(second.thread));
}

#[test]
fn test_flush_wait_cannot_be_cancelled() {
    let mut board = test_bootstrap(3);
    let actor = spawn_actor(&mut board, "pager", CPU0).unwrap();
    let helper = spawn_in(&mut board, actor.pd, "helper", CPU1).unwrap();
    let pd_cap = board.grant(actor.pd, ObjectRef::pd(actor.pd)).unwrap();
    let actor_cap = thread_cap(&mut board, &helper, &actor).unwrap();

    userland::update_pd(&mut board.kernel, CPU0, pd_cap).unwrap();
    assert!(!userland::resume(&mut board.kernel, CPU1, actor_cap).unwrap());
    assert_eq!(
        board.kernel.thread(actor.thread).unwrap().state(),
        ThreadState::AwaitsFlush
    );

    board.settle().unwrap();
    assert_eq!(board.kernel.current_thread(CPU0), Some(actor.thread));
    assert_eq!(board.kernel.return_value(actor.thread), Ok(0));
}

#[test]
fn test_destroyed_initiator_does_not_release_its_successor() {
    let mut board = test_bootstrap(3);
    let first = spawn_actor(&mut board, "pager", CPU0).unwrap();
    let pd_cap = board.grant(first.pd, ObjectRef::pd(first.pd)).unwrap();
    let asid = board.kernel.pd(first.pd).unwrap().asid();

    userland::update_pd(&mut board.kernel, CPU0, pd_cap).unwrap();
    assert_eq!(board.drop_pending(CPU2), 1);
    board.kernel.interrupt(CPU1).unwrap();
    board.kernel.destroy_thread(first.thread).unwrap();

    // the successor inherits the freed id while the old request still lacks CPU2
    let successor = board.kernel.create_thread(first.pd, CPU0, "successor").unwrap();
    assert_eq!(successor, first.thread);
    board.kernel.start_thread(successor).unwrap();
    board.kernel.interrupt(CPU0).unwrap();
    assert_eq!(board.kernel.current_thread(CPU0), Some(successor));
    assert_eq!(
        userland::update_pd(&mut board.kernel, CPU0, pd_cap).unwrap(),
        Completion::Blocked
    );

    // completes the old request only; CPU1 has not voted on the new one
    board.kernel.interrupt(CPU2).unwrap();
    assert_eq!(board.mmu.flush_count(CPU1, asid), 1);
    assert_eq!(
        board.kernel.thread(successor).unwrap().state(),
        ThreadState::AwaitsFlush
    );
    assert_eq!(board.kernel.smp().pending_flushes(), 1);
    assert!(board.kernel.audit_log().has_event(|e| matches!(
        e,
        KernelEvent::FlushCompleted { initiator: None, asid: a } if *a == asid
    )));

    board.settle().unwrap();
    assert_eq!(board.mmu.flush_count(CPU1, asid), 2);
    assert_eq!(board.kernel.current_thread(CPU0), Some(successor));
    assert_eq!(board.kernel.smp().pending_flushes(), 0);
}
