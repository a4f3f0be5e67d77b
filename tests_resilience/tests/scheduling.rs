//! Scheduling Integration Tests
//!
//! Round-robin quanta, yields, pause/resume and the cross-processor
//! hand-over of runnable threads through inboxes and doorbells.

use core_types::{CpuId, ObjectKind, ObjectRef};
use kernel_api::userland::{self, Completion};
use kernel_api::{KernelApi, KernelError};
use kernel_core::audit::KernelEvent;
use kernel_core::config::KernelConfig;
use kernel_core::scheduler::{RotationReason, ScheduleEvent};
use kernel_core::test_utils::SimBoard;
use kernel_core::thread::ThreadState;
use tests_resilience::{spawn_actor, spawn_in, test_bootstrap, thread_cap};

const CPU0: CpuId = CpuId(0);
const CPU1: CpuId = CpuId(1);

#[test]
fn test_pending_doorbell_suppresses_another() {
    let mut board = test_bootstrap(2);
    let pd = board.kernel.create_pd("workers").unwrap();
    let a = board.kernel.create_thread(pd, CPU1, "a").unwrap();
    let b = board.kernel.create_thread(pd, CPU1, "b").unwrap();

    board.kernel.start_thread(a).unwrap();
    board.kernel.start_thread(b).unwrap();
    assert_eq!(board.pic.doorbells_sent(CPU1), 1);
    assert!(board
        .kernel
        .audit_log()
        .has_event(|e| matches!(e, KernelEvent::DoorbellSuppressed { to } if *to == CPU1)));

    // one doorbell carries both hand-overs
    board.settle().unwrap();
    let scheduler = board.kernel.cpu(CPU1).unwrap().scheduler();
    assert_eq!(scheduler.len(), 2);
    assert_eq!(board.kernel.current_thread(CPU1), Some(a));
    assert!(!board.kernel.smp().doorbell_pending(CPU1));
}

#[test]
fn test_round_robin_over_quanta() {
    let mut board = test_bootstrap(1);
    let pd = board.kernel.create_pd("workers").unwrap();
    let a = board.spawn(pd, CPU0, "a").unwrap();
    let b = board.spawn(pd, CPU0, "b").unwrap();
    let c = board.spawn(pd, CPU0, "c").unwrap();
    let quantum = board.kernel.config().quantum_ticks;

    let mut order = vec![board.kernel.current_thread(CPU0)];
    for _ in 0..3 {
        board.tick(CPU0, quantum).unwrap();
        order.push(board.kernel.current_thread(CPU0));
    }
    assert_eq!(order, vec![Some(a), Some(b), Some(c), Some(a)]);

    let rotations = board
        .kernel
        .cpu(CPU0)
        .unwrap()
        .scheduler()
        .audit_log()
        .iter()
        .filter(|e| {
            matches!(
                e,
                ScheduleEvent::ClientRotated {
                    reason: RotationReason::QuantumExpired,
                    ..
                }
            )
        })
        .count();
    assert_eq!(rotations, 3);
}

#[test]
fn test_consumed_time_is_charged_on_entry() {
    let mut board = test_bootstrap(1);
    let actor = spawn_actor(&mut board, "worker", CPU0).unwrap();

    board.tick(CPU0, 4).unwrap();
    let scheduler = board.kernel.cpu(CPU0).unwrap().scheduler();
    assert_eq!(scheduler.remaining_quota(), 6);
    assert_eq!(scheduler.time(), 4);
    assert_eq!(board.kernel.current_thread(CPU0), Some(actor.thread));

    board.tick(CPU0, 6).unwrap();
    assert_eq!(
        board.kernel.cpu(CPU0).unwrap().scheduler().remaining_quota(),
        10
    );
}

#[test]
fn test_yield_passes_the_processor() {
    let mut board = test_bootstrap(1);
    let a = spawn_actor(&mut board, "a", CPU0).unwrap();
    let b = spawn_in(&mut board, a.pd, "b", CPU0).unwrap();

    userland::yield_thread(&mut board.kernel, CPU0, None).unwrap();
    assert_eq!(board.kernel.current_thread(CPU0), Some(b.thread));
    assert!(board
        .kernel
        .cpu(CPU0)
        .unwrap()
        .scheduler()
        .audit_log()
        .contains(&ScheduleEvent::ClientRotated {
            client: a.thread,
            reason: RotationReason::Yielded,
            time: 0,
        }));
}

#[test]
fn test_yield_donation_wakes_paused_thread() {
    let mut board = test_bootstrap(2);
    let a = spawn_actor(&mut board, "a", CPU0).unwrap();
    let b = spawn_in(&mut board, a.pd, "b", CPU1).unwrap();
    let b_cap = thread_cap(&mut board, &a, &b).unwrap();

    assert_eq!(
        userland::pause(&mut board.kernel, CPU1).unwrap(),
        Completion::Blocked
    );
    userland::yield_thread(&mut board.kernel, CPU0, Some(b_cap)).unwrap();
    board.settle().unwrap();

    assert_eq!(board.kernel.current_thread(CPU1), Some(b.thread));
    assert_eq!(board.kernel.return_value(b.thread), Ok(0));
    // alone on its processor, the yielder runs on
    assert_eq!(board.kernel.current_thread(CPU0), Some(a.thread));
}

#[test]
fn test_pause_and_resume() {
    let mut board = test_bootstrap(2);
    let a = spawn_actor(&mut board, "a", CPU0).unwrap();
    let b = spawn_in(&mut board, a.pd, "b", CPU1).unwrap();
    let b_cap = thread_cap(&mut board, &a, &b).unwrap();

    userland::pause(&mut board.kernel, CPU1).unwrap();
    assert_eq!(
        board.kernel.thread(b.thread).unwrap().state(),
        ThreadState::AwaitsResume
    );
    assert!(userland::resume(&mut board.kernel, CPU0, b_cap).unwrap());
    board.settle().unwrap();
    assert_eq!(board.kernel.current_thread(CPU1), Some(b.thread));

    // nothing to cancel any more
    assert!(!userland::resume(&mut board.kernel, CPU0, b_cap).unwrap());
}

#[test]
fn test_resume_across_domains_is_rejected() {
    let mut board = test_bootstrap(2);
    let a = spawn_actor(&mut board, "a", CPU0).unwrap();
    let stranger = spawn_actor(&mut board, "stranger", CPU1).unwrap();
    let cap = thread_cap(&mut board, &a, &stranger).unwrap();

    userland::pause(&mut board.kernel, CPU1).unwrap();
    assert_eq!(
        userland::resume(&mut board.kernel, CPU0, cap),
        Err(KernelError::CallFailed)
    );
    assert_eq!(
        board.kernel.thread(stranger.thread).unwrap().state(),
        ThreadState::AwaitsResume
    );
}

#[test]
fn test_thread_starts_only_once() {
    let mut board = test_bootstrap(1);
    let actor = spawn_actor(&mut board, "a", CPU0).unwrap();
    assert_eq!(
        board.kernel.start_thread(actor.thread),
        Err(KernelError::InvalidThreadState(actor.thread))
    );
}

#[test]
fn test_destroying_running_thread_frees_the_processor() {
    let mut board = test_bootstrap(1);
    let a = spawn_actor(&mut board, "a", CPU0).unwrap();
    let b = spawn_in(&mut board, a.pd, "b", CPU0).unwrap();

    board.kernel.destroy_thread(a.thread).unwrap();
    assert_eq!(board.kernel.current_thread(CPU0), None);
    board.settle().unwrap();
    assert_eq!(board.kernel.current_thread(CPU0), Some(b.thread));

    assert_eq!(
        board.kernel.destroy_pd(a.pd),
        Err(KernelError::ObjectInUse(ObjectRef::pd(a.pd)))
    );
    board.kernel.destroy_thread(b.thread).unwrap();
    board.kernel.destroy_pd(a.pd).unwrap();
    assert_eq!(board.kernel.thread_count(), 0);
}

#[test]
fn test_object_limits_are_reported() {
    let config = KernelConfig {
        cpu_count: 1,
        max_threads: 2,
        ..KernelConfig::default()
    };
    let mut board = SimBoard::with_config(config).unwrap();
    let pd = board.kernel.create_pd("crowded").unwrap();
    board.kernel.create_thread(pd, CPU0, "one").unwrap();
    board.kernel.create_thread(pd, CPU0, "two").unwrap();

    assert_eq!(
        board.kernel.create_thread(pd, CPU0, "three"),
        Err(KernelError::ResourceExhausted(ObjectKind::Thread))
    );
    assert_eq!(
        board.kernel.create_thread(pd, CpuId(3), "elsewhere"),
        Err(KernelError::InvalidCpu(CpuId(3)))
    );
}

#[test]
fn test_audit_trail_serializes() {
    let mut board = test_bootstrap(2);
    spawn_actor(&mut board, "a", CPU1).unwrap();

    let json = board.kernel.audit_log().to_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    let records = parsed.as_array().unwrap();
    assert_eq!(records.len(), board.kernel.audit_log().len());
    assert!(records.iter().any(|r| r["event"].get("DoorbellSent").is_some()));
}
