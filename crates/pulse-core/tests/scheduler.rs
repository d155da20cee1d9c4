//! 调度器测试套件：线程定时器的真实节拍 + 虚拟时间的确定性节律。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pulse_contract_tests::TestScheduler;
use pulse_contract_tests::support::{init_test_tracing, spin_until};
use pulse_core::prelude::*;

#[test]
fn thread_scheduler_executes_direct_task() {
    init_test_tracing();
    let scheduler: SchedulerRef = Arc::new(ThreadScheduler::new());
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    schedule_direct(
        &scheduler,
        Duration::from_millis(10),
        Box::new(move || flag.store(true, Ordering::Release)),
    );
    assert!(
        spin_until(Duration::from_secs(5), || fired.load(Ordering::Acquire)),
        "直达任务必须在容忍窗口内执行"
    );
}

#[test]
fn thread_worker_runs_tasks_in_due_order() {
    init_test_tracing();
    let scheduler = ThreadScheduler::new();
    let worker = scheduler.create_worker();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let slow = Arc::clone(&order);
    worker.schedule(
        Duration::from_millis(80),
        Box::new(move || slow.lock().push("slow")),
    );
    let fast = Arc::clone(&order);
    worker.schedule(
        Duration::from_millis(10),
        Box::new(move || fast.lock().push("fast")),
    );

    assert!(
        spin_until(Duration::from_secs(5), || order.lock().len() == 2),
        "两个任务都必须执行"
    );
    assert_eq!(*order.lock(), vec!["fast", "slow"], "执行顺序按到期时间");
    worker.dispose();
}

#[test]
fn thread_worker_cancellation_prevents_execution() {
    let scheduler = ThreadScheduler::new();
    let worker = scheduler.create_worker();
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let handle = worker.schedule(
        Duration::from_millis(100),
        Box::new(move || flag.store(true, Ordering::Release)),
    );
    handle.cancel();
    std::thread::sleep(Duration::from_millis(250));
    assert!(!fired.load(Ordering::Acquire), "已取消的任务不得执行");
    worker.dispose();
}

#[test]
fn thread_worker_dispose_drops_pending_tasks() {
    let scheduler = ThreadScheduler::new();
    let worker = scheduler.create_worker();
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    worker.schedule(
        Duration::from_millis(100),
        Box::new(move || flag.store(true, Ordering::Release)),
    );
    worker.dispose();
    assert!(worker.is_disposed());
    std::thread::sleep(Duration::from_millis(250));
    assert!(!fired.load(Ordering::Acquire), "dispose 必须清空未决任务");

    let late = worker.schedule(Duration::from_millis(1), Box::new(|| {}));
    assert!(late.is_cancelled(), "时间线释放后的调度必须立即作废");
}

#[test]
fn virtual_periodic_fires_on_exact_cadence() {
    let scheduler = TestScheduler::new();
    let worker = scheduler.create_worker();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);
    let handle = schedule_periodic(
        &worker,
        Duration::from_millis(500),
        Duration::from_millis(500),
        Arc::new(move || {
            counter.fetch_add(1, Ordering::AcqRel);
        }),
    );

    scheduler.advance_by(Duration::from_millis(499));
    assert_eq!(ticks.load(Ordering::Acquire), 0);
    scheduler.advance_by(Duration::from_millis(1));
    assert_eq!(ticks.load(Ordering::Acquire), 1, "首轮在 initial 之后触发");
    scheduler.advance_by(Duration::from_millis(1500));
    assert_eq!(ticks.load(Ordering::Acquire), 4, "节律必须是 500ms 一轮");

    handle.cancel();
    scheduler.advance_by(Duration::from_millis(2000));
    assert_eq!(ticks.load(Ordering::Acquire), 4, "取消后不得再触发");
}

#[test]
fn virtual_periodic_catches_up_across_large_advances() {
    let scheduler = TestScheduler::new();
    let worker = scheduler.create_worker();
    let stamps: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&stamps);
    let probe = scheduler.clone();
    let _handle = schedule_periodic(
        &worker,
        Duration::from_millis(100),
        Duration::from_millis(100),
        Arc::new(move || recorder.lock().push(probe.virtual_now())),
    );

    scheduler.advance_by(Duration::from_millis(350));
    assert_eq!(
        *stamps.lock(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(300)
        ],
        "一次大步推进内的各轮必须落在各自的目标时刻"
    );
}

#[test]
fn periodically_direct_cancel_disposes_transient_worker() {
    let scheduler = TestScheduler::new();
    let scheduler_ref: SchedulerRef = Arc::new(scheduler.clone());
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);
    let handle = schedule_periodically_direct(
        &scheduler_ref,
        Duration::from_millis(10),
        Duration::from_millis(10),
        Arc::new(move || {
            counter.fetch_add(1, Ordering::AcqRel);
        }),
    );
    scheduler.advance_by(Duration::from_millis(30));
    assert_eq!(ticks.load(Ordering::Acquire), 3);
    handle.cancel();
    scheduler.advance_by(Duration::from_millis(100));
    assert_eq!(ticks.load(Ordering::Acquire), 3, "取消即静默");
}

#[test]
fn default_scheduler_registry_is_injectable_and_resettable() {
    let injected = TestScheduler::new();
    set_default_scheduler(Arc::new(injected.clone()));
    let seen = default_scheduler().now();
    assert_eq!(seen, Duration::ZERO, "注入的虚拟调度器必须生效");
    injected.advance_by(Duration::from_millis(5));
    assert_eq!(default_scheduler().now(), Duration::from_millis(5));
    reset_default_scheduler();
}
