//! 协调操作符测试套件：多上游状态机与时间/信号边界。

use std::sync::Arc;
use std::time::Duration;

use pulse_contract_tests::{ManualFlow, TestScheduler, TestSingleObserver, TestSubscriber};
use pulse_core::prelude::*;
use pulse_core::source;

/// 场景 2：`concat([1,3,5,7], [2,4,6])`，每项恰好一次。
#[test]
fn concat_preserves_sequence_boundaries() {
    let ts = TestSubscriber::<i32>::unbounded();
    concat_array(vec![from_iter(vec![1, 3, 5, 7]), from_iter(vec![2, 4, 6])])
        .subscribe(ts.clone());
    ts.assert_values(&[1, 3, 5, 7, 2, 4, 6]);
    ts.assert_completed();
}

/// 定律：`concat(a, empty) = a`、`concat(empty, b) = b`。
#[test]
fn concat_with_empty_is_identity() {
    let left = TestSubscriber::<i32>::unbounded();
    concat_array(vec![from_iter(vec![1, 2]), source::empty::<i32>()]).subscribe(left.clone());
    left.assert_values(&[1, 2]);
    left.assert_completed();

    let right = TestSubscriber::<i32>::unbounded();
    concat_array(vec![source::empty::<i32>(), from_iter(vec![3, 4])]).subscribe(right.clone());
    right.assert_values(&[3, 4]);
    right.assert_completed();
}

/// 场景 3：一万个单值内层的顺序拼接，蹦床必须把深递归压平。
#[test]
fn concat_ten_thousand_scalar_inners_is_stack_safe() {
    let observer = TestSingleObserver::<Vec<i64>>::new();
    let nested = map(
        range(0, 10_000),
        total_map_fn(|i: i64| just(i) as FlowRef<i64>),
    );
    to_list(concat(nested)).subscribe(observer.clone());
    let collected = observer.success().expect("必须单次交付完整列表");
    assert_eq!(collected.len(), 10_000);
    assert_eq!(collected.first(), Some(&0));
    assert_eq!(collected.last(), Some(&9_999));
    assert!(collected.windows(2).all(|w| w[0] + 1 == w[1]), "顺序必须连续");
}

/// 场景 4：`concat(src1, src2).take(1)`——src2 永不被订阅。
#[test]
fn concat_take_one_never_subscribes_second_source() {
    let second = ManualFlow::<i32>::new();
    let ts = TestSubscriber::<i32>::unbounded();
    take(
        concat_array(vec![just(1), second.clone() as FlowRef<i32>]),
        1,
    )
    .subscribe(ts.clone());
    ts.assert_values(&[1]);
    ts.assert_completed();
    assert_eq!(second.subscription_count(), 0, "第二个源必须从未被订阅");
}

/// 定律：源不发射且无 fallback → 恰好一个超时错误。
#[test]
fn timeout_without_fallback_errors_after_window() {
    let scheduler = TestScheduler::new();
    let ts = TestSubscriber::<i32>::unbounded();
    timeout(
        source::never::<i32>(),
        Duration::from_millis(100),
        Arc::new(scheduler.clone()) as SchedulerRef,
        None,
    )
    .subscribe(ts.clone());

    scheduler.advance_by(Duration::from_millis(99));
    ts.assert_not_terminated();
    scheduler.advance_by(Duration::from_millis(1));
    ts.assert_error_kind(FlowErrorKind::Timeout);
}

#[test]
fn timeout_items_keep_resetting_the_window() {
    let scheduler = TestScheduler::new();
    let source = ManualFlow::<i32>::new();
    let ts = TestSubscriber::<i32>::unbounded();
    timeout(
        source.clone() as FlowRef<i32>,
        Duration::from_millis(100),
        Arc::new(scheduler.clone()) as SchedulerRef,
        None,
    )
    .subscribe(ts.clone());

    source.emit(1); // 重置窗口到 t+100
    scheduler.advance_by(Duration::from_millis(60));
    source.emit(2); // 再次重置
    scheduler.advance_by(Duration::from_millis(60)); // t = 120 < 160
    ts.assert_values(&[1, 2]);
    ts.assert_not_terminated();
    scheduler.advance_by(Duration::from_millis(50)); // t = 170 ≥ 160
    ts.assert_error_kind(FlowErrorKind::Timeout);
    assert!(source.all_cancelled(), "超时必须取消主源");
}

#[test]
fn timeout_with_fallback_switches_and_preserves_demand() {
    let scheduler = TestScheduler::new();
    let ts = TestSubscriber::<i32>::unbounded();
    timeout(
        source::never::<i32>(),
        Duration::from_millis(100),
        Arc::new(scheduler.clone()) as SchedulerRef,
        Some(from_iter(vec![100, 101])),
    )
    .subscribe(ts.clone());

    scheduler.advance_by(Duration::from_millis(100));
    ts.assert_values(&[100, 101]);
    ts.assert_completed();
}

#[test]
fn timeout_primary_completion_discards_pending_window() {
    let scheduler = TestScheduler::new();
    let source = ManualFlow::<i32>::new();
    let ts = TestSubscriber::<i32>::unbounded();
    timeout(
        source.clone() as FlowRef<i32>,
        Duration::from_millis(100),
        Arc::new(scheduler.clone()) as SchedulerRef,
        Some(just(0)),
    )
    .subscribe(ts.clone());

    source.emit(7);
    source.complete();
    ts.assert_values(&[7]);
    ts.assert_completed();
    scheduler.advance_by(Duration::from_millis(1000));
    assert_eq!(ts.completion_count(), 1, "过期超时不得再次触发终端");
}

/// 场景 6：首超时流先于源发射 → 切到 fallback。
#[test]
fn timeout_selector_first_guard_fires_before_source() {
    let ts = TestSubscriber::<i32>::unbounded();
    let selector: MapFn<i32, FlowRef<i32>> = Arc::new(|_| Ok(source::never::<i32>()));
    timeout_selector(
        source::never::<i32>(),
        Some(just(1)),
        selector,
        Some(from_iter(vec![100])),
    )
    .subscribe(ts.clone());
    ts.assert_values(&[100]);
    ts.assert_completed();
}

#[test]
fn timeout_selector_per_item_guard_is_generation_checked() {
    let guard1 = ManualFlow::<i32>::new();
    let guard2 = ManualFlow::<i32>::new();
    let guards = vec![guard1.clone(), guard2.clone()];
    let selector: MapFn<usize, FlowRef<i32>> =
        Arc::new(move |i: usize| Ok(guards[i].clone() as FlowRef<i32>));
    let source = ManualFlow::<usize>::new();
    let ts = TestSubscriber::<usize>::unbounded();
    timeout_selector::<usize, i32, i32>(source.clone() as FlowRef<usize>, None, selector, None)
        .subscribe(ts.clone());

    source.emit(0); // guard1 守护条目 0
    source.emit(1); // guard1 作废，guard2 上岗
    assert!(guard1.all_cancelled(), "过期守护流必须被取消");
    guard2.emit(1); // guard2 裁定超时
    ts.assert_values(&[0, 1]);
    ts.assert_error_kind(FlowErrorKind::Timeout);
}

#[test]
fn take_until_mirrors_primary_until_other_emits() {
    let primary = ManualFlow::<i32>::new();
    let other = ManualFlow::<()>::new();
    let ts = TestSubscriber::<i32>::unbounded();
    take_until(
        primary.clone() as FlowRef<i32>,
        other.clone() as FlowRef<()>,
    )
    .subscribe(ts.clone());

    primary.emit(1);
    primary.emit(2);
    other.emit(());
    primary.emit(3); // 已终端：不可再见
    ts.assert_values(&[1, 2]);
    ts.assert_completed();
    assert!(primary.all_cancelled());
    assert!(other.all_cancelled());
}

/// "other 先于主流就位即终止"的竞态：结果是一次空完成。
#[test]
fn take_until_other_completing_first_yields_empty_completion() {
    let primary = ManualFlow::<i32>::new();
    let ts = TestSubscriber::<i32>::unbounded();
    take_until(primary.clone() as FlowRef<i32>, source::empty::<()>()).subscribe(ts.clone());
    ts.assert_values(&[]);
    ts.assert_completed();
    assert!(primary.all_cancelled(), "主源句柄必须被终态槽吞并");
}

#[test]
fn debounce_emits_only_items_that_survive_their_guard() {
    let guards: Vec<Arc<ManualFlow<()>>> =
        (0..3).map(|_| ManualFlow::<()>::new()).collect();
    let selector_guards = guards.clone();
    let selector: MapFn<usize, FlowRef<()>> =
        Arc::new(move |i: usize| Ok(selector_guards[i].clone() as FlowRef<()>));
    let source = ManualFlow::<usize>::new();
    let ts = TestSubscriber::<usize>::unbounded();
    debounce(source.clone() as FlowRef<usize>, selector).subscribe(ts.clone());

    source.emit(0);
    source.emit(1); // 条目 0 的守护流作废
    assert!(guards[0].all_cancelled());
    guards[1].emit(()); // 条目 1 活过静默期
    ts.assert_values(&[1]);
    ts.assert_not_terminated();
    source.emit(2);
    source.complete(); // 冲洗未决条目 2
    ts.assert_values(&[1, 2]);
    ts.assert_completed();
}

#[test]
fn debounce_selector_failure_terminates() {
    let source = ManualFlow::<i32>::new();
    let selector: MapFn<i32, FlowRef<()>> =
        Arc::new(|_| Err(FlowError::null_value("debounce selector")));
    let ts = TestSubscriber::<i32>::unbounded();
    debounce(source.clone() as FlowRef<i32>, selector).subscribe(ts.clone());
    source.emit(1);
    ts.assert_error_kind(FlowErrorKind::NullValue);
    assert!(source.all_cancelled());
}

#[test]
fn window_boundary_rotates_windows_on_boundary_signal() {
    let source = ManualFlow::<i32>::new();
    let boundary = ManualFlow::<()>::new();
    let outer = TestSubscriber::<FlowRef<i32>>::unbounded();
    window_boundary(
        source.clone() as FlowRef<i32>,
        boundary.clone() as FlowRef<()>,
    )
    .subscribe(outer.clone());

    assert_eq!(outer.item_count(), 1, "首窗必须随首个需求开启");
    let first_window = outer.items()[0].clone();
    let w1 = TestSubscriber::<i32>::unbounded();
    first_window.subscribe(w1.clone());

    source.emit(1);
    source.emit(2);
    boundary.emit(()); // 关闭首窗，开启第二窗
    w1.assert_values(&[1, 2]);
    w1.assert_completed();
    assert_eq!(outer.item_count(), 2);

    let second_window = outer.items()[1].clone();
    let w2 = TestSubscriber::<i32>::unbounded();
    second_window.subscribe(w2.clone());
    source.emit(3);
    source.complete();
    w2.assert_values(&[3]);
    w2.assert_completed();
    outer.assert_completed();
}

#[test]
fn window_boundary_exhausted_boundary_completes_everything() {
    let source = ManualFlow::<i32>::new();
    let outer = TestSubscriber::<FlowRef<i32>>::unbounded();
    window_boundary(source.clone() as FlowRef<i32>, source::empty::<()>())
        .subscribe(outer.clone());
    outer.assert_completed();
    assert!(source.all_cancelled(), "边界耗尽必须撤销上游");
}
