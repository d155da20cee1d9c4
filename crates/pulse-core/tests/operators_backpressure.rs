//! 背压操作符测试套件：需求算术、队列积压与多源协调。
//!
//! 时间相关场景一律用 `TestScheduler` 虚拟时间驱动，发射时序用
//! `ManualFlow` 显式编排，保证 CI 可复现。

use std::sync::Arc;
use std::time::Duration;

use pulse_contract_tests::{ManualFlow, TestScheduler, TestSubscriber};
use pulse_core::prelude::*;

/// 定律：`scan(seed, accum)` 先发射种子。
#[test]
fn scan_seed_emits_seed_first_then_folds() {
    let ts = TestSubscriber::<i64>::unbounded();
    scan_seed(
        from_iter(vec![1i64, 2, 3]),
        0i64,
        Arc::new(|acc: i64, item: i64| Ok(acc + item)),
    )
    .subscribe(ts.clone());
    ts.assert_values(&[0, 1, 3, 6]);
    ts.assert_completed();
}

#[test]
fn scan_seed_charges_seed_against_first_request() {
    let ts = TestSubscriber::<i64>::with_demand(1);
    scan_seed(
        from_iter(vec![10i64, 20]),
        0i64,
        Arc::new(|acc: i64, item: i64| Ok(acc + item)),
    )
    .subscribe(ts.clone());
    // 首个信用被种子消费，尚不触达上游。
    ts.assert_values(&[0]);
    ts.assert_not_terminated();
    ts.request(1);
    ts.assert_values(&[0, 10]);
    ts.request(1);
    ts.assert_values(&[0, 10, 30]);
    ts.assert_completed();
}

#[test]
fn scan_seed_accumulator_failure_terminates_once() {
    let ts = TestSubscriber::<i64>::unbounded();
    scan_seed(
        from_iter(vec![1i64, 2]),
        0i64,
        Arc::new(|_acc: i64, _item: i64| {
            Err(FlowError::null_value("accumulator"))
        }),
    )
    .subscribe(ts.clone());
    ts.assert_values(&[0]);
    ts.assert_error_kind(FlowErrorKind::NullValue);
}

/// 场景 5：`sample_timed(500ms)`，a@100 b@300 c@700，采样点 500 与 1000。
#[test]
fn sample_timed_emits_latest_at_each_tick() {
    let scheduler = TestScheduler::new();
    let scheduler_ref: SchedulerRef = Arc::new(scheduler.clone());
    let source = ManualFlow::<&'static str>::new();
    let ts = TestSubscriber::<&'static str>::unbounded();
    sample_timed(
        source.clone() as FlowRef<&'static str>,
        Duration::from_millis(500),
        scheduler_ref,
    )
    .subscribe(ts.clone());

    scheduler.advance_by(Duration::from_millis(100));
    source.emit("a");
    scheduler.advance_by(Duration::from_millis(200)); // t = 300
    source.emit("b");
    scheduler.advance_by(Duration::from_millis(200)); // t = 500，采样 b
    ts.assert_values(&["b"]);
    scheduler.advance_by(Duration::from_millis(200)); // t = 700
    source.emit("c");
    scheduler.advance_by(Duration::from_millis(300)); // t = 1000，采样 c
    ts.assert_values(&["b", "c"]);
    ts.assert_not_terminated();
}

#[test]
fn sample_timed_zero_demand_is_a_backpressure_violation() {
    let scheduler = TestScheduler::new();
    let scheduler_ref: SchedulerRef = Arc::new(scheduler.clone());
    let source = ManualFlow::<i32>::new();
    let ts = TestSubscriber::<i32>::with_demand(0);
    sample_timed(
        source.clone() as FlowRef<i32>,
        Duration::from_millis(100),
        scheduler_ref,
    )
    .subscribe(ts.clone());

    source.emit(1);
    scheduler.advance_by(Duration::from_millis(100));
    ts.assert_error_kind(FlowErrorKind::MissingDemand);
    assert!(source.all_cancelled(), "背压违例必须连带取消上游");
}

#[test]
fn sample_timed_completion_tears_down_timer() {
    let scheduler = TestScheduler::new();
    let scheduler_ref: SchedulerRef = Arc::new(scheduler.clone());
    let source = ManualFlow::<i32>::new();
    let ts = TestSubscriber::<i32>::unbounded();
    sample_timed(
        source.clone() as FlowRef<i32>,
        Duration::from_millis(100),
        scheduler_ref,
    )
    .subscribe(ts.clone());

    source.complete();
    ts.assert_completed();
    scheduler.advance_by(Duration::from_millis(1000));
    assert_eq!(ts.item_count(), 0, "终端之后定时器不得再发射");
}

#[test]
fn with_latest_from_drops_until_secondary_arrives() {
    let primary = ManualFlow::<i64>::new();
    let secondary = ManualFlow::<i64>::new();
    let ts = TestSubscriber::<i64>::unbounded();
    with_latest_from(
        primary.clone() as FlowRef<i64>,
        secondary.clone() as FlowRef<i64>,
        Arc::new(|a: i64, b: i64| Ok(a + b)),
    )
    .subscribe(ts.clone());

    primary.emit(1); // 格为空：丢弃
    secondary.emit(10);
    primary.emit(2);
    secondary.complete(); // 副流完成不终止
    primary.emit(3);
    ts.assert_values(&[12, 13]);
    ts.assert_not_terminated();
    primary.complete();
    ts.assert_completed();
}

#[test]
fn with_latest_from_secondary_error_terminates_and_cancels_primary() {
    let primary = ManualFlow::<i64>::new();
    let secondary = ManualFlow::<i64>::new();
    let ts = TestSubscriber::<i64>::unbounded();
    with_latest_from(
        primary.clone() as FlowRef<i64>,
        secondary.clone() as FlowRef<i64>,
        Arc::new(|a: i64, b: i64| Ok(a + b)),
    )
    .subscribe(ts.clone());

    secondary.fail(FlowError::user_function("secondary down"));
    ts.assert_error_kind(FlowErrorKind::UserFunction);
    assert!(primary.all_cancelled(), "副流失败必须取消主流");
}

fn sum_rows() -> RowFn<i64, i64> {
    Arc::new(|row: &[i64]| Ok(row.iter().sum()))
}

/// 场景 7：src1: 1, src2: 10, src1: 2, src2 完成, src1: 3 → 11, 12, 13。
#[test]
fn combine_latest_matches_interleaving_scenario() {
    let s1 = ManualFlow::<i64>::new();
    let s2 = ManualFlow::<i64>::new();
    let ts = TestSubscriber::<i64>::unbounded();
    combine_latest(
        vec![s1.clone() as FlowRef<i64>, s2.clone() as FlowRef<i64>],
        sum_rows(),
        false,
    )
    .subscribe(ts.clone());

    s1.emit(1);
    s2.emit(10);
    s1.emit(2);
    s2.complete();
    s1.emit(3);
    ts.assert_values(&[11, 12, 13]);
    ts.assert_not_terminated();
    s1.complete();
    ts.assert_completed();
}

/// 定律：任一源不发一值即完成 → 结果流终止。
#[test]
fn combine_latest_empty_source_terminates_result() {
    let s1 = ManualFlow::<i64>::new();
    let s2 = ManualFlow::<i64>::new();
    let ts = TestSubscriber::<i64>::unbounded();
    combine_latest(
        vec![s1.clone() as FlowRef<i64>, s2.clone() as FlowRef<i64>],
        sum_rows(),
        false,
    )
    .subscribe(ts.clone());

    s1.emit(1);
    s2.complete();
    ts.assert_values(&[]);
    ts.assert_completed();
    assert!(s1.all_cancelled(), "终局后其余源必须被取消");
}

#[test]
fn combine_latest_delay_error_flushes_rows_before_aggregated_error() {
    let s1 = ManualFlow::<i64>::new();
    let s2 = ManualFlow::<i64>::new();
    let ts = TestSubscriber::<i64>::unbounded();
    combine_latest(
        vec![s1.clone() as FlowRef<i64>, s2.clone() as FlowRef<i64>],
        sum_rows(),
        true,
    )
    .subscribe(ts.clone());

    s1.emit(1);
    s2.emit(10);
    s1.fail(FlowError::user_function("s1 down"));
    // 延迟错误：s2 仍可用 s1 的最终值继续组合。
    s2.emit(20);
    ts.assert_values(&[11, 21]);
    ts.assert_not_terminated();
    s2.complete();
    ts.assert_error_kind(FlowErrorKind::UserFunction);
}

#[test]
fn combine_latest_immediate_error_short_circuits() {
    let s1 = ManualFlow::<i64>::new();
    let s2 = ManualFlow::<i64>::new();
    let ts = TestSubscriber::<i64>::unbounded();
    combine_latest(
        vec![s1.clone() as FlowRef<i64>, s2.clone() as FlowRef<i64>],
        sum_rows(),
        false,
    )
    .subscribe(ts.clone());

    s1.emit(1);
    s1.fail(FlowError::user_function("s1 down"));
    ts.assert_error_kind(FlowErrorKind::UserFunction);
    assert!(s2.all_cancelled());
}

/// 场景 9：上游急促发射 1、2，下游只能看到第二个内层的条目。
#[test]
fn switch_map_drops_stale_inner_and_cancels_it() {
    let inner1 = ManualFlow::<i32>::new();
    let inner2 = ManualFlow::<i32>::new();
    let inners = vec![inner1.clone(), inner2.clone()];
    let mapper: MapFn<usize, FlowRef<i32>> =
        Arc::new(move |i: usize| Ok(inners[i].clone() as FlowRef<i32>));
    let source = ManualFlow::<usize>::new();
    let ts = TestSubscriber::<i32>::unbounded();
    switch_map(source.clone() as FlowRef<usize>, mapper).subscribe(ts.clone());

    source.emit(0);
    inner1.emit(7);
    ts.assert_values(&[7]);
    source.emit(1); // 换轨：inner1 必须被取消
    assert!(inner1.all_cancelled(), "被替换的内层必须收到取消");
    inner1.emit(8); // 过期条目
    inner2.emit(9);
    ts.assert_values(&[7, 9]);
    source.complete();
    inner2.complete();
    ts.assert_completed();
}

#[test]
fn switch_map_mapper_failure_terminates() {
    let source = ManualFlow::<i32>::new();
    let mapper: MapFn<i32, FlowRef<i32>> =
        Arc::new(|_| Err(FlowError::null_value("switch mapper")));
    let ts = TestSubscriber::<i32>::unbounded();
    switch_map(source.clone() as FlowRef<i32>, mapper).subscribe(ts.clone());
    source.emit(1);
    ts.assert_error_kind(FlowErrorKind::NullValue);
    assert!(source.all_cancelled());
}

#[test]
fn concat_map_runs_inners_strictly_in_sequence() {
    let ts = TestSubscriber::<i32>::unbounded();
    let mapper: MapFn<i32, FlowRef<i32>> =
        Arc::new(|i: i32| Ok(from_iter(vec![i * 10, i * 10 + 1])));
    concat_map(from_iter(vec![1, 2, 3]), mapper, DEFAULT_PREFETCH).subscribe(ts.clone());
    ts.assert_values(&[10, 11, 20, 21, 30, 31]);
    ts.assert_completed();
}

#[test]
fn concat_map_respects_downstream_demand_across_inners() {
    let ts = TestSubscriber::<i32>::with_demand(3);
    let mapper: MapFn<i32, FlowRef<i32>> =
        Arc::new(|i: i32| Ok(from_iter(vec![i, i + 100])));
    concat_map(from_iter(vec![1, 2]), mapper, 2).subscribe(ts.clone());
    ts.assert_values(&[1, 101, 2]);
    ts.assert_not_terminated();
    ts.request(1);
    ts.assert_values(&[1, 101, 2, 102]);
    ts.assert_completed();
}
