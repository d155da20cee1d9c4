//! 无状态操作符测试套件：平凡状态机与逐操作符定律。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pulse_contract_tests::{TestSingleObserver, TestSubscriber};
use pulse_core::prelude::*;
use pulse_core::source;

#[test]
fn from_iter_emits_in_order_then_completes() {
    let ts = TestSubscriber::<i32>::unbounded();
    from_iter(vec![1, 2, 3]).subscribe(ts.clone());
    ts.assert_values(&[1, 2, 3]);
    ts.assert_completed();
}

#[test]
fn from_iter_respects_demand() {
    let ts = TestSubscriber::<i32>::with_demand(2);
    from_iter(vec![1, 2, 3, 4]).subscribe(ts.clone());
    ts.assert_values(&[1, 2]);
    ts.assert_not_terminated();
    ts.request(2);
    ts.assert_values(&[1, 2, 3, 4]);
    ts.assert_completed();
}

/// 定律：`map(id)` 与恒等组合。
#[test]
fn map_identity_is_identity() {
    let ts = TestSubscriber::<i32>::unbounded();
    map(from_iter(vec![5, 6, 7]), total_map_fn(|x: i32| x)).subscribe(ts.clone());
    ts.assert_values(&[5, 6, 7]);
    ts.assert_completed();
}

#[test]
fn map_failure_cancels_and_errors_once() {
    let ts = TestSubscriber::<i32>::unbounded();
    let mapper: MapFn<i32, i32> = Arc::new(|x| {
        if x == 2 {
            Err(FlowError::user_function("mapper rejected 2"))
        } else {
            Ok(x * 10)
        }
    });
    map(from_iter(vec![1, 2, 3]), mapper).subscribe(ts.clone());
    ts.assert_values(&[10]);
    ts.assert_error_kind(FlowErrorKind::UserFunction);
}

/// 定律：`filter(true)` 与恒等组合。
#[test]
fn filter_always_true_is_identity() {
    let ts = TestSubscriber::<i32>::unbounded();
    filter(from_iter(vec![1, 2, 3]), total_predicate(|_: &i32| true)).subscribe(ts.clone());
    ts.assert_values(&[1, 2, 3]);
    ts.assert_completed();
}

#[test]
fn filter_refills_credit_for_dropped_items() {
    // 有限需求下被丢弃的条目必须补信用，下游仍能填满需求。
    let ts = TestSubscriber::<i32>::with_demand(3);
    filter(
        from_iter((1..=10).collect::<Vec<i32>>()),
        total_predicate(|x: &i32| x % 2 == 0),
    )
    .subscribe(ts.clone());
    ts.assert_values(&[2, 4, 6]);
    ts.assert_not_terminated();
}

#[test]
fn take_truncates_and_cancels_upstream() {
    let ts = TestSubscriber::<i32>::unbounded();
    take(from_iter(vec![1, 2, 3, 4, 5]), 3).subscribe(ts.clone());
    ts.assert_values(&[1, 2, 3]);
    ts.assert_completed();
}

#[test]
fn take_zero_completes_without_subscribing() {
    let ts = TestSubscriber::<i32>::unbounded();
    take(source::never::<i32>(), 0).subscribe(ts.clone());
    ts.assert_values(&[]);
    ts.assert_completed();
}

#[test]
fn take_until_predicate_emits_boundary_item_then_completes() {
    let ts = TestSubscriber::<i32>::unbounded();
    take_until_predicate(
        from_iter(vec![1, 2, 3, 4]),
        total_predicate(|x: &i32| *x == 2),
    )
    .subscribe(ts.clone());
    ts.assert_values(&[1, 2]);
    ts.assert_completed();
}

#[test]
fn single_with_exactly_one_element() {
    let ts = TestSubscriber::<i32>::unbounded();
    single(from_iter(vec![7]), None).subscribe(ts.clone());
    ts.assert_values(&[7]);
    ts.assert_completed();
}

#[test]
fn single_fails_on_multiple_elements() {
    let ts = TestSubscriber::<i32>::unbounded();
    single(from_iter(vec![1, 2]), None).subscribe(ts.clone());
    ts.assert_error_kind(FlowErrorKind::Protocol);
}

#[test]
fn single_falls_back_to_default_on_empty() {
    let ts = TestSubscriber::<i32>::unbounded();
    single(source::empty::<i32>(), Some(42)).subscribe(ts.clone());
    ts.assert_values(&[42]);
    ts.assert_completed();
}

#[test]
fn repeat_until_resubscribes_until_condition_holds() {
    let passes = Arc::new(AtomicUsize::new(0));
    let condition = Arc::clone(&passes);
    let until: BooleanSupplierFn =
        Arc::new(move || Ok(condition.fetch_add(1, Ordering::AcqRel) + 1 >= 2));
    let ts = TestSubscriber::<i32>::unbounded();
    repeat_until(from_iter(vec![1, 2]), until).subscribe(ts.clone());
    ts.assert_values(&[1, 2, 1, 2]);
    ts.assert_completed();
}

/// 前 `failures` 次订阅立即失败、之后交付单值的易碎源。
struct FlakySource {
    failures: AtomicUsize,
}

impl Flow<i32> for FlakySource {
    fn subscribe(&self, subscriber: SubscriberRef<i32>) {
        if self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                (left > 0).then_some(left - 1)
            })
            .is_ok()
        {
            fail_immediately(&subscriber, FlowError::user_function("transient"));
        } else {
            just(42).subscribe(subscriber);
        }
    }
}

#[test]
fn retry_bi_predicate_retries_then_delivers() {
    let source = Arc::new(FlakySource {
        failures: AtomicUsize::new(2),
    });
    let predicate: BiPredicateFn<u64, FlowError> = Arc::new(|attempt, _| Ok(*attempt <= 2));
    let ts = TestSubscriber::<i32>::unbounded();
    retry_bi_predicate(source as FlowRef<i32>, predicate).subscribe(ts.clone());
    ts.assert_values(&[42]);
    ts.assert_completed();
}

#[test]
fn retry_bi_predicate_gives_up_when_predicate_declines() {
    let source = Arc::new(FlakySource {
        failures: AtomicUsize::new(usize::MAX),
    });
    let predicate: BiPredicateFn<u64, FlowError> = Arc::new(|attempt, _| Ok(*attempt < 3));
    let ts = TestSubscriber::<i32>::unbounded();
    retry_bi_predicate(source as FlowRef<i32>, predicate).subscribe(ts.clone());
    ts.assert_error_kind(FlowErrorKind::UserFunction);
}

#[test]
fn to_list_collects_whole_sequence() {
    let observer = TestSingleObserver::<Vec<i32>>::new();
    to_list(from_iter(vec![1, 2, 3])).subscribe(observer.clone());
    assert_eq!(observer.success(), Some(vec![1, 2, 3]));
}

/// 场景 1：`from_iter([a, bb, ccc, dddd]).to_map(len)`。
#[test]
fn to_map_keyed_by_length_matches_scenario() {
    let observer = TestSingleObserver::<HashMap<usize, String>>::new();
    let key_fn: KeyFn<String, usize> = Arc::new(|s| Ok(s.len()));
    to_map(
        from_iter(vec![
            "a".to_string(),
            "bb".to_string(),
            "ccc".to_string(),
            "dddd".to_string(),
        ]),
        key_fn,
    )
    .subscribe(observer.clone());
    let expected: HashMap<usize, String> = [
        (1, "a".to_string()),
        (2, "bb".to_string()),
        (3, "ccc".to_string()),
        (4, "dddd".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(observer.success(), Some(expected));
}

#[test]
fn single_into_flow_defers_value_until_demand() {
    let ts = TestSubscriber::<Vec<i32>>::with_demand(0);
    pulse_core::single::into_flow(to_list(from_iter(vec![1, 2]))).subscribe(ts.clone());
    assert_eq!(ts.item_count(), 0, "无需求时必须扣住成功值");
    ts.request(1);
    ts.assert_values(&[vec![1, 2]]);
    ts.assert_completed();
}
