//! 错误域测试套件：复合聚合、孤儿钩子与 null 产出路径。

use std::sync::Arc;

use parking_lot::Mutex;
use pulse_contract_tests::TestSubscriber;
use pulse_core::prelude::*;

/// 钩子是进程级状态，相关测试串行执行避免互相覆盖注入。
static HOOK_GUARD: Mutex<()> = Mutex::new(());

#[test]
fn composite_error_preserves_order_and_dedups() {
    let mut composite = CompositeError::new([
        FlowError::user_function("first"),
        FlowError::timeout_signalled("second"),
        FlowError::user_function("first"),
    ]);
    assert_eq!(composite.len(), 2, "重复键必须按插入唯一性去重");
    composite.suppress(FlowError::protocol("third"));
    let kinds: Vec<FlowErrorKind> = composite.errors().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            FlowErrorKind::UserFunction,
            FlowErrorKind::Timeout,
            FlowErrorKind::Protocol
        ],
        "迭代必须保插入序"
    );
}

#[test]
fn composite_error_display_enumerates_members() {
    let composite = CompositeError::new([
        FlowError::user_function("boom"),
        FlowError::timeout_signalled("late"),
    ]);
    let rendered = composite.to_string();
    assert!(rendered.contains("2 multiple errors occurred"));
    assert!(rendered.contains("[0]"));
    assert!(rendered.contains("[1]"));
}

#[test]
fn composite_error_cause_chain_is_bounded_and_recursive() {
    let inner = CompositeError::new([
        FlowError::user_function("a"),
        FlowError::user_function("b"),
    ]);
    let outer = CompositeError::new([
        FlowError::Composite(inner),
        FlowError::timeout_signalled("t"),
    ]);
    let chain = outer.cause_chain();
    assert!(
        chain.len() >= 3,
        "因果链必须展开嵌套复合成员，实际 {}",
        chain.len()
    );
}

#[test]
fn orphan_errors_reach_the_injected_sink() {
    let _serial = HOOK_GUARD.lock();
    let captured: Arc<Mutex<Vec<FlowError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_store = Arc::clone(&captured);
    hook::set_sink(Arc::new(move |error| {
        sink_store.lock().push(error.clone());
    }));

    // request(0) 属协议违例，没有订阅者可接收，只能走钩子。
    NoopSubscription.request(0);

    let seen = captured.lock().clone();
    hook::reset();
    assert!(
        seen.iter().any(|e| e.kind() == FlowErrorKind::Protocol),
        "协议违例必须出现在注入的 sink 中"
    );
}

#[test]
fn post_terminal_error_goes_to_hook_not_downstream() {
    let _serial = HOOK_GUARD.lock();
    let captured: Arc<Mutex<Vec<FlowError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_store = Arc::clone(&captured);
    hook::set_sink(Arc::new(move |error| {
        sink_store.lock().push(error.clone());
    }));

    let downstream = TestSubscriber::<i32>::unbounded();
    let serialized = SerializedSubscriber::new(downstream.clone() as SubscriberRef<i32>);
    serialized.on_subscribe(Arc::new(NoopSubscription));
    serialized.on_complete();
    serialized.on_error(FlowError::user_function("too late"));

    let seen = captured.lock().clone();
    hook::reset();
    downstream.assert_completed();
    assert!(
        seen.iter()
            .any(|e| e.kind() == FlowErrorKind::UserFunction && e.to_string().contains("too late")),
        "终端之后的错误必须转入钩子"
    );
}

/// 不变量：任何用户函数的 null 产出都恰好换来一次下游错误。
#[test]
fn null_production_yields_exactly_one_downstream_error() {
    let ts = TestSubscriber::<i32>::unbounded();
    let mapper: MapFn<i32, i32> = Arc::new(|_| Err(FlowError::null_value("mapper")));
    map(from_iter(vec![1, 2, 3]), mapper).subscribe(ts.clone());
    ts.assert_error_kind(FlowErrorKind::NullValue);
    assert_eq!(ts.item_count(), 0);
}

#[test]
fn error_kinds_are_stable_for_assertions() {
    assert_eq!(
        FlowError::timeout_after(std::time::Duration::from_millis(5)).kind(),
        FlowErrorKind::Timeout
    );
    assert_eq!(
        FlowError::missing_demand("op").kind(),
        FlowErrorKind::MissingDemand
    );
    assert_eq!(FlowError::protocol("p").kind(), FlowErrorKind::Protocol);
    assert_eq!(
        FlowError::null_value("n").kind(),
        FlowErrorKind::NullValue
    );
}
