//! 协议原语测试套件。
//!
//! # 教案级导览
//!
//! - **Why**：需求算术、订阅槽、串行化层与仲裁器是所有操作符共享的地基，
//!   任何一处的内存序或竞态缺陷都会放大为整库的不变量违例；
//! - **How**：以最小可复现场景（含跨线程竞争路径）直接驱动原语，断言
//!   阶段校验协议不变量（I1/I2/I4/I5/I6）；
//! - **What**：覆盖饱和加/扣减、延迟需求冲洗、取消终态吞并、发射者循环
//!   的终端优先，以及换源时的需求守恒。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use proptest::prelude::*;
use pulse_contract_tests::TestSubscriber;
use pulse_core::prelude::*;
use pulse_core::protocol::arbiter::DemandArbiter;

/// 记录请求与取消的探针句柄。
struct ProbeSubscription {
    requested: AtomicU64,
    cancelled: AtomicBool,
}

impl ProbeSubscription {
    fn new() -> Arc<Self> {
        Arc::new(ProbeSubscription {
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        })
    }

    fn total(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Subscription for ProbeSubscription {
    fn request(&self, n: u64) {
        self.requested.fetch_add(n, Ordering::AcqRel);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

#[test]
fn demand_add_cap_saturates_at_unbounded() {
    let counter = AtomicU64::new(demand::UNBOUNDED - 1);
    demand::add_cap(&counter, 10);
    assert_eq!(
        counter.load(Ordering::Acquire),
        demand::UNBOUNDED,
        "接近上限的累加必须饱和到无界哨兵"
    );
    assert_eq!(
        demand::add_cap(&counter, 1),
        demand::UNBOUNDED,
        "无界之后的累加必须短路"
    );
}

#[test]
fn demand_produced_is_short_circuited_by_unbounded() {
    let counter = AtomicU64::new(demand::UNBOUNDED);
    assert_eq!(demand::produced(&counter, 100), demand::UNBOUNDED);
    assert_eq!(counter.load(Ordering::Acquire), demand::UNBOUNDED);
}

proptest! {
    /// 性质：任意交错的累加/扣减序列下计数恒为非负，且不越过无界哨兵。
    #[test]
    fn demand_arithmetic_never_underflows(ops in proptest::collection::vec((any::<bool>(), 1u64..1000), 1..60)) {
        let counter = AtomicU64::new(0);
        let mut outstanding: u128 = 0;
        for (is_add, n) in ops {
            if is_add {
                demand::add_cap(&counter, n);
                outstanding += n as u128;
            } else if outstanding >= n as u128 {
                demand::produced(&counter, n);
                outstanding -= n as u128;
            }
        }
        let observed = counter.load(Ordering::Acquire);
        prop_assert!(observed == outstanding.min(demand::UNBOUNDED as u128) as u64);
    }
}

#[test]
fn cancel_flag_first_cancel_wins_exactly_once() {
    let flag = Arc::new(CancelFlag::new());
    let winners: Vec<bool> = {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let flag = Arc::clone(&flag);
                thread::spawn(move || flag.try_cancel())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("取消线程不应 panic"))
            .collect()
    };
    assert_eq!(
        winners.iter().filter(|won| **won).count(),
        1,
        "首次取消必须恰好一个赢家"
    );
    assert!(flag.is_cancelled());
}

#[test]
fn subscription_slot_flushes_deferred_demand_on_install() {
    let slot = SubscriptionSlot::new();
    Subscription::request(&slot, 3);
    Subscription::request(&slot, 4);
    let probe = ProbeSubscription::new();
    assert!(slot.install(Arc::clone(&probe) as SubscriptionRef));
    assert_eq!(probe.total(), 7, "安装时必须冲洗全部延迟需求");
    Subscription::request(&slot, 5);
    assert_eq!(probe.total(), 12, "活动态请求必须直达上游");
}

#[test]
fn subscription_slot_swallows_installs_after_cancel() {
    let slot = SubscriptionSlot::new();
    Subscription::cancel(&slot);
    let probe = ProbeSubscription::new();
    assert!(!slot.install(Arc::clone(&probe) as SubscriptionRef));
    assert!(probe.is_cancelled(), "取消终态必须吞并并取消后到句柄");
}

#[test]
fn subscription_slot_rejects_second_install() {
    let slot = SubscriptionSlot::new();
    let first = ProbeSubscription::new();
    let second = ProbeSubscription::new();
    assert!(slot.install(Arc::clone(&first) as SubscriptionRef));
    assert!(!slot.install(Arc::clone(&second) as SubscriptionRef));
    assert!(second.is_cancelled(), "重复安装的句柄必须被取消");
    assert!(!first.is_cancelled());
}

#[test]
fn serialized_subscriber_keeps_delivery_serial_under_contention() {
    let downstream = TestSubscriber::<u64>::unbounded();
    let serialized = SerializedSubscriber::new(downstream.clone() as SubscriberRef<u64>);
    serialized.on_subscribe(Arc::new(NoopSubscription));

    let threads: Vec<_> = (0..4)
        .map(|lane| {
            let serialized = Arc::clone(&serialized);
            thread::spawn(move || {
                for i in 0..500u64 {
                    serialized.on_next(lane * 1000 + i);
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().expect("发射线程不应 panic");
    }
    serialized.on_complete();

    assert_eq!(downstream.item_count(), 2000, "条目不得丢失或重复");
    downstream.assert_completed();
}

#[test]
fn serialized_subscriber_error_takes_precedence_and_terminal_is_unique() {
    let downstream = TestSubscriber::<u64>::unbounded();
    let serialized = SerializedSubscriber::new(downstream.clone() as SubscriberRef<u64>);
    serialized.on_subscribe(Arc::new(NoopSubscription));

    serialized.on_error(FlowError::user_function("boom"));
    serialized.on_complete();
    serialized.on_next(1);

    downstream.assert_error_kind(FlowErrorKind::UserFunction);
    assert_eq!(downstream.item_count(), 0, "终端之后的条目必须静默丢弃");
}

#[test]
fn demand_arbiter_preserves_outstanding_demand_across_sources() {
    let arbiter = Arc::new(DemandArbiter::new());
    Subscription::request(arbiter.as_ref(), 10);

    let first = ProbeSubscription::new();
    arbiter.set_subscription(Arc::clone(&first) as SubscriptionRef);
    assert_eq!(first.total(), 10, "新源必须立即收到全部未消费需求");

    arbiter.produced(4);
    let second = ProbeSubscription::new();
    arbiter.set_subscription(Arc::clone(&second) as SubscriptionRef);
    assert_eq!(second.total(), 6, "换源后余额必须是 10 - 4");

    Subscription::request(arbiter.as_ref(), 2);
    assert_eq!(second.total(), 8, "活动态增量直达现任源");
}

#[test]
fn demand_arbiter_cancel_reaches_current_source() {
    let arbiter = Arc::new(DemandArbiter::new());
    let probe = ProbeSubscription::new();
    arbiter.set_subscription(Arc::clone(&probe) as SubscriptionRef);
    Subscription::cancel(arbiter.as_ref());
    assert!(probe.is_cancelled());
    assert!(arbiter.is_cancelled());

    let late = ProbeSubscription::new();
    arbiter.set_subscription(Arc::clone(&late) as SubscriptionRef);
    assert!(late.is_cancelled(), "取消后的安装必须被吞并");
}

#[test]
fn terminal_once_grants_exactly_one_winner() {
    let terminal = TerminalOnce::new();
    assert!(terminal.try_terminate());
    assert!(!terminal.try_terminate());
    assert!(terminal.is_terminated());
}
