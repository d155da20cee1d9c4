use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::MapFn;
use crate::protocol::arbiter::{ArbiterSubscriber, FullArbiter};
use crate::protocol::subscription::SubscriptionSlot;
use crate::protocol::{
    Cancellable, Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef,
};
use crate::scheduler::{SchedulerRef, WorkerRef};

/// 条目下标的终态哨兵：一旦写入，任何超时与条目都不再竞争。
const INDEX_HALTED: u64 = u64::MAX;

/// 时间式超时：每个条目重置一只一次性定时任务。
///
/// # 逻辑解析（How）
/// - 条目 `k` 到达时把下标推进到 `k + 1` 并安排新一代定时任务；任务唤醒
///   时用 CAS 争夺自己的代际，过期者静默自毁（条目与超时的竞赛至多
///   一方胜出）；
/// - 超时胜出：取消主源；配置了 fallback 就经 [`FullArbiter`] 换轨到
///   备源（需求守恒），否则向下游投递超时错误。
pub fn timeout<T>(
    source: FlowRef<T>,
    window: Duration,
    scheduler: SchedulerRef,
    fallback: Option<FlowRef<T>>,
) -> FlowRef<T>
where
    T: Send + 'static,
{
    Arc::new(TimeoutTimedFlow {
        source,
        window,
        scheduler,
        fallback,
    })
}

struct TimeoutTimedFlow<T> {
    source: FlowRef<T>,
    window: Duration,
    scheduler: SchedulerRef,
    fallback: Option<FlowRef<T>>,
}

impl<T: Send + 'static> Flow<T> for TimeoutTimedFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let arbiter = FullArbiter::new(subscriber);
        let primary_generation = arbiter.next_generation();
        let worker = self.scheduler.create_worker();
        let main = Arc::new_cyclic(|weak: &Weak<TimedMain<T>>| TimedMain {
            weak: weak.clone(),
            arbiter: Arc::clone(&arbiter),
            worker,
            window: self.window,
            fallback: self.fallback.clone(),
            index: AtomicU64::new(0),
            primary_generation,
            primary: Mutex::new(None),
            timer: Mutex::new(None),
        });
        main.arbiter_downstream_handshake();
        main.schedule_round(0);
        self.source.subscribe(Arc::new(TimedPrimary {
            main: Arc::clone(&main),
        }));
    }
}

struct TimedMain<T> {
    weak: Weak<TimedMain<T>>,
    arbiter: Arc<FullArbiter<T>>,
    worker: WorkerRef,
    window: Duration,
    fallback: Option<FlowRef<T>>,
    index: AtomicU64,
    primary_generation: u64,
    primary: Mutex<Option<SubscriptionRef>>,
    timer: Mutex<Option<Arc<dyn Cancellable>>>,
}

impl<T: Send + 'static> TimedMain<T> {
    /// 把"仲裁器 + 拆除"组合句柄先行交给下游。
    fn arbiter_downstream_handshake(self: &Arc<Self>) {
        // FullArbiter 构造时保存了下游，此处补投句柄。
        let handle = Arc::new(TimedSubscription {
            main: Arc::clone(self),
        });
        self.arbiter.downstream_on_subscribe(handle);
    }

    fn schedule_round(&self, round: u64) {
        let weak = self.weak.clone();
        let handle = self.worker.schedule(
            self.window,
            Box::new(move || {
                if let Some(main) = weak.upgrade() {
                    main.on_timeout(round);
                }
            }),
        );
        let previous = self.timer.lock().replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
        }
    }

    fn teardown(&self) {
        self.index.store(INDEX_HALTED, Ordering::Release);
        self.cancel_timer();
        self.worker.dispose();
        if let Some(primary) = self.primary.lock().take() {
            primary.cancel();
        }
    }

    fn on_timeout(&self, round: u64) {
        if self
            .index
            .compare_exchange(round, INDEX_HALTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // 条目抢先推进了代际：本次超时作废。
            return;
        }
        if let Some(primary) = self.primary.lock().take() {
            primary.cancel();
        }
        self.cancel_timer();
        match &self.fallback {
            Some(fallback) => {
                let generation = self.arbiter.next_generation();
                fallback.subscribe(ArbiterSubscriber::new(
                    Arc::clone(&self.arbiter),
                    generation,
                ));
                self.worker.dispose();
            }
            None => {
                self.worker.dispose();
                self.arbiter
                    .signal_error(self.primary_generation, FlowError::timeout_after(self.window));
            }
        }
    }
}

struct TimedSubscription<T> {
    main: Arc<TimedMain<T>>,
}

impl<T: Send + 'static> Subscription for TimedSubscription<T> {
    fn request(&self, n: u64) {
        Subscription::request(self.main.arbiter.as_ref(), n);
    }

    fn cancel(&self) {
        Subscription::cancel(self.main.arbiter.as_ref());
        self.main.teardown();
    }
}

struct TimedPrimary<T> {
    main: Arc<TimedMain<T>>,
}

impl<T: Send + 'static> Subscriber<T> for TimedPrimary<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        *self.main.primary.lock() = Some(Arc::clone(&subscription));
        self.main
            .arbiter
            .install(self.main.primary_generation, subscription);
    }

    fn on_next(&self, item: T) {
        let round = self.main.index.load(Ordering::Acquire);
        if round == INDEX_HALTED {
            return;
        }
        if self
            .main
            .index
            .compare_exchange(round, round + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // 超时在同一代际胜出，条目随主源取消一并作废。
            return;
        }
        self.main.cancel_timer();
        self.main
            .arbiter
            .signal_item(self.main.primary_generation, item);
        self.main.schedule_round(round + 1);
    }

    fn on_error(&self, error: FlowError) {
        if self.main.index.swap(INDEX_HALTED, Ordering::AcqRel) == INDEX_HALTED {
            self.main
                .arbiter
                .signal_error(self.main.primary_generation, error);
            return;
        }
        self.main.cancel_timer();
        self.main.worker.dispose();
        self.main
            .arbiter
            .signal_error(self.main.primary_generation, error);
    }

    fn on_complete(&self) {
        if self.main.index.swap(INDEX_HALTED, Ordering::AcqRel) == INDEX_HALTED {
            self.main
                .arbiter
                .signal_complete(self.main.primary_generation);
            return;
        }
        self.main.cancel_timer();
        self.main.worker.dispose();
        self.main
            .arbiter
            .signal_complete(self.main.primary_generation);
    }
}

/// 选择器式超时：首超时流守护第一项，此后每项衍生一只守护流。
///
/// 守护流的第一个信号（条目或完成）即超时；代际裁决与时间式一致。
/// 选择器失败立即终止下游。
pub fn timeout_selector<T, U, V>(
    source: FlowRef<T>,
    first: Option<FlowRef<U>>,
    selector: MapFn<T, FlowRef<V>>,
    fallback: Option<FlowRef<T>>,
) -> FlowRef<T>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
    V: Send + 'static,
{
    Arc::new(TimeoutSelectorFlow {
        source,
        first,
        selector,
        fallback,
    })
}

struct TimeoutSelectorFlow<T, U, V> {
    source: FlowRef<T>,
    first: Option<FlowRef<U>>,
    selector: MapFn<T, FlowRef<V>>,
    fallback: Option<FlowRef<T>>,
}

impl<T, U, V> Flow<T> for TimeoutSelectorFlow<T, U, V>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
    V: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let arbiter = FullArbiter::new(subscriber);
        let primary_generation = arbiter.next_generation();
        let main = Arc::new(SelectorMain {
            arbiter: Arc::clone(&arbiter),
            fallback: self.fallback.clone(),
            index: AtomicU64::new(0),
            primary_generation,
            primary: Mutex::new(None),
            guard: Mutex::new(None),
        });
        arbiter.downstream_on_subscribe(Arc::new(SelectorSubscription {
            main: Arc::clone(&main),
        }));
        if let Some(first) = &self.first {
            let trigger: Arc<TimeoutGuard<T, U>> = Arc::new(TimeoutGuard {
                main: Arc::clone(&main),
                round: 0,
                fired: AtomicBool::new(false),
                slot: Arc::new(SubscriptionSlot::new()),
                _marker: std::marker::PhantomData,
            });
            main.install_guard(Arc::clone(&trigger.slot));
            first.subscribe(trigger);
        }
        self.source.subscribe(Arc::new(SelectorPrimary {
            main: Arc::clone(&main),
            selector: Arc::clone(&self.selector),
        }));
    }
}

struct SelectorMain<T> {
    arbiter: Arc<FullArbiter<T>>,
    fallback: Option<FlowRef<T>>,
    index: AtomicU64,
    primary_generation: u64,
    primary: Mutex<Option<SubscriptionRef>>,
    guard: Mutex<Option<Arc<SubscriptionSlot>>>,
}

impl<T: Send + 'static> SelectorMain<T> {
    fn install_guard(&self, slot: Arc<SubscriptionSlot>) {
        let previous = self.guard.lock().replace(slot);
        if let Some(previous) = previous {
            Subscription::cancel(previous.as_ref());
        }
    }

    fn cancel_guard(&self) {
        if let Some(guard) = self.guard.lock().take() {
            Subscription::cancel(guard.as_ref());
        }
    }

    fn cancel_primary(&self) {
        if let Some(primary) = self.primary.lock().take() {
            primary.cancel();
        }
    }

    /// 守护流裁定超时；`round` 是它守护的条目下标。
    fn guard_fired(&self, round: u64) {
        if self
            .index
            .compare_exchange(round, INDEX_HALTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.cancel_primary();
        self.cancel_guard();
        match &self.fallback {
            Some(fallback) => {
                let generation = self.arbiter.next_generation();
                fallback.subscribe(ArbiterSubscriber::new(
                    Arc::clone(&self.arbiter),
                    generation,
                ));
            }
            None => {
                self.arbiter.signal_error(
                    self.primary_generation,
                    FlowError::timeout_signalled("timeout selector fired"),
                );
            }
        }
    }

    fn guard_failed(&self, round: u64, error: FlowError) {
        if self
            .index
            .compare_exchange(round, INDEX_HALTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            hook::report(error);
            return;
        }
        self.cancel_primary();
        self.cancel_guard();
        self.arbiter.signal_error(self.primary_generation, error);
    }

    fn halt_with(&self, error: FlowError) {
        self.index.store(INDEX_HALTED, Ordering::Release);
        self.cancel_primary();
        self.cancel_guard();
        self.arbiter.signal_error(self.primary_generation, error);
    }
}

struct SelectorSubscription<T> {
    main: Arc<SelectorMain<T>>,
}

impl<T: Send + 'static> Subscription for SelectorSubscription<T> {
    fn request(&self, n: u64) {
        Subscription::request(self.main.arbiter.as_ref(), n);
    }

    fn cancel(&self) {
        Subscription::cancel(self.main.arbiter.as_ref());
        self.main.index.store(INDEX_HALTED, Ordering::Release);
        self.main.cancel_primary();
        self.main.cancel_guard();
    }
}

struct SelectorPrimary<T, V> {
    main: Arc<SelectorMain<T>>,
    selector: MapFn<T, FlowRef<V>>,
}

impl<T, V> Subscriber<T> for SelectorPrimary<T, V>
where
    T: Clone + Send + 'static,
    V: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        *self.main.primary.lock() = Some(Arc::clone(&subscription));
        self.main
            .arbiter
            .install(self.main.primary_generation, subscription);
    }

    fn on_next(&self, item: T) {
        let round = self.main.index.load(Ordering::Acquire);
        if round == INDEX_HALTED {
            return;
        }
        if self
            .main
            .index
            .compare_exchange(round, round + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.main.cancel_guard();
        self.main
            .arbiter
            .signal_item(self.main.primary_generation, item.clone());
        match (self.selector)(item) {
            Ok(guard_flow) => {
                let guard: Arc<TimeoutGuard<T, V>> = Arc::new(TimeoutGuard {
                    main: Arc::clone(&self.main),
                    round: round + 1,
                    fired: AtomicBool::new(false),
                    slot: Arc::new(SubscriptionSlot::new()),
                    _marker: std::marker::PhantomData,
                });
                self.main.install_guard(Arc::clone(&guard.slot));
                guard_flow.subscribe(guard);
            }
            Err(error) => self.main.halt_with(error),
        }
    }

    fn on_error(&self, error: FlowError) {
        self.main.index.store(INDEX_HALTED, Ordering::Release);
        self.main.cancel_guard();
        self.main
            .arbiter
            .signal_error(self.main.primary_generation, error);
    }

    fn on_complete(&self) {
        self.main.index.store(INDEX_HALTED, Ordering::Release);
        self.main.cancel_guard();
        self.main
            .arbiter
            .signal_complete(self.main.primary_generation);
    }
}

struct TimeoutGuard<T, S> {
    main: Arc<SelectorMain<T>>,
    round: u64,
    fired: AtomicBool,
    slot: Arc<SubscriptionSlot>,
    _marker: std::marker::PhantomData<fn(S)>,
}

impl<T, S> Subscriber<S> for TimeoutGuard<T, S>
where
    T: Send + 'static,
    S: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.slot.install(subscription) {
            Subscription::request(self.slot.as_ref(), 1);
        }
    }

    fn on_next(&self, _signal: S) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            Subscription::cancel(self.slot.as_ref());
            self.main.guard_fired(self.round);
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.main.guard_failed(self.round, error);
        } else {
            hook::report(error);
        }
    }

    fn on_complete(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.main.guard_fired(self.round);
        }
    }
}
