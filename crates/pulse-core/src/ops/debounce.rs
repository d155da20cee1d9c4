use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::MapFn;
use crate::protocol::serial::SerializedSubscriber;
use crate::protocol::subscription::{SubscriptionSlot, TerminalOnce};
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};

/// 选择器式防抖：条目 `t`（下标 `k`）各自启动一条静默守护流。
///
/// 守护流的第一个信号（条目或完成）把 `t` 发射给下游——前提是 `k` 仍是
/// 最新下标（共享下标上的 CAS 裁决）；上游完成时冲洗未决守护流持有的
/// 值。新条目到达即作废旧守护流。
pub fn debounce<T, U>(source: FlowRef<T>, selector: MapFn<T, FlowRef<U>>) -> FlowRef<T>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    Arc::new(DebounceFlow { source, selector })
}

struct DebounceFlow<T, U> {
    source: FlowRef<T>,
    selector: MapFn<T, FlowRef<U>>,
}

impl<T, U> Flow<T> for DebounceFlow<T, U>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let main = Arc::new_cyclic(|weak: &Weak<DebounceMain<T, U>>| DebounceMain {
            weak: weak.clone(),
            downstream: SerializedSubscriber::new(subscriber),
            selector: Arc::clone(&self.selector),
            index: AtomicU64::new(0),
            upstream: Arc::new(SubscriptionSlot::new()),
            current: Mutex::new(None),
            requested: AtomicU64::new(0),
            terminated: TerminalOnce::new(),
        });
        main.downstream
            .on_subscribe(Arc::clone(&main) as SubscriptionRef);
        self.source.subscribe(main);
    }
}

struct DebounceMain<T, U> {
    weak: Weak<DebounceMain<T, U>>,
    downstream: Arc<SerializedSubscriber<T>>,
    selector: MapFn<T, FlowRef<U>>,
    index: AtomicU64,
    upstream: Arc<SubscriptionSlot>,
    current: Mutex<Option<Arc<DebounceGuard<T, U>>>>,
    requested: AtomicU64,
    terminated: TerminalOnce,
}

impl<T, U> DebounceMain<T, U>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    fn halt_error(&self, error: FlowError) {
        Subscription::cancel(self.upstream.as_ref());
        if let Some(guard) = self.current.lock().take() {
            guard.dispose();
        }
        if self.terminated.try_terminate() {
            self.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }

    /// 守护流裁定发射；`round` 是它守护的条目下标。
    fn emit_debounced(&self, round: u64, value: T) {
        if self.terminated.is_terminated() {
            return;
        }
        if self.index.load(Ordering::Acquire) != round {
            // 已有更新的条目接管，旧值作废。
            return;
        }
        if self.requested.load(Ordering::Acquire) > 0 {
            self.downstream.on_next(value);
            demand::produced(&self.requested, 1);
        } else {
            self.halt_error(FlowError::missing_demand("debounce"));
        }
    }

    fn guard_error(&self, round: u64, error: FlowError) {
        if self.index.load(Ordering::Acquire) == round {
            self.halt_error(error);
        } else {
            hook::report(error);
        }
    }
}

impl<T, U> Subscription for DebounceMain<T, U>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.requested, n);
    }

    fn cancel(&self) {
        Subscription::cancel(self.upstream.as_ref());
        if let Some(guard) = self.current.lock().take() {
            guard.dispose();
        }
    }
}

impl<T, U> Subscriber<T> for DebounceMain<T, U>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.upstream.install(subscription) {
            // 防抖语义消费上游全量序列。
            Subscription::request(self.upstream.as_ref(), demand::UNBOUNDED);
        }
    }

    fn on_next(&self, item: T) {
        if self.terminated.is_terminated() {
            return;
        }
        let round = self.index.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(previous) = self.current.lock().take() {
            previous.dispose();
        }
        match (self.selector)(item.clone()) {
            Ok(guard_flow) => {
                let Some(me) = self.weak.upgrade() else {
                    return;
                };
                let guard = Arc::new(DebounceGuard {
                    main: me,
                    round,
                    value: Mutex::new(Some(item)),
                    fired: AtomicBool::new(false),
                    slot: Arc::new(SubscriptionSlot::new()),
                });
                *self.current.lock() = Some(Arc::clone(&guard));
                guard_flow.subscribe(guard);
            }
            Err(error) => self.halt_error(error),
        }
    }

    fn on_error(&self, error: FlowError) {
        if let Some(guard) = self.current.lock().take() {
            guard.dispose();
        }
        if self.terminated.try_terminate() {
            self.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }

    fn on_complete(&self) {
        // 冲洗未决守护流持有的值，然后完成。
        let pending = self.current.lock().take();
        if let Some(guard) = pending {
            if let Some(value) = guard.claim() {
                self.emit_debounced(guard.round, value);
            }
            guard.dispose();
        }
        if self.terminated.try_terminate() {
            self.downstream.on_complete();
        }
    }
}

/// 单条目的静默守护：第一个信号裁定发射。
struct DebounceGuard<T, U> {
    main: Arc<DebounceMain<T, U>>,
    round: u64,
    value: Mutex<Option<T>>,
    fired: AtomicBool,
    slot: Arc<SubscriptionSlot>,
}

impl<T, U> DebounceGuard<T, U>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    /// 领取未发射的值；恰好一次。
    fn claim(&self) -> Option<T> {
        if self.fired.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.value.lock().take()
    }

    fn dispose(&self) {
        self.fired.store(true, Ordering::Release);
        Subscription::cancel(self.slot.as_ref());
    }
}

impl<T, U> Subscriber<U> for DebounceGuard<T, U>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.slot.install(subscription) {
            Subscription::request(self.slot.as_ref(), 1);
        }
    }

    fn on_next(&self, _signal: U) {
        if let Some(value) = self.claim() {
            Subscription::cancel(self.slot.as_ref());
            self.main.emit_debounced(self.round, value);
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.main.guard_error(self.round, error);
        } else {
            hook::report(error);
        }
    }

    fn on_complete(&self) {
        if let Some(value) = self.claim() {
            self.main.emit_debounced(self.round, value);
        }
    }
}
