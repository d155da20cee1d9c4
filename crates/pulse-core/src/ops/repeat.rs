use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{FlowError, hook};
use crate::fns::BooleanSupplierFn;
use crate::protocol::arbiter::DemandArbiter;
use crate::protocol::{Flow, FlowRef, Subscriber, SubscriberRef, SubscriptionRef};

/// 完成后重订阅，直到停止条件为真。
///
/// 重订阅经 [`DemandArbiter`] 守恒需求；`subscribe-next` 蹦床（missed
/// 计数）把同步完成的深递归压平为循环，规避栈溢出。
pub fn repeat_until<T>(source: FlowRef<T>, until: BooleanSupplierFn) -> FlowRef<T>
where
    T: Send + 'static,
{
    Arc::new(RepeatUntilFlow { source, until })
}

struct RepeatUntilFlow<T> {
    source: FlowRef<T>,
    until: BooleanSupplierFn,
}

impl<T: Send + 'static> Flow<T> for RepeatUntilFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let arbiter = Arc::new(DemandArbiter::new());
        subscriber.on_subscribe(Arc::clone(&arbiter) as SubscriptionRef);
        let resubscriber = Arc::new_cyclic(|weak: &Weak<RepeatSubscriber<T>>| RepeatSubscriber {
            weak: weak.clone(),
            source: Arc::clone(&self.source),
            downstream: subscriber,
            arbiter,
            until: Arc::clone(&self.until),
            trampoline: AtomicUsize::new(0),
            produced: AtomicU64::new(0),
        });
        resubscriber.subscribe_next();
    }
}

struct RepeatSubscriber<T> {
    weak: Weak<RepeatSubscriber<T>>,
    source: FlowRef<T>,
    downstream: SubscriberRef<T>,
    arbiter: Arc<DemandArbiter>,
    until: BooleanSupplierFn,
    trampoline: AtomicUsize,
    produced: AtomicU64,
}

impl<T: Send + 'static> RepeatSubscriber<T> {
    /// subscribe-next 蹦床：同一时刻只有一个线程推进重订阅。
    fn subscribe_next(&self) {
        if self.trampoline.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1usize;
        loop {
            if self.arbiter.is_cancelled() {
                return;
            }
            if let Some(me) = self.weak.upgrade() {
                self.source.subscribe(me);
            }
            let remaining = self.trampoline.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                return;
            }
            missed = remaining;
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for RepeatSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.arbiter.set_subscription(subscription);
    }

    fn on_next(&self, item: T) {
        self.produced.fetch_add(1, Ordering::AcqRel);
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: FlowError) {
        if self.arbiter.is_cancelled() {
            hook::report(error);
            return;
        }
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        match (self.until)() {
            Err(error) => self.downstream.on_error(error),
            Ok(true) => self.downstream.on_complete(),
            Ok(false) => {
                let emitted = self.produced.swap(0, Ordering::AcqRel);
                if emitted > 0 {
                    self.arbiter.produced(emitted);
                }
                self.subscribe_next();
            }
        }
    }
}
