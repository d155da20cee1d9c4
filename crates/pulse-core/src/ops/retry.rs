use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{CompositeError, FlowError, hook};
use crate::fns::BiPredicateFn;
use crate::protocol::arbiter::DemandArbiter;
use crate::protocol::{Flow, FlowRef, Subscriber, SubscriberRef, SubscriptionRef};

/// 出错后按二元谓词 `(重试次数, 错误) -> 是否继续` 决定是否重订阅。
///
/// 谓词自身失败时，原错误与谓词错误聚合为复合错误投递下游。
pub fn retry_bi_predicate<T>(source: FlowRef<T>, predicate: BiPredicateFn<u64, FlowError>) -> FlowRef<T>
where
    T: Send + 'static,
{
    Arc::new(RetryFlow { source, predicate })
}

struct RetryFlow<T> {
    source: FlowRef<T>,
    predicate: BiPredicateFn<u64, FlowError>,
}

impl<T: Send + 'static> Flow<T> for RetryFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let arbiter = Arc::new(DemandArbiter::new());
        subscriber.on_subscribe(Arc::clone(&arbiter) as SubscriptionRef);
        let resubscriber = Arc::new_cyclic(|weak: &Weak<RetrySubscriber<T>>| RetrySubscriber {
            weak: weak.clone(),
            source: Arc::clone(&self.source),
            downstream: subscriber,
            arbiter,
            predicate: Arc::clone(&self.predicate),
            trampoline: AtomicUsize::new(0),
            produced: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
        });
        resubscriber.subscribe_next();
    }
}

struct RetrySubscriber<T> {
    weak: Weak<RetrySubscriber<T>>,
    source: FlowRef<T>,
    downstream: SubscriberRef<T>,
    arbiter: Arc<DemandArbiter>,
    predicate: BiPredicateFn<u64, FlowError>,
    trampoline: AtomicUsize,
    produced: AtomicU64,
    attempts: AtomicU64,
}

impl<T: Send + 'static> RetrySubscriber<T> {
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

impl<T: Send + 'static> Subscriber<T> for RetrySubscriber<T> {
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
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        match (self.predicate)(&attempt, &error) {
            Ok(true) => {
                let emitted = self.produced.swap(0, Ordering::AcqRel);
                if emitted > 0 {
                    self.arbiter.produced(emitted);
                }
                self.subscribe_next();
            }
            Ok(false) => self.downstream.on_error(error),
            Err(predicate_error) => {
                self.downstream
                    .on_error(CompositeError::new([error, predicate_error]).into());
            }
        }
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
    }
}
