use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::PredicateFn;
use crate::protocol::subscription::complete_immediately;
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};

/// 取前 `limit` 项后提前完成并取消上游。
///
/// 向上游的请求量被钳制在剩余名额内，避免从无界源超额索取。
pub fn take<T>(source: FlowRef<T>, limit: u64) -> FlowRef<T>
where
    T: Send + 'static,
{
    Arc::new(TakeFlow { source, limit })
}

struct TakeFlow<T> {
    source: FlowRef<T>,
    limit: u64,
}

impl<T: Send + 'static> Flow<T> for TakeFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        if self.limit == 0 {
            complete_immediately(&subscriber);
            return;
        }
        let state = Arc::new(TakeState {
            remaining: AtomicU64::new(self.limit),
            requestable: AtomicU64::new(self.limit),
            upstream: Mutex::new(None),
            done: AtomicBool::new(false),
        });
        self.source.subscribe(Arc::new(TakeSubscriber {
            downstream: subscriber,
            state,
        }));
    }
}

/// 订阅者与下游句柄共享的裁决状态。
struct TakeState {
    remaining: AtomicU64,
    requestable: AtomicU64,
    upstream: Mutex<Option<SubscriptionRef>>,
    done: AtomicBool,
}

impl TakeState {
    fn cancel_upstream(&self) {
        if let Some(upstream) = self.upstream.lock().take() {
            upstream.cancel();
        }
    }
}

struct TakeSubscriber<T> {
    downstream: SubscriberRef<T>,
    state: Arc<TakeState>,
}

impl<T: Send + 'static> Subscriber<T> for TakeSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        *self.state.upstream.lock() = Some(subscription);
        self.downstream.on_subscribe(Arc::new(TakeSubscription {
            state: Arc::clone(&self.state),
        }));
    }

    fn on_next(&self, item: T) {
        if self.state.done.load(Ordering::Acquire) {
            return;
        }
        let left = self.state.remaining.load(Ordering::Acquire);
        if left == 0 {
            return;
        }
        self.state.remaining.store(left - 1, Ordering::Release);
        self.downstream.on_next(item);
        if left == 1 {
            self.state.done.store(true, Ordering::Release);
            self.state.cancel_upstream();
            self.downstream.on_complete();
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.state.done.swap(true, Ordering::AcqRel) {
            hook::report(error);
            return;
        }
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        if !self.state.done.swap(true, Ordering::AcqRel) {
            self.downstream.on_complete();
        }
    }
}

struct TakeSubscription {
    state: Arc<TakeState>,
}

impl Subscription for TakeSubscription {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        // 请求量钳制在剩余名额内。
        let mut grant = 0;
        let mut available = self.state.requestable.load(Ordering::Acquire);
        while available > 0 {
            let take_now = n.min(available);
            match self.state.requestable.compare_exchange_weak(
                available,
                available - take_now,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    grant = take_now;
                    break;
                }
                Err(observed) => available = observed,
            }
        }
        if grant > 0 {
            if let Some(upstream) = self.state.upstream.lock().clone() {
                upstream.request(grant);
            }
        }
    }

    fn cancel(&self) {
        self.state.done.store(true, Ordering::Release);
        self.state.cancel_upstream();
    }
}

/// 逐项发射后检验谓词；谓词为真即完成（先发射后判定）。
pub fn take_until_predicate<T>(source: FlowRef<T>, predicate: PredicateFn<T>) -> FlowRef<T>
where
    T: Send + 'static,
{
    Arc::new(TakeUntilPredicateFlow { source, predicate })
}

struct TakeUntilPredicateFlow<T> {
    source: FlowRef<T>,
    predicate: PredicateFn<T>,
}

impl<T: Send + 'static> Flow<T> for TakeUntilPredicateFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        self.source.subscribe(Arc::new(TakeUntilPredicateSubscriber {
            downstream: subscriber,
            predicate: Arc::clone(&self.predicate),
            upstream: Mutex::new(None),
            done: AtomicBool::new(false),
        }));
    }
}

struct TakeUntilPredicateSubscriber<T> {
    downstream: SubscriberRef<T>,
    predicate: PredicateFn<T>,
    upstream: Mutex<Option<SubscriptionRef>>,
    done: AtomicBool,
}

impl<T: Send + 'static> TakeUntilPredicateSubscriber<T> {
    fn finish(&self, outcome: Result<(), FlowError>) {
        self.done.store(true, Ordering::Release);
        if let Some(upstream) = self.upstream.lock().take() {
            upstream.cancel();
        }
        match outcome {
            Ok(()) => self.downstream.on_complete(),
            Err(error) => self.downstream.on_error(error),
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for TakeUntilPredicateSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        *self.upstream.lock() = Some(Arc::clone(&subscription));
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        match (self.predicate)(&item) {
            Ok(stop) => {
                self.downstream.on_next(item);
                if stop {
                    self.finish(Ok(()));
                }
            }
            Err(error) => self.finish(Err(error)),
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) {
            hook::report(error);
            return;
        }
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.downstream.on_complete();
        }
    }
}
