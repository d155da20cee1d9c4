use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::PredicateFn;
use crate::protocol::{Flow, FlowRef, Subscriber, SubscriberRef, SubscriptionRef};

/// 谓词筛选。被丢弃的条目向上游补一个信用，保证下游需求不被稀释。
pub fn filter<T>(source: FlowRef<T>, predicate: PredicateFn<T>) -> FlowRef<T>
where
    T: Send + 'static,
{
    Arc::new(FilterFlow { source, predicate })
}

struct FilterFlow<T> {
    source: FlowRef<T>,
    predicate: PredicateFn<T>,
}

impl<T: Send + 'static> Flow<T> for FilterFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        self.source.subscribe(Arc::new(FilterSubscriber {
            downstream: subscriber,
            predicate: Arc::clone(&self.predicate),
            upstream: Mutex::new(None),
            done: AtomicBool::new(false),
        }));
    }
}

struct FilterSubscriber<T> {
    downstream: SubscriberRef<T>,
    predicate: PredicateFn<T>,
    upstream: Mutex<Option<SubscriptionRef>>,
    done: AtomicBool,
}

impl<T: Send + 'static> Subscriber<T> for FilterSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        *self.upstream.lock() = Some(Arc::clone(&subscription));
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        match (self.predicate)(&item) {
            Ok(true) => self.downstream.on_next(item),
            Ok(false) => {
                // 条目被消费但未发射：补偿一个上游信用。
                if let Some(upstream) = self.upstream.lock().clone() {
                    upstream.request(1);
                }
            }
            Err(error) => {
                self.done.store(true, Ordering::Release);
                if let Some(upstream) = self.upstream.lock().take() {
                    upstream.cancel();
                }
                self.downstream.on_error(error);
            }
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
