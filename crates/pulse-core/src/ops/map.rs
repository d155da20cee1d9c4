use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::MapFn;
use crate::protocol::{Flow, FlowRef, Subscriber, SubscriberRef, SubscriptionRef};

/// 逐项变换。需求与取消直接透传上游句柄。
pub fn map<A, B>(source: FlowRef<A>, mapper: MapFn<A, B>) -> FlowRef<B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Arc::new(MapFlow { source, mapper })
}

struct MapFlow<A, B> {
    source: FlowRef<A>,
    mapper: MapFn<A, B>,
}

impl<A, B> Flow<B> for MapFlow<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<B>) {
        self.source.subscribe(Arc::new(MapSubscriber {
            downstream: subscriber,
            mapper: Arc::clone(&self.mapper),
            upstream: Mutex::new(None),
            done: AtomicBool::new(false),
        }));
    }
}

struct MapSubscriber<A, B> {
    downstream: SubscriberRef<B>,
    mapper: MapFn<A, B>,
    upstream: Mutex<Option<SubscriptionRef>>,
    done: AtomicBool,
}

impl<A, B> Subscriber<A> for MapSubscriber<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        *self.upstream.lock() = Some(Arc::clone(&subscription));
        // 一对一变换：需求算术无需改写，句柄直接交给下游。
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&self, item: A) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        match (self.mapper)(item) {
            Ok(mapped) => self.downstream.on_next(mapped),
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
