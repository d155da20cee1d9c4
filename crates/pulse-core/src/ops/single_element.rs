use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};

/// 恰好一个元素：多于一个立即失败，空序列回退到 `default`（缺省时失败）。
///
/// 元素在上游完成时才发射（此前无法断定唯一性），发射本身仍受下游需求
/// 约束——值与需求谁后到谁触发。
pub fn single<T>(source: FlowRef<T>, default: Option<T>) -> FlowRef<T>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(SingleElementFlow { source, default })
}

struct SingleElementFlow<T> {
    source: FlowRef<T>,
    default: Option<T>,
}

impl<T: Clone + Send + Sync + 'static> Flow<T> for SingleElementFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let core = Arc::new(ScalarCore {
            downstream: subscriber,
            upstream: Mutex::new(None),
            slot: Mutex::new(ScalarSlot {
                pending: None,
                requested: false,
            }),
            cancelled: AtomicBool::new(false),
        });
        core.downstream.on_subscribe(Arc::new(ScalarSubscription {
            core: Arc::clone(&core),
        }));
        self.source.subscribe(Arc::new(SingleElementSubscriber {
            core,
            default: self.default.clone(),
            seen: Mutex::new(None),
            done: AtomicBool::new(false),
        }));
    }
}

struct ScalarSlot<T> {
    pending: Option<T>,
    requested: bool,
}

/// 延迟标量核心：完成后待发射的值与下游需求的会合点。
struct ScalarCore<T> {
    downstream: SubscriberRef<T>,
    upstream: Mutex<Option<SubscriptionRef>>,
    slot: Mutex<ScalarSlot<T>>,
    cancelled: AtomicBool,
}

impl<T: Send + 'static> ScalarCore<T> {
    fn emit(&self, value: T) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.downstream.on_next(value);
        if !self.cancelled.load(Ordering::Acquire) {
            self.downstream.on_complete();
        }
    }

    /// 登记待发射值；若需求已就位则立即发射。
    fn settle(&self, value: T) {
        let ready = {
            let mut slot = self.slot.lock();
            if slot.requested {
                Some(value)
            } else {
                slot.pending = Some(value);
                None
            }
        };
        if let Some(value) = ready {
            self.emit(value);
        }
    }

    fn cancel_upstream(&self) {
        if let Some(upstream) = self.upstream.lock().take() {
            upstream.cancel();
        }
    }
}

struct ScalarSubscription<T> {
    core: Arc<ScalarCore<T>>,
}

impl<T: Send + 'static> Subscription for ScalarSubscription<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        let ready = {
            let mut slot = self.core.slot.lock();
            slot.requested = true;
            slot.pending.take()
        };
        if let Some(value) = ready {
            self.core.emit(value);
        }
    }

    fn cancel(&self) {
        self.core.cancelled.store(true, Ordering::Release);
        self.core.cancel_upstream();
    }
}

struct SingleElementSubscriber<T> {
    core: Arc<ScalarCore<T>>,
    default: Option<T>,
    seen: Mutex<Option<T>>,
    done: AtomicBool,
}

impl<T: Clone + Send + Sync + 'static> Subscriber<T> for SingleElementSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        *self.core.upstream.lock() = Some(Arc::clone(&subscription));
        // 唯一性判定需要看到完整序列。
        subscription.request(demand::UNBOUNDED);
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let mut seen = self.seen.lock();
        if seen.is_some() {
            drop(seen);
            self.done.store(true, Ordering::Release);
            self.core.cancel_upstream();
            self.core
                .downstream
                .on_error(FlowError::protocol("sequence contains more than one element"));
            return;
        }
        *seen = Some(item);
    }

    fn on_error(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) {
            hook::report(error);
            return;
        }
        self.core.downstream.on_error(error);
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let value = self.seen.lock().take().or_else(|| self.default.clone());
        match value {
            Some(value) => self.core.settle(value),
            None => self
                .core
                .downstream
                .on_error(FlowError::protocol("sequence contains no elements")),
        }
    }
}
