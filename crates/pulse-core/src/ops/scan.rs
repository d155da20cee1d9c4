use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::BiFn;
use crate::protocol::subscription::{SubscriptionSlot, TerminalOnce};
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};
use crate::queue::{FusedQueue, SpscRing};

/// 带种子的累积扫描：先发射种子，随后每个上游条目对应一次折叠结果。
///
/// 需求换算：下游 `request(n)` 转译为 `n` 个上游请求，其中首个请求扣除
/// 种子在订阅时消耗的一个信用；因此 2 槽环形队列即可覆盖全部积压
/// （种子至多领先上游一个身位）。
pub fn scan_seed<T, R>(source: FlowRef<T>, seed: R, accumulator: BiFn<R, T, R>) -> FlowRef<R>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    Arc::new(ScanSeedFlow {
        source,
        seed,
        accumulator,
    })
}

struct ScanSeedFlow<T, R> {
    source: FlowRef<T>,
    seed: R,
    accumulator: BiFn<R, T, R>,
}

impl<T, R> Flow<R> for ScanSeedFlow<T, R>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<R>) {
        let scan = Arc::new(ScanSubscriber {
            downstream: subscriber,
            accumulator: Arc::clone(&self.accumulator),
            acc: Mutex::new(Some(self.seed.clone())),
            queue: SpscRing::with_capacity(2),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            upstream: Arc::new(SubscriptionSlot::new()),
            upstream_done: AtomicBool::new(false),
            error: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            terminated: TerminalOnce::new(),
            first_request: AtomicBool::new(false),
        });
        // 种子先行：在看到任何上游条目之前就占据队首。
        let _ = scan.queue.offer(self.seed.clone());
        scan.downstream
            .on_subscribe(Arc::clone(&scan) as SubscriptionRef);
        self.source.subscribe(scan);
    }
}

struct ScanSubscriber<T, R> {
    downstream: SubscriberRef<R>,
    accumulator: BiFn<R, T, R>,
    acc: Mutex<Option<R>>,
    queue: SpscRing<R>,
    requested: AtomicU64,
    wip: AtomicUsize,
    upstream: Arc<SubscriptionSlot>,
    upstream_done: AtomicBool,
    error: Mutex<Option<FlowError>>,
    cancelled: AtomicBool,
    terminated: TerminalOnce,
    first_request: AtomicBool,
}

impl<T, R> ScanSubscriber<T, R>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn halt_with(&self, error: FlowError) {
        Subscription::cancel(self.upstream.as_ref());
        *self.error.lock() = Some(error);
        self.upstream_done.store(true, Ordering::Release);
        self.drain();
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1usize;
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                self.queue.clear();
            } else {
                loop {
                    if self.cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    if self.requested.load(Ordering::Acquire) == 0 {
                        break;
                    }
                    match self.queue.poll() {
                        Some(value) => {
                            self.downstream.on_next(value);
                            demand::produced(&self.requested, 1);
                        }
                        None => break,
                    }
                }
                if self.upstream_done.load(Ordering::Acquire)
                    && self.queue.is_empty()
                    && !self.cancelled.load(Ordering::Acquire)
                    && self.terminated.try_terminate()
                {
                    match self.error.lock().take() {
                        Some(error) => self.downstream.on_error(error),
                        None => self.downstream.on_complete(),
                    }
                }
            }
            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                return;
            }
            missed = remaining;
        }
    }
}

impl<T, R> Subscription for ScanSubscriber<T, R>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.requested, n);
        // 首个请求扣除种子消耗的那一个信用。
        let upstream_share = if !self.first_request.swap(true, Ordering::AcqRel) {
            if n == demand::UNBOUNDED { n } else { n - 1 }
        } else {
            n
        };
        if upstream_share > 0 {
            Subscription::request(self.upstream.as_ref(), upstream_share);
        }
        self.drain();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        Subscription::cancel(self.upstream.as_ref());
    }
}

impl<T, R> Subscriber<T> for ScanSubscriber<T, R>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.upstream.install(subscription);
    }

    fn on_next(&self, item: T) {
        if self.cancelled.load(Ordering::Acquire) || self.upstream_done.load(Ordering::Acquire) {
            return;
        }
        let previous = match self.acc.lock().take() {
            Some(value) => value,
            None => return,
        };
        match (self.accumulator)(previous, item) {
            Ok(next) => {
                *self.acc.lock() = Some(next.clone());
                if self.queue.offer(next).is_err() {
                    self.halt_with(FlowError::protocol("scan backlog exceeded its two slots"));
                    return;
                }
                self.drain();
            }
            Err(error) => self.halt_with(error),
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.upstream_done.swap(true, Ordering::AcqRel) {
            hook::report(error);
            return;
        }
        *self.error.lock() = Some(error);
        self.drain();
    }

    fn on_complete(&self) {
        if !self.upstream_done.swap(true, Ordering::AcqRel) {
            self.drain();
        }
    }
}
