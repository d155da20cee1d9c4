use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::MapFn;
use crate::protocol::arbiter::DemandArbiter;
use crate::protocol::serial::SerializedSubscriber;
use crate::protocol::subscription::{SubscriptionSlot, TerminalOnce};
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef,
};
use crate::queue::{FusedQueue, SpscRing};
use crate::source::from_iter;

/// 顺序映射：上游条目逐个映射为内层流，内层之间严格串行订阅。
///
/// # 逻辑解析（How）
/// - `subscribe-next` 蹦床（missed 计数）折叠重入：同步完成的内层在深层
///   递归中被压平为循环，栈深度有界；
/// - `prefetch` 决定上游索取节奏：每消费一个上游条目就补一个信用；
/// - 下游需求经 [`DemandArbiter`] 在内层之间守恒。
pub fn concat_map<A, B>(
    source: FlowRef<A>,
    mapper: MapFn<A, FlowRef<B>>,
    prefetch: usize,
) -> FlowRef<B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Arc::new(ConcatMapFlow {
        source,
        mapper,
        prefetch: prefetch.max(1),
    })
}

/// 流的流的顺序拼接：恒等映射的 [`concat_map`] 特化。
///
/// 不变量：内层 `j` 的第 `k` 项先于内层 `j + 1` 的第 `0` 项。
pub fn concat<T>(sources: FlowRef<FlowRef<T>>) -> FlowRef<T>
where
    T: Send + 'static,
{
    concat_map(sources, Arc::new(|inner: FlowRef<T>| Ok(inner)), 2)
}

/// 固定清单的顺序拼接。
pub fn concat_array<T>(sources: Vec<FlowRef<T>>) -> FlowRef<T>
where
    T: Send + 'static,
{
    concat(from_iter(sources))
}

struct ConcatMapFlow<A, B> {
    source: FlowRef<A>,
    mapper: MapFn<A, FlowRef<B>>,
    prefetch: usize,
}

impl<A, B> Flow<B> for ConcatMapFlow<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<B>) {
        let coordinator =
            Arc::new_cyclic(|weak: &Weak<ConcatCoordinator<A, B>>| ConcatCoordinator {
                weak: weak.clone(),
                downstream: SerializedSubscriber::new(subscriber),
                mapper: Arc::clone(&self.mapper),
                backlog: SpscRing::with_capacity(self.prefetch),
                arbiter: Arc::new(DemandArbiter::new()),
                upstream: Arc::new(SubscriptionSlot::new()),
                trampoline: AtomicUsize::new(0),
                inner_active: AtomicBool::new(false),
                upstream_done: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                error: Mutex::new(None),
                terminated: TerminalOnce::new(),
                prefetch: self.prefetch,
            });
        coordinator
            .downstream
            .on_subscribe(Arc::new(ConcatSubscription {
                parent: Arc::clone(&coordinator),
            }));
        self.source.subscribe(coordinator);
    }
}

struct ConcatCoordinator<A, B> {
    weak: Weak<ConcatCoordinator<A, B>>,
    downstream: Arc<SerializedSubscriber<B>>,
    mapper: MapFn<A, FlowRef<B>>,
    backlog: SpscRing<A>,
    arbiter: Arc<DemandArbiter>,
    upstream: Arc<SubscriptionSlot>,
    trampoline: AtomicUsize,
    inner_active: AtomicBool,
    upstream_done: AtomicBool,
    cancelled: AtomicBool,
    error: Mutex<Option<FlowError>>,
    terminated: TerminalOnce,
    prefetch: usize,
}

impl<A, B> ConcatCoordinator<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::Release);
        Subscription::cancel(self.upstream.as_ref());
        Subscription::cancel(self.arbiter.as_ref());
        self.backlog.clear();
    }

    fn fail_now(&self, error: FlowError) {
        Subscription::cancel(self.upstream.as_ref());
        Subscription::cancel(self.arbiter.as_ref());
        if self.terminated.try_terminate() {
            self.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }

    /// subscribe-next 蹦床：顺序推进内层订阅，重入只登记不递归。
    fn subscribe_next(&self) {
        if self.trampoline.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1usize;
        loop {
            if !self.cancelled.load(Ordering::Acquire)
                && !self.terminated.is_terminated()
                && !self.inner_active.load(Ordering::Acquire)
            {
                match self.backlog.poll() {
                    Some(item) => {
                        // 消费一个上游条目，补一个预取信用。
                        Subscription::request(self.upstream.as_ref(), 1);
                        match (self.mapper)(item) {
                            Ok(inner_flow) => {
                                self.inner_active.store(true, Ordering::Release);
                                if let Some(me) = self.weak.upgrade() {
                                    inner_flow.subscribe(Arc::new(ConcatInner { parent: me }));
                                }
                            }
                            Err(error) => self.fail_now(error),
                        }
                    }
                    None => {
                        if self.upstream_done.load(Ordering::Acquire) {
                            let pending = self.error.lock().take();
                            match pending {
                                Some(error) => self.fail_now(error),
                                None => {
                                    if self.terminated.try_terminate() {
                                        self.downstream.on_complete();
                                    }
                                }
                            }
                        }
                    }
                }
            }
            let remaining = self.trampoline.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                return;
            }
            missed = remaining;
        }
    }
}

struct ConcatSubscription<A, B> {
    parent: Arc<ConcatCoordinator<A, B>>,
}

impl<A, B> Subscription for ConcatSubscription<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn request(&self, n: u64) {
        Subscription::request(self.parent.arbiter.as_ref(), n);
    }

    fn cancel(&self) {
        self.parent.cancel_all();
    }
}

impl<A, B> Subscriber<A> for ConcatCoordinator<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.upstream.install(subscription) {
            Subscription::request(self.upstream.as_ref(), self.prefetch as u64);
        }
    }

    fn on_next(&self, item: A) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        if self.backlog.offer(item).is_err() {
            self.fail_now(FlowError::protocol("concat_map backlog exceeded prefetch"));
            return;
        }
        self.subscribe_next();
    }

    fn on_error(&self, error: FlowError) {
        if self.terminated.is_terminated() {
            hook::report(error);
            return;
        }
        // 立即终端：现任内层一并撤销。
        Subscription::cancel(self.arbiter.as_ref());
        self.upstream_done.store(true, Ordering::Release);
        if self.terminated.try_terminate() {
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&self) {
        self.upstream_done.store(true, Ordering::Release);
        self.subscribe_next();
    }
}

struct ConcatInner<A, B> {
    parent: Arc<ConcatCoordinator<A, B>>,
}

impl<A, B> Subscriber<B> for ConcatInner<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.parent.arbiter.set_subscription(subscription);
    }

    fn on_next(&self, item: B) {
        self.parent.downstream.on_next(item);
        self.parent.arbiter.produced(1);
    }

    fn on_error(&self, error: FlowError) {
        if self.parent.terminated.is_terminated() {
            hook::report(error);
            return;
        }
        self.parent.fail_now(error);
    }

    fn on_complete(&self) {
        self.parent.inner_active.store(false, Ordering::Release);
        self.parent.subscribe_next();
    }
}
