use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::MapFn;
use crate::ops::DEFAULT_PREFETCH;
use crate::protocol::subscription::{SubscriptionSlot, TerminalOnce};
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};
use crate::queue::{FusedQueue, SpscRing};

/// 切换映射：每个上游条目衍生一个内层流，新内层挤掉旧内层。
///
/// # 逻辑解析（How）
/// - 每次安装携带单调递增代际 `c`；任何信号若其代际不等于当前代际，
///   条目被静默丢弃、错误交全局钩子；
/// - 上游在首个下游请求时按无界索取；下游需求只门控排水循环；
/// - 取消同时撤销上游与现任内层，`cancelled` 旗标承担 CANCELLED 哨兵的
///   短路职责，让迟到的安装在入口处夭折。
pub fn switch_map<A, B>(source: FlowRef<A>, mapper: MapFn<A, FlowRef<B>>) -> FlowRef<B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Arc::new(SwitchMapFlow { source, mapper })
}

struct SwitchMapFlow<A, B> {
    source: FlowRef<A>,
    mapper: MapFn<A, FlowRef<B>>,
}

impl<A, B> Flow<B> for SwitchMapFlow<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<B>) {
        let coordinator =
            Arc::new_cyclic(|weak: &Weak<SwitchCoordinator<A, B>>| SwitchCoordinator {
                weak: weak.clone(),
                downstream: subscriber,
                mapper: Arc::clone(&self.mapper),
                generation: AtomicU64::new(0),
                active: Mutex::new(None),
                upstream: Arc::new(SubscriptionSlot::new()),
                requested: AtomicU64::new(0),
                wip: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                upstream_done: AtomicBool::new(false),
                error: Mutex::new(None),
                terminated: TerminalOnce::new(),
                first_request: AtomicBool::new(false),
            });
        coordinator
            .downstream
            .on_subscribe(Arc::clone(&coordinator) as SubscriptionRef);
        self.source.subscribe(coordinator);
    }
}

struct SwitchCoordinator<A, B> {
    weak: Weak<SwitchCoordinator<A, B>>,
    downstream: SubscriberRef<B>,
    mapper: MapFn<A, FlowRef<B>>,
    generation: AtomicU64,
    active: Mutex<Option<Arc<SwitchInner<A, B>>>>,
    upstream: Arc<SubscriptionSlot>,
    requested: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    upstream_done: AtomicBool,
    error: Mutex<Option<FlowError>>,
    terminated: TerminalOnce,
    first_request: AtomicBool,
}

impl<A, B> SwitchCoordinator<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn halt_with(&self, error: FlowError) {
        if self.terminated.is_terminated() {
            hook::report(error);
            return;
        }
        *self.error.lock() = Some(error);
        self.upstream_done.store(true, Ordering::Release);
        self.drain();
    }

    fn inner_error(&self, generation: u64, error: FlowError) {
        if generation != self.generation.load(Ordering::Acquire) {
            // 过期内层的错误没有接收者。
            hook::report(error);
            return;
        }
        Subscription::cancel(self.upstream.as_ref());
        self.halt_with(error);
    }

    fn inner_complete(&self, generation: u64) {
        if generation == self.generation.load(Ordering::Acquire) {
            self.drain();
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1usize;
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                if let Some(inner) = self.active.lock().take() {
                    Subscription::cancel(inner.subscription.as_ref());
                }
            } else {
                self.drain_round();
            }
            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                return;
            }
            missed = remaining;
        }
    }

    fn drain_round(&self) {
        // 错误短路：现任内层与上游一并退场。
        let pending_error = self.error.lock().take();
        if let Some(error) = pending_error {
            Subscription::cancel(self.upstream.as_ref());
            if let Some(inner) = self.active.lock().take() {
                Subscription::cancel(inner.subscription.as_ref());
            }
            if self.terminated.try_terminate() {
                self.downstream.on_error(error);
            } else {
                hook::report(error);
            }
            return;
        }

        let current = self.generation.load(Ordering::Acquire);
        let inner = self.active.lock().clone();
        let mut inner_exhausted = inner.is_none();
        if let Some(inner) = inner {
            if inner.generation == current {
                let mut emitted: u64 = 0;
                while self.requested.load(Ordering::Acquire) > 0 {
                    match inner.queue.poll() {
                        Some(item) => {
                            self.downstream.on_next(item);
                            demand::produced(&self.requested, 1);
                            emitted += 1;
                        }
                        None => break,
                    }
                }
                if emitted > 0 {
                    Subscription::request(inner.subscription.as_ref(), emitted);
                }
                if inner.done.load(Ordering::Acquire) && inner.queue.is_empty() {
                    let mut active = self.active.lock();
                    if active
                        .as_ref()
                        .is_some_and(|held| held.generation == inner.generation)
                    {
                        *active = None;
                    }
                    inner_exhausted = true;
                }
            }
        }

        if inner_exhausted
            && self.upstream_done.load(Ordering::Acquire)
            && self.active.lock().is_none()
            && self.terminated.try_terminate()
        {
            self.downstream.on_complete();
        }
    }
}

impl<A, B> Subscription for SwitchCoordinator<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.requested, n);
        if !self.first_request.swap(true, Ordering::AcqRel) {
            // 上游条目只用来换轨，不占下游需求：无界索取。
            Subscription::request(self.upstream.as_ref(), demand::UNBOUNDED);
        }
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            Subscription::cancel(self.upstream.as_ref());
            self.drain();
        }
    }
}

impl<A, B> Subscriber<A> for SwitchCoordinator<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.upstream.install(subscription);
    }

    fn on_next(&self, item: A) {
        if self.cancelled.load(Ordering::Acquire) || self.terminated.is_terminated() {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(previous) = self.active.lock().take() {
            Subscription::cancel(previous.subscription.as_ref());
        }
        match (self.mapper)(item) {
            Err(error) => {
                Subscription::cancel(self.upstream.as_ref());
                self.halt_with(error);
            }
            Ok(inner_flow) => {
                let Some(me) = self.weak.upgrade() else {
                    return;
                };
                let inner = Arc::new(SwitchInner {
                    parent: me,
                    generation,
                    queue: SpscRing::with_capacity(DEFAULT_PREFETCH),
                    subscription: Arc::new(SubscriptionSlot::new()),
                    done: AtomicBool::new(false),
                });
                {
                    let mut active = self.active.lock();
                    if self.cancelled.load(Ordering::Acquire) {
                        return;
                    }
                    *active = Some(Arc::clone(&inner));
                }
                inner_flow.subscribe(inner);
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        self.halt_with(error);
    }

    fn on_complete(&self) {
        self.upstream_done.store(true, Ordering::Release);
        self.drain();
    }
}

struct SwitchInner<A, B> {
    parent: Arc<SwitchCoordinator<A, B>>,
    generation: u64,
    queue: SpscRing<B>,
    subscription: Arc<SubscriptionSlot>,
    done: AtomicBool,
}

impl<A, B> Subscriber<B> for SwitchInner<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.generation != self.parent.generation.load(Ordering::Acquire) {
            subscription.cancel();
            return;
        }
        if self.subscription.install(subscription) {
            Subscription::request(self.subscription.as_ref(), DEFAULT_PREFETCH as u64);
        }
    }

    fn on_next(&self, item: B) {
        if self.generation != self.parent.generation.load(Ordering::Acquire) {
            // 过期条目静默丢弃。
            return;
        }
        if self.queue.offer(item).is_err() {
            self.parent.inner_error(
                self.generation,
                FlowError::protocol("switch_map inner exceeded its prefetch window"),
            );
            return;
        }
        self.parent.drain();
    }

    fn on_error(&self, error: FlowError) {
        self.parent.inner_error(self.generation, error);
    }

    fn on_complete(&self) {
        self.done.store(true, Ordering::Release);
        self.parent.inner_complete(self.generation);
    }
}
