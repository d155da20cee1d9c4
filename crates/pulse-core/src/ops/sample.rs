use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::protocol::serial::SerializedSubscriber;
use crate::protocol::subscription::{SubscriptionSlot, TerminalOnce};
use crate::protocol::{
    Cancellable, Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};
use crate::scheduler::{SchedulerRef, WorkerRef, schedule_periodic};

/// 周期采样：定时器每次触发时原子交换出最新值并发射。
///
/// 上游按无界请求；发射受下游需求约束，零需求时以背压违例终止
/// （采样丢不起节拍，缓存旧值会改变语义）。取消同时撤销定时器与上游。
pub fn sample_timed<T>(source: FlowRef<T>, period: Duration, scheduler: SchedulerRef) -> FlowRef<T>
where
    T: Send + 'static,
{
    Arc::new(SampleTimedFlow {
        source,
        period,
        scheduler,
    })
}

struct SampleTimedFlow<T> {
    source: FlowRef<T>,
    period: Duration,
    scheduler: SchedulerRef,
}

impl<T: Send + 'static> Flow<T> for SampleTimedFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        // 定时线程与上游线程都会触达下游，先套串行化层。
        let serialized = SerializedSubscriber::new(subscriber);
        let worker = self.scheduler.create_worker();
        let sampler = Arc::new(SampleSubscriber {
            downstream: serialized,
            latest: Mutex::new(None),
            requested: AtomicU64::new(0),
            upstream: Arc::new(SubscriptionSlot::new()),
            worker: Arc::clone(&worker),
            timer: Mutex::new(None),
            terminated: TerminalOnce::new(),
        });
        sampler
            .downstream
            .on_subscribe(Arc::clone(&sampler) as SubscriptionRef);
        let tick_target = Arc::downgrade(&sampler);
        let timer = schedule_periodic(
            &worker,
            self.period,
            self.period,
            Arc::new(move || {
                if let Some(sampler) = tick_target.upgrade() {
                    sampler.tick();
                }
            }),
        );
        *sampler.timer.lock() = Some(timer);
        self.source.subscribe(sampler);
    }
}

struct SampleSubscriber<T> {
    downstream: Arc<SerializedSubscriber<T>>,
    latest: Mutex<Option<T>>,
    requested: AtomicU64,
    upstream: Arc<SubscriptionSlot>,
    worker: WorkerRef,
    timer: Mutex<Option<Arc<dyn Cancellable>>>,
    terminated: TerminalOnce,
}

impl<T: Send + 'static> SampleSubscriber<T> {
    fn teardown(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
        }
        self.worker.dispose();
    }

    fn tick(&self) {
        if self.terminated.is_terminated() {
            return;
        }
        let held = self.latest.lock().take();
        let Some(value) = held else { return };
        if self.requested.load(std::sync::atomic::Ordering::Acquire) > 0 {
            self.downstream.on_next(value);
            demand::produced(&self.requested, 1);
        } else {
            Subscription::cancel(self.upstream.as_ref());
            self.teardown();
            if self.terminated.try_terminate() {
                self.downstream
                    .on_error(FlowError::missing_demand("sample_timed"));
            }
        }
    }
}

impl<T: Send + 'static> Subscription for SampleSubscriber<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.requested, n);
    }

    fn cancel(&self) {
        Subscription::cancel(self.upstream.as_ref());
        self.teardown();
    }
}

impl<T: Send + 'static> Subscriber<T> for SampleSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.upstream.install(subscription) {
            Subscription::request(self.upstream.as_ref(), demand::UNBOUNDED);
        }
    }

    fn on_next(&self, item: T) {
        if !self.terminated.is_terminated() {
            *self.latest.lock() = Some(item);
        }
    }

    fn on_error(&self, error: FlowError) {
        self.teardown();
        if self.terminated.try_terminate() {
            self.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }

    fn on_complete(&self) {
        self.teardown();
        if self.terminated.try_terminate() {
            self.downstream.on_complete();
        }
    }
}
