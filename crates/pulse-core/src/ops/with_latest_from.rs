use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::BiFn;
use crate::protocol::serial::SerializedSubscriber;
use crate::protocol::subscription::{SubscriptionSlot, TerminalOnce};
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};

/// 主流条目与副流"已知最新值"的二元组合。
///
/// 副流按无界请求，最新值存放于单个原子格；主流条目在格为空时被丢弃
/// 并向主流补一个信用（不缓冲）。副流完成不终止结果，副流错误终止并
/// 取消主流；主流终端取消副流。
pub fn with_latest_from<A, B, C>(
    primary: FlowRef<A>,
    secondary: FlowRef<B>,
    combiner: BiFn<A, B, C>,
) -> FlowRef<C>
where
    A: Send + 'static,
    B: Clone + Send + 'static,
    C: Send + 'static,
{
    Arc::new(WithLatestFromFlow {
        primary,
        secondary,
        combiner,
    })
}

struct WithLatestFromFlow<A, B, C> {
    primary: FlowRef<A>,
    secondary: FlowRef<B>,
    combiner: BiFn<A, B, C>,
}

impl<A, B, C> Flow<C> for WithLatestFromFlow<A, B, C>
where
    A: Send + 'static,
    B: Clone + Send + 'static,
    C: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<C>) {
        let main = Arc::new(WlfMain {
            downstream: SerializedSubscriber::new(subscriber),
            combiner: Arc::clone(&self.combiner),
            latest: Mutex::new(None),
            primary_slot: Arc::new(SubscriptionSlot::new()),
            secondary_slot: Arc::new(SubscriptionSlot::new()),
            terminated: TerminalOnce::new(),
        });
        main.downstream
            .on_subscribe(Arc::clone(&main) as SubscriptionRef);
        self.secondary.subscribe(Arc::new(WlfOther {
            main: Arc::clone(&main),
        }));
        self.primary.subscribe(main);
    }
}

struct WlfMain<A, B, C> {
    downstream: Arc<SerializedSubscriber<C>>,
    combiner: BiFn<A, B, C>,
    latest: Mutex<Option<B>>,
    primary_slot: Arc<SubscriptionSlot>,
    secondary_slot: Arc<SubscriptionSlot>,
    terminated: TerminalOnce,
}

impl<A, B, C> WlfMain<A, B, C>
where
    A: Send + 'static,
    B: Clone + Send + 'static,
    C: Send + 'static,
{
    fn halt_error(&self, error: FlowError) {
        Subscription::cancel(self.primary_slot.as_ref());
        Subscription::cancel(self.secondary_slot.as_ref());
        if self.terminated.try_terminate() {
            self.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }
}

impl<A, B, C> Subscription for WlfMain<A, B, C>
where
    A: Send + 'static,
    B: Clone + Send + 'static,
    C: Send + 'static,
{
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        Subscription::request(self.primary_slot.as_ref(), n);
    }

    fn cancel(&self) {
        Subscription::cancel(self.primary_slot.as_ref());
        Subscription::cancel(self.secondary_slot.as_ref());
    }
}

impl<A, B, C> Subscriber<A> for WlfMain<A, B, C>
where
    A: Send + 'static,
    B: Clone + Send + 'static,
    C: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.primary_slot.install(subscription);
    }

    fn on_next(&self, item: A) {
        if self.terminated.is_terminated() {
            return;
        }
        let snapshot = self.latest.lock().clone();
        match snapshot {
            None => {
                // 格为空：条目丢弃，向主流补一个信用。
                Subscription::request(self.primary_slot.as_ref(), 1);
            }
            Some(latest) => match (self.combiner)(item, latest) {
                Ok(combined) => self.downstream.on_next(combined),
                Err(error) => self.halt_error(error),
            },
        }
    }

    fn on_error(&self, error: FlowError) {
        Subscription::cancel(self.secondary_slot.as_ref());
        if self.terminated.try_terminate() {
            self.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }

    fn on_complete(&self) {
        Subscription::cancel(self.secondary_slot.as_ref());
        if self.terminated.try_terminate() {
            self.downstream.on_complete();
        }
    }
}

struct WlfOther<A, B, C> {
    main: Arc<WlfMain<A, B, C>>,
}

impl<A, B, C> Subscriber<B> for WlfOther<A, B, C>
where
    A: Send + 'static,
    B: Clone + Send + 'static,
    C: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.main.secondary_slot.install(subscription) {
            Subscription::request(self.main.secondary_slot.as_ref(), demand::UNBOUNDED);
        }
    }

    fn on_next(&self, item: B) {
        *self.main.latest.lock() = Some(item);
    }

    fn on_error(&self, error: FlowError) {
        // 副流失败终止整体。
        Subscription::cancel(self.main.primary_slot.as_ref());
        if self.main.terminated.try_terminate() {
            self.main.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }

    fn on_complete(&self) {
        // 副流完成不影响结果流。
    }
}
