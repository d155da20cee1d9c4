use std::sync::Arc;

use crate::error::{FlowError, hook};
use crate::protocol::serial::SerializedSubscriber;
use crate::protocol::subscription::{SubscriptionSlot, TerminalOnce};
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};

/// 镜像主流，直到另一条流发出第一个信号（条目或终端）即完成。
///
/// # 逻辑解析（How）
/// - 双槽复合取消：主/副两个订阅槽由同一状态共享，谁先终端谁负责撤销
///   对方；
/// - "副流先于主流订阅完成就终止"的竞态由槽位终态吸收：副流胜出时两个
///   槽都已取消，主源的句柄安装会在入口处被吞并并立即取消，下游拿到的
///   是一次空完成；
/// - 下游入口经串行化层收敛，两个信号源不会并发触达。
pub fn take_until<T, U>(primary: FlowRef<T>, other: FlowRef<U>) -> FlowRef<T>
where
    T: Send + 'static,
    U: Send + 'static,
{
    Arc::new(TakeUntilFlow { primary, other })
}

struct TakeUntilFlow<T, U> {
    primary: FlowRef<T>,
    other: FlowRef<U>,
}

impl<T, U> Flow<T> for TakeUntilFlow<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let main = Arc::new(TakeUntilMain {
            downstream: SerializedSubscriber::new(subscriber),
            primary_slot: Arc::new(SubscriptionSlot::new()),
            other_slot: Arc::new(SubscriptionSlot::new()),
            terminated: TerminalOnce::new(),
        });
        main.downstream.on_subscribe(Arc::new(TakeUntilSubscription {
            main: Arc::clone(&main),
        }));
        // 副流先行订阅：它可能在主流就位前就叫停整条链路。
        self.other.subscribe(Arc::new(TakeUntilOther::<T, U> {
            main: Arc::clone(&main),
            _marker: std::marker::PhantomData,
        }));
        self.primary.subscribe(main);
    }
}

struct TakeUntilMain<T> {
    downstream: Arc<SerializedSubscriber<T>>,
    primary_slot: Arc<SubscriptionSlot>,
    other_slot: Arc<SubscriptionSlot>,
    terminated: TerminalOnce,
}

impl<T: Send + 'static> TakeUntilMain<T> {
    fn cancel_both(&self) {
        Subscription::cancel(self.primary_slot.as_ref());
        Subscription::cancel(self.other_slot.as_ref());
    }

    /// 副流的第一个信号：整条结果流完成。
    fn halt_complete(&self) {
        if self.terminated.try_terminate() {
            self.cancel_both();
            self.downstream.on_complete();
        }
    }

    fn halt_error(&self, error: FlowError) {
        if self.terminated.try_terminate() {
            self.cancel_both();
            self.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }
}

struct TakeUntilSubscription<T> {
    main: Arc<TakeUntilMain<T>>,
}

impl<T: Send + 'static> Subscription for TakeUntilSubscription<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        Subscription::request(self.main.primary_slot.as_ref(), n);
    }

    fn cancel(&self) {
        self.main.cancel_both();
    }
}

impl<T: Send + 'static> Subscriber<T> for TakeUntilMain<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.primary_slot.install(subscription);
    }

    fn on_next(&self, item: T) {
        if !self.terminated.is_terminated() {
            self.downstream.on_next(item);
        }
    }

    fn on_error(&self, error: FlowError) {
        Subscription::cancel(self.other_slot.as_ref());
        if self.terminated.try_terminate() {
            self.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }

    fn on_complete(&self) {
        Subscription::cancel(self.other_slot.as_ref());
        if self.terminated.try_terminate() {
            self.downstream.on_complete();
        }
    }
}

struct TakeUntilOther<T, U> {
    main: Arc<TakeUntilMain<T>>,
    _marker: std::marker::PhantomData<fn(U)>,
}

impl<T, U> Subscriber<U> for TakeUntilOther<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.main.other_slot.install(subscription) {
            Subscription::request(self.main.other_slot.as_ref(), 1);
        }
    }

    fn on_next(&self, _item: U) {
        self.main.halt_complete();
    }

    fn on_error(&self, error: FlowError) {
        self.main.halt_error(error);
    }

    fn on_complete(&self) {
        self.main.halt_complete();
    }
}
