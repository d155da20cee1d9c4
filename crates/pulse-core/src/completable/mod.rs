//! 无值流变体：只有完成或失败两种结局。
//!
//! 契约与 [`crate::single`] 同构，载荷退化为空：`on_complete` 与
//! `on_error` 互斥且至多一次，句柄只有取消能力。

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::error::FlowError;
use crate::fns::SupplierFn;
use crate::protocol::subscription::{SubscriptionCancel, SubscriptionSlot};
use crate::protocol::{
    CancelFlag, Cancellable, FlowRef, Subscriber, SubscriptionRef, demand,
};

/// 无值流观察者。
pub trait CompletableObserver: Send + Sync {
    /// 接收取消句柄（恰好一次，先于终端）。
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>);

    /// 成功终端。
    fn on_complete(&self);

    /// 失败终端。
    fn on_error(&self, error: FlowError);
}

/// 无值流生产者。
pub trait CompletableSource: Send + Sync {
    /// 接受观察者。
    fn subscribe(&self, observer: Arc<dyn CompletableObserver>);
}

/// 共享无值流引用。
pub type CompletableRef = Arc<dyn CompletableSource>;

/// 共享观察者引用。
pub type CompletableObserverRef = Arc<dyn CompletableObserver>;

/// 立即完成。
pub fn complete() -> CompletableRef {
    Arc::new(CompletableComplete)
}

struct CompletableComplete;

impl CompletableSource for CompletableComplete {
    fn subscribe(&self, observer: CompletableObserverRef) {
        let handle = Arc::new(CancelFlag::new());
        observer.on_subscribe(Arc::clone(&handle) as Arc<dyn Cancellable>);
        if !handle.is_cancelled() {
            observer.on_complete();
        }
    }
}

/// 立即失败。
pub fn fail(error: FlowError) -> CompletableRef {
    Arc::new(CompletableFail { error })
}

struct CompletableFail {
    error: FlowError,
}

impl CompletableSource for CompletableFail {
    fn subscribe(&self, observer: CompletableObserverRef) {
        let handle = Arc::new(CancelFlag::new());
        observer.on_subscribe(Arc::clone(&handle) as Arc<dyn Cancellable>);
        if !handle.is_cancelled() {
            observer.on_error(self.error.clone());
        }
    }
}

/// 惰性副作用源：订阅时执行动作，`Err` 即失败终端。
pub fn from_action(action: SupplierFn<()>) -> CompletableRef {
    Arc::new(CompletableFromAction { action })
}

struct CompletableFromAction {
    action: SupplierFn<()>,
}

impl CompletableSource for CompletableFromAction {
    fn subscribe(&self, observer: CompletableObserverRef) {
        let handle = Arc::new(CancelFlag::new());
        observer.on_subscribe(Arc::clone(&handle) as Arc<dyn Cancellable>);
        if handle.is_cancelled() {
            return;
        }
        match (self.action)() {
            Ok(()) => observer.on_complete(),
            Err(error) => observer.on_error(error),
        }
    }
}

/// 丢弃条目只保留终端：普通流到无值流的桥。
pub fn ignore_elements<T: Send + Sync + 'static>(source: FlowRef<T>) -> CompletableRef {
    Arc::new(IgnoreElements { source })
}

struct IgnoreElements<T> {
    source: FlowRef<T>,
}

impl<T: Send + Sync + 'static> CompletableSource for IgnoreElements<T> {
    fn subscribe(&self, observer: CompletableObserverRef) {
        let slot = Arc::new(SubscriptionSlot::new());
        observer.on_subscribe(Arc::new(SubscriptionCancel::new(Arc::clone(&slot))));
        self.source
            .subscribe(Arc::new(IgnoreSubscriber::new(observer, slot)));
    }
}

struct IgnoreSubscriber<T> {
    downstream: CompletableObserverRef,
    slot: Arc<SubscriptionSlot>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> IgnoreSubscriber<T> {
    fn new(downstream: CompletableObserverRef, slot: Arc<SubscriptionSlot>) -> Self {
        IgnoreSubscriber {
            downstream,
            slot,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Subscriber<T> for IgnoreSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.slot.install(subscription) {
            use crate::protocol::Subscription as _;
            self.slot.request(demand::UNBOUNDED);
        }
    }

    fn on_next(&self, _item: T) {
        // 条目即噪声，契约只关心终端。
    }

    fn on_error(&self, error: FlowError) {
        if Cancellable::is_cancelled(self.slot.as_ref()) {
            crate::error::hook::report(error);
            return;
        }
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        if !Cancellable::is_cancelled(self.slot.as_ref()) {
            self.downstream.on_complete();
        }
    }
}
