//! 单值流变体：恰好一个值或一个错误。
//!
//! # 设计背景（Why）
//! - `to_list`/`to_map` 这类折叠操作的结果天然是"单值或失败"，以专门的
//!   契约表达比让调用方在普通流上数条目更诚实；
//! - 终端事件契约被简化：没有需求计数，句柄只剩取消能力
//!   （[`Cancellable`]），`on_success` 与 `on_error` 互斥且至多一次。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::FlowError;
use crate::fns::{MapFn, SupplierFn};
use crate::protocol::{
    CancelFlag, Cancellable, Flow, FlowRef, SubscriberRef, Subscription, demand,
};

/// 单值流的观察者：`on_subscribe` 先行，随后 `on_success` 与 `on_error`
/// 二选一。
pub trait SingleObserver<T>: Send + Sync {
    /// 接收取消句柄（恰好一次，先于终端）。
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>);

    /// 成功终端：携带唯一的值。
    fn on_success(&self, value: T);

    /// 失败终端。
    fn on_error(&self, error: FlowError);
}

/// 单值流生产者。
pub trait SingleSource<T>: Send + Sync {
    /// 接受观察者。
    fn subscribe(&self, observer: Arc<dyn SingleObserver<T>>);
}

/// 共享单值流引用。
pub type SingleRef<T> = Arc<dyn SingleSource<T>>;

/// 共享观察者引用。
pub type SingleObserverRef<T> = Arc<dyn SingleObserver<T>>;

/// 立即成功的单值源。
pub fn just<T: Clone + Send + Sync + 'static>(value: T) -> SingleRef<T> {
    Arc::new(SingleJust { value })
}

struct SingleJust<T> {
    value: T,
}

impl<T: Clone + Send + Sync + 'static> SingleSource<T> for SingleJust<T> {
    fn subscribe(&self, observer: SingleObserverRef<T>) {
        let handle = Arc::new(CancelFlag::new());
        observer.on_subscribe(Arc::clone(&handle) as Arc<dyn Cancellable>);
        if !handle.is_cancelled() {
            observer.on_success(self.value.clone());
        }
    }
}

/// 立即失败的单值源。
pub fn fail<T: Send + Sync + 'static>(error: FlowError) -> SingleRef<T> {
    Arc::new(SingleFail { error })
}

struct SingleFail {
    error: FlowError,
}

impl<T: Send + Sync + 'static> SingleSource<T> for SingleFail {
    fn subscribe(&self, observer: SingleObserverRef<T>) {
        let handle = Arc::new(CancelFlag::new());
        observer.on_subscribe(Arc::clone(&handle) as Arc<dyn Cancellable>);
        if !handle.is_cancelled() {
            observer.on_error(self.error.clone());
        }
    }
}

/// 惰性取值源：订阅时调用 supplier，`Err` 即失败终端。
pub fn from_supplier<T: Send + Sync + 'static>(supplier: SupplierFn<T>) -> SingleRef<T> {
    Arc::new(SingleFromSupplier { supplier })
}

struct SingleFromSupplier<T> {
    supplier: SupplierFn<T>,
}

impl<T: Send + Sync + 'static> SingleSource<T> for SingleFromSupplier<T> {
    fn subscribe(&self, observer: SingleObserverRef<T>) {
        let handle = Arc::new(CancelFlag::new());
        observer.on_subscribe(Arc::clone(&handle) as Arc<dyn Cancellable>);
        if handle.is_cancelled() {
            return;
        }
        match (self.supplier)() {
            Ok(value) => observer.on_success(value),
            Err(error) => observer.on_error(error),
        }
    }
}

/// 成功值变换；用户函数失败转为失败终端。
pub fn map<A, B>(source: SingleRef<A>, mapper: MapFn<A, B>) -> SingleRef<B>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    Arc::new(SingleMap { source, mapper })
}

struct SingleMap<A, B> {
    source: SingleRef<A>,
    mapper: MapFn<A, B>,
}

impl<A, B> SingleSource<B> for SingleMap<A, B>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    fn subscribe(&self, observer: SingleObserverRef<B>) {
        self.source.subscribe(Arc::new(SingleMapObserver {
            downstream: observer,
            mapper: Arc::clone(&self.mapper),
        }));
    }
}

struct SingleMapObserver<A, B> {
    downstream: SingleObserverRef<B>,
    mapper: MapFn<A, B>,
}

impl<A, B> SingleObserver<A> for SingleMapObserver<A, B>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>) {
        self.downstream.on_subscribe(handle);
    }

    fn on_success(&self, value: A) {
        match (self.mapper)(value) {
            Ok(mapped) => self.downstream.on_success(mapped),
            Err(error) => self.downstream.on_error(error),
        }
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }
}

/// 把单值流降级为普通流：值在需求到达后发射，随后完成。
pub fn into_flow<T: Send + Sync + 'static>(source: SingleRef<T>) -> FlowRef<T> {
    Arc::new(SingleToFlow { source })
}

struct SingleToFlow<T> {
    source: SingleRef<T>,
}

impl<T: Send + Sync + 'static> Flow<T> for SingleToFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let bridge = Arc::new(ScalarBridge {
            downstream: subscriber,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(BridgeState {
                value: None,
                requested: false,
                upstream: None,
            }),
        });
        bridge
            .downstream
            .on_subscribe(Arc::clone(&bridge) as Arc<dyn Subscription>);
        self.source
            .subscribe(Arc::clone(&bridge) as SingleObserverRef<T>);
    }
}

struct BridgeState<T> {
    value: Option<T>,
    requested: bool,
    upstream: Option<Arc<dyn Cancellable>>,
}

/// 延迟标量桥：值与需求谁后到谁触发发射。
struct ScalarBridge<T> {
    downstream: SubscriberRef<T>,
    cancelled: AtomicBool,
    state: Mutex<BridgeState<T>>,
}

impl<T: Send + Sync + 'static> ScalarBridge<T> {
    fn emit(&self, value: T) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.downstream.on_next(value);
        if !self.cancelled.load(Ordering::Acquire) {
            self.downstream.on_complete();
        }
    }
}

impl<T: Send + Sync + 'static> Subscription for ScalarBridge<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        let ready = {
            let mut state = self.state.lock();
            state.requested = true;
            state.value.take()
        };
        if let Some(value) = ready {
            self.emit(value);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let upstream = self.state.lock().upstream.take();
        if let Some(handle) = upstream {
            handle.cancel();
        }
    }
}

impl<T: Send + Sync + 'static> SingleObserver<T> for ScalarBridge<T> {
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>) {
        if self.cancelled.load(Ordering::Acquire) {
            handle.cancel();
            return;
        }
        self.state.lock().upstream = Some(handle);
    }

    fn on_success(&self, value: T) {
        let ready = {
            let mut state = self.state.lock();
            if state.requested {
                Some(value)
            } else {
                state.value = Some(value);
                None
            }
        };
        if let Some(value) = ready {
            self.emit(value);
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.cancelled.load(Ordering::Acquire) {
            crate::error::hook::report(error);
            return;
        }
        self.downstream.on_error(error);
    }
}
