//! 冷源：需求驱动的起点。
//!
//! # 设计背景（Why）
//! - 每次 `subscribe` 都会创建一个独立的发射状态机；条目只在下游授予
//!   需求后发射，取消随时可达（排水循环每步检查旗标）。
//! - 排水权由 `add_cap` 的返回值裁决：旧值为零的那次 `request` 负责
//!   发射，其余调用只累加需求，保证任意时刻至多一个发射线程（I1/I5）。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::error::FlowError;
use crate::protocol::subscription::{complete_immediately, fail_immediately};
use crate::protocol::{Flow, FlowRef, SubscriberRef, Subscription, demand};

/// 由共享向量驱动的冷源（`from_iter`）。
pub struct FlowIter<T> {
    items: Arc<Vec<T>>,
}

/// 把一个集合固化为冷源；每个订阅者都会收到完整序列。
pub fn from_iter<T>(items: impl IntoIterator<Item = T>) -> FlowRef<T>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(FlowIter {
        items: Arc::new(items.into_iter().collect()),
    })
}

impl<T: Clone + Send + Sync + 'static> Flow<T> for FlowIter<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        if self.items.is_empty() {
            complete_immediately(&subscriber);
            return;
        }
        let subscription = Arc::new(IterSubscription {
            items: Arc::clone(&self.items),
            index: AtomicUsize::new(0),
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            downstream: subscriber,
        });
        subscription
            .downstream
            .on_subscribe(Arc::clone(&subscription) as Arc<dyn Subscription>);
    }
}

struct IterSubscription<T> {
    items: Arc<Vec<T>>,
    index: AtomicUsize,
    requested: AtomicU64,
    cancelled: AtomicBool,
    downstream: SubscriberRef<T>,
}

impl<T: Clone + Send + Sync + 'static> IterSubscription<T> {
    fn drain(&self) {
        let mut emitted: u64 = 0;
        let mut goal = self.requested.load(Ordering::Acquire);
        loop {
            while emitted != goal {
                if self.cancelled.load(Ordering::Acquire) {
                    return;
                }
                let index = self.index.load(Ordering::Relaxed);
                if index >= self.items.len() {
                    self.downstream.on_complete();
                    return;
                }
                let item = self.items[index].clone();
                self.index.store(index + 1, Ordering::Relaxed);
                self.downstream.on_next(item);
                emitted += 1;
            }
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }
            if self.index.load(Ordering::Relaxed) >= self.items.len() {
                self.downstream.on_complete();
                return;
            }
            goal = self.requested.load(Ordering::Acquire);
            if goal == emitted {
                goal = demand::produced(&self.requested, emitted);
                if goal == 0 {
                    return;
                }
                emitted = 0;
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        if demand::add_cap(&self.requested, n) == 0 {
            self.drain();
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// 整数区间冷源：`start` 起连续 `count` 个 `i64`。
pub fn range(start: i64, count: u64) -> FlowRef<i64> {
    Arc::new(FlowRange { start, count })
}

struct FlowRange {
    start: i64,
    count: u64,
}

impl Flow<i64> for FlowRange {
    fn subscribe(&self, subscriber: SubscriberRef<i64>) {
        if self.count == 0 {
            complete_immediately(&subscriber);
            return;
        }
        let subscription = Arc::new(RangeSubscription {
            start: self.start,
            count: self.count,
            produced_total: AtomicU64::new(0),
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            downstream: subscriber,
        });
        subscription
            .downstream
            .on_subscribe(Arc::clone(&subscription) as Arc<dyn Subscription>);
    }
}

struct RangeSubscription {
    start: i64,
    count: u64,
    produced_total: AtomicU64,
    requested: AtomicU64,
    cancelled: AtomicBool,
    downstream: SubscriberRef<i64>,
}

impl RangeSubscription {
    fn drain(&self) {
        let mut emitted: u64 = 0;
        let mut goal = self.requested.load(Ordering::Acquire);
        loop {
            while emitted != goal {
                if self.cancelled.load(Ordering::Acquire) {
                    return;
                }
                let offset = self.produced_total.load(Ordering::Relaxed);
                if offset >= self.count {
                    self.downstream.on_complete();
                    return;
                }
                self.produced_total.store(offset + 1, Ordering::Relaxed);
                self.downstream.on_next(self.start.wrapping_add(offset as i64));
                emitted += 1;
            }
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }
            if self.produced_total.load(Ordering::Relaxed) >= self.count {
                self.downstream.on_complete();
                return;
            }
            goal = self.requested.load(Ordering::Acquire);
            if goal == emitted {
                goal = demand::produced(&self.requested, emitted);
                if goal == 0 {
                    return;
                }
                emitted = 0;
            }
        }
    }
}

impl Subscription for RangeSubscription {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        if demand::add_cap(&self.requested, n) == 0 {
            self.drain();
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// 单值冷源。
pub fn just<T>(value: T) -> FlowRef<T>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(FlowJust { value })
}

struct FlowJust<T> {
    value: T,
}

impl<T: Clone + Send + Sync + 'static> Flow<T> for FlowJust<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let subscription = Arc::new(ScalarSubscription {
            value: self.value.clone(),
            fired: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            downstream: subscriber,
        });
        subscription
            .downstream
            .on_subscribe(Arc::clone(&subscription) as Arc<dyn Subscription>);
    }
}

struct ScalarSubscription<T> {
    value: T,
    fired: AtomicBool,
    cancelled: AtomicBool,
    downstream: SubscriberRef<T>,
}

impl<T: Clone + Send + Sync + 'static> Subscription for ScalarSubscription<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.downstream.on_next(self.value.clone());
        if !self.cancelled.load(Ordering::Acquire) {
            self.downstream.on_complete();
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// 空源：句柄先行，立即完成。
pub fn empty<T: Send + Sync + 'static>() -> FlowRef<T> {
    Arc::new(FlowEmpty)
}

struct FlowEmpty;

impl<T: Send + Sync + 'static> Flow<T> for FlowEmpty {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        complete_immediately(&subscriber);
    }
}

/// 永不发射的源（`timeout` 等场景的测试靶）。
pub fn never<T: Send + Sync + 'static>() -> FlowRef<T> {
    Arc::new(FlowNever)
}

struct FlowNever;

impl<T: Send + Sync + 'static> Flow<T> for FlowNever {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        subscriber.on_subscribe(Arc::new(crate::protocol::subscription::NoopSubscription));
    }
}

/// 立即失败的源。
pub fn fail<T: Send + Sync + 'static>(error: FlowError) -> FlowRef<T> {
    Arc::new(FlowFail { error })
}

struct FlowFail {
    error: FlowError,
}

impl<T: Send + Sync + 'static> Flow<T> for FlowFail {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        fail_immediately(&subscriber, self.error.clone());
    }
}
