use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::fns::KeyFn;
use crate::protocol::subscription::{SubscriptionCancel, SubscriptionSlot};
use crate::protocol::{Cancellable, FlowRef, Subscriber, Subscription, SubscriptionRef, demand};
use crate::single::{SingleObserverRef, SingleRef, SingleSource};

/// 收集完整序列为 `Vec`，以单值流交付。
pub fn to_list<T>(source: FlowRef<T>) -> SingleRef<Vec<T>>
where
    T: Send + Sync + 'static,
{
    Arc::new(ToList { source })
}

struct ToList<T> {
    source: FlowRef<T>,
}

impl<T: Send + Sync + 'static> SingleSource<Vec<T>> for ToList<T> {
    fn subscribe(&self, observer: SingleObserverRef<Vec<T>>) {
        let slot = Arc::new(SubscriptionSlot::new());
        observer.on_subscribe(Arc::new(SubscriptionCancel::new(Arc::clone(&slot))));
        self.source.subscribe(Arc::new(ListSubscriber {
            downstream: observer,
            slot,
            buffer: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
        }));
    }
}

struct ListSubscriber<T> {
    downstream: SingleObserverRef<Vec<T>>,
    slot: Arc<SubscriptionSlot>,
    buffer: Mutex<Vec<T>>,
    done: AtomicBool,
}

impl<T: Send + Sync + 'static> Subscriber<T> for ListSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.slot.install(subscription) {
            Subscription::request(self.slot.as_ref(), demand::UNBOUNDED);
        }
    }

    fn on_next(&self, item: T) {
        if !self.done.load(Ordering::Acquire) {
            self.buffer.lock().push(item);
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) || Cancellable::is_cancelled(self.slot.as_ref())
        {
            hook::report(error);
            return;
        }
        self.buffer.lock().clear();
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let collected = std::mem::take(&mut *self.buffer.lock());
        self.downstream.on_success(collected);
    }
}

/// 按键归并完整序列为 `HashMap`，后到的同键条目覆盖先到者。
pub fn to_map<T, K>(source: FlowRef<T>, key_fn: KeyFn<T, K>) -> SingleRef<HashMap<K, T>>
where
    T: Send + Sync + 'static,
    K: Eq + Hash + Send + Sync + 'static,
{
    Arc::new(ToMap { source, key_fn })
}

struct ToMap<T, K> {
    source: FlowRef<T>,
    key_fn: KeyFn<T, K>,
}

impl<T, K> SingleSource<HashMap<K, T>> for ToMap<T, K>
where
    T: Send + Sync + 'static,
    K: Eq + Hash + Send + Sync + 'static,
{
    fn subscribe(&self, observer: SingleObserverRef<HashMap<K, T>>) {
        let slot = Arc::new(SubscriptionSlot::new());
        observer.on_subscribe(Arc::new(SubscriptionCancel::new(Arc::clone(&slot))));
        self.source.subscribe(Arc::new(MapSubscriber {
            downstream: observer,
            key_fn: Arc::clone(&self.key_fn),
            slot,
            buffer: Mutex::new(HashMap::new()),
            done: AtomicBool::new(false),
        }));
    }
}

struct MapSubscriber<T, K> {
    downstream: SingleObserverRef<HashMap<K, T>>,
    key_fn: KeyFn<T, K>,
    slot: Arc<SubscriptionSlot>,
    buffer: Mutex<HashMap<K, T>>,
    done: AtomicBool,
}

impl<T, K> Subscriber<T> for MapSubscriber<T, K>
where
    T: Send + Sync + 'static,
    K: Eq + Hash + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.slot.install(subscription) {
            Subscription::request(self.slot.as_ref(), demand::UNBOUNDED);
        }
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        match (self.key_fn)(&item) {
            Ok(key) => {
                self.buffer.lock().insert(key, item);
            }
            Err(error) => {
                self.done.store(true, Ordering::Release);
                Subscription::cancel(self.slot.as_ref());
                self.buffer.lock().clear();
                self.downstream.on_error(error);
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) || Cancellable::is_cancelled(self.slot.as_ref())
        {
            hook::report(error);
            return;
        }
        self.buffer.lock().clear();
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let collected = std::mem::take(&mut *self.buffer.lock());
        self.downstream.on_success(collected);
    }
}
