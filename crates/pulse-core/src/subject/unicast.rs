use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::protocol::subscription::fail_immediately;
use crate::protocol::{
    Flow, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};
use crate::queue::{FusedQueue, MpscLinked};

/// 单订阅者积压 Subject：生产侧可多线程推入，消费侧恰好一个订阅者。
///
/// # 逻辑解析（How）
/// - 条目进入 MPSC 链式队列，排水循环在需求允许时向唯一订阅者转发；
/// - 终端（完成/失败）记录后待积压排空再投递；
/// - `on_terminate` 动作在终端投递或订阅者取消时恰好执行一次，
///   `window_boundary` 以它维护窗口计数。
pub struct UnicastSubject<T> {
    weak: Weak<UnicastSubject<T>>,
    queue: MpscLinked<T>,
    downstream: Mutex<Option<SubscriberRef<T>>>,
    requested: AtomicU64,
    wip: AtomicUsize,
    done: AtomicBool,
    error: Mutex<Option<FlowError>>,
    cancelled: AtomicBool,
    claimed: AtomicBool,
    delivered_terminal: AtomicBool,
    on_terminate: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl<T: Send + 'static> UnicastSubject<T> {
    /// 创建不带终止动作的实例。
    pub fn new() -> Arc<Self> {
        Self::with_terminate_action(None)
    }

    /// 创建并登记终止动作（终端投递或取消时恰好执行一次）。
    pub fn with_terminate_action(action: Option<Arc<dyn Fn() + Send + Sync>>) -> Arc<Self> {
        Arc::new_cyclic(|weak| UnicastSubject {
            weak: weak.clone(),
            queue: MpscLinked::new(),
            downstream: Mutex::new(None),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            delivered_terminal: AtomicBool::new(false),
            on_terminate: Mutex::new(action),
        })
    }

    /// 生产侧推入一个条目。
    pub fn push(&self, item: T) {
        if self.done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.queue.push(item);
        self.drain();
    }

    /// 生产侧宣告完成。
    pub fn finish(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.drain();
        }
    }

    /// 生产侧宣告失败。
    pub fn fail(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) {
            hook::report(error);
            return;
        }
        *self.error.lock() = Some(error);
        self.drain();
    }

    fn run_terminate_action(&self) {
        if let Some(action) = self.on_terminate.lock().take() {
            action();
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1usize;
        loop {
            let subscriber = self.downstream.lock().clone();
            if let Some(subscriber) = subscriber {
                if self.cancelled.load(Ordering::Acquire) {
                    self.queue.clear();
                } else {
                    while self.requested.load(Ordering::Acquire) > 0 {
                        match self.queue.poll() {
                            Some(item) => {
                                subscriber.on_next(item);
                                demand::produced(&self.requested, 1);
                            }
                            None => break,
                        }
                    }
                    if self.done.load(Ordering::Acquire)
                        && self.queue.is_empty()
                        && !self.delivered_terminal.swap(true, Ordering::AcqRel)
                    {
                        match self.error.lock().take() {
                            Some(error) => subscriber.on_error(error),
                            None => subscriber.on_complete(),
                        }
                        self.run_terminate_action();
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

impl<T: Send + 'static> Flow<T> for UnicastSubject<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        if self.claimed.swap(true, Ordering::AcqRel) {
            fail_immediately(
                &subscriber,
                FlowError::protocol("unicast subject admits a single subscriber"),
            );
            return;
        }
        let Some(me) = self.weak.upgrade() else {
            return;
        };
        *self.downstream.lock() = Some(Arc::clone(&subscriber));
        subscriber.on_subscribe(Arc::new(UnicastSubscription { subject: me }));
        self.drain();
    }
}

struct UnicastSubscription<T> {
    subject: Arc<UnicastSubject<T>>,
}

impl<T: Send + 'static> Subscription for UnicastSubscription<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.subject.requested, n);
        self.subject.drain();
    }

    fn cancel(&self) {
        if !self.subject.cancelled.swap(true, Ordering::AcqRel) {
            self.subject.run_terminate_action();
            self.subject.drain();
        }
    }
}
