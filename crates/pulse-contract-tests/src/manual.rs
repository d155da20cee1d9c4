use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use pulse_core::error::FlowError;
use pulse_core::protocol::demand;
use pulse_core::protocol::{
    Flow, Subscriber, SubscriberRef, Subscription, SubscriptionRef,
};

/// 手动推送探针：测试端显式控制发射时序的热源。
///
/// # 契约说明（What）
/// - 支持多个并存订阅者，`emit`/`complete`/`fail` 广播给全部活跃端口；
/// - 端口记录下游累计需求与取消状态，供"需求到底传到源头没有"类断言；
/// - 探针不做需求守门——时序由测试编排，越界即测试自身的缺陷。
pub struct ManualFlow<T> {
    ports: Mutex<Vec<Arc<ManualPort<T>>>>,
}

impl<T: Clone + Send + 'static> ManualFlow<T> {
    /// 创建探针。
    pub fn new() -> Arc<Self> {
        Arc::new(ManualFlow {
            ports: Mutex::new(Vec::new()),
        })
    }

    fn live_ports(&self) -> Vec<Arc<ManualPort<T>>> {
        self.ports
            .lock()
            .iter()
            .filter(|port| !port.cancelled.load(Ordering::Acquire))
            .cloned()
            .collect()
    }

    /// 向全部活跃订阅者广播一个条目。
    pub fn emit(&self, item: T) {
        for port in self.live_ports() {
            port.downstream.on_next(item.clone());
        }
    }

    /// 广播完成终端。
    pub fn complete(&self) {
        for port in self.live_ports() {
            port.downstream.on_complete();
        }
    }

    /// 广播失败终端。
    pub fn fail(&self, error: FlowError) {
        for port in self.live_ports() {
            port.downstream.on_error(error.clone());
        }
    }

    /// 历史订阅次数。
    pub fn subscription_count(&self) -> usize {
        self.ports.lock().len()
    }

    /// 全部端口都已取消（且至少订阅过一次）。
    pub fn all_cancelled(&self) -> bool {
        let ports = self.ports.lock();
        !ports.is_empty()
            && ports
                .iter()
                .all(|port| port.cancelled.load(Ordering::Acquire))
    }

    /// 第 `index` 个端口的累计需求。
    pub fn requested_of(&self, index: usize) -> u64 {
        self.ports.lock()[index].requested.load(Ordering::Acquire)
    }
}

impl<T: Clone + Send + 'static> Flow<T> for ManualFlow<T> {
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let port = Arc::new(ManualPort {
            downstream: subscriber,
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        });
        self.ports.lock().push(Arc::clone(&port));
        port.downstream
            .on_subscribe(Arc::clone(&port) as SubscriptionRef);
    }
}

struct ManualPort<T> {
    downstream: SubscriberRef<T>,
    requested: AtomicU64,
    cancelled: AtomicBool,
}

impl<T: Clone + Send + 'static> Subscription for ManualPort<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.requested, n);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
