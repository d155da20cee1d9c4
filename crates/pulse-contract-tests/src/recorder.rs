use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use pulse_core::error::{FlowError, FlowErrorKind};
use pulse_core::protocol::demand;
use pulse_core::protocol::{Cancellable, Subscriber, SubscriptionRef};
use pulse_core::single::SingleObserver;

struct RecorderState<T> {
    items: Vec<T>,
    errors: Vec<FlowError>,
    completions: usize,
    subscriptions: usize,
}

/// 事件录制订阅者：测试断言的统一观察点。
///
/// # 契约说明（What）
/// - 构造时声明初始需求；`on_subscribe` 到达后立即按该需求请求；
/// - 录制全部条目/错误/完成次数（完成次数可 >1 以暴露终端唯一性违例）；
/// - `await_*` 系列基于条件变量，供跨线程场景等待事件收敛。
pub struct TestSubscriber<T> {
    state: Mutex<RecorderState<T>>,
    signal: Condvar,
    initial_demand: u64,
    subscription: Mutex<Option<SubscriptionRef>>,
}

impl<T: Send + 'static> TestSubscriber<T> {
    /// 以无界初始需求构造。
    pub fn unbounded() -> Arc<Self> {
        Self::with_demand(demand::UNBOUNDED)
    }

    /// 以指定初始需求构造（0 表示订阅后不自动请求）。
    pub fn with_demand(initial_demand: u64) -> Arc<Self> {
        Arc::new(TestSubscriber {
            state: Mutex::new(RecorderState {
                items: Vec::new(),
                errors: Vec::new(),
                completions: 0,
                subscriptions: 0,
            }),
            signal: Condvar::new(),
            initial_demand,
            subscription: Mutex::new(None),
        })
    }

    /// 追加请求。
    pub fn request(&self, n: u64) {
        if let Some(subscription) = self.subscription.lock().clone() {
            subscription.request(n);
        }
    }

    /// 取消订阅。
    pub fn cancel(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel();
        }
    }

    /// 是否收到过句柄。
    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscriptions > 0
    }

    /// 收到句柄的次数（>1 即句柄先行违例）。
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions
    }

    /// 已录制条目数。
    pub fn item_count(&self) -> usize {
        self.state.lock().items.len()
    }

    /// 完成次数。
    pub fn completion_count(&self) -> usize {
        self.state.lock().completions
    }

    /// 错误快照。
    pub fn errors(&self) -> Vec<FlowError> {
        self.state.lock().errors.clone()
    }

    /// 是否已终端（错误或完成）。
    pub fn is_terminated(&self) -> bool {
        let state = self.state.lock();
        state.completions > 0 || !state.errors.is_empty()
    }

    /// 等待至少 `count` 个条目，超时返回 `false`。
    pub fn await_items(&self, count: usize, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.items.len() < count {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = self.signal.wait_for(&mut state, deadline - now);
        }
        true
    }

    /// 等待终端事件，超时返回 `false`。
    pub fn await_terminal(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        while state.completions == 0 && state.errors.is_empty() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = self.signal.wait_for(&mut state, deadline - now);
        }
        true
    }

    /// 断言恰好一次完成、没有错误。
    pub fn assert_completed(&self) {
        let state = self.state.lock();
        assert!(
            state.errors.is_empty(),
            "不应出现错误，实际: {:?}",
            state.errors
        );
        assert_eq!(state.completions, 1, "完成必须恰好一次");
    }

    /// 断言尚无任何终端事件。
    pub fn assert_not_terminated(&self) {
        let state = self.state.lock();
        assert!(state.errors.is_empty(), "不应出现错误");
        assert_eq!(state.completions, 0, "不应已完成");
    }

    /// 断言恰好一个指定分类的错误、没有完成。
    pub fn assert_error_kind(&self, kind: FlowErrorKind) {
        let state = self.state.lock();
        assert_eq!(state.completions, 0, "错误终端不应伴随完成");
        assert_eq!(state.errors.len(), 1, "错误必须恰好一次: {:?}", state.errors);
        assert_eq!(state.errors[0].kind(), kind, "错误分类不符: {}", state.errors[0]);
    }
}

impl<T: Clone + Send + 'static> TestSubscriber<T> {
    /// 条目快照。
    pub fn items(&self) -> Vec<T> {
        self.state.lock().items.clone()
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + Send + 'static> TestSubscriber<T> {
    /// 断言条目序列完全一致。
    pub fn assert_values(&self, expected: &[T]) {
        let state = self.state.lock();
        assert_eq!(state.items.as_slice(), expected, "条目序列不符");
    }
}

/// 单值流观察者录制器。
pub struct TestSingleObserver<T> {
    state: Mutex<SingleRecorderState<T>>,
    handle: Mutex<Option<Arc<dyn Cancellable>>>,
}

struct SingleRecorderState<T> {
    success: Option<T>,
    errors: Vec<FlowError>,
    subscriptions: usize,
}

impl<T: Send + 'static> TestSingleObserver<T> {
    /// 创建空录制器。
    pub fn new() -> Arc<Self> {
        Arc::new(TestSingleObserver {
            state: Mutex::new(SingleRecorderState {
                success: None,
                errors: Vec::new(),
                subscriptions: 0,
            }),
            handle: Mutex::new(None),
        })
    }

    /// 取消订阅。
    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.cancel();
        }
    }

    /// 是否已收到成功值。
    pub fn has_success(&self) -> bool {
        self.state.lock().success.is_some()
    }

    /// 错误快照。
    pub fn errors(&self) -> Vec<FlowError> {
        self.state.lock().errors.clone()
    }

    /// 断言恰好一个指定分类的错误。
    pub fn assert_error_kind(&self, kind: FlowErrorKind) {
        let state = self.state.lock();
        assert!(state.success.is_none(), "错误终端不应伴随成功值");
        assert_eq!(state.errors.len(), 1, "错误必须恰好一次");
        assert_eq!(state.errors[0].kind(), kind, "错误分类不符");
    }
}

impl<T: Clone + Send + 'static> TestSingleObserver<T> {
    /// 成功值快照。
    pub fn success(&self) -> Option<T> {
        self.state.lock().success.clone()
    }
}

impl<T: Send + 'static> SingleObserver<T> for TestSingleObserver<T> {
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>) {
        self.state.lock().subscriptions += 1;
        *self.handle.lock() = Some(handle);
    }

    fn on_success(&self, value: T) {
        let mut state = self.state.lock();
        assert!(state.success.is_none(), "成功终端必须至多一次");
        state.success = Some(value);
    }

    fn on_error(&self, error: FlowError) {
        self.state.lock().errors.push(error);
    }
}

impl<T: Send + 'static> Subscriber<T> for TestSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        {
            let mut state = self.state.lock();
            state.subscriptions += 1;
        }
        *self.subscription.lock() = Some(Arc::clone(&subscription));
        if self.initial_demand > 0 {
            subscription.request(self.initial_demand);
        }
        self.signal.notify_all();
    }

    fn on_next(&self, item: T) {
        self.state.lock().items.push(item);
        self.signal.notify_all();
    }

    fn on_error(&self, error: FlowError) {
        self.state.lock().errors.push(error);
        self.signal.notify_all();
    }

    fn on_complete(&self) {
        self.state.lock().completions += 1;
        self.signal.notify_all();
    }
}
