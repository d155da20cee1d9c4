//! 订阅槽与立即终端辅助。
//!
//! # 设计背景（Why）
//! - 几乎每个操作符都要处理同一组竞态：句柄尚未到达时下游已经 `request`、
//!   取消与安装互相追赶、上游违例地二次 `on_subscribe`。
//!   [`SubscriptionSlot`] 把这三种竞态收敛为一个可复用状态机。
//! - 空源、立即失败等路径需要在没有真实上游的情况下满足"句柄先行"
//!   不变量，由 [`NoopSubscription`] 与两个立即终端辅助承接。
//!
//! # 风险提示（Trade-offs）
//! - 槽内用短临界区锁保存 `Arc<dyn Subscription>`；锁内绝不回调外部代码，
//!   所有对上游句柄的调用都在释放锁之后执行，杜绝重入死锁。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{Cancellable, SubscriberRef, Subscription, SubscriptionRef, demand};
use crate::error::{FlowError, hook};

/// 无操作句柄：立即终端路径用它满足"句柄先行"。
#[derive(Debug, Default)]
pub struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, n: u64) {
        // 仍然校验协议，违例统一入钩子。
        let _ = demand::validate(n);
    }

    fn cancel(&self) {}
}

/// 向消费者投递"空完成"：句柄先行，随后立即完成。
pub fn complete_immediately<T>(subscriber: &SubscriberRef<T>) {
    subscriber.on_subscribe(Arc::new(NoopSubscription));
    subscriber.on_complete();
}

/// 向消费者投递"立即失败"：句柄先行，随后投递唯一终端错误。
pub fn fail_immediately<T>(subscriber: &SubscriberRef<T>, error: FlowError) {
    subscriber.on_subscribe(Arc::new(NoopSubscription));
    subscriber.on_error(error);
}

#[derive(Default)]
struct SlotState {
    current: Option<SubscriptionRef>,
    deferred: u64,
    cancelled: bool,
}

/// 一次性订阅槽：延迟需求 + 幂等取消 + 重复安装检测。
///
/// # 逻辑解析（How）
/// - 槽为三态：空（可累积延迟需求）、活动（请求直达上游）、已取消
///   （终态，吞并后续安装并取消之）；
/// - [`install`](Self::install) 安装句柄并冲洗此前累积的延迟需求；
/// - 上游违例地安装第二个句柄时，新句柄被取消并上报协议违例。
///
/// # 契约说明（What）
/// - 所有方法可从任意线程调用；
/// - 对上游句柄的 `request`/`cancel` 一律在内部锁之外执行。
pub struct SubscriptionSlot {
    state: Mutex<SlotState>,
    cancelled: AtomicBool,
}

impl SubscriptionSlot {
    /// 创建空槽。
    pub fn new() -> Self {
        SubscriptionSlot {
            state: Mutex::new(SlotState::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// 安装上游句柄；返回 `false` 表示句柄被拒收（槽已取消或已占用）。
    pub fn install(&self, subscription: SubscriptionRef) -> bool {
        let flush = {
            let mut state = self.state.lock();
            if state.cancelled {
                None
            } else if state.current.is_some() {
                hook::report(FlowError::protocol("subscription already installed"));
                None
            } else {
                state.current = Some(Arc::clone(&subscription));
                let deferred = state.deferred;
                state.deferred = 0;
                Some(deferred)
            }
        };
        match flush {
            Some(deferred) => {
                if deferred > 0 {
                    subscription.request(deferred);
                }
                true
            }
            None => {
                subscription.cancel();
                false
            }
        }
    }

    /// 当前是否已持有活动句柄。
    pub fn is_installed(&self) -> bool {
        self.state.lock().current.is_some()
    }
}

impl Default for SubscriptionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription for SubscriptionSlot {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        let target = {
            let mut state = self.state.lock();
            if state.cancelled {
                None
            } else if let Some(current) = state.current.as_ref() {
                Some(Arc::clone(current))
            } else {
                state.deferred = state.deferred.saturating_add(n);
                None
            }
        };
        if let Some(subscription) = target {
            subscription.request(n);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let victim = {
            let mut state = self.state.lock();
            state.cancelled = true;
            state.current.take()
        };
        if let Some(subscription) = victim {
            subscription.cancel();
        }
    }
}

impl Cancellable for SubscriptionSlot {
    fn cancel(&self) {
        Subscription::cancel(self);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// 把 `Subscriber` 的取消面适配为 [`Cancellable`]。
///
/// `Single`/`Completable` 的观察者句柄与 Worker 任务句柄共享该形态。
pub struct SubscriptionCancel {
    slot: Arc<SubscriptionSlot>,
}

impl SubscriptionCancel {
    /// 以共享槽构造取消句柄。
    pub fn new(slot: Arc<SubscriptionSlot>) -> Self {
        SubscriptionCancel { slot }
    }
}

impl Cancellable for SubscriptionCancel {
    fn cancel(&self) {
        Subscription::cancel(self.slot.as_ref());
    }

    fn is_cancelled(&self) -> bool {
        Cancellable::is_cancelled(self.slot.as_ref())
    }
}

/// 终端一次性裁决：`done` 位上的 CAS，多个协调操作符共享同一判定。
pub struct TerminalOnce {
    done: AtomicBool,
}

impl TerminalOnce {
    /// 创建未终端状态。
    pub fn new() -> Self {
        TerminalOnce {
            done: AtomicBool::new(false),
        }
    }

    /// 尝试赢得终端投递权；返回 `true` 仅一次。
    pub fn try_terminate(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 是否已经终端。
    pub fn is_terminated(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Default for TerminalOnce {
    fn default() -> Self {
        Self::new()
    }
}
