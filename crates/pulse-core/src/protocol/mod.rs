//! 推送协议契约：生产者/消费者四件套与取消原语。
//!
//! # 设计背景（Why）
//! - 整个库的并发安全建立在一小组协议不变量之上（串行投递、终端唯一、
//!   句柄先行、需求受限、取消优先）；把契约集中在一个模块，操作符只需
//!   实现各自的状态机，不必重复协商信号语义。
//! - 契约全部以对象安全 trait 表达：操作符之间经 `Arc<dyn _>` 链接，
//!   监控、测试替身与跨 crate 实现均可注入，无需泛型扩散。
//!
//! # 契约说明（What）
//! - [`Flow`]：接受消费者；接受后必须先投递 [`Subscription`] 再投递事件；
//! - [`Subscriber`]：四个入口 `on_subscribe/on_next/on_error/on_complete`，
//!   实现方以内部可变性承接来自任意线程的信号；
//! - [`Subscription`]：`request(n>0)` 累加需求并在上限饱和，`cancel` 幂等；
//! - [`Cancellable`]：无需求语义的纯取消句柄（定时任务、Single/Completable）。
//!
//! # 风险提示（Trade-offs）
//! - trait 不强制实现串行化；并发上游必须经 [`serial::SerializedSubscriber`]
//!   或操作符自身的排水循环收敛到单读者。

pub mod arbiter;
pub mod demand;
pub mod serial;
pub mod subscription;

use std::sync::Arc;

use crate::error::FlowError;

// 教案级说明：与 spark-core 相同的建模开关——`--cfg loom` 时切换到 loom
// 原子以便模型检查捕获全部调度交错，常规构建走标准原子。
#[cfg(not(any(loom, pulse_loom)))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(any(loom, pulse_loom))]
use loom::sync::atomic::{AtomicBool, Ordering};

/// 订阅句柄：下游向上游表达需求与弃权的唯一通道。
///
/// # 契约说明（What）
/// - `request(n)`：`n == 0` 属协议违例，实现方应忽略并上报钩子；
///   需求累加在 [`demand::UNBOUNDED`] 饱和，哨兵值关闭计数；
/// - `cancel`：幂等；调用后上游尽力停止发射，迟到条目静默丢弃、
///   迟到错误交 [`crate::error::hook`]。
pub trait Subscription: Send + Sync {
    /// 追加 `n` 个条目的需求。
    fn request(&self, n: u64);

    /// 声明对后续事件不再感兴趣。
    fn cancel(&self);
}

/// 消费者：事件的四个入口。
///
/// # 契约说明（What）
/// - I1：同一消费者上的入口不并发执行（由上游或串行化层保证）；
/// - I2：`on_error`/`on_complete` 之后不得再有任何入口调用；
/// - I4：`on_subscribe` 恰好一次且先于其他入口；
/// - 实现方使用 `&self` 接收器 + 内部可变性，信号可能来自任意线程。
pub trait Subscriber<T>: Send + Sync {
    /// 接收订阅句柄（恰好一次，先于其他入口）。
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// 接收一个条目。
    fn on_next(&self, item: T);

    /// 接收终端错误。
    fn on_error(&self, error: FlowError);

    /// 接收终端完成。
    fn on_complete(&self);
}

/// 生产者：接受一个消费者并开始一次订阅生命周期。
///
/// # 契约说明（What）
/// - 每次 `subscribe` 都是独立的状态机实例；
/// - 实现方必须同步或异步地先调用 `on_subscribe`，再按协议发射。
pub trait Flow<T>: Send + Sync {
    /// 接受消费者。
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// 纯取消句柄：没有需求语义的可中断资源。
///
/// 定时任务、`Single`/`Completable` 订阅与 Worker 本身都以它表达
/// "尽力停止"的能力。`cancel` 幂等。
pub trait Cancellable: Send + Sync {
    /// 请求停止。幂等。
    fn cancel(&self);

    /// 查询是否已被取消。
    fn is_cancelled(&self) -> bool;
}

/// 共享 `Flow` 的统一引用形态。
pub type FlowRef<T> = Arc<dyn Flow<T>>;

/// 共享 `Subscriber` 的统一引用形态。
pub type SubscriberRef<T> = Arc<dyn Subscriber<T>>;

/// 共享 `Subscription` 的统一引用形态。
pub type SubscriptionRef = Arc<dyn Subscription>;

/// 最小取消原语：单个原子位 + 引用计数共享。
///
/// # 设计背景（Why）
/// - 大量操作符只需要"是否已弃权"一个比特；提供共享实现避免每个状态机
///   重复定义原子旗标。
///
/// # 契约说明（What）
/// - [`cancel`](Cancellable::cancel) 首次置位后全局可见；
/// - [`try_cancel`](Self::try_cancel) 返回 `true` 仅当本次调用完成了
///   首次置位，供需要"谁先取消"裁决的路径使用。
#[derive(Debug, Default)]
pub struct CancelFlag {
    flag: AtomicBool,
}

impl CancelFlag {
    /// 创建未取消状态的旗标。
    pub fn new() -> Self {
        CancelFlag {
            flag: AtomicBool::new(false),
        }
    }

    /// 尝试完成首次置位；返回 `true` 表示本次调用赢得取消权。
    pub fn try_cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Cancellable for CancelFlag {
    fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
