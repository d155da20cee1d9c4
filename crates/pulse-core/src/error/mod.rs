//! 错误域：贯穿协议、操作符与调度器的统一失败表达。
//!
//! # 设计背景（Why）
//! - 响应流的失败来源高度分散：用户函数、上游协议违例、定时器超时、
//!   下游需求枯竭……若各操作符自行约定错误类型，排障与测试断言都会碎片化。
//! - 终端错误需要跨订阅者克隆（`BehaviorSubject` 对迟到订阅者重放终端、
//!   `combine_latest` 聚合多源失败），因此错误必须是廉价可克隆的值语义。
//!
//! # 契约说明（What）
//! - [`FlowError`] 是唯一会经 `on_error` 投递的错误类型；
//! - [`FlowErrorKind`] 提供无字段的稳定分类，供断言与指标聚合使用；
//! - [`CompositeError`] 聚合多个并发上游错误，保序且按插入去重；
//! - [`hook`] 提供进程级孤儿错误 sink，承接取消之后到达的错误。

mod composite;
pub mod hook;

pub use composite::CompositeError;

use std::borrow::Cow;
use std::time::Duration;

/// 全库统一的流错误。
///
/// # 设计背景（Why）
/// - 原型系统里用户函数以"抛出异常或返回 null"表达失败；Rust 侧统一收敛为
///   `Result` 的 `Err` 分支，两种失败分别映射到 [`FlowError::UserFunction`]
///   与 [`FlowError::NullValue`]。
/// - 变体全部持有 `Cow<'static, str>` 或值语义载荷，整体 `Clone + Send +
///   Sync`，可以安全地跨线程复制给多个订阅者。
///
/// # 契约说明（What）
/// - 一次订阅至多观察到一个 `FlowError`（终端唯一性不变量）；
/// - 取消之后产生的错误不再投递下游，统一交由 [`hook::report`]。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum FlowError {
    /// 用户函数（mapper/selector/combiner/predicate/supplier/accumulator）失败。
    #[error("user function failed: {0}")]
    UserFunction(Cow<'static, str>),
    /// 用户函数在需要值的位置产出了 null（Rust 侧以显式 `Err` 表达）。
    #[error("user function produced a null value: {0}")]
    NullValue(Cow<'static, str>),
    /// 超时触发且未配置 fallback。
    #[error("timeout elapsed: {0}")]
    Timeout(Cow<'static, str>),
    /// 操作符必须发射时下游需求为零（背压违例）。
    #[error("could not emit value due to lack of requests: {0}")]
    MissingDemand(Cow<'static, str>),
    /// 协议违例：request(0)、重复 on_subscribe、终端之后的信号等。
    #[error("reactive protocol violated: {0}")]
    Protocol(Cow<'static, str>),
    /// 多个并发上游错误的聚合形态。
    #[error(transparent)]
    Composite(CompositeError),
}

impl FlowError {
    /// 构造用户函数错误。
    pub fn user_function(message: impl Into<Cow<'static, str>>) -> Self {
        FlowError::UserFunction(message.into())
    }

    /// 构造 null 产出错误，`context` 指明产出位置（如 `"mapper"`）。
    pub fn null_value(context: impl Into<Cow<'static, str>>) -> Self {
        FlowError::NullValue(context.into())
    }

    /// 以等待时长构造超时错误。
    pub fn timeout_after(after: Duration) -> Self {
        FlowError::Timeout(Cow::Owned(format!("no event within {after:?}")))
    }

    /// 以选择器信号构造超时错误（选择器式超时没有固定时长）。
    pub fn timeout_signalled(context: impl Into<Cow<'static, str>>) -> Self {
        FlowError::Timeout(context.into())
    }

    /// 构造背压违例错误，`operator` 指明发射点。
    pub fn missing_demand(operator: impl Into<Cow<'static, str>>) -> Self {
        FlowError::MissingDemand(operator.into())
    }

    /// 构造协议违例错误。
    pub fn protocol(message: impl Into<Cow<'static, str>>) -> Self {
        FlowError::Protocol(message.into())
    }

    /// 返回无字段分类，供断言与指标聚合。
    pub fn kind(&self) -> FlowErrorKind {
        match self {
            FlowError::UserFunction(_) => FlowErrorKind::UserFunction,
            FlowError::NullValue(_) => FlowErrorKind::NullValue,
            FlowError::Timeout(_) => FlowErrorKind::Timeout,
            FlowError::MissingDemand(_) => FlowErrorKind::MissingDemand,
            FlowError::Protocol(_) => FlowErrorKind::Protocol,
            FlowError::Composite(_) => FlowErrorKind::Composite,
        }
    }
}

/// `FlowError` 的稳定分类。
///
/// 测试与指标只依赖分类而非渲染文案，避免消息措辞变化破坏断言。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FlowErrorKind {
    UserFunction,
    NullValue,
    Timeout,
    MissingDemand,
    Protocol,
    Composite,
}
