//! 函数式接口别名：用户注入逻辑的统一形态。
//!
//! # 设计背景（Why）
//! - 操作符需要跨线程持有并多次调用用户函数，因此统一使用
//!   `Arc<dyn Fn ... + Send + Sync>`；
//! - 原型系统中用户函数"抛出异常或返回 null"均为失败，Rust 侧收敛为
//!   `Result` 的 `Err` 分支：抛出对应 [`FlowError::UserFunction`]，
//!   null 产出对应 [`FlowError::NullValue`]，由调用方在适配层选择。
//!
//! # 契约说明（What）
//! - 所有别名都是对象安全闭包引用，克隆成本为一次引用计数；
//! - 返回 `Err` 的效果恒定：取消上游、向下游投递一次错误。

use std::sync::Arc;

use crate::error::FlowError;

/// 一元变换 `A -> B`。
pub type MapFn<A, B> = Arc<dyn Fn(A) -> Result<B, FlowError> + Send + Sync>;

/// 二元组合 `(A, B) -> C`。
pub type BiFn<A, B, C> = Arc<dyn Fn(A, B) -> Result<C, FlowError> + Send + Sync>;

/// N 元组合：`combine_latest` 对最新值快照行的折叠。
pub type RowFn<T, R> = Arc<dyn Fn(&[T]) -> Result<R, FlowError> + Send + Sync>;

/// 一元谓词。
pub type PredicateFn<A> = Arc<dyn Fn(&A) -> Result<bool, FlowError> + Send + Sync>;

/// 键提取：借用条目计算归类键（`to_map`）。
pub type KeyFn<A, K> = Arc<dyn Fn(&A) -> Result<K, FlowError> + Send + Sync>;

/// 二元谓词：`retry` 的 `(重试次数, 错误) -> 是否继续`。
pub type BiPredicateFn<A, B> = Arc<dyn Fn(&A, &B) -> Result<bool, FlowError> + Send + Sync>;

/// 惰性取值。
pub type SupplierFn<A> = Arc<dyn Fn() -> Result<A, FlowError> + Send + Sync>;

/// 布尔取值：`repeat_until` 的停止条件。
pub type BooleanSupplierFn = Arc<dyn Fn() -> Result<bool, FlowError> + Send + Sync>;

/// 旁路消费（窥视），不得失败。
pub type ConsumerFn<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// 调度器一次性任务。
pub type Task = Box<dyn FnOnce() + Send>;

/// 调度器周期任务：每轮触发都会被再次调用。
pub type RepeatTask = Arc<dyn Fn() + Send + Sync>;

/// 以 `map_fn!` 风格包装普通闭包为 [`MapFn`]。
pub fn map_fn<A, B>(f: impl Fn(A) -> Result<B, FlowError> + Send + Sync + 'static) -> MapFn<A, B> {
    Arc::new(f)
}

/// 包装不失败的纯变换。
pub fn total_map_fn<A, B>(f: impl Fn(A) -> B + Send + Sync + 'static) -> MapFn<A, B> {
    Arc::new(move |a| Ok(f(a)))
}

/// 包装不失败的纯谓词。
pub fn total_predicate<A>(f: impl Fn(&A) -> bool + Send + Sync + 'static) -> PredicateFn<A> {
    Arc::new(move |a| Ok(f(a)))
}
