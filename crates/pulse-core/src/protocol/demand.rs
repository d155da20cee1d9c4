//! 需求计数算术：背压的数值内核。
//!
//! # 设计背景（Why）
//! - 每个背压操作符都维护一个"已授予未消费"的需求计数；加法必须在最大
//!   可表示值饱和，减法不得下穿零，哨兵 [`UNBOUNDED`] 关闭计数。把这些
//!   规则集中为自由函数，操作符不再各自处理溢出分支。
//!
//! # 契约说明（What）
//! - 计数器为 `AtomicU64`；[`add_cap`] 返回累加前的旧值（旧值为零意味着
//!   调用方刚刚解锁了排水循环）；
//! - [`produced`] 返回扣减后的新值；下穿零属协议违例，计数被钳到零并
//!   上报钩子；
//! - 一旦计数达到 [`UNBOUNDED`]，后续算术全部短路。

// 教案级说明：`--cfg loom` 下切换到 loom 原子，配合模型测试穷举
// add_cap/produced 的交错；常规构建零开销。
#[cfg(not(any(loom, pulse_loom)))]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(any(loom, pulse_loom))]
use loom::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FlowError, hook};

/// 无界需求哨兵：计数达到该值后不再做任何算术。
pub const UNBOUNDED: u64 = u64::MAX;

/// 校验请求量。`n == 0` 上报协议违例并返回 `false`，调用方应忽略该请求。
pub fn validate(n: u64) -> bool {
    if n == 0 {
        hook::report(FlowError::protocol("request amount must be positive"));
        return false;
    }
    true
}

/// 饱和累加需求，返回累加前的旧值。
///
/// 旧值为 `0` 表示排水循环此前处于休眠，调用方应当启动排水。
pub fn add_cap(requested: &AtomicU64, n: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = current.saturating_add(n);
        match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return current,
            Err(observed) => current = observed,
        }
    }
}

/// 扣减已发射量，返回扣减后的新值。
///
/// 无界时短路返回 [`UNBOUNDED`]；下穿零被钳到零并上报协议违例。
pub fn produced(requested: &AtomicU64, n: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = match current.checked_sub(n) {
            Some(next) => next,
            None => {
                hook::report(FlowError::protocol("more produced than requested"));
                0
            }
        };
        match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(observed) => current = observed,
        }
    }
}

/// 饱和乘法：`prefetch * 批量` 类推导的溢出保护。
pub fn multiply_cap(a: u64, b: u64) -> u64 {
    a.checked_mul(b).unwrap_or(UNBOUNDED)
}
