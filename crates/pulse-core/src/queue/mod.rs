//! 融合队列：操作符内部积压的统一承载。
//!
//! # 设计背景（Why）
//! - 排水循环要求队列在"生产侧任意线程、消费侧单线程"的前提下无阻塞；
//!   本 crate 全程 `deny(unsafe_code)`，无锁结构一律建立在 crossbeam 的
//!   成熟实现之上，而不是手写环形指针算术。
//! - 两种形态各有归属：二次幂有界环是单上游→单排水的快路径
//!   （[`SpscRing`]）；链式变体承接多个内层生产者（[`MpscLinked`]）。
//!
//! # 契约说明（What）
//! - 统一暴露 `offer/poll/is_empty/clear`；
//! - `offer` 满载返回 `Err(条目)`，由调用方决定按背压违例处理还是丢弃；
//! - `clear` 只保证排空当下可见的条目，与并发 `offer` 的交错由调用方的
//!   取消旗标裁决。

mod mpsc;
mod spsc;

pub use mpsc::MpscLinked;
pub use spsc::SpscRing;

/// 队列的统一操作面。
pub trait FusedQueue<T>: Send + Sync {
    /// 入队；满载时原样退还条目。
    fn offer(&self, item: T) -> Result<(), T>;

    /// 出队；空队返回 `None`。
    fn poll(&self) -> Option<T>;

    /// 是否为空（瞬时语义）。
    fn is_empty(&self) -> bool;

    /// 丢弃当下可见的全部条目。
    fn clear(&self);
}
