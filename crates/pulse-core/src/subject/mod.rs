//! Subject：同时扮演生产者与消费者的热源。
//!
//! - [`BehaviorSubject`]：向迟到订阅者重放最新值的多播热源，唯一带
//!   非平凡并发协议的 Subject（快/慢路径发射、写时复制订阅者表）；
//! - [`UnicastSubject`]：单订阅者的积压缓冲，`window_boundary` 的窗口体。

mod behavior;
mod unicast;

pub use behavior::BehaviorSubject;
pub use unicast::UnicastSubject;
