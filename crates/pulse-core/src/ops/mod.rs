//! 操作符：每个文件一台封闭状态机。
//!
//! # 设计背景（Why）
//! - 组合是线性的：操作符只链接上游→下游，内层订阅者通过显式类型的父引用
//!   回指 coordinator，绝不构成通用图；
//! - 所有状态机共享同一组不变量（串行投递、终端唯一、需求受限、取消优先），
//!   并在各自文件里实现专门化的协调逻辑。
//!
//! # 契约说明（What）
//! - 构造函数一律返回 [`FlowRef`](crate::protocol::FlowRef)（或 Single/
//!   Completable 引用），供直接继续组合；
//! - 用户函数失败（`Err` 分支）的统一效果：取消上游、向下游投递一次错误。

mod collect;
mod combine_latest;
mod concat_map;
mod debounce;
mod filter;
mod map;
mod repeat;
mod retry;
mod sample;
mod scan;
mod single_element;
mod switch_map;
mod take;
mod take_until;
mod timeout;
mod window;
mod with_latest_from;

pub use collect::{to_list, to_map};
pub use combine_latest::combine_latest;
pub use concat_map::{concat, concat_array, concat_map};
pub use debounce::debounce;
pub use filter::filter;
pub use map::map;
pub use repeat::repeat_until;
pub use retry::retry_bi_predicate;
pub use sample::sample_timed;
pub use scan::scan_seed;
pub use single_element::single;
pub use switch_map::switch_map;
pub use take::{take, take_until_predicate};
pub use take_until::take_until;
pub use timeout::{timeout, timeout_selector};
pub use window::window_boundary;
pub use with_latest_from::with_latest_from;

/// 多源与映射类操作符的默认预取量。
pub const DEFAULT_PREFETCH: usize = 128;
