//! 进程级孤儿错误钩子。
//!
//! # 设计背景（Why）
//! - 取消与错误是异步竞态：订阅被取消后，上游仍可能产出一个错误。该错误
//!   没有任何订阅者可以接收，但吞掉它会掩盖真实故障。
//! - 钩子被建模为可注入、可重置的 sink 而非硬编码单例，测试可以捕获并
//!   断言孤儿错误，宿主可以把它桥接到自己的告警面。
//!
//! # 契约说明（What）
//! - 未注入 sink 时，[`report`] 落到 `tracing::error!`；
//! - [`set_sink`] 全量替换，[`reset`] 还原默认行为；
//! - sink 必须自行保证快速返回，钩子不提供异步缓冲。

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::FlowError;

/// 孤儿错误 sink 的统一形态。
pub type ErrorSink = Arc<dyn Fn(&FlowError) + Send + Sync>;

static SINK: Lazy<RwLock<Option<ErrorSink>>> = Lazy::new(|| RwLock::new(None));

/// 注入进程级错误 sink，替换之前的注入。
pub fn set_sink(sink: ErrorSink) {
    *SINK.write() = Some(sink);
}

/// 还原默认行为（`tracing::error!`）。
pub fn reset() {
    *SINK.write() = None;
}

/// 上报一个无人接收的错误。
///
/// # 契约说明（What）
/// - **前置条件**：错误已确认无法经 `on_error` 投递（下游终端或已取消）；
/// - **后置条件**：错误被当前 sink 消费；该函数自身永不 panic、永不返回错误。
pub fn report(error: FlowError) {
    let guard = SINK.read();
    match guard.as_ref() {
        Some(sink) => sink(&error),
        None => {
            tracing::error!(target: "pulse::orphan", %error, "undeliverable stream error");
        }
    }
}
