//! 孤儿错误钩子默认日志面测试。
//!
//! # 教案级导览
//!
//! - **Why**：未注入 sink 时，取消之后到达的错误唯一的去向是
//!   `tracing::error!`；这条兜底路径一旦哑掉，故障会无声蒸发；
//! - **How**：以 `tracing-test` 捕获事件流，分别驱动"默认落日志"与
//!   "注入 sink 后改道"两条路径；
//! - **What**：默认路径必须产出含错误现场的 error 事件，注入路径必须
//!   完全绕开日志。钩子是进程级状态，用例间以静态锁串行。

use std::sync::Arc;

use parking_lot::Mutex;
use pulse_core::error::{FlowError, hook};
use tracing_test::traced_test;

/// 钩子是进程级状态，相关测试串行执行避免互相覆盖注入。
static HOOK_GUARD: Mutex<()> = Mutex::new(());

#[traced_test]
#[test]
fn default_hook_logs_orphan_errors_through_tracing() {
    let _serial = HOOK_GUARD.lock();
    hook::reset();
    hook::report(FlowError::user_function("orphaned after cancel"));
    assert!(
        logs_contain("undeliverable stream error"),
        "默认钩子必须产出 error 事件"
    );
    assert!(
        logs_contain("orphaned after cancel"),
        "事件必须携带错误现场"
    );
}

#[traced_test]
#[test]
fn injected_sink_bypasses_the_tracing_fallback() {
    let _serial = HOOK_GUARD.lock();
    let captured: Arc<Mutex<Vec<FlowError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_store = Arc::clone(&captured);
    hook::set_sink(Arc::new(move |error| {
        sink_store.lock().push(error.clone());
    }));

    hook::report(FlowError::user_function("sealed by sink"));
    hook::reset();

    assert_eq!(captured.lock().len(), 1, "注入的 sink 必须接管孤儿错误");
    assert!(
        !logs_contain("sealed by sink"),
        "注入后不得再落到日志兜底"
    );
}
