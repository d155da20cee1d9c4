//! 断言与等待辅助。

use std::time::{Duration, Instant};

/// 初始化测试日志输出（幂等）。
///
/// 线程定时器类测试偶发失败时，`RUST_LOG=pulse=trace` 配合此初始化能
/// 直接看到孤儿错误钩子与调度轨迹；重复调用安全，后到者静默让位。
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 自旋等待条件成立，超时返回 `false`。
///
/// 线程定时器类测试的收敛等待统一经由此处，避免裸 `sleep` 撒落各处。
pub fn spin_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::yield_now();
    }
    condition()
}
