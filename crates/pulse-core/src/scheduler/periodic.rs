//! 周期任务的漂移补偿重锚算法。
//!
//! # 逻辑解析（How）
//! - 维护 `start`（首次应触发的时间点）、`count`（已触发轮数）与
//!   `last_now`（上一轮观测到的时钟）；
//! - 每轮计算 `target = start + count * period`、`delay = max(0, target - now)`；
//! - 时钟回拨（`now < last_now`）或执行超期（`now > target`）时重锚：
//!   下一次触发定为 `now + period`，并以 `start = next - count * period`
//!   回写基线，避免一连串零延迟任务的爆发。
//!
//! # 风险提示（Trade-offs）
//! - 重锚公式在对抗性时钟下可能过补偿或欠补偿；这是既定的可观测行为，
//!   调用方的节律测试依赖它，此处不做"修正"。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::WorkerRef;
use crate::fns::RepeatTask;
use crate::protocol::Cancellable;

struct PeriodicState {
    start: Duration,
    count: u64,
    last_now: Duration,
}

/// 跨轮次共享的取消句柄：持有"当前这一轮"的定时器句柄。
struct PeriodicHandle {
    cancelled: AtomicBool,
    slot: Mutex<Option<Arc<dyn Cancellable>>>,
}

impl PeriodicHandle {
    fn new() -> Self {
        PeriodicHandle {
            cancelled: AtomicBool::new(false),
            slot: Mutex::new(None),
        }
    }

    fn replace(&self, handle: Arc<dyn Cancellable>) {
        if self.cancelled.load(Ordering::Acquire) {
            handle.cancel();
            return;
        }
        *self.slot.lock() = Some(handle);
    }
}

impl Cancellable for PeriodicHandle {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.slot.lock().take() {
            handle.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct PeriodicRound {
    worker: WorkerRef,
    task: RepeatTask,
    period: Duration,
    handle: Arc<PeriodicHandle>,
    state: Mutex<PeriodicState>,
}

impl PeriodicRound {
    fn run(self: &Arc<Self>) {
        if self.handle.is_cancelled() {
            return;
        }
        (self.task)();
        if self.handle.is_cancelled() {
            return;
        }

        let now = self.worker.now();
        let delay = {
            let mut state = self.state.lock();
            state.count += 1;
            let target = state.start.saturating_add(mul_period(self.period, state.count));
            let delay = if now < state.last_now || now > target {
                // 重锚：下一次触发定为 now + period。
                let next = now.saturating_add(self.period);
                state.start = next.saturating_sub(mul_period(self.period, state.count));
                self.period
            } else {
                target.saturating_sub(now)
            };
            state.last_now = now;
            delay
        };

        let round = Arc::clone(self);
        let scheduled = self.worker.schedule(delay, Box::new(move || round.run()));
        self.handle.replace(scheduled);
    }
}

/// 在指定 Worker 上建立周期触发，返回统一取消句柄。
///
/// # 契约说明（What）
/// - 首轮在 `initial` 之后触发，此后按 `period` 节律推进；
/// - 取消句柄撤销"尚未触发的下一轮"，已在执行中的一轮自然跑完；
/// - Worker 被外部 `dispose` 时，未决轮次随时间线一起消亡。
pub fn schedule_periodic(
    worker: &WorkerRef,
    initial: Duration,
    period: Duration,
    task: RepeatTask,
) -> Arc<dyn Cancellable> {
    let handle = Arc::new(PeriodicHandle::new());
    let now = worker.now();
    let round = Arc::new(PeriodicRound {
        worker: Arc::clone(worker),
        task,
        period,
        handle: Arc::clone(&handle),
        state: Mutex::new(PeriodicState {
            start: now.saturating_add(initial),
            count: 0,
            last_now: now,
        }),
    });
    let first = worker.schedule(initial, Box::new(move || round.run()));
    handle.replace(first);
    handle
}

/// `period * count` 的纳秒域饱和乘法（`Duration * u32` 会截断轮数）。
fn mul_period(period: Duration, count: u64) -> Duration {
    let nanos = period.as_nanos().saturating_mul(count as u128);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
