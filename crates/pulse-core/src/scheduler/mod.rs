//! 调度器抽象：时间驱动操作符的唯一外设。
//!
//! # 设计背景（Why）
//! - 核心是非挂起的：所谓"等待"只存在于 Worker 定时器持有的延迟任务里。
//!   把时间面收敛为一个小接口，`sample_timed`/`timeout`/`debounce` 等
//!   操作符便可在真实时钟与虚拟时钟之间无感切换。
//! - 与错误钩子相同，进程默认调度器是可注入、可重置的登记项，而非硬编码
//!   单例；契约测试以虚拟时间驱动，生产环境默认落到线程定时器。
//!
//! # 契约说明（What）
//! - [`Scheduler::now`] 返回自调度器纪元起的单调偏移；实现方必须在文档中
//!   声明时钟源的单调性；
//! - [`Worker`] 拥有一条串行时间线：同一 Worker 上的任务不并发执行；
//!   `dispose` 取消全部未决任务并释放时间线。

mod periodic;
mod thread;

pub use periodic::schedule_periodic;
pub use thread::ThreadScheduler;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::fns::{RepeatTask, Task};
use crate::protocol::Cancellable;

/// 单线程时间线：延迟任务的归属地。
pub trait Worker: Send + Sync {
    /// 在 `delay` 之后执行一次 `task`，返回可取消句柄。
    fn schedule(&self, delay: Duration, task: Task) -> Arc<dyn Cancellable>;

    /// 当前单调时间（自所属调度器纪元起的偏移）。
    fn now(&self) -> Duration;

    /// 取消全部未决任务并释放时间线。幂等。
    fn dispose(&self);

    /// 是否已释放。
    fn is_disposed(&self) -> bool;
}

/// 调度器：Worker 的工厂与公共时钟源。
pub trait Scheduler: Send + Sync {
    /// 当前单调时间。
    fn now(&self) -> Duration;

    /// 创建一条新的串行时间线。
    fn create_worker(&self) -> WorkerRef;
}

/// 共享调度器引用。
pub type SchedulerRef = Arc<dyn Scheduler>;

/// 共享 Worker 引用。
pub type WorkerRef = Arc<dyn Worker>;

/// 一次性直达调度：创建临时 Worker，执行完毕即释放。
pub fn schedule_direct(
    scheduler: &SchedulerRef,
    delay: Duration,
    task: Task,
) -> Arc<dyn Cancellable> {
    let worker = scheduler.create_worker();
    let cleanup = Arc::clone(&worker);
    worker.schedule(
        delay,
        Box::new(move || {
            task();
            cleanup.dispose();
        }),
    )
}

/// 周期性直达调度：临时 Worker + 漂移补偿，取消时释放时间线。
pub fn schedule_periodically_direct(
    scheduler: &SchedulerRef,
    initial: Duration,
    period: Duration,
    task: RepeatTask,
) -> Arc<dyn Cancellable> {
    let worker = scheduler.create_worker();
    let handle = schedule_periodic(&worker, initial, period, task);
    Arc::new(DirectPeriodicHandle { worker, handle })
}

struct DirectPeriodicHandle {
    worker: WorkerRef,
    handle: Arc<dyn Cancellable>,
}

impl Cancellable for DirectPeriodicHandle {
    fn cancel(&self) {
        self.handle.cancel();
        self.worker.dispose();
    }

    fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

static DEFAULT_SCHEDULER: Lazy<RwLock<Option<SchedulerRef>>> = Lazy::new(|| RwLock::new(None));
static FALLBACK_SCHEDULER: Lazy<SchedulerRef> = Lazy::new(|| Arc::new(ThreadScheduler::new()));

/// 读取进程默认调度器（未注入时为共享的 [`ThreadScheduler`]）。
pub fn default_scheduler() -> SchedulerRef {
    DEFAULT_SCHEDULER
        .read()
        .clone()
        .unwrap_or_else(|| Arc::clone(&FALLBACK_SCHEDULER))
}

/// 注入进程默认调度器（测试或宿主定制）。
pub fn set_default_scheduler(scheduler: SchedulerRef) {
    *DEFAULT_SCHEDULER.write() = Some(scheduler);
}

/// 还原为内建线程定时器。
pub fn reset_default_scheduler() {
    *DEFAULT_SCHEDULER.write() = None;
}
