use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use pulse_core::fns::Task;
use pulse_core::protocol::{CancelFlag, Cancellable};
use pulse_core::scheduler::{Scheduler, Worker, WorkerRef};

struct ScheduledEntry {
    task: Option<Task>,
    flag: Arc<CancelFlag>,
    worker_disposed: Arc<AtomicBool>,
}

struct TimelineState {
    now: Duration,
    next_seq: u64,
    entries: BTreeMap<(Duration, u64), ScheduledEntry>,
}

struct Timeline {
    state: Mutex<TimelineState>,
}

/// 虚拟时间调度器：`advance_by` 显式推进时钟并按 `(到期, 序号)` 全序
/// 触发到期任务。
///
/// # 契约说明（What）
/// - 任务回调在 `advance_by` 的调用线程上执行，锁外触发，任务内再次
///   调度（周期重锚）会在同一次推进中被继续消化；
/// - 触发顺序稳定，测试序列可复现。
#[derive(Clone)]
pub struct TestScheduler {
    timeline: Arc<Timeline>,
}

impl TestScheduler {
    /// 创建 now = 0 的虚拟时间线。
    pub fn new() -> Self {
        TestScheduler {
            timeline: Arc::new(Timeline {
                state: Mutex::new(TimelineState {
                    now: Duration::ZERO,
                    next_seq: 0,
                    entries: BTreeMap::new(),
                }),
            }),
        }
    }

    /// 推进虚拟时钟，触发窗口内全部到期任务。
    pub fn advance_by(&self, delta: Duration) {
        let target = {
            let state = self.timeline.state.lock();
            state.now.saturating_add(delta)
        };
        loop {
            let due = {
                let mut state = self.timeline.state.lock();
                let earliest = state.entries.keys().next().copied();
                match earliest {
                    Some(key) if key.0 <= target => {
                        let entry = state.entries.remove(&key).expect("entry vanished");
                        state.now = key.0;
                        Some(entry)
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };
            match due {
                Some(mut entry) => {
                    let skip = entry.flag.is_cancelled()
                        || entry.worker_disposed.load(Ordering::Acquire);
                    if !skip {
                        if let Some(task) = entry.task.take() {
                            task();
                        }
                    }
                }
                None => return,
            }
        }
    }

    /// 当前虚拟时刻。
    pub fn virtual_now(&self) -> Duration {
        self.timeline.state.lock().now
    }

    /// 未触发任务数（调试与泄漏断言用）。
    pub fn pending_tasks(&self) -> usize {
        self.timeline.state.lock().entries.len()
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TestScheduler {
    fn now(&self) -> Duration {
        self.timeline.state.lock().now
    }

    fn create_worker(&self) -> WorkerRef {
        Arc::new(TestWorker {
            timeline: Arc::clone(&self.timeline),
            disposed: Arc::new(AtomicBool::new(false)),
        })
    }
}

struct TestWorker {
    timeline: Arc<Timeline>,
    disposed: Arc<AtomicBool>,
}

impl Worker for TestWorker {
    fn schedule(&self, delay: Duration, task: Task) -> Arc<dyn Cancellable> {
        let flag = Arc::new(CancelFlag::new());
        if self.disposed.load(Ordering::Acquire) {
            flag.cancel();
            return flag;
        }
        let mut state = self.timeline.state.lock();
        let due = state.now.saturating_add(delay);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            (due, seq),
            ScheduledEntry {
                task: Some(task),
                flag: Arc::clone(&flag),
                worker_disposed: Arc::clone(&self.disposed),
            },
        );
        flag
    }

    fn now(&self) -> Duration {
        self.timeline.state.lock().now
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
