//! 最小线程定时器：std 环境的默认 [`Scheduler`] 实现。
//!
//! # 设计背景（Why）
//! - 与 spark-core 的 `SystemClock` 同一取舍：为了不强绑任何异步运行时，
//!   每个 Worker 以一条专职线程承载自己的时间线。时间驱动的操作符属于
//!   控制面节律（采样、超时、防抖），线程代价可以容忍；
//! - 追求低开销的宿主应注入自己的调度器实现，接口面只有两个 trait。
//!
//! # 契约说明（What）
//! - `now` 基于 [`std::time::Instant`]，单调不回拨；
//! - 同一 Worker 的任务按 `(到期时间, 入队序号)` 全序执行，互不并发；
//! - `dispose` 清空未决任务并让线程退出；之后的 `schedule` 返回
//!   已取消的哑句柄。

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Scheduler, Worker, WorkerRef};
use crate::fns::Task;
use crate::protocol::{CancelFlag, Cancellable};

/// 线程定时器调度器。
pub struct ThreadScheduler {
    origin: Instant,
}

impl ThreadScheduler {
    /// 以当前时刻为纪元创建调度器。
    pub fn new() -> Self {
        ThreadScheduler {
            origin: Instant::now(),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn create_worker(&self) -> WorkerRef {
        Arc::new(ThreadWorker::spawn(self.origin))
    }
}

struct TimerEntry {
    due: Duration,
    seq: u64,
    task: Task,
    flag: Arc<CancelFlag>,
}

/// 二叉堆元素包装：只按 `(due, seq)` 排序，小者先出。
struct HeapEntry(TimerEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.due == other.0.due && self.0.seq == other.0.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap 是最大堆，反转得到"最早到期先出"。
        other
            .0
            .due
            .cmp(&self.0.due)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
}

struct WorkerShared {
    origin: Instant,
    state: Mutex<TimerState>,
    signal: Condvar,
    disposed: AtomicBool,
}

/// 专职线程 Worker。
pub struct ThreadWorker {
    shared: Arc<WorkerShared>,
}

impl ThreadWorker {
    fn spawn(origin: Instant) -> Self {
        let shared = Arc::new(WorkerShared {
            origin,
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            signal: Condvar::new(),
            disposed: AtomicBool::new(false),
        });
        let runner = Arc::clone(&shared);
        // 线程退出条件唯一：disposed 置位。句柄全部丢失而未 dispose 属
        // 调用方资源泄漏，操作符在拆除路径上都会 dispose。
        let _ = thread::Builder::new()
            .name("pulse-timer".into())
            .spawn(move || Self::run(runner));
        ThreadWorker { shared }
    }

    fn run(shared: Arc<WorkerShared>) {
        let mut guard = shared.state.lock();
        loop {
            if shared.disposed.load(Ordering::Acquire) {
                return;
            }
            let now = shared.origin.elapsed();
            let due_now = guard
                .heap
                .peek()
                .map(|entry| (entry.0.due, entry.0.due <= now));
            match due_now {
                Some((_, true)) => {
                    let entry = guard.heap.pop().expect("peeked entry vanished").0;
                    drop(guard);
                    if !entry.flag.is_cancelled() {
                        (entry.task)();
                    }
                    guard = shared.state.lock();
                }
                Some((due, false)) => {
                    let wait = due.saturating_sub(now);
                    let _ = shared.signal.wait_for(&mut guard, wait);
                }
                None => {
                    shared.signal.wait(&mut guard);
                }
            }
        }
    }
}

impl Worker for ThreadWorker {
    fn schedule(&self, delay: Duration, task: Task) -> Arc<dyn Cancellable> {
        let flag = Arc::new(CancelFlag::new());
        if self.shared.disposed.load(Ordering::Acquire) {
            flag.cancel();
            return flag;
        }
        {
            let mut state = self.shared.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(HeapEntry(TimerEntry {
                due: self.shared.origin.elapsed().saturating_add(delay),
                seq,
                task,
                flag: Arc::clone(&flag),
            }));
        }
        self.shared.signal.notify_all();
        flag
    }

    fn now(&self) -> Duration {
        self.shared.origin.elapsed()
    }

    fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::Release);
        self.shared.state.lock().heap.clear();
        self.shared.signal.notify_all();
    }

    fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }
}
