use crossbeam_queue::SegQueue;

use super::FusedQueue;

/// 链式多生产者/单消费者队列。
///
/// 错误聚合、窗口信号与仲裁器事件都可能由多个内层并发入队，消费侧始终
/// 是唯一的排水线程；底座复用 [`crossbeam_queue::SegQueue`]（线性化
/// FIFO，保证跨线程的因果入队顺序在出队侧可见）。
pub struct MpscLinked<T> {
    queue: SegQueue<T>,
}

impl<T> MpscLinked<T> {
    /// 建空队列。
    pub fn new() -> Self {
        MpscLinked {
            queue: SegQueue::new(),
        }
    }

    /// 入队（无界，不失败）。
    pub fn push(&self, item: T) {
        self.queue.push(item);
    }
}

impl<T> Default for MpscLinked<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> FusedQueue<T> for MpscLinked<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        self.queue.push(item);
        Ok(())
    }

    fn poll(&self) -> Option<T> {
        self.queue.pop()
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}
