use crossbeam_queue::ArrayQueue;

use super::FusedQueue;

/// 二次幂有界环：单生产者/单消费者积压的快路径。
///
/// # 逻辑解析（How）
/// - 容量向上取整到二的幂（与掩码寻址的原型保持同构），底座复用
///   [`crossbeam_queue::ArrayQueue`] 的有界无锁实现；
/// - `scan` 的种子先行只需要 2 槽，`concat_map` 的 prefetch 积压用
///   `prefetch` 槽，容量由各操作符按契约选定。
pub struct SpscRing<T> {
    ring: ArrayQueue<T>,
    capacity: usize,
}

impl<T> SpscRing<T> {
    /// 以至少 `capacity` 的二次幂容量建环。
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        SpscRing {
            ring: ArrayQueue::new(capacity),
            capacity,
        }
    }

    /// 实际容量（二次幂）。
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Send> FusedQueue<T> for SpscRing<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        self.ring.push(item)
    }

    fn poll(&self) -> Option<T> {
        self.ring.pop()
    }

    fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    fn clear(&self) {
        while self.ring.pop().is_some() {}
    }
}
