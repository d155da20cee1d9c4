//! 融合队列测试套件：SPSC 环与 MPSC 链式变体的统一契约。

use std::sync::Arc;
use std::thread;

use pulse_core::prelude::*;

#[test]
fn spsc_ring_rounds_capacity_to_power_of_two() {
    let ring: SpscRing<u32> = SpscRing::with_capacity(3);
    assert_eq!(ring.capacity(), 4, "容量必须向上取整到二的幂");
    let tiny: SpscRing<u32> = SpscRing::with_capacity(0);
    assert_eq!(tiny.capacity(), 2, "最小容量为 2");
}

#[test]
fn spsc_ring_offer_poll_fifo_and_overflow() {
    let ring: SpscRing<u32> = SpscRing::with_capacity(2);
    assert!(ring.offer(1).is_ok());
    assert!(ring.offer(2).is_ok());
    assert_eq!(ring.offer(3), Err(3), "满载必须原样退还条目");
    assert_eq!(ring.poll(), Some(1));
    assert_eq!(ring.poll(), Some(2));
    assert_eq!(ring.poll(), None);
    assert!(ring.is_empty());
}

#[test]
fn spsc_ring_clear_discards_visible_items() {
    let ring: SpscRing<u32> = SpscRing::with_capacity(4);
    for i in 0..4 {
        let _ = ring.offer(i);
    }
    ring.clear();
    assert!(ring.is_empty(), "clear 之后不应残留条目");
    assert!(ring.offer(9).is_ok(), "清空后的槽位必须可复用");
}

#[test]
fn mpsc_linked_keeps_per_producer_order() {
    let queue: Arc<MpscLinked<(usize, u32)>> = Arc::new(MpscLinked::new());
    let producers: Vec<_> = (0..4)
        .map(|lane| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..256u32 {
                    queue.push((lane, i));
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().expect("生产线程不应 panic");
    }

    let mut last_per_lane = [None::<u32>; 4];
    let mut total = 0usize;
    while let Some((lane, value)) = queue.poll() {
        if let Some(previous) = last_per_lane[lane] {
            assert!(value > previous, "单一生产者的入队顺序必须在出队侧保持");
        }
        last_per_lane[lane] = Some(value);
        total += 1;
    }
    assert_eq!(total, 4 * 256, "条目不得丢失");
    assert!(queue.is_empty());
}

#[test]
fn mpsc_linked_offer_never_fails() {
    let queue: MpscLinked<u64> = MpscLinked::new();
    for i in 0..10_000u64 {
        assert!(queue.offer(i).is_ok(), "链式队列无界，offer 不应失败");
    }
    queue.clear();
    assert!(queue.is_empty());
}
