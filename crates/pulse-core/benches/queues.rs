use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pulse_core::queue::{FusedQueue, MpscLinked, SpscRing};

/// 融合队列往返基准：排水循环的"入队 → 出队"稳态成本。
///
/// # 设计目的（Why）
/// - 操作符积压全部经 `offer`/`poll` 流动；环形与链式两种形态的相对
///   成本决定各操作符的容量选型，改动包装层时以此确认没有额外开销。
///
/// # 执行逻辑（How）
/// - 单线程模拟单生产者/单消费者稳态：批量写入 64 个条目后排空，
///   队列回到空态，循环往复。跨线程竞争路径由集成测试覆盖，基准只
///   关注无竞争的热路径。
fn bench_spsc_ring_roundtrip(c: &mut Criterion) {
    c.bench_function("spsc_ring_offer_poll", |b| {
        let ring: SpscRing<u64> = SpscRing::with_capacity(128);
        b.iter(|| {
            for i in 0..64u64 {
                let _ = ring.offer(black_box(i));
            }
            while let Some(item) = ring.poll() {
                black_box(item);
            }
        });
    });
}

fn bench_mpsc_linked_roundtrip(c: &mut Criterion) {
    c.bench_function("mpsc_linked_offer_poll", |b| {
        let queue: MpscLinked<u64> = MpscLinked::new();
        b.iter(|| {
            for i in 0..64u64 {
                let _ = queue.offer(black_box(i));
            }
            while let Some(item) = queue.poll() {
                black_box(item);
            }
        });
    });
}

criterion_group!(
    queue_benches,
    bench_spsc_ring_roundtrip,
    bench_mpsc_linked_roundtrip
);
criterion_main!(queue_benches);
