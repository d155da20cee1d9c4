use std::sync::atomic::AtomicU64;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pulse_core::protocol::demand;

/// 需求算术热路径基准：每个背压操作符的每次发射都要走一遍。
///
/// # 设计目的（Why）
/// - `add_cap`/`produced` 位于所有排水循环的最内层，任何一次多余的
///   CAS 重试都会被操作符数量放大；基准用于在改动内存序或重试结构时
///   确认没有回归。
///
/// # 执行逻辑（How）
/// - 模拟"授予一批、消费一批"的稳态：累加 32 个信用后立即全额扣减，
///   计数器回到零，循环往复。
fn bench_add_cap_produced(c: &mut Criterion) {
    c.bench_function("demand_add_cap_produced", |b| {
        let requested = AtomicU64::new(0);
        b.iter(|| {
            demand::add_cap(&requested, black_box(32));
            black_box(demand::produced(&requested, black_box(32)))
        });
    });
}

/// 无界哨兵短路基准：无界订阅下算术必须退化为一次加载。
fn bench_unbounded_short_circuit(c: &mut Criterion) {
    c.bench_function("demand_unbounded_short_circuit", |b| {
        let requested = AtomicU64::new(demand::UNBOUNDED);
        b.iter(|| black_box(demand::produced(&requested, black_box(1))));
    });
}

criterion_group!(
    demand_benches,
    bench_add_cap_produced,
    bench_unbounded_short_circuit
);
criterion_main!(demand_benches);
