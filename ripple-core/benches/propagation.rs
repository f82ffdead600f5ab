//! Benchmark: change propagation through signals, derived signals and effects

use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ripple_core::{batch, computed, effect, signal, Signal};

fn benchmark_write_without_observers(c: &mut Criterion) {
    let source = signal(0u64);

    c.bench_function("write_unobserved", |b| {
        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            source.write(black_box(next));
        });
    });
}

fn benchmark_chain(c: &mut Criterion) {
    let source = signal(0u64);
    let mut tail: Signal<u64> = source.read_only();
    for _ in 0..32 {
        let input = tail.clone();
        tail = computed(move || input.read() + 1);
    }
    let observed = Rc::new(Cell::new(0));
    let _sink = effect({
        let (tail, observed) = (tail.clone(), Rc::clone(&observed));
        move |_| observed.set(tail.read())
    });

    c.bench_function("chain_32_observed", |b| {
        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            source.write(next);
            black_box(observed.get())
        });
    });
}

fn benchmark_fan_in_batch(c: &mut Criterion) {
    let sources: Vec<_> = (0..64u64).map(signal).collect();
    let total = computed({
        let sources: Vec<Signal<u64>> = sources.iter().map(|s| s.read_only()).collect();
        move || sources.iter().map(Signal::read).sum::<u64>()
    });
    let _sink = effect({
        let total = total.clone();
        move |_| {
            black_box(total.read());
        }
    });

    c.bench_function("fan_in_64_batched", |b| {
        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            batch(|| {
                for source in &sources {
                    source.write(next);
                }
            });
        });
    });
}

criterion_group!(
    benches,
    benchmark_write_without_observers,
    benchmark_chain,
    benchmark_fan_in_batch
);
criterion_main!(benches);
