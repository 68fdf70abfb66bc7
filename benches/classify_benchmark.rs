//! Benchmarks for PartitionSort construction, lookup and updates.
//!
//! Run with: cargo bench
//!
//! Rules are synthetic 5-tuples shaped like ClassBench ACL filters:
//! address prefixes of mixed lengths, a few well-known port ranges and
//! either TCP, UDP or any protocol.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use partition_sort::{ClassifierConfig, Interval, PartitionSet, Point, Rule};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn prefix(rng: &mut StdRng) -> Interval {
    let len = [0u32, 8, 16, 24, 32][rng.random_range(0..5)];
    if len == 0 {
        return Interval::full();
    }
    let mask = u32::MAX << (32 - len);
    let low = rng.random::<u32>() & mask;
    Interval::new(low, low | !mask).unwrap()
}

fn port(rng: &mut StdRng) -> Interval {
    match rng.random_range(0..4) {
        0 => Interval::new(0, 65535).unwrap(),
        1 => Interval::new(1024, 65535).unwrap(),
        _ => Interval::point([22, 53, 80, 443][rng.random_range(0..4)]),
    }
}

fn protocol(rng: &mut StdRng) -> Interval {
    match rng.random_range(0..3) {
        0 => Interval::point(6),
        1 => Interval::point(17),
        _ => Interval::new(0, 255).unwrap(),
    }
}

/// Generate `count` rules; earlier rules get higher priorities.
fn generate_rules(count: usize, seed: u64) -> Vec<Rule> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let ranges = vec![
                prefix(&mut rng),
                prefix(&mut rng),
                port(&mut rng),
                port(&mut rng),
                protocol(&mut rng),
            ];
            Rule::new(ranges, (count - i) as u32).unwrap()
        })
        .collect()
}

/// Generate packets that each fall inside a random rule.
fn generate_packets(rules: &[Rule], count: usize, seed: u64) -> Vec<Vec<Point>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let rule = &rules[rng.random_range(0..rules.len())];
            rule.ranges()
                .iter()
                .map(|r| rng.random_range(r.low()..=r.high()))
                .collect()
        })
        .collect()
}

/// Benchmark building a classifier online and offline.
fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");
    group.sample_size(10);

    for size in [1_000, 10_000].iter() {
        let rules = generate_rules(*size, 1);
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("online", size), size, |b, _| {
            b.iter(|| {
                black_box(PartitionSet::from_rules(&rules, ClassifierConfig::default()).unwrap())
            })
        });
        group.bench_with_input(BenchmarkId::new("offline", size), size, |b, _| {
            b.iter(|| {
                black_box(
                    PartitionSet::build_offline(&rules, ClassifierConfig::default()).unwrap(),
                )
            })
        });
    }

    group.finish();
}

/// Benchmark lookup throughput with and without priority pruning.
fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for size in [1_000, 10_000].iter() {
        let rules = generate_rules(*size, 2);
        let set = PartitionSet::from_rules(&rules, ClassifierConfig::default()).unwrap();
        let packets = generate_packets(&rules, 1_000, 3);
        group.throughput(Throughput::Elements(packets.len() as u64));

        group.bench_with_input(BenchmarkId::new("pruned", size), size, |b, _| {
            b.iter(|| {
                for packet in &packets {
                    black_box(set.classify(packet));
                }
            })
        });
        group.bench_with_input(BenchmarkId::new("exhaustive", size), size, |b, _| {
            b.iter(|| {
                for packet in &packets {
                    black_box(set.classify_exhaustive(packet));
                }
            })
        });
    }

    group.finish();
}

/// Benchmark a rule insertion followed by its deletion.
fn bench_update(c: &mut Criterion) {
    let rules = generate_rules(10_000, 4);
    let extra = generate_rules(100, 5);
    let mut set = PartitionSet::from_rules(&rules, ClassifierConfig::default()).unwrap();

    let mut group = c.benchmark_group("update");
    group.throughput(Throughput::Elements(extra.len() as u64));

    group.bench_function("insert_delete", |b| {
        b.iter(|| {
            for rule in &extra {
                set.insert(rule.clone()).unwrap();
                black_box(set.delete_rule(set.len() - 1));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_construction, bench_classify, bench_update);

criterion_main!(benches);
