use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use loglens_core::split_into_chunks;

fn synthetic_log(lines: usize) -> String {
    (0..lines)
        .map(|i| {
            if i % 97 == 0 {
                format!("2024-05-01 12:00:{:02} ERROR connection timeout on worker-{i}", i % 60)
            } else {
                format!("2024-05-01 12:00:{:02} INFO request handled in {}ms", i % 60, i % 250)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_into_chunks");
    for lines in [1_000usize, 50_000] {
        let content = synthetic_log(lines);
        group.throughput(Throughput::Bytes(content.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &content, |b, content| {
            b.iter(|| split_into_chunks(black_box(content), 64 * 1024))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_split);
criterion_main!(benches);
