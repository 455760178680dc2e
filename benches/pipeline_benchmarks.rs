use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rask_log_shipper::buffer::{Batcher, BufferConfig, LogBuffer};
use rask_log_shipper::domain::{LogLevel, LogRecord};
use rask_log_shipper::sender::Compressor;
use std::hint::black_box;

fn formatted_line(id: usize) -> String {
    LogRecord::now(LogLevel::Info, "Bench", format!("sensor reading {id} within range")).format_line()
}

fn bench_enqueue_and_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue_and_batch");

    for &size in &[1_000usize, 10_000, 100_000] {
        let lines: Vec<String> = (0..size).map(formatted_line).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &lines, |b, lines| {
            b.iter(|| {
                let buffer = LogBuffer::new(BufferConfig {
                    batch_size: 20,
                    high_water_mark: None,
                });
                for line in lines {
                    buffer.enqueue(line.clone());
                }
                let batcher = Batcher::new(20);
                let mut batches = 0usize;
                while let Some(batch) = batcher.next_batch(&buffer) {
                    black_box(batch);
                    batches += 1;
                }
                batches
            });
        });
    }
    group.finish();
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("gzip_batch");

    for &batch_size in &[20usize, 200, 2_000] {
        let lines: Vec<String> = (0..batch_size).map(formatted_line).collect();
        let bytes: usize = lines.iter().map(|l| l.len() + 1).sum();
        let compressor = Compressor::new();

        group.throughput(Throughput::Bytes(bytes as u64));
        group.bench_with_input(BenchmarkId::new("compress", batch_size), &lines, |b, lines| {
            b.iter(|| compressor.compress_lines(black_box(lines.as_slice())));
        });

        let payload = compressor
            .compress_lines(&lines)
            .expect("benchmark batch must compress");
        group.bench_with_input(BenchmarkId::new("decompress", batch_size), &payload, |b, payload| {
            b.iter(|| compressor.decompress_lines(black_box(payload)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_enqueue_and_batch, bench_compression);
criterion_main!(benches);
