use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lz4_codec::framed::{compress_frame, decompress_frame, CompressionSettings};
use lz4_codec::raw::{compress, decompress};
use lz4_codec::Mode;
use rand::prelude::*;

fn criterion_benchmark(c: &mut Criterion) {
    let mut data = vec![0u8; 4_000_000];
    thread_rng().fill(&mut data[800_000..2_400_000]); // mixed
    for chunk in data[2_400_000..].chunks_mut(100) {
        chunk[..26].copy_from_slice(b"abcdefghijklmnopqrstuvwxyz");
    }

    let mut group = c.benchmark_group("compress");
    group.sample_size(10);
    group.bench_function("default", |b| b.iter(|| compress(black_box(&data), Mode::Default)));
    group.bench_function("fast 8", |b| b.iter(|| compress(black_box(&data), Mode::Fast(8))));
    group.bench_function("hc 9", |b| b.iter(|| compress(black_box(&data), Mode::High(9))));
    group.finish();

    let compressed = compress(&data, Mode::Default).unwrap();
    let mut group = c.benchmark_group("decompress");
    group.bench_with_input("raw", &compressed.as_slice(), |b, c| b.iter(|| decompress(c, data.len())));
    group.finish();

    let mut settings = CompressionSettings::default();
    settings.independent_blocks(false).block_checksums(true);
    let frame = compress_frame(&data, &settings).unwrap();
    let mut group = c.benchmark_group("frame");
    group.sample_size(10);
    group.bench_function("compress", |b| b.iter(|| compress_frame(black_box(&data), &settings)));
    group.bench_with_input("decompress", &frame.as_slice(), |b, f| b.iter(|| decompress_frame(f)));
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
