//! Benchmark suite for header parsing and the raw duplicate scan
//!
//! Measures load-path throughput over containers of increasing tensor
//! counts, and the cost of re-serializing a parsed header.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use rotular::factory::ContainerBuilder;
use rotular::header::{ContainerHeader, Dtype};
use rotular::metadata::MetadataMap;
use rotular::scan::scan_header;
use rotular::writer::serialize_header;

/// Build a container with `tensors` small tensors and a few metadata entries
fn build_container(tensors: usize) -> Vec<u8> {
    let mut builder = ContainerBuilder::new()
        .meta("modelspec.sai_model_spec", "1.0.1")
        .meta("modelspec.title", "Bench Model")
        .meta("modelspec.architecture", "stable-diffusion-v1")
        .meta("modelspec.description", "synthetic fixture for parser benchmarks");
    for i in 0..tensors {
        let data = [0u8; 64];
        builder = builder.tensor(&format!("block.{i}.weight"), Dtype::F32, &[4, 4], &data);
    }
    builder.build()
}

/// Header region of a built container
fn header_region(data: &[u8]) -> &[u8] {
    let n = u64::from_le_bytes(data[..8].try_into().unwrap()) as usize;
    &data[8..8 + n]
}

fn benchmark_header_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_parse");

    for tensors in [4usize, 32, 128].iter() {
        let data = build_container(*tensors);
        group.bench_with_input(BenchmarkId::from_parameter(tensors), &data, |b, data| {
            b.iter(|| {
                let header = ContainerHeader::from_bytes(black_box(data)).unwrap();
                black_box(header)
            });
        });
    }

    group.finish();
}

fn benchmark_raw_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("raw_scan");

    for tensors in [4usize, 32, 128].iter() {
        let data = build_container(*tensors);
        let header = header_region(&data).to_vec();
        group.bench_with_input(
            BenchmarkId::from_parameter(tensors),
            &header,
            |b, header| {
                b.iter(|| {
                    let scan = scan_header(black_box(header)).unwrap();
                    black_box(scan)
                });
            },
        );
    }

    group.finish();
}

fn benchmark_header_serialize(c: &mut Criterion) {
    let data = build_container(128);
    let parsed = ContainerHeader::from_bytes(&data).unwrap();
    let metadata = MetadataMap::from_entries(parsed.metadata.clone());

    c.bench_function("header_serialize_128_tensors", |b| {
        b.iter(|| {
            let bytes = serialize_header(
                black_box(&parsed.descriptors),
                black_box(&metadata),
                parsed.metadata_slot,
            )
            .unwrap();
            black_box(bytes)
        });
    });
}

criterion_group!(
    benches,
    benchmark_header_parse,
    benchmark_raw_scan,
    benchmark_header_serialize,
);
criterion_main!(benches);
