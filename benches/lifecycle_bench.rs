//! Session lifecycle benchmarks
//!
//! Digest throughput over payload sizes, and a full create-to-destroy run on
//! the scripted backend to measure controller overhead without isolation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use teebox::integrity::{compute_hash, verify_payloads};
use teebox::testing::ScriptedBackend;
use teebox::Session;

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_hash");
    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| compute_hash(black_box(payload)))
        });
    }
    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let data: Vec<Vec<u8>> = (0..16).map(|i| vec![i as u8; 4096]).collect();
    let hashes: Vec<String> = data.iter().map(|d| compute_hash(d)).collect();
    let algorithm_hash = compute_hash(b"sum.bin");

    c.bench_function("verify_payloads_16x4k", |b| {
        b.iter(|| verify_payloads(b"sum.bin", black_box(&data), &algorithm_hash, &hashes))
    });
}

fn bench_scripted_lifecycle(c: &mut Criterion) {
    let data = vec![b"1,2,3,4,5,6,7,8,9,10".to_vec()];
    let data_hashes = vec![compute_hash(&data[0])];
    let algorithm_hash = compute_hash(b"sum.bin");

    c.bench_function("scripted_lifecycle", |b| {
        b.iter(|| {
            let mut session = Session::with_backend(Box::new(ScriptedBackend::builtin()));
            session.create().unwrap();
            session.upload(b"sum.bin".to_vec(), data.clone()).unwrap();
            session.verify(&algorithm_hash, &data_hashes).unwrap();
            let output = session.execute().unwrap();
            session.destroy().unwrap();
            black_box(output)
        })
    });
}

criterion_group!(integrity_benches, bench_hashing, bench_verify);
criterion_group!(lifecycle_benches, bench_scripted_lifecycle);
criterion_main!(integrity_benches, lifecycle_benches);
