use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use seg_storage::{Options, Storage, StreamId};
use tempfile::tempdir;

fn bench_sequential_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_writes");
    for chunk_size in [64usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(chunk_size as u64 * 256));
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, &chunk_size| {
            let dir = tempdir().unwrap();
            let path = dir.path().join("bench.seg");
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)
                .unwrap();
            let mut storage = Storage::create(file, Options::default()).unwrap();
            let id = StreamId::new_random();
            storage.create_stream(id, 0).unwrap();
            let handle = storage.open_stream(id).unwrap();
            let payload = vec![0xAAu8; chunk_size];

            b.iter(|| {
                for _ in 0..256 {
                    storage.write_stream(handle, &payload).unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_create_delete_cycle(c: &mut Criterion) {
    c.bench_function("create_write_delete_cycle", |b| {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.seg");
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        let mut storage = Storage::create(file, Options::default()).unwrap();
        let payload = vec![0x55u8; 4096];

        b.iter(|| {
            let id = StreamId::new_random();
            storage.create_stream(id, 0).unwrap();
            let handle = storage.open_stream(id).unwrap();
            storage.write_stream(handle, &payload).unwrap();
            storage.close_stream(handle).unwrap();
            storage.delete_stream(id).unwrap();
        });
    });
}

criterion_group!(benches, bench_sequential_writes, bench_create_delete_cycle);
criterion_main!(benches);
