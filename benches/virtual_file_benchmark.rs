use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chunkdex::analysis::analyzer::AnalyzerRegistry;
use chunkdex::core::types::{Entity, FieldDescriptor};
use chunkdex::directory::file::VirtualFile;
use chunkdex::directory::virtual_dir::VirtualDirectory;
use chunkdex::index::writer::IndexWriter;
use chunkdex::query::ast::Query;
use chunkdex::storage::memory_store::MemoryChunkStore;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use std::sync::Arc;

const CHUNK_SIZE: usize = 64 * 1024;

fn payload(len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..len).map(|_| rng.r#gen::<u8>()).collect()
}

fn bench_write_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("virtual_file_write");

    for size in [4 * 1024, 256 * 1024, 4 * 1024 * 1024] {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let store = Arc::new(MemoryChunkStore::new());
                let mut file = VirtualFile::create(store, "bench", "data", CHUNK_SIZE);
                file.write_range(0, data).unwrap();
                file.flush().unwrap();
                black_box(file.length())
            });
        });
    }

    group.finish();
}

fn bench_random_reads(c: &mut Criterion) {
    let size = 4 * 1024 * 1024;
    let store = Arc::new(MemoryChunkStore::new());
    let mut file = VirtualFile::create(store.clone(), "bench", "data", CHUNK_SIZE);
    file.write_range(0, &payload(size)).unwrap();
    file.flush().unwrap();
    let record = file.record();

    let mut group = c.benchmark_group("virtual_file_read");
    group.throughput(Throughput::Bytes(4096));

    group.bench_function("warm_4k", |b| {
        let mut rng = StdRng::seed_from_u64(11);
        let mut buf = vec![0u8; 4096];
        b.iter(|| {
            let position = rng.gen_range(0..(size - buf.len())) as u64;
            file.read_range(position, &mut buf).unwrap();
            black_box(buf[0])
        });
    });

    group.bench_function("cold_4k", |b| {
        let mut rng = StdRng::seed_from_u64(13);
        let mut buf = vec![0u8; 4096];
        b.iter(|| {
            // Fresh handle: every read fetches its chunks from the store
            let mut cold = VirtualFile::open(store.clone(), record.clone(), CHUNK_SIZE);
            let position = rng.gen_range(0..(size - buf.len())) as u64;
            cold.read_range(position, &mut buf).unwrap();
            black_box(buf[0])
        });
    });

    group.finish();
}

fn bench_term_search(c: &mut Criterion) {
    let store = Arc::new(MemoryChunkStore::new());
    let directory = Arc::new(VirtualDirectory::new("Article", store, CHUNK_SIZE));
    let writer = IndexWriter::open("Article", directory, Arc::new(AnalyzerRegistry::new())).unwrap();

    let words = ["rust", "chunk", "search", "engine", "replica", "segment", "index", "query"];
    let mut rng = StdRng::seed_from_u64(17);
    for i in 0..5_000 {
        let body: Vec<&str> = (0..12).map(|_| words[rng.gen_range(0..words.len())]).collect();
        let entity = Entity::new("Article", &i.to_string())
            .with_field(FieldDescriptor::text("content", body.join(" ")));
        writer.add_entity(&entity).unwrap();
    }
    writer.commit().unwrap();
    let reader = writer.open_reader().unwrap();

    let mut group = c.benchmark_group("term_search");
    group.bench_function("single_term_top10", |b| {
        let query = Query::term("content", "replica");
        b.iter(|| black_box(reader.search(&query, None, 1, 10).unwrap().total));
    });
    group.bench_function("prefix_top10", |b| {
        let query = Query::prefix("content", "seg");
        b.iter(|| black_box(reader.search(&query, None, 1, 10).unwrap().total));
    });
    group.finish();
}

criterion_group!(benches, bench_write_flush, bench_random_reads, bench_term_search);
criterion_main!(benches);
