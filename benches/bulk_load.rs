use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use tempfile::TempDir;
use tessera::{BoundingBox, Config, FeatureSet, Geometry, SpatialDb, WriteOptions};

const ZOOM_LEVELS: u8 = 10;

fn world() -> BoundingBox {
    BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap()
}

fn random_points(n: usize) -> Vec<Geometry> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| Geometry::point(rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)))
        .collect()
}

fn bench_bulk_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_load");
    group.sample_size(10);

    for n in [10_000usize, 100_000].iter() {
        let geometries = random_points(*n);
        let blobs = vec![b"blob"; *n];
        let features = vec![FeatureSet::new(); *n];
        group.throughput(Throughput::Elements(*n as u64));

        for bulk_load in [false, true] {
            let label = if bulk_load { "bulk_mode" } else { "default" };
            group.bench_with_input(BenchmarkId::new(label, n), n, |b, _| {
                let config = Config::default()
                    .with_volatile_storage(true)
                    .with_parallelism(3)
                    .with_bulk_load(bulk_load);

                b.iter(|| {
                    let dir = TempDir::new().unwrap();
                    let path = dir.path().join("db");
                    SpatialDb::destroy(&path).unwrap();
                    SpatialDb::create(&config, &path, world(), ZOOM_LEVELS).unwrap();

                    let db = SpatialDb::open(&config, &path, ZOOM_LEVELS).unwrap();
                    db.bulk_insert(&WriteOptions::no_wal(), &geometries, &blobs, &features)
                        .unwrap();
                    db.compact().unwrap();
                    black_box(db.stats().unwrap());
                });
            });
        }
    }

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("box_query");
    let n = 50_000;

    let db = SpatialDb::memory(world(), ZOOM_LEVELS).unwrap();
    db.bulk_insert(
        &WriteOptions::no_wal(),
        &random_points(n),
        &vec![b"blob"; n],
        &vec![FeatureSet::new(); n],
    )
    .unwrap();

    let window = BoundingBox::new(40.0, 40.0, 60.0, 60.0).unwrap();
    for zoom in [2u8, 5, 8].iter() {
        group.bench_with_input(BenchmarkId::new("zoom", zoom), zoom, |b, &zoom| {
            b.iter(|| {
                let hits = db.query(black_box(&window), zoom).unwrap().count();
                black_box(hits)
            });
        });
    }

    group.bench_function("auto_zoom", |b| {
        b.iter(|| black_box(db.query_auto(black_box(&window)).unwrap().count()));
    });

    group.finish();
}

criterion_group!(benches, bench_bulk_load, bench_queries);
criterion_main!(benches);
