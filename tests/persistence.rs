use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::path::Path;
use tempfile::TempDir;
use tessera::{
    BoundingBox, Config, FeatureSet, Geometry, ObjectId, SpatialDb, TesseraError, WriteOptions,
};

const ZOOM_LEVELS: u8 = 10;

fn world() -> BoundingBox {
    BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap()
}

fn count_distinct(db: &SpatialDb) -> usize {
    let mut ids = HashSet::new();
    for hit in db.query(&world(), 0).unwrap() {
        assert!(ids.insert(hit.unwrap().id), "duplicate id in query");
    }
    ids.len()
}

fn random_points(rng: &mut StdRng, n: usize) -> Vec<Geometry> {
    (0..n)
        .map(|_| Geometry::point(rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)))
        .collect()
}

/// Destroy, create, bulk insert without the log, compact, reopen, count.
fn bulk_load_workload(path: &Path, n: usize) {
    let config = Config::default()
        .with_volatile_storage(true)
        .with_parallelism(3)
        .with_statistics(true);

    SpatialDb::destroy(path).unwrap();
    SpatialDb::create(&config, path, world(), ZOOM_LEVELS).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let geometries = random_points(&mut rng, n);
    let blobs = vec![b"blob"; n];
    let features = vec![FeatureSet::new(); n];

    {
        let db = SpatialDb::open(&config, path, ZOOM_LEVELS).unwrap();
        let summary = db
            .bulk_insert(&WriteOptions::no_wal(), &geometries, &blobs, &features)
            .unwrap();
        assert_eq!(summary.objects, n);

        db.compact().unwrap();
        assert_eq!(count_distinct(&db), n);
    }

    let db = SpatialDb::open(&config, path, ZOOM_LEVELS).unwrap();
    assert_eq!(count_distinct(&db), n);
    assert_eq!(db.next_object_id(), ObjectId::new(n as u64 + 1));
}

#[test]
fn test_create_already_exists_destroy_create() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let config = Config::default();

    SpatialDb::create(&config, &path, world(), ZOOM_LEVELS).unwrap();

    let err = SpatialDb::create(&config, &path, world(), ZOOM_LEVELS).unwrap_err();
    assert!(matches!(err, TesseraError::AlreadyExists(p) if p == path));

    SpatialDb::destroy(&path).unwrap();
    assert!(!path.exists());
    SpatialDb::create(&config, &path, world(), ZOOM_LEVELS).unwrap();

    // Destroying nothing is fine.
    SpatialDb::destroy(dir.path().join("never-created")).unwrap();
}

#[test]
fn test_open_missing_and_mismatched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let config = Config::default();

    assert!(SpatialDb::open(&config, &path, ZOOM_LEVELS)
        .unwrap_err()
        .is_not_found());

    SpatialDb::create(&config, &path, world(), ZOOM_LEVELS).unwrap();
    assert!(SpatialDb::open(&config, &path, ZOOM_LEVELS - 1)
        .unwrap_err()
        .is_corruption());

    std::fs::write(path.join("META"), b"garbage").unwrap();
    assert!(SpatialDb::open(&config, &path, ZOOM_LEVELS)
        .unwrap_err()
        .is_corruption());
}

#[test]
fn test_create_rejects_bad_parameters() {
    let dir = TempDir::new().unwrap();
    let config = Config::default();

    let err = SpatialDb::create(&config, dir.path().join("a"), world(), 0).unwrap_err();
    assert!(err.is_invalid_argument());

    let flat = BoundingBox::new(0.0, 0.0, 0.0, 10.0).unwrap();
    let err = SpatialDb::create(&config, dir.path().join("b"), flat, 4).unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn test_reopen_recovers_logged_and_closed_writes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let config = Config::default();
    SpatialDb::create(&config, &path, world(), ZOOM_LEVELS).unwrap();

    let logged;
    {
        let db = SpatialDb::open(&config, &path, ZOOM_LEVELS).unwrap();
        logged = db
            .insert(
                &WriteOptions::synced(),
                Geometry::point(10.0, 10.0),
                &b"logged"[..],
                FeatureSet::new(),
            )
            .unwrap();
        db.insert(
            &WriteOptions::no_wal(),
            Geometry::point(20.0, 20.0),
            &b"unlogged"[..],
            FeatureSet::new(),
        )
        .unwrap();
        // Simulated crash: nothing is checkpointed.
        std::mem::forget(db);
    }

    let db = SpatialDb::open(&config, &path, ZOOM_LEVELS).unwrap();
    assert_eq!(count_distinct(&db), 1);
    assert_eq!(db.get(logged).unwrap().0.as_ref(), b"logged");

    let unlogged = db
        .insert(
            &WriteOptions::no_wal(),
            Geometry::point(30.0, 30.0),
            &b"unlogged"[..],
            FeatureSet::new(),
        )
        .unwrap();
    assert!(unlogged > logged);
    db.close().unwrap();

    let db = SpatialDb::open_read_only(&config, &path, ZOOM_LEVELS).unwrap();
    assert_eq!(count_distinct(&db), 2);
    assert_eq!(db.get(unlogged).unwrap().0.as_ref(), b"unlogged");
}

#[test]
fn test_ids_are_not_reused_after_crash() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let config = Config::default();
    SpatialDb::create(&config, &path, world(), ZOOM_LEVELS).unwrap();

    let lost;
    {
        let db = SpatialDb::open(&config, &path, ZOOM_LEVELS).unwrap();
        let logged = db
            .insert(
                &WriteOptions::synced(),
                Geometry::point(10.0, 10.0),
                &b"logged"[..],
                FeatureSet::new(),
            )
            .unwrap();
        assert_eq!(logged, ObjectId::FIRST);

        lost = db
            .insert(
                &WriteOptions::no_wal(),
                Geometry::point(20.0, 20.0),
                &b"lost"[..],
                FeatureSet::new(),
            )
            .unwrap();
        assert_eq!(lost, ObjectId::new(2));
        std::mem::forget(db);
    }

    let db = SpatialDb::open(&config, &path, ZOOM_LEVELS).unwrap();
    assert!(db.get(lost).unwrap_err().is_not_found());

    let next = db
        .insert(
            &WriteOptions::synced(),
            Geometry::point(30.0, 30.0),
            &b"next"[..],
            FeatureSet::new(),
        )
        .unwrap();
    assert!(next > lost, "id {} handed out again", next);

    // A clean close hands back the unused part of the lease.
    db.close().unwrap();
    let db = SpatialDb::open(&config, &path, ZOOM_LEVELS).unwrap();
    assert_eq!(db.next_object_id(), ObjectId::new(next.get() + 1));
}

#[test]
fn test_destroy_rejects_plain_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("db");
    std::fs::write(&file, b"not a database").unwrap();

    let err = SpatialDb::destroy(&file).unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(file.is_file());
}

#[test]
fn test_bulk_load_workload() {
    let dir = TempDir::new().unwrap();
    bulk_load_workload(&dir.path().join("db"), 20_000);
}

#[test]
#[ignore] // Takes a while; run with --ignored
fn test_bulk_load_million_points() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    bulk_load_workload(&dir.path().join("db"), 1_000_000);
}
