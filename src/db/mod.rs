//! The spatial database.
//!
//! [`SpatialDb`] ties the tile grid, the feature store and a storage backend
//! together. Every object is indexed at every zoom level: one empty-valued
//! index entry per covering tile, plus one feature record holding the
//! geometry, the blob and the features. An object's entries and record are
//! always committed in the same atomic batch.
//!
//! # Examples
//!
//! ```rust
//! use tessera::{BoundingBox, FeatureSet, Geometry, SpatialDb, WriteOptions};
//!
//! # fn main() -> tessera::Result<()> {
//! let world = BoundingBox::new(0.0, 0.0, 100.0, 100.0)?;
//! let db = SpatialDb::memory(world, 10)?;
//!
//! let id = db.insert(
//!     &WriteOptions::default(),
//!     Geometry::point(50.0, 50.0),
//!     &b"blob"[..],
//!     FeatureSet::new(),
//! )?;
//!
//! let hits = db
//!     .query(&BoundingBox::new(40.0, 40.0, 60.0, 60.0)?, 5)?
//!     .collect::<tessera::Result<Vec<_>>>()?;
//! assert_eq!(hits.len(), 1);
//! assert_eq!(hits[0].id, id);
//! # Ok(())
//! # }
//! ```

use crate::config::{Config, WriteOptions};
use crate::error::{Result, TesseraError};
use crate::feature_store::{FeatureRecord, FeatureStore};
use crate::keys;
use crate::storage::{FileBackend, FileOptions, MemoryBackend, StorageBackend, WriteBatch};
use crate::tile::{TileGrid, TileRange};
use bytes::Bytes;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tessera_types::{BoundingBox, FeatureSet, Geometry};

mod ids;
mod meta;
mod query;
mod stats;

use ids::IdAllocator;
use meta::DbMeta;
use stats::StatsCollector;

pub use query::{QueryHit, QueryIter};
pub use stats::DbStats;

/// Identifier assigned to every stored object.
///
/// Ids start at 1, grow monotonically and are never reused, including ids
/// handed out to writes that later failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const FIRST: ObjectId = ObjectId(1);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ObjectId> for u64 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// Outcome of a successful [`SpatialDb::bulk_insert`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkInsertSummary {
    pub objects: usize,
    pub index_entries: u64,
    /// Atomic sub-batches committed
    pub flushes: usize,
    /// Ids in input order
    pub ids: Vec<ObjectId>,
}

/// Tile coverage of one geometry, one range per zoom level.
type Coverage = SmallVec<[TileRange; 16]>;

/// Embedded spatial key-value store with tiled indexing.
///
/// All operations take `&self`; a `SpatialDb` can be shared across threads
/// behind an `Arc`. Concurrent inserts are each atomic, and a query reads a
/// consistent view of the index that never includes part of a batch.
pub struct SpatialDb {
    grid: TileGrid,
    config: Config,
    storage: Arc<dyn StorageBackend>,
    path: Option<PathBuf>,
    read_only: bool,
    ids: IdAllocator,
    stats: Arc<StatsCollector>,
    closed: AtomicBool,
}

impl fmt::Debug for SpatialDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialDb")
            .field("path", &self.path)
            .field("world", self.grid.world())
            .field("zoom_levels", &self.grid.zoom_levels())
            .field("read_only", &self.read_only)
            .field("next_object_id", &self.ids.peek())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SpatialDb {
    /// Create a new, empty database at `path`.
    ///
    /// Fails with `AlreadyExists` when a database is already there.
    pub fn create<P: AsRef<Path>>(
        config: &Config,
        path: P,
        world: BoundingBox,
        zoom_levels: u8,
    ) -> Result<()> {
        let path = path.as_ref();
        config.check()?;
        let grid = TileGrid::new(world, zoom_levels)?;

        if DbMeta::exists(path) {
            return Err(TesseraError::AlreadyExists(path.to_path_buf()));
        }

        fs::create_dir_all(path)?;
        DbMeta::new(&grid).save(path, config.data_sync_enabled())?;

        log::info!(
            "Created database at {} over {:?} with {} zoom levels{}",
            path.display(),
            world,
            zoom_levels,
            if config.storage_is_volatile {
                " (volatile storage)"
            } else {
                ""
            }
        );
        Ok(())
    }

    /// Open an existing database for reading and writing.
    ///
    /// `zoom_levels` must match the value the database was created with.
    pub fn open<P: AsRef<Path>>(config: &Config, path: P, zoom_levels: u8) -> Result<Self> {
        Self::open_with(config, path.as_ref(), zoom_levels, false)
    }

    /// Open an existing database without ever writing to its files.
    pub fn open_read_only<P: AsRef<Path>>(
        config: &Config,
        path: P,
        zoom_levels: u8,
    ) -> Result<Self> {
        Self::open_with(config, path.as_ref(), zoom_levels, true)
    }

    fn open_with(config: &Config, path: &Path, zoom_levels: u8, read_only: bool) -> Result<Self> {
        config.check()?;

        let meta = DbMeta::load(path)?.ok_or_else(|| {
            TesseraError::NotFound(format!("no database at {}", path.display()))
        })?;
        if meta.zoom_levels != zoom_levels {
            return Err(TesseraError::Corruption(format!(
                "database at {} has {} zoom levels, opened with {}",
                path.display(),
                meta.zoom_levels,
                zoom_levels
            )));
        }
        let grid = meta.grid()?;

        let storage = FileBackend::open(path, FileOptions::from_config(config, read_only))?;
        let db = Self::from_parts(
            config.clone(),
            grid,
            Arc::new(storage),
            Some(path.to_path_buf()),
            read_only,
        )?;

        log::info!(
            "Opened database at {}{} (next object id {})",
            path.display(),
            if read_only { " read-only" } else { "" },
            db.next_object_id()
        );
        Ok(db)
    }

    /// Remove the database at `path`. Succeeds when nothing is there.
    ///
    /// Only files the database owns are deleted; the directory itself is
    /// removed when that leaves it empty. A path that exists but is not a
    /// directory is rejected with `InvalidArgument`.
    pub fn destroy<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        if !path.is_dir() {
            return Err(TesseraError::InvalidArgument(format!(
                "{} is not a database directory",
                path.display()
            )));
        }

        let mut removed = FileBackend::destroy(path)?;
        removed |= IdAllocator::remove(path)?;
        removed |= DbMeta::remove(path)?;
        if !removed {
            log::debug!("No database files in {}", path.display());
            return Ok(());
        }

        if let Err(e) = fs::remove_dir(path) {
            log::debug!("Leaving directory {} in place: {}", path.display(), e);
        }
        log::info!("Destroyed database at {}", path.display());
        Ok(())
    }

    /// Volatile in-process database with the default configuration.
    pub fn memory(world: BoundingBox, zoom_levels: u8) -> Result<Self> {
        Self::memory_with_config(Config::default(), world, zoom_levels)
    }

    pub fn memory_with_config(config: Config, world: BoundingBox, zoom_levels: u8) -> Result<Self> {
        config.check()?;
        let grid = TileGrid::new(world, zoom_levels)?;
        Self::from_parts(config, grid, Arc::new(MemoryBackend::new()), None, false)
    }

    fn from_parts(
        config: Config,
        grid: TileGrid,
        storage: Arc<dyn StorageBackend>,
        path: Option<PathBuf>,
        read_only: bool,
    ) -> Result<Self> {
        let next_stored = match FeatureStore::max_id(storage.as_ref())? {
            Some(id) => id.get() + 1,
            None => ObjectId::FIRST.get(),
        };
        let ids = match &path {
            Some(dir) if read_only => IdAllocator::recovered(dir, next_stored)?,
            Some(dir) => IdAllocator::leased(dir, config.data_sync_enabled(), next_stored)?,
            None => IdAllocator::volatile(next_stored),
        };

        Ok(Self {
            grid,
            stats: Arc::new(StatsCollector::new(&config)),
            config,
            storage,
            path,
            read_only,
            ids,
            closed: AtomicBool::new(false),
        })
    }

    pub fn world(&self) -> &BoundingBox {
        self.grid.world()
    }

    pub fn zoom_levels(&self) -> u8 {
        self.grid.zoom_levels()
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory of a persistent database, `None` for in-memory ones.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Id the next inserted object will receive.
    pub fn next_object_id(&self) -> ObjectId {
        ObjectId(self.ids.peek())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TesseraError::DatabaseClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(TesseraError::InvalidArgument(
                "database is open read-only".to_string(),
            ));
        }
        Ok(())
    }

    fn allocate_ids(&self, count: usize) -> Result<u64> {
        self.ids.allocate(count as u64)
    }

    /// Tiles `geometry` touches at every level, bounded by
    /// [`Config::max_index_entries_per_object`].
    fn coverage(&self, geometry: &Geometry) -> Result<Coverage> {
        geometry.validate()?;
        let coverage = (0..self.grid.zoom_levels())
            .map(|zoom| self.grid.tiles_for_geometry(geometry, zoom))
            .collect::<Result<Coverage>>()?;

        let entries = coverage
            .iter()
            .map(TileRange::len)
            .fold(0u64, u64::saturating_add);
        if entries > self.config.max_index_entries_per_object {
            return Err(TesseraError::InvalidArgument(format!(
                "geometry covers {} tiles over {} zoom levels, more than the limit of {}",
                entries,
                self.grid.zoom_levels(),
                self.config.max_index_entries_per_object
            )));
        }
        Ok(coverage)
    }

    /// Coverage for every geometry, spread over up to `parallelism` threads.
    fn coverage_many(&self, geometries: &[Geometry]) -> Result<Vec<Coverage>> {
        let threads = self.config.parallelism.min(geometries.len()).max(1);
        if threads == 1 {
            return geometries.iter().map(|g| self.coverage(g)).collect();
        }

        let per_thread = geometries.len().div_ceil(threads);
        std::thread::scope(|scope| {
            let handles: Vec<_> = geometries
                .chunks(per_thread)
                .map(|part| {
                    scope.spawn(move || {
                        part.iter()
                            .map(|g| self.coverage(g))
                            .collect::<Result<Vec<_>>>()
                    })
                })
                .collect();

            let mut all = Vec::with_capacity(geometries.len());
            for handle in handles {
                let part = handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))?;
                all.extend(part);
            }
            Ok(all)
        })
    }

    /// Stage index entries and the record of one object. Returns the entry count.
    fn stage(
        batch: &mut WriteBatch,
        id: ObjectId,
        coverage: &Coverage,
        record: &FeatureRecord,
    ) -> Result<u64> {
        let mut entries = 0;
        for range in coverage {
            for tile in range.iter() {
                batch.put(keys::index_key(&tile, id), Bytes::new());
                entries += 1;
            }
        }
        FeatureStore::put(batch, id, record)?;
        Ok(entries)
    }

    /// Store one object and return its id.
    ///
    /// The geometry must be valid and lie inside the world box. All index
    /// entries and the feature record are written in one atomic batch.
    pub fn insert(
        &self,
        opts: &WriteOptions,
        geometry: Geometry,
        blob: impl Into<Bytes>,
        features: FeatureSet,
    ) -> Result<ObjectId> {
        self.ensure_writable()?;
        let coverage = self.coverage(&geometry)?;

        let id = ObjectId(self.allocate_ids(1)?);
        let record = FeatureRecord::new(geometry, blob, features);
        let mut batch = WriteBatch::new();
        let entries = Self::stage(&mut batch, id, &coverage, &record)?;

        self.storage.write(batch, opts)?;
        self.stats.record_insert(1, entries);
        self.stats.maybe_dump(self.storage.as_ref());

        log::debug!("Inserted object {} with {} index entries", id, entries);
        Ok(id)
    }

    /// Store many objects.
    ///
    /// The three slices run in parallel and must have the same length, or
    /// nothing is written. Objects are committed in atomic sub-batches of
    /// [`Config::effective_bulk_flush_objects`]; a sub-batch holding an
    /// invalid geometry is not committed, the error is returned, and earlier
    /// sub-batches stay committed.
    pub fn bulk_insert<B: AsRef<[u8]>>(
        &self,
        opts: &WriteOptions,
        geometries: &[Geometry],
        blobs: &[B],
        features: &[FeatureSet],
    ) -> Result<BulkInsertSummary> {
        self.ensure_writable()?;

        if geometries.len() != blobs.len() || geometries.len() != features.len() {
            return Err(TesseraError::InvalidArgument(format!(
                "bulk insert needs equal lengths, got {} geometries, {} blobs and {} feature sets",
                geometries.len(),
                blobs.len(),
                features.len()
            )));
        }

        let start = Instant::now();
        let flush_objects = self.config.effective_bulk_flush_objects();
        let mut summary = BulkInsertSummary {
            ids: Vec::with_capacity(geometries.len()),
            ..BulkInsertSummary::default()
        };

        for offset in (0..geometries.len()).step_by(flush_objects) {
            let end = (offset + flush_objects).min(geometries.len());
            let coverages = self.coverage_many(&geometries[offset..end])?;

            let first_id = self.allocate_ids(end - offset)?;
            let mut batch = WriteBatch::with_capacity(end - offset);
            let mut entries = 0;
            let mut ids = Vec::with_capacity(end - offset);

            for (i, coverage) in coverages.iter().enumerate() {
                let id = ObjectId(first_id + i as u64);
                let record = FeatureRecord::new(
                    geometries[offset + i],
                    Bytes::copy_from_slice(blobs[offset + i].as_ref()),
                    features[offset + i].clone(),
                );
                entries += Self::stage(&mut batch, id, coverage, &record)?;
                ids.push(id);
            }

            self.storage.write(batch, opts)?;
            self.stats.record_insert(ids.len() as u64, entries);
            self.stats.record_flush();

            summary.objects += ids.len();
            summary.index_entries += entries;
            summary.flushes += 1;
            summary.ids.extend(ids);

            log::debug!(
                "Bulk flush {} committed {} objects ({} index entries)",
                summary.flushes,
                end - offset,
                entries
            );
            self.stats.maybe_dump(self.storage.as_ref());
        }

        log::info!(
            "Bulk inserted {} objects in {} flushes in {:?}",
            summary.objects,
            summary.flushes,
            start.elapsed()
        );
        Ok(summary)
    }

    /// Objects whose geometry intersects `bbox`, scanning tiles at `zoom`.
    ///
    /// Fails with `InvalidArgument` when `bbox` leaves the world box, `zoom`
    /// is not a maintained level, or the covering tiles need more key ranges
    /// than [`Config::max_query_scan_ranges`]. The returned iterator yields
    /// each matching object exactly once, in ascending id order.
    pub fn query(&self, bbox: &BoundingBox, zoom: u8) -> Result<QueryIter> {
        self.ensure_open()?;
        let range = self.grid.tiles_for_box(bbox, zoom)?;

        let rows = TileGrid::cells_per_axis(zoom);
        let scan_ranges = keys::index_range_count(&range, rows);
        if scan_ranges > self.config.max_query_scan_ranges as u64 {
            return Err(TesseraError::InvalidArgument(format!(
                "query at zoom {} spans {} tile columns, more than the limit of {}; use a coarser zoom",
                zoom, scan_ranges, self.config.max_query_scan_ranges
            )));
        }
        let index_keys = self
            .storage
            .scan_ranges_keys(&keys::index_ranges(&range, rows))?;

        let mut seen = FxHashSet::default();
        let mut candidates = Vec::new();
        for key in &index_keys {
            let (_, id) = keys::decode_index_key(key)?;
            if seen.insert(id) {
                candidates.push(id);
            }
        }
        candidates.sort_unstable();

        log::debug!(
            "Query over {} tiles at zoom {} found {} candidates",
            range.len(),
            zoom,
            candidates.len()
        );
        self.stats.record_query(candidates.len() as u64);

        Ok(QueryIter::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.stats),
            *bbox,
            candidates,
        ))
    }

    /// Like [`query`](Self::query), at the finest zoom within the configured tile budget.
    pub fn query_auto(&self, bbox: &BoundingBox) -> Result<QueryIter> {
        let zoom = self
            .grid
            .default_query_zoom(bbox, self.config.query_tile_budget)?;
        self.query(bbox, zoom)
    }

    /// Blob and features of one object.
    pub fn get(&self, id: ObjectId) -> Result<(Bytes, FeatureSet)> {
        self.ensure_open()?;
        let record = FeatureStore::get(self.storage.as_ref(), id)?;
        Ok((record.blob, record.features))
    }

    /// Geometry, blob and features of one object.
    pub fn get_record(&self, id: ObjectId) -> Result<FeatureRecord> {
        self.ensure_open()?;
        FeatureStore::get(self.storage.as_ref(), id)
    }

    /// Ask the engine to compact.
    ///
    /// `Unavailable` means another compaction is in progress; the call can
    /// simply be retried later.
    pub fn compact(&self) -> Result<()> {
        self.ensure_writable()?;
        let start = Instant::now();
        self.storage.compact()?;
        log::info!("Compaction finished in {:?}", start.elapsed());
        self.stats.maybe_dump(self.storage.as_ref());
        Ok(())
    }

    /// Flush logged writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.storage.sync()
    }

    pub fn stats(&self) -> Result<DbStats> {
        Ok(self.stats.snapshot(self.storage.stats()?))
    }

    /// Close the database, persisting unlogged writes of a file-backed database.
    ///
    /// Later calls fail with `DatabaseClosed`, including on iterators that
    /// are still live.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TesseraError::DatabaseClosed);
        }
        if self.config.statistics {
            if let Ok(storage) = self.storage.stats() {
                log::info!("Final database statistics:\n{}", self.stats.snapshot(storage));
            }
        }
        let released = self.ids.release();
        self.storage.close()?;
        released
    }
}

impl Drop for SpatialDb {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.ids.release() {
            log::warn!("Failed to release the object id lease: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn world() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap()
    }

    fn ids(iter: QueryIter) -> Vec<ObjectId> {
        iter.map(|hit| hit.unwrap().id).collect()
    }

    #[test]
    fn test_insert_writes_every_level() {
        let db = SpatialDb::memory(world(), 4).unwrap();
        let id = db
            .insert(
                &WriteOptions::default(),
                Geometry::point(10.0, 10.0),
                &b"p"[..],
                FeatureSet::new(),
            )
            .unwrap();

        assert_eq!(id, ObjectId::FIRST);
        assert_eq!(db.next_object_id(), ObjectId::new(2));

        let stats = db.stats().unwrap();
        assert_eq!(stats.index_entries_written, 4);
        // Four index entries plus the record.
        assert_eq!(stats.storage.key_count, 5);
    }

    #[test]
    fn test_box_spanning_tiles_is_returned_once() {
        let db = SpatialDb::memory(world(), 6).unwrap();
        let id = db
            .insert(
                &WriteOptions::default(),
                Geometry::bbox(10.0, 10.0, 90.0, 90.0).unwrap(),
                &b"wide"[..],
                FeatureSet::new(),
            )
            .unwrap();

        for zoom in 0..6 {
            let found = ids(db.query(&world(), zoom).unwrap());
            assert_eq!(found, vec![id], "zoom {}", zoom);
        }
    }

    #[test]
    fn test_query_rechecks_geometry() {
        let db = SpatialDb::memory(world(), 4).unwrap();
        db.insert(
            &WriteOptions::default(),
            Geometry::point(1.0, 1.0),
            &b"corner"[..],
            FeatureSet::new(),
        )
        .unwrap();

        // Same zoom-0 tile, but the box itself misses the point.
        let bbox = BoundingBox::new(50.0, 50.0, 60.0, 60.0).unwrap();
        let mut iter = db.query(&bbox, 0).unwrap();
        assert_eq!(iter.remaining_candidates(), 1);
        assert!(iter.next().is_none());

        let stats = db.stats().unwrap();
        assert_eq!(stats.query_candidates, 1);
        assert_eq!(stats.query_hits, 0);
    }

    #[test]
    fn test_invalid_geometry_is_rejected() {
        let db = SpatialDb::memory(world(), 4).unwrap();
        let outside = db.insert(
            &WriteOptions::default(),
            Geometry::point(150.0, 10.0),
            &b""[..],
            FeatureSet::new(),
        );
        assert!(outside.unwrap_err().is_invalid_argument());

        let nan = db.insert(
            &WriteOptions::default(),
            Geometry::point(f64::NAN, 10.0),
            &b""[..],
            FeatureSet::new(),
        );
        assert!(nan.unwrap_err().is_invalid_argument());
        assert_eq!(db.stats().unwrap().storage.key_count, 0);
    }

    #[test]
    fn test_bulk_insert_flushes_in_chunks() {
        let config = Config::default()
            .with_bulk_flush_objects(10)
            .with_parallelism(3);
        let db = SpatialDb::memory_with_config(config, world(), 5).unwrap();

        let geometries: Vec<Geometry> = (0..25)
            .map(|i| Geometry::point(f64::from(i) * 4.0, 50.0))
            .collect();
        let blobs = vec![b"blob"; 25];
        let features = vec![FeatureSet::new(); 25];

        let summary = db
            .bulk_insert(&WriteOptions::no_wal(), &geometries, &blobs, &features)
            .unwrap();
        assert_eq!(summary.objects, 25);
        assert_eq!(summary.flushes, 3);
        assert_eq!(summary.index_entries, 25 * 5);
        assert_eq!(summary.ids.first(), Some(&ObjectId::new(1)));
        assert_eq!(summary.ids.last(), Some(&ObjectId::new(25)));

        assert_eq!(ids(db.query(&world(), 0).unwrap()), summary.ids);
    }

    #[test]
    fn test_bulk_insert_keeps_committed_flushes_on_error() {
        let config = Config::default().with_bulk_flush_objects(4);
        let db = SpatialDb::memory_with_config(config, world(), 3).unwrap();

        let mut geometries: Vec<Geometry> = (0..8)
            .map(|i| Geometry::point(f64::from(i), f64::from(i)))
            .collect();
        geometries[5] = Geometry::point(-1.0, 0.0);
        let blobs = vec![Vec::<u8>::new(); 8];
        let features = vec![FeatureSet::new(); 8];

        let err = db
            .bulk_insert(&WriteOptions::default(), &geometries, &blobs, &features)
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let found = ids(db.query(&world(), 0).unwrap());
        assert_eq!(found.len(), 4);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let config = Config::default();
        SpatialDb::create(&config, &path, world(), 4).unwrap();

        let db = SpatialDb::open_read_only(&config, &path, 4).unwrap();
        assert!(db.is_read_only());
        let err = db
            .insert(
                &WriteOptions::default(),
                Geometry::point(1.0, 1.0),
                &b""[..],
                FeatureSet::new(),
            )
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(db.compact().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_fine_zoom_query_scans_columns() {
        let db = SpatialDb::memory(world(), 24).unwrap();
        let id = db
            .insert(
                &WriteOptions::default(),
                Geometry::point(12.5, 80.0),
                &b"p"[..],
                FeatureSet::new(),
            )
            .unwrap();

        // Full-height boxes collapse into one key range at any zoom.
        assert_eq!(ids(db.query(&world(), 23).unwrap()), vec![id]);

        let narrow = BoundingBox::new(12.0, 0.0, 13.0, 90.0).unwrap();
        assert_eq!(ids(db.query(&narrow, 14).unwrap()), vec![id]);

        // Half the world at zoom 23 is millions of partial columns.
        let lower_half = BoundingBox::new(0.0, 0.0, 100.0, 50.0).unwrap();
        let err = db.query(&lower_half, 23).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(db.query(&lower_half, 12).is_ok());
    }

    #[test]
    fn test_oversized_coverage_is_rejected() {
        let db = SpatialDb::memory(world(), 24).unwrap();
        let err = db
            .insert(
                &WriteOptions::default(),
                Geometry::bbox(0.0, 0.0, 100.0, 100.0).unwrap(),
                &b"everything"[..],
                FeatureSet::new(),
            )
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(db.stats().unwrap().storage.key_count, 0);
        assert_eq!(db.next_object_id(), ObjectId::FIRST);

        let config = Config::default().with_max_index_entries_per_object(4);
        let db = SpatialDb::memory_with_config(config, world(), 3).unwrap();
        let geometries = vec![
            Geometry::point(1.0, 1.0),
            Geometry::bbox(10.0, 10.0, 90.0, 90.0).unwrap(),
        ];
        let err = db
            .bulk_insert(
                &WriteOptions::default(),
                &geometries,
                &[b"a", b"b"],
                &[FeatureSet::new(), FeatureSet::new()],
            )
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(db.stats().unwrap().storage.key_count, 0);
    }

    #[test]
    fn test_debug_output() {
        let db = SpatialDb::memory(world(), 3).unwrap();
        let shown = format!("{:?}", db);
        assert!(shown.contains("zoom_levels: 3"));
        assert!(shown.contains("read_only: false"));

        let iter = db.query(&world(), 0).unwrap();
        assert!(format!("{:?}", iter).contains("remaining_candidates: 0"));
    }

    #[test]
    fn test_destroy_leaves_foreign_paths_alone() {
        let dir = TempDir::new().unwrap();

        let file = dir.path().join("plain.txt");
        fs::write(&file, b"not a database").unwrap();
        assert!(SpatialDb::destroy(&file).unwrap_err().is_invalid_argument());
        assert!(file.exists());

        let empty = dir.path().join("empty");
        fs::create_dir(&empty).unwrap();
        SpatialDb::destroy(&empty).unwrap();
        assert!(empty.is_dir());
    }

    #[test]
    fn test_closed_database() {
        let db = SpatialDb::memory(world(), 2).unwrap();
        db.close().unwrap();

        assert!(matches!(db.close(), Err(TesseraError::DatabaseClosed)));
        assert!(matches!(
            db.query(&world(), 0),
            Err(TesseraError::DatabaseClosed)
        ));
        assert!(matches!(
            db.get(ObjectId::FIRST),
            Err(TesseraError::DatabaseClosed)
        ));
    }
}
