//! Embedded spatial key-value store with tiled indexing.
//!
//! Objects (a point or a box, an opaque blob and a set of named features) are
//! indexed under every tile they touch at each zoom level of a uniform grid
//! over a fixed world box. Box queries scan the covering tiles at one level,
//! deduplicate candidates and re-check them against the stored geometry.
//!
//! ```rust
//! use tessera::{BoundingBox, Config, FeatureSet, Geometry, SpatialDb, WriteOptions};
//!
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("places");
//! let config = Config::default();
//!
//! SpatialDb::create(&config, &path, BoundingBox::new(0.0, 0.0, 100.0, 100.0)?, 10)?;
//! let db = SpatialDb::open(&config, &path, 10)?;
//!
//! let mut features = FeatureSet::new();
//! features.set("name", "depot");
//! let id = db.insert(&WriteOptions::default(), Geometry::point(50.0, 50.0), &b"blob"[..], features)?;
//!
//! let hits: Vec<_> = db
//!     .query(&BoundingBox::new(40.0, 40.0, 60.0, 60.0)?, 5)?
//!     .collect::<tessera::Result<_>>()?;
//! assert_eq!(hits[0].id, id);
//! # Ok::<(), tessera::TesseraError>(())
//! ```

pub mod builder;
pub mod config;
pub mod db;
pub mod error;
pub mod feature_store;
mod keys;
pub mod storage;
pub mod tile;

pub use builder::{DEFAULT_ZOOM_LEVELS, SpatialDbBuilder};
pub use config::{Config, Durability, SyncMode, SyncPolicy, WriteOptions};
pub use db::{BulkInsertSummary, DbStats, ObjectId, QueryHit, QueryIter, SpatialDb};
pub use error::{Result, TesseraError};
pub use feature_store::{FeatureRecord, FeatureStore};
pub use tile::{MAX_ZOOM_LEVELS, TileGrid, TileId, TileRange};

pub use tessera_types::{BoundingBox, Coord, FeatureSet, FeatureValue, Geometry, GeometryError};

pub use storage::{
    FileBackend, FileOptions, KeyRange, MemoryBackend, StorageBackend, StorageOp, StorageStats,
    WriteBatch,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{Result, SpatialDb, SpatialDbBuilder, TesseraError};

    pub use crate::{BoundingBox, Coord, FeatureSet, FeatureValue, Geometry};

    pub use crate::{Config, Durability, WriteOptions};

    pub use crate::{ObjectId, QueryHit};
}
