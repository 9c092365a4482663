//! Database builder for flexible configuration
//!
//! One entry point for in-memory and on-disk databases, with optional
//! create-if-missing semantics on top of [`SpatialDb::create`] and
//! [`SpatialDb::open`].

use crate::config::Config;
use crate::db::SpatialDb;
use crate::error::{Result, TesseraError};
use std::path::PathBuf;
use tessera_types::BoundingBox;

/// Zoom levels used when none are configured.
pub const DEFAULT_ZOOM_LEVELS: u8 = 10;

/// Builder for [`SpatialDb`].
#[derive(Debug)]
pub struct SpatialDbBuilder {
    path: Option<PathBuf>,
    config: Config,
    world: Option<BoundingBox>,
    zoom_levels: u8,
    read_only: bool,
    create_if_missing: bool,
}

impl SpatialDbBuilder {
    /// Create a new builder with default in-memory configuration.
    pub fn new() -> Self {
        Self {
            path: None,
            config: Config::default(),
            world: None,
            zoom_levels: DEFAULT_ZOOM_LEVELS,
            read_only: false,
            create_if_missing: false,
        }
    }

    /// Store the database in this directory.
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Configure for in-memory storage with no persistence.
    pub fn in_memory(mut self) -> Self {
        self.path = None;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// World box; required for in-memory databases and for creation.
    pub fn world(mut self, world: BoundingBox) -> Self {
        self.world = Some(world);
        self
    }

    pub fn zoom_levels(mut self, zoom_levels: u8) -> Self {
        self.zoom_levels = zoom_levels;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Create the on-disk database when the directory holds none.
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    fn require_world(&self) -> Result<BoundingBox> {
        self.world.ok_or_else(|| {
            TesseraError::InvalidArgument("a world bounding box is required".to_string())
        })
    }

    /// Build the database, creating and opening it as configured.
    pub fn build(self) -> Result<SpatialDb> {
        let Some(path) = self.path.as_deref() else {
            let world = self.require_world()?;
            return SpatialDb::memory_with_config(self.config, world, self.zoom_levels);
        };

        if self.create_if_missing && !self.read_only {
            match SpatialDb::create(&self.config, path, self.require_world()?, self.zoom_levels) {
                Ok(()) | Err(TesseraError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let db = if self.read_only {
            SpatialDb::open_read_only(&self.config, path, self.zoom_levels)?
        } else {
            SpatialDb::open(&self.config, path, self.zoom_levels)?
        };

        if let Some(world) = self.world {
            if db.world() != &world {
                return Err(TesseraError::InvalidArgument(format!(
                    "database at {} covers {:?}, not {:?}",
                    path.display(),
                    db.world(),
                    world
                )));
            }
        }
        Ok(db)
    }
}

impl Default for SpatialDbBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteOptions;
    use tempfile::TempDir;
    use tessera_types::{FeatureSet, Geometry};

    fn world() -> BoundingBox {
        BoundingBox::new(-180.0, -90.0, 180.0, 90.0).unwrap()
    }

    #[test]
    fn test_builder_default() {
        let builder = SpatialDbBuilder::new();
        assert!(builder.path.is_none());
        assert_eq!(builder.zoom_levels, DEFAULT_ZOOM_LEVELS);
    }

    #[test]
    fn test_builder_in_memory_requires_world() {
        assert!(SpatialDbBuilder::new()
            .build()
            .unwrap_err()
            .is_invalid_argument());

        let db = SpatialDbBuilder::new()
            .world(world())
            .zoom_levels(6)
            .build()
            .unwrap();
        assert_eq!(db.zoom_levels(), 6);
        assert!(db.path().is_none());
    }

    #[test]
    fn test_builder_create_if_missing_then_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("places");

        let db = SpatialDbBuilder::new()
            .path(&path)
            .world(world())
            .create_if_missing(true)
            .build()
            .unwrap();
        let id = db
            .insert(
                &WriteOptions::default(),
                Geometry::point(2.35, 48.85),
                &b"paris"[..],
                FeatureSet::new(),
            )
            .unwrap();
        db.close().unwrap();

        let db = SpatialDbBuilder::new()
            .path(&path)
            .world(world())
            .create_if_missing(true)
            .read_only(true)
            .build()
            .unwrap();
        assert_eq!(db.get(id).unwrap().0.as_ref(), b"paris");
    }

    #[test]
    fn test_builder_missing_database() {
        let dir = TempDir::new().unwrap();
        let err = SpatialDbBuilder::new()
            .path(dir.path().join("absent"))
            .build()
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_builder_in_memory_clears_path() {
        let builder = SpatialDbBuilder::new().path("somewhere").in_memory();
        assert!(builder.path.is_none());
    }
}
