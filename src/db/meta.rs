//! Persisted database descriptor.
//!
//! The descriptor lives in `<dir>/META` as JSON and fixes the world box and
//! zoom level count for the lifetime of the database.

use crate::error::{Result, TesseraError};
use crate::tile::TileGrid;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tessera_types::BoundingBox;

pub(crate) const META_FILE: &str = "META";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DbMeta {
    pub format_version: u32,
    pub world: BoundingBox,
    pub zoom_levels: u8,
}

impl DbMeta {
    pub fn new(grid: &TileGrid) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            world: *grid.world(),
            zoom_levels: grid.zoom_levels(),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(META_FILE)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path(dir).is_file()
    }

    /// Read the descriptor, `None` when `dir` holds no database.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(dir);
        if !path.is_file() {
            return Ok(None);
        }

        let raw = fs::read(&path)?;
        let meta: DbMeta = serde_json::from_slice(&raw).map_err(|e| {
            TesseraError::Corruption(format!("unreadable descriptor {}: {}", path.display(), e))
        })?;

        if meta.format_version != FORMAT_VERSION {
            return Err(TesseraError::Corruption(format!(
                "descriptor {} has unsupported format version {}",
                path.display(),
                meta.format_version
            )));
        }

        Ok(Some(meta))
    }

    /// The grid this descriptor describes.
    pub fn grid(&self) -> Result<TileGrid> {
        TileGrid::new(self.world, self.zoom_levels).map_err(|e| {
            TesseraError::Corruption(format!("descriptor holds an invalid grid: {}", e))
        })
    }

    pub fn save(&self, dir: &Path, sync: bool) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| TesseraError::serialization("encoding database descriptor", e))?;
        replace_file(dir, META_FILE, &json, sync)
    }

    /// Delete the descriptor. Returns whether anything was there.
    pub fn remove(dir: &Path) -> Result<bool> {
        remove_named(dir, META_FILE)
    }
}

fn temp_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.tmp", name))
}

/// Atomically replace `<dir>/<name>` with `contents`.
///
/// The bytes go to `<name>.tmp` first and are renamed over the target, so a
/// crash leaves either the old or the new file. With `sync` both the file
/// and the directory entry are fsynced before returning.
pub(crate) fn replace_file(dir: &Path, name: &str, contents: &[u8], sync: bool) -> Result<()> {
    let path = dir.join(name);
    let temp = temp_path(dir, name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp)?;
    file.write_all(contents)?;
    if sync {
        file.sync_all()?;
    }
    drop(file);

    fs::rename(&temp, &path)?;
    if sync {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

/// Delete `<dir>/<name>` and its temporary twin. Returns whether either existed.
pub(crate) fn remove_named(dir: &Path, name: &str) -> Result<bool> {
    let mut removed = false;
    for path in [dir.join(name), temp_path(dir, name)] {
        if path.exists() {
            fs::remove_file(path)?;
            removed = true;
        }
    }
    Ok(removed)
}
