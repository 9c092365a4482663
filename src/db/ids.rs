//! Object id allocation.
//!
//! A file-backed database persists an id lease in `<dir>/IDS`. Every id
//! below the leased bound may already have been handed out, so a reopen
//! resumes at or past it even when the objects that used those ids never
//! reached the disk. The bound is raised a block at a time before any id
//! beyond it is returned, and lowered to the exact next id on a clean close.

use super::meta::{remove_named, replace_file};
use crate::error::{Result, TesseraError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) const IDS_FILE: &str = "IDS";

/// Ids leased past the last one requested.
const LEASE_BLOCK: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct LeaseRecord {
    leased_until: u64,
}

struct IdLease {
    dir: PathBuf,
    sync: bool,
    /// Persisted bound; ids below it are covered.
    bound: Mutex<u64>,
}

impl IdLease {
    fn cover(&self, end: u64) -> Result<()> {
        let mut bound = self.bound.lock();
        if end <= *bound {
            return Ok(());
        }

        let leased_until = end.saturating_add(LEASE_BLOCK);
        save(&self.dir, leased_until, self.sync)?;
        log::debug!("Leased object ids up to {}", leased_until);
        *bound = leased_until;
        Ok(())
    }
}

/// Hands out monotonically increasing object ids.
pub(crate) struct IdAllocator {
    next: AtomicU64,
    lease: Option<IdLease>,
}

impl IdAllocator {
    /// Allocator for a database nothing outlives.
    pub fn volatile(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next),
            lease: None,
        }
    }

    /// Allocator for a writable database in `dir`.
    ///
    /// `next_stored` is one past the greatest id found in storage.
    pub fn leased(dir: &Path, sync: bool, next_stored: u64) -> Result<Self> {
        let leased_until = load(dir)?.unwrap_or(0);
        Ok(Self {
            next: AtomicU64::new(next_stored.max(leased_until)),
            lease: Some(IdLease {
                dir: dir.to_path_buf(),
                sync,
                bound: Mutex::new(leased_until),
            }),
        })
    }

    /// Allocator for a read-only database in `dir`; it never writes the lease.
    pub fn recovered(dir: &Path, next_stored: u64) -> Result<Self> {
        let leased_until = load(dir)?.unwrap_or(0);
        Ok(Self::volatile(next_stored.max(leased_until)))
    }

    /// Id the next allocation starts at.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Reserve `count` consecutive ids and return the first.
    ///
    /// The ids are covered by the persisted lease before this returns. On
    /// error they are skipped, never handed out again.
    pub fn allocate(&self, count: u64) -> Result<u64> {
        let first = self.next.fetch_add(count, Ordering::AcqRel);
        if let Some(lease) = &self.lease {
            lease.cover(first.saturating_add(count))?;
        }
        Ok(first)
    }

    /// Shrink the lease to the ids actually handed out.
    pub fn release(&self) -> Result<()> {
        let Some(lease) = &self.lease else {
            return Ok(());
        };

        let mut bound = lease.bound.lock();
        let next = self.peek();
        if next != *bound {
            save(&lease.dir, next, lease.sync)?;
            *bound = next;
        }
        Ok(())
    }

    /// Delete the lease file in `dir`. Returns whether one was there.
    pub fn remove(dir: &Path) -> Result<bool> {
        remove_named(dir, IDS_FILE)
    }
}

fn load(dir: &Path) -> Result<Option<u64>> {
    let path = dir.join(IDS_FILE);
    if !path.is_file() {
        return Ok(None);
    }

    let raw = fs::read(&path)?;
    let record: LeaseRecord = serde_json::from_slice(&raw).map_err(|e| {
        TesseraError::Corruption(format!("unreadable id lease {}: {}", path.display(), e))
    })?;
    Ok(Some(record.leased_until))
}

fn save(dir: &Path, leased_until: u64, sync: bool) -> Result<()> {
    let json = serde_json::to_vec(&LeaseRecord { leased_until })
        .map_err(|e| TesseraError::serialization("encoding id lease", e))?;
    replace_file(dir, IDS_FILE, &json, sync)
}
