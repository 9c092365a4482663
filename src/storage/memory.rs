//! In-memory storage backend implementation.

use super::{KeyRange, StorageBackend, StorageOp, StorageStats, WriteBatch};
use crate::config::WriteOptions;
use crate::error::{Result, TesseraError};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-memory storage backend using an ordered map behind a read-write lock.
///
/// A batch is applied under a single write lock, so readers never observe
/// part of one.
pub struct MemoryBackend {
    data: RwLock<BTreeMap<Bytes, Bytes>>,
    batches_written: AtomicU64,
    operations_count: AtomicU64,
    compactions: AtomicU64,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::from_image(BTreeMap::new())
    }

    /// Create a backend pre-populated with `image`.
    pub fn from_image(image: BTreeMap<Bytes, Bytes>) -> Self {
        Self {
            data: RwLock::new(image),
            batches_written: AtomicU64::new(0),
            operations_count: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Point-in-time copy of every key and value.
    pub fn image(&self) -> BTreeMap<Bytes, Bytes> {
        self.data.read().clone()
    }

    /// Apply operations under one write lock.
    pub(crate) fn apply(&self, ops: Vec<StorageOp>) {
        let count = ops.len() as u64;
        {
            let mut data = self.data.write();
            apply_ops(&mut data, ops);
        }
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.operations_count.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TesseraError::DatabaseClosed);
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `ops` in order to an ordered map.
pub(crate) fn apply_ops(data: &mut BTreeMap<Bytes, Bytes>, ops: Vec<StorageOp>) {
    for op in ops {
        match op {
            StorageOp::Put { key, value } => {
                data.insert(key, value);
            }
            StorageOp::Delete { key } => {
                data.remove(&key);
            }
        }
    }
}

/// Smallest key greater than every key starting with `prefix`, if any.
fn prefix_successor(prefix: &[u8]) -> Option<Bytes> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(Bytes::from(end));
        }
    }
    None
}

fn prefix_range<'a>(
    data: &'a BTreeMap<Bytes, Bytes>,
    prefix: &[u8],
) -> std::collections::btree_map::Range<'a, Bytes, Bytes> {
    let start = Bound::Included(Bytes::copy_from_slice(prefix));
    let end = match prefix_successor(prefix) {
        Some(end) => Bound::Excluded(end),
        None => Bound::Unbounded,
    };
    data.range((start, end))
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn write(&self, batch: WriteBatch, _opts: &WriteOptions) -> Result<()> {
        self.ensure_open()?;
        self.apply(batch.into_ops());
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        self.ensure_open()?;
        let data = self.data.read();
        Ok(prefix_range(&data, prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn scan_ranges_keys(&self, ranges: &[KeyRange]) -> Result<Vec<Bytes>> {
        self.ensure_open()?;
        let data = self.data.read();
        let mut keys = Vec::new();
        for range in ranges {
            if range.start >= range.end {
                continue;
            }
            let bounds = (
                Bound::Included(range.start.clone()),
                Bound::Excluded(range.end.clone()),
            );
            keys.extend(data.range(bounds).map(|(k, _)| k.clone()));
        }
        Ok(keys)
    }

    fn last_key_with_prefix(&self, prefix: &[u8]) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        let data = self.data.read();
        Ok(prefix_range(&data, prefix).next_back().map(|(k, _)| k.clone()))
    }

    fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        // Nothing to fold in memory.
        self.record_compaction();
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TesseraError::DatabaseClosed);
        }
        self.data.write().clear();
        Ok(())
    }

    fn stats(&self) -> Result<StorageStats> {
        let data = self.data.read();
        Ok(StorageStats {
            key_count: data.len(),
            size_bytes: data.iter().map(|(k, v)| k.len() + v.len()).sum(),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            operations_count: self.operations_count.load(Ordering::Relaxed),
            wal_bytes: 0,
            compactions: self.compactions.load(Ordering::Relaxed),
        })
    }
}
