//! Storage backend abstraction for tessera
//!
//! The spatial layer only needs a handful of things from the engine below it:
//! ordered prefix iteration, atomic batched writes with a per-batch durability
//! toggle, and a manual compaction trigger. This module defines that contract
//! and ships two implementations:
//!
//! - [`MemoryBackend`]: volatile, ordered, in-process
//! - [`FileBackend`]: the memory backend made durable with a write-ahead log
//!   and a snapshot file in a database directory

use crate::config::WriteOptions;
use crate::error::Result;
use bytes::Bytes;

mod file;
mod memory;
mod snapshot;
mod wal;

pub use file::{FileBackend, FileOptions};
pub use memory::MemoryBackend;
pub use snapshot::{SnapshotFile, SnapshotImage};
pub use wal::{WalFile, WalReplay};

/// Trait for storage backend implementations
///
/// Every method takes `&self`; implementations synchronise internally so a
/// single backend can serve concurrent readers and writers.
pub trait StorageBackend: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Apply every operation of `batch` atomically.
    ///
    /// Readers observe either none or all of the batch.
    fn write(&self, batch: WriteBatch, opts: &WriteOptions) -> Result<()>;

    /// Returns all key-value pairs with keys matching the given prefix, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;

    /// Keys inside any of `ranges`, taken from one consistent view.
    fn scan_ranges_keys(&self, ranges: &[KeyRange]) -> Result<Vec<Bytes>>;

    /// Greatest key with the given prefix
    fn last_key_with_prefix(&self, prefix: &[u8]) -> Result<Option<Bytes>>;

    /// Reclaim space and fold logged writes into a compact image.
    ///
    /// Returns `Unavailable` if a compaction is already running.
    fn compact(&self) -> Result<()>;

    /// Flush any pending writes to persistent storage
    fn sync(&self) -> Result<()>;

    /// Close the storage backend
    fn close(&self) -> Result<()>;

    /// Get storage statistics
    fn stats(&self) -> Result<StorageStats>;
}

/// Half-open key interval `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bytes,
    pub end: Bytes,
}

impl KeyRange {
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_ref() && key < self.end.as_ref()
    }
}

/// Storage operation for batch processing
#[derive(Debug, Clone, PartialEq)]
pub enum StorageOp {
    /// Put a key-value pair
    Put { key: Bytes, value: Bytes },
    /// Delete a key
    Delete { key: Bytes },
}

impl StorageOp {
    pub fn key(&self) -> &Bytes {
        match self {
            StorageOp::Put { key, .. } | StorageOp::Delete { key } => key,
        }
    }
}

/// Ordered list of mutations applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<StorageOp>,
    approximate_size: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(ops: usize) -> Self {
        Self {
            ops: Vec::with_capacity(ops),
            approximate_size: 0,
        }
    }

    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        let key = key.into();
        let value = value.into();
        self.approximate_size += key.len() + value.len();
        self.ops.push(StorageOp::Put { key, value });
    }

    pub fn delete(&mut self, key: impl Into<Bytes>) {
        let key = key.into();
        self.approximate_size += key.len();
        self.ops.push(StorageOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Sum of key and value lengths staged so far.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    pub fn ops(&self) -> &[StorageOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StorageOp> {
        self.ops
    }
}

/// Storage backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of keys
    pub key_count: usize,
    /// Storage size in bytes (approximate)
    pub size_bytes: usize,
    /// Number of batches applied
    pub batches_written: u64,
    /// Number of individual operations applied
    pub operations_count: u64,
    /// Bytes currently held in the write-ahead log
    pub wal_bytes: u64,
    /// Completed compactions
    pub compactions: u64,
}
