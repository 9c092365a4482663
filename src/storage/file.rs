//! Durable backend: an in-memory ordered map recovered from disk.
//!
//! Directory layout:
//!
//! ```text
//! <dir>/SNAPSHOT          image covering every log up to its recorded sequence
//! <dir>/wal-000001.log    logged batches, one file per open or compaction
//! ```
//!
//! Recovery loads the snapshot and replays every newer log in sequence
//! order. Compaction rotates the log, writes a fresh snapshot from the
//! in-memory image and deletes the logs it now covers.

use super::memory::{MemoryBackend, apply_ops};
use super::snapshot::{SnapshotFile, SnapshotImage};
use super::wal::WalFile;
use super::{KeyRange, StorageBackend, StorageStats, WriteBatch};
use crate::config::{Config, SyncMode, SyncPolicy, WriteOptions};
use crate::error::{Result, TesseraError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

const SNAPSHOT_FILE: &str = "SNAPSHOT";
const WAL_PREFIX: &str = "wal-";
const WAL_SUFFIX: &str = ".log";

/// Settings the file backend takes from the database configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOptions {
    pub read_only: bool,
    /// When false no file is ever fsynced.
    pub data_sync: bool,
    pub sync_policy: SyncPolicy,
    pub sync_mode: SyncMode,
}

impl FileOptions {
    pub fn from_config(config: &Config, read_only: bool) -> Self {
        Self {
            read_only,
            data_sync: config.data_sync_enabled(),
            sync_policy: config.sync_policy,
            sync_mode: config.sync_mode,
        }
    }
}

impl Default for FileOptions {
    fn default() -> Self {
        Self::from_config(&Config::default(), false)
    }
}

struct ActiveWal {
    seq: u64,
    file: WalFile,
}

pub struct FileBackend {
    dir: PathBuf,
    options: FileOptions,
    memory: MemoryBackend,
    snapshot: SnapshotFile,
    /// `None` once closed, and always for read-only handles.
    wal: Mutex<Option<ActiveWal>>,
    /// Sequence the next snapshot will cover when there is no active log.
    last_seq: AtomicU64,
    compaction: Mutex<()>,
    wal_bytes: AtomicU64,
    closed: AtomicBool,
}

impl FileBackend {
    /// Open the backend in `dir`, recovering whatever was persisted there.
    ///
    /// A writable open creates the directory if needed and starts a new log
    /// file. A read-only open requires the directory and never writes to it.
    pub fn open<P: AsRef<Path>>(dir: P, options: FileOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let start = Instant::now();

        if options.read_only {
            if !dir.is_dir() {
                return Err(TesseraError::NotFound(format!(
                    "no database directory at {}",
                    dir.display()
                )));
            }
        } else {
            fs::create_dir_all(&dir)?;
        }

        let snapshot = SnapshotFile::new(dir.join(SNAPSHOT_FILE));
        let SnapshotImage {
            covered_seq,
            mut entries,
        } = snapshot.load()?.unwrap_or_default();

        let logs = list_wal_files(&dir)?;
        let mut last_seq = covered_seq;
        let mut replayed_batches = 0usize;

        for (seq, path) in &logs {
            last_seq = last_seq.max(*seq);
            if *seq <= covered_seq {
                continue;
            }

            let replay = WalFile::replay(path)?;
            if replay.torn_bytes > 0 {
                log::warn!(
                    "Ignoring {} torn bytes at the end of {}",
                    replay.torn_bytes,
                    path.display()
                );
            }
            replayed_batches += replay.batches.len();
            for ops in replay.batches {
                apply_ops(&mut entries, ops);
            }
        }

        let wal = if options.read_only {
            None
        } else {
            // Logs a previous compaction folded in but did not get to delete.
            for (seq, path) in &logs {
                if *seq <= covered_seq {
                    fs::remove_file(path)?;
                }
            }

            let seq = last_seq + 1;
            last_seq = seq;
            Some(ActiveWal {
                seq,
                file: WalFile::open(wal_path(&dir, seq))?,
            })
        };

        log::info!(
            "Opened {} with {} keys ({} logged batches replayed) in {:?}",
            dir.display(),
            entries.len(),
            replayed_batches,
            start.elapsed()
        );

        Ok(Self {
            dir,
            options,
            memory: MemoryBackend::from_image(entries),
            snapshot,
            wal: Mutex::new(wal),
            last_seq: AtomicU64::new(last_seq),
            compaction: Mutex::new(()),
            wal_bytes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Remove every file the backend keeps in `dir`. Other files are left alone.
    ///
    /// Returns whether anything was removed.
    pub fn destroy<P: AsRef<Path>>(dir: P) -> Result<bool> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Ok(false);
        }

        let mut removed = false;
        let snapshot = dir.join(SNAPSHOT_FILE);
        for path in [snapshot.with_extension("tmp"), snapshot] {
            if path.exists() {
                fs::remove_file(path)?;
                removed = true;
            }
        }
        for (_, path) in list_wal_files(dir)? {
            fs::remove_file(path)?;
            removed = true;
        }
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TesseraError::DatabaseClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.options.read_only {
            return Err(TesseraError::InvalidArgument(format!(
                "database at {} is open read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }

    fn sync_wal(&self, wal: &mut WalFile) -> Result<()> {
        if self.options.data_sync {
            wal.sync_with_mode(self.options.sync_mode)
        } else {
            wal.flush()
        }
    }

    /// Fold the in-memory image into a new snapshot.
    ///
    /// With `rotate` a fresh log takes over; without it the log is retired,
    /// which is how a close leaves the directory.
    fn checkpoint(&self, rotate: bool) -> Result<()> {
        let start = Instant::now();

        let (covered_seq, image) = {
            let mut guard = self.wal.lock();
            let covered_seq = match guard.as_mut() {
                Some(active) => {
                    self.sync_wal(&mut active.file)?;
                    active.seq
                }
                None => self.last_seq.load(Ordering::Acquire),
            };

            if rotate {
                let seq = covered_seq + 1;
                let file = WalFile::open(wal_path(&self.dir, seq))?;
                *guard = Some(ActiveWal { seq, file });
                self.last_seq.store(seq, Ordering::Release);
            } else {
                *guard = None;
            }
            self.wal_bytes.store(0, Ordering::Relaxed);

            (covered_seq, self.memory.image())
        };

        self.snapshot
            .save(covered_seq, &image, self.options.data_sync)?;

        for (seq, path) in list_wal_files(&self.dir)? {
            if seq <= covered_seq {
                fs::remove_file(&path)?;
            }
        }

        self.memory.record_compaction();
        log::info!(
            "Checkpointed {} keys into {} (logs up to {}) in {:?}",
            image.len(),
            self.snapshot.path().display(),
            covered_seq,
            start.elapsed()
        );
        Ok(())
    }
}

impl fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBackend")
            .field("dir", &self.dir)
            .field("read_only", &self.options.read_only)
            .field("last_seq", &self.last_seq.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        self.memory.get(key)
    }

    fn write(&self, batch: WriteBatch, opts: &WriteOptions) -> Result<()> {
        self.ensure_writable()?;
        if batch.is_empty() {
            return Ok(());
        }

        // Held across log append and apply so log order matches apply order.
        let mut guard = self.wal.lock();
        let active = guard.as_mut().ok_or(TesseraError::DatabaseClosed)?;

        if opts.uses_wal() {
            let written = active.file.append(&batch)?;
            self.wal_bytes.fetch_add(written as u64, Ordering::Relaxed);

            if opts.sync || self.options.sync_policy == SyncPolicy::Always {
                self.sync_wal(&mut active.file)?;
            } else {
                active.file.flush()?;
            }
        }

        self.memory.apply(batch.into_ops());
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        self.ensure_open()?;
        self.memory.scan_prefix(prefix)
    }

    fn scan_ranges_keys(&self, ranges: &[KeyRange]) -> Result<Vec<Bytes>> {
        self.ensure_open()?;
        self.memory.scan_ranges_keys(ranges)
    }

    fn last_key_with_prefix(&self, prefix: &[u8]) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        self.memory.last_key_with_prefix(prefix)
    }

    fn compact(&self) -> Result<()> {
        self.ensure_writable()?;
        let _running = self.compaction.try_lock().ok_or_else(|| {
            TesseraError::Unavailable("a compaction is already running".to_string())
        })?;
        self.checkpoint(true)
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        let mut guard = self.wal.lock();
        match guard.as_mut() {
            Some(active) => self.sync_wal(&mut active.file),
            None => Ok(()),
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TesseraError::DatabaseClosed);
        }

        let result = if self.options.read_only {
            Ok(())
        } else {
            // Wait out a running compaction so the two never race on files.
            let _running = self.compaction.lock();
            self.checkpoint(false)
        };

        self.memory.close()?;
        result
    }

    fn stats(&self) -> Result<StorageStats> {
        let mut stats = self.memory.stats()?;
        stats.wal_bytes = self.wal_bytes.load(Ordering::Relaxed);
        Ok(stats)
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            if let Err(e) = self.close() {
                log::warn!("Failed to close {} cleanly: {}", self.dir.display(), e);
            }
        }
    }
}

fn wal_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", WAL_PREFIX, seq, WAL_SUFFIX))
}

fn parse_wal_seq(name: &str) -> Option<u64> {
    name.strip_prefix(WAL_PREFIX)?
        .strip_suffix(WAL_SUFFIX)?
        .parse()
        .ok()
}

/// Log files in `dir`, ascending by sequence.
fn list_wal_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(seq) = name.to_str().and_then(parse_wal_seq) {
            logs.push((seq, entry.path()));
        }
    }
    logs.sort_unstable_by_key(|(seq, _)| *seq);
    Ok(logs)
}
