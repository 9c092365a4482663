//! Database counters and the periodic statistics dump.

use crate::config::Config;
use crate::storage::{StorageBackend, StorageStats};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time view of database activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbStats {
    /// Objects committed through `insert` or `bulk_insert`
    pub objects_inserted: u64,
    /// Index entries written across all zoom levels
    pub index_entries_written: u64,
    /// Atomic sub-batches committed by bulk inserts
    pub bulk_flushes: u64,
    pub queries: u64,
    /// Distinct candidates found through tile scans
    pub query_candidates: u64,
    /// Candidates that survived the geometry re-check
    pub query_hits: u64,
    pub storage: StorageStats,
}

impl fmt::Display for DbStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "objects inserted:      {}", self.objects_inserted)?;
        writeln!(f, "index entries written: {}", self.index_entries_written)?;
        writeln!(f, "bulk flushes:          {}", self.bulk_flushes)?;
        writeln!(
            f,
            "queries:               {} ({} candidates, {} hits)",
            self.queries, self.query_candidates, self.query_hits
        )?;
        writeln!(
            f,
            "storage:               {} keys, {} bytes, {} batches, {} ops",
            self.storage.key_count,
            self.storage.size_bytes,
            self.storage.batches_written,
            self.storage.operations_count
        )?;
        write!(
            f,
            "wal:                   {} bytes, {} compactions",
            self.storage.wal_bytes, self.storage.compactions
        )
    }
}

pub(crate) struct StatsCollector {
    dump_enabled: bool,
    dump_period: Duration,
    last_dump: Mutex<Instant>,
    objects_inserted: AtomicU64,
    index_entries_written: AtomicU64,
    bulk_flushes: AtomicU64,
    queries: AtomicU64,
    query_candidates: AtomicU64,
    query_hits: AtomicU64,
}

impl StatsCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            dump_enabled: config.statistics,
            dump_period: config.stats_dump_period(),
            last_dump: Mutex::new(Instant::now()),
            objects_inserted: AtomicU64::new(0),
            index_entries_written: AtomicU64::new(0),
            bulk_flushes: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            query_candidates: AtomicU64::new(0),
            query_hits: AtomicU64::new(0),
        }
    }

    pub fn record_insert(&self, objects: u64, index_entries: u64) {
        self.objects_inserted.fetch_add(objects, Ordering::Relaxed);
        self.index_entries_written
            .fetch_add(index_entries, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.bulk_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, candidates: u64) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.query_candidates
            .fetch_add(candidates, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.query_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, storage: StorageStats) -> DbStats {
        DbStats {
            objects_inserted: self.objects_inserted.load(Ordering::Relaxed),
            index_entries_written: self.index_entries_written.load(Ordering::Relaxed),
            bulk_flushes: self.bulk_flushes.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            query_candidates: self.query_candidates.load(Ordering::Relaxed),
            query_hits: self.query_hits.load(Ordering::Relaxed),
            storage,
        }
    }

    /// Claim the next dump slot if one is due at `now`.
    fn claim_dump(&self, now: Instant) -> bool {
        if !self.dump_enabled {
            return false;
        }
        // Another thread holding the lock is already dumping.
        let Some(mut last) = self.last_dump.try_lock() else {
            return false;
        };
        if now.saturating_duration_since(*last) < self.dump_period {
            return false;
        }
        *last = now;
        true
    }

    /// Log the statistics when enabled and at most once per dump period.
    pub fn maybe_dump(&self, storage: &dyn StorageBackend) {
        if !self.claim_dump(Instant::now()) {
            return;
        }
        match storage.stats() {
            Ok(stats) => log::info!("Database statistics:\n{}", self.snapshot(stats)),
            Err(e) => log::debug!("Skipping statistics dump: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = StatsCollector::new(&Config::default());
        stats.record_insert(2, 20);
        stats.record_flush();
        stats.record_query(5);
        stats.record_hit();

        let snapshot = stats.snapshot(StorageStats::default());
        assert_eq!(snapshot.objects_inserted, 2);
        assert_eq!(snapshot.index_entries_written, 20);
        assert_eq!(snapshot.bulk_flushes, 1);
        assert_eq!(snapshot.queries, 1);
        assert_eq!(snapshot.query_candidates, 5);
        assert_eq!(snapshot.query_hits, 1);
        assert!(snapshot.to_string().contains("objects inserted:      2"));
    }

    #[test]
    fn test_dump_cadence() {
        let config = Config::default()
            .with_statistics(true)
            .with_stats_dump_period(Duration::from_secs(60));
        let stats = StatsCollector::new(&config);
        let start = Instant::now();

        assert!(!stats.claim_dump(start));
        assert!(stats.claim_dump(start + Duration::from_secs(61)));
        assert!(!stats.claim_dump(start + Duration::from_secs(90)));
        assert!(stats.claim_dump(start + Duration::from_secs(125)));
    }

    #[test]
    fn test_dump_disabled_without_statistics() {
        let stats = StatsCollector::new(&Config::default());
        assert!(!stats.claim_dump(Instant::now() + Duration::from_secs(86_400)));
    }
}
