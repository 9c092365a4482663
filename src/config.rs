//! Configuration for tessera databases
//!
//! These types are serializable so a configuration can be loaded from JSON
//! (or TOML with the `toml` feature) and validated in one step.
use crate::error::{Result, TesseraError};
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When the write-ahead log is fsynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Only sync when a write asks for it, or on compaction and close
    #[default]
    Never,
    /// Sync after every logged batch
    Always,
}

/// File synchronization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Call `File::sync_all` to persist metadata + data.
    #[default]
    All,
    /// Call `File::sync_data` to persist data only.
    Data,
}

/// Database configuration
///
/// # Example
///
/// ```rust
/// use tessera::Config;
///
/// let json = r#"{
///     "parallelism": 3,
///     "bulk_load": true,
///     "statistics": true
/// }"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.stats_dump_period().as_secs(), 600);
///
/// // Unrecognized options are rejected
/// assert!(Config::from_json(r#"{ "compression": "zstd" }"#).is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Advisory number of threads used for bulk tile coverage.
    #[serde(default = "Config::default_parallelism")]
    pub parallelism: usize,

    /// Backing files need not survive a restart (e.g. a RAM disk), so fsync is skipped.
    #[serde(default)]
    pub storage_is_volatile: bool,

    /// Tune for large imports: no data sync, bigger flushes, rarer stats dumps.
    #[serde(default)]
    pub bulk_load: bool,

    /// Collect engine counters and dump them to the log periodically.
    #[serde(default)]
    pub statistics: bool,

    /// Seconds between statistics dumps. Defaults depend on `bulk_load`.
    #[serde(default)]
    pub stats_dump_period_secs: Option<u64>,

    #[serde(default)]
    pub sync_policy: SyncPolicy,

    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Objects per atomic sub-batch during bulk insert.
    #[serde(default = "Config::default_bulk_flush_objects")]
    pub bulk_flush_objects: usize,

    /// Upper bound on tiles scanned when the query zoom is chosen automatically.
    #[serde(default = "Config::default_query_tile_budget")]
    pub query_tile_budget: usize,

    /// Inserts whose coverage over all zoom levels exceeds this many tiles
    /// are rejected.
    #[serde(default = "Config::default_max_index_entries_per_object")]
    pub max_index_entries_per_object: u64,

    /// Queries needing more key ranges than this are rejected.
    ///
    /// A query scans one range per tile column, or a single range when its
    /// box spans every row of the zoom level.
    #[serde(default = "Config::default_max_query_scan_ranges")]
    pub max_query_scan_ranges: usize,
}

impl Config {
    const fn default_parallelism() -> usize {
        1
    }

    const fn default_bulk_flush_objects() -> usize {
        1024
    }

    const fn default_query_tile_budget() -> usize {
        256
    }

    const fn default_max_index_entries_per_object() -> u64 {
        1 << 20
    }

    const fn default_max_query_scan_ranges() -> usize {
        1 << 16
    }

    const BULK_LOAD_FLUSH_MULTIPLIER: usize = 8;
    const STATS_DUMP_PERIOD_SECS: u64 = 1800;
    const BULK_LOAD_STATS_DUMP_PERIOD_SECS: u64 = 600;

    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = threads.max(1);
        self
    }

    pub fn with_volatile_storage(mut self, volatile: bool) -> Self {
        self.storage_is_volatile = volatile;
        self
    }

    pub fn with_bulk_load(mut self, bulk_load: bool) -> Self {
        self.bulk_load = bulk_load;
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics = enabled;
        self
    }

    pub fn with_stats_dump_period(mut self, period: Duration) -> Self {
        self.stats_dump_period_secs = Some(period.as_secs());
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn with_bulk_flush_objects(mut self, objects: usize) -> Self {
        assert!(objects > 0, "Bulk flush size must be greater than zero");
        self.bulk_flush_objects = objects;
        self
    }

    pub fn with_query_tile_budget(mut self, tiles: usize) -> Self {
        assert!(tiles > 0, "Query tile budget must be greater than zero");
        self.query_tile_budget = tiles;
        self
    }

    pub fn with_max_index_entries_per_object(mut self, entries: u64) -> Self {
        assert!(entries > 0, "Index entry cap must be greater than zero");
        self.max_index_entries_per_object = entries;
        self
    }

    pub fn with_max_query_scan_ranges(mut self, ranges: usize) -> Self {
        assert!(ranges > 0, "Query scan range cap must be greater than zero");
        self.max_query_scan_ranges = ranges;
        self
    }

    /// Objects per bulk sub-batch after the bulk-load adjustment.
    pub fn effective_bulk_flush_objects(&self) -> usize {
        if self.bulk_load {
            self.bulk_flush_objects
                .saturating_mul(Self::BULK_LOAD_FLUSH_MULTIPLIER)
        } else {
            self.bulk_flush_objects
        }
    }

    /// Whether file writes should ever reach `fsync`.
    pub fn data_sync_enabled(&self) -> bool {
        !self.storage_is_volatile && !self.bulk_load
    }

    pub fn stats_dump_period(&self) -> Duration {
        let secs = self.stats_dump_period_secs.unwrap_or(if self.bulk_load {
            Self::BULK_LOAD_STATS_DUMP_PERIOD_SECS
        } else {
            Self::STATS_DUMP_PERIOD_SECS
        });
        Duration::from_secs(secs)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.parallelism == 0 {
            return Err("Parallelism must be at least one".to_string());
        }

        if self.bulk_flush_objects == 0 {
            return Err("Bulk flush size must be greater than zero".to_string());
        }

        if self.query_tile_budget == 0 {
            return Err("Query tile budget must be greater than zero".to_string());
        }

        if self.max_index_entries_per_object == 0 {
            return Err("Index entry cap must be greater than zero".to_string());
        }

        if self.max_query_scan_ranges == 0 {
            return Err("Query scan range cap must be greater than zero".to_string());
        }

        if self.stats_dump_period_secs == Some(0) {
            return Err("Statistics dump period must be positive".to_string());
        }

        Ok(())
    }

    /// Validate and convert failures into the crate error.
    pub(crate) fn check(&self) -> Result<()> {
        self.validate().map_err(TesseraError::InvalidArgument)
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallelism: Self::default_parallelism(),
            storage_is_volatile: false,
            bulk_load: false,
            statistics: false,
            stats_dump_period_secs: None,
            sync_policy: SyncPolicy::default(),
            sync_mode: SyncMode::default(),
            bulk_flush_objects: Self::default_bulk_flush_objects(),
            query_tile_budget: Self::default_query_tile_budget(),
            max_index_entries_per_object: Self::default_max_index_entries_per_object(),
            max_query_scan_ranges: Self::default_max_query_scan_ranges(),
        }
    }
}

/// Whether a batch goes through the write-ahead log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Log the batch before applying it
    #[default]
    Wal,
    /// Skip the log; the batch is lost on crash until the next compaction or close
    NoWal,
}

/// Per-write durability options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub durability: Durability,
    /// Fsync the log before returning (ignored for `NoWal`).
    pub sync: bool,
}

impl WriteOptions {
    pub fn no_wal() -> Self {
        Self {
            durability: Durability::NoWal,
            sync: false,
        }
    }

    pub fn synced() -> Self {
        Self {
            durability: Durability::Wal,
            sync: true,
        }
    }

    pub fn uses_wal(&self) -> bool {
        self.durability == Durability::Wal
    }
}
