//! Per-object records: the geometry, the opaque blob and the feature set.

use crate::db::ObjectId;
use crate::error::{Result, TesseraError};
use crate::keys;
use crate::storage::{StorageBackend, WriteBatch};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tessera_types::{FeatureSet, Geometry};

/// Everything stored for one object.
///
/// The geometry travels with the record so a query can re-check candidates
/// found through coarse tiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub geometry: Geometry,
    pub blob: Bytes,
    pub features: FeatureSet,
}

impl FeatureRecord {
    pub fn new(geometry: Geometry, blob: impl Into<Bytes>, features: FeatureSet) -> Self {
        Self {
            geometry,
            blob: blob.into(),
            features,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| TesseraError::serialization("encoding feature record", e))
    }

    pub fn decode(id: ObjectId, data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| {
            TesseraError::Corruption(format!("undecodable record for object {}: {}", id, e))
        })
    }
}

/// Reads and stages feature records.
pub struct FeatureStore;

impl FeatureStore {
    /// Stage `record` into `batch`; nothing is committed here.
    pub fn put(batch: &mut WriteBatch, id: ObjectId, record: &FeatureRecord) -> Result<()> {
        batch.put(keys::feature_key(id), record.encode()?);
        Ok(())
    }

    pub fn get(storage: &dyn StorageBackend, id: ObjectId) -> Result<FeatureRecord> {
        match storage.get(&keys::feature_key(id))? {
            Some(data) => FeatureRecord::decode(id, &data),
            None => Err(TesseraError::NotFound(format!("object {}", id))),
        }
    }

    /// Highest id with a stored record.
    pub fn max_id(storage: &dyn StorageBackend) -> Result<Option<ObjectId>> {
        storage
            .last_key_with_prefix(&keys::feature_prefix())?
            .map(|key| keys::decode_feature_key(&key))
            .transpose()
    }
}
