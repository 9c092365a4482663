//! Lazy result stream for box queries.

use super::ObjectId;
use super::stats::StatsCollector;
use crate::error::{Result, TesseraError};
use crate::feature_store::FeatureStore;
use crate::storage::StorageBackend;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tessera_types::{BoundingBox, FeatureSet, Geometry};

/// One object matched by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: ObjectId,
    pub geometry: Geometry,
    pub blob: Bytes,
    pub features: FeatureSet,
}

/// One-shot iterator over the objects intersecting a query box.
///
/// Candidates were collected from a single consistent view of the index when
/// the query started; records are fetched as the iterator advances and each
/// is re-checked against its stored geometry. Objects come out in ascending
/// id order. After an error the iterator is exhausted.
pub struct QueryIter {
    storage: Arc<dyn StorageBackend>,
    stats: Arc<StatsCollector>,
    bbox: BoundingBox,
    candidates: std::vec::IntoIter<ObjectId>,
    failed: bool,
}

impl QueryIter {
    pub(crate) fn new(
        storage: Arc<dyn StorageBackend>,
        stats: Arc<StatsCollector>,
        bbox: BoundingBox,
        candidates: Vec<ObjectId>,
    ) -> Self {
        Self {
            storage,
            stats,
            bbox,
            candidates: candidates.into_iter(),
            failed: false,
        }
    }

    /// Candidates not yet examined.
    pub fn remaining_candidates(&self) -> usize {
        if self.failed {
            0
        } else {
            self.candidates.len()
        }
    }

    fn fetch(&self, id: ObjectId) -> Result<Option<QueryHit>> {
        let record = FeatureStore::get(self.storage.as_ref(), id).map_err(|e| match e {
            // Index entries and records are committed together.
            TesseraError::NotFound(_) => TesseraError::Corruption(format!(
                "index entry for object {} has no feature record",
                id
            )),
            other => other,
        })?;

        if !record.geometry.intersects(&self.bbox) {
            return Ok(None);
        }

        Ok(Some(QueryHit {
            id,
            geometry: record.geometry,
            blob: record.blob,
            features: record.features,
        }))
    }
}

impl fmt::Debug for QueryIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryIter")
            .field("bbox", &self.bbox)
            .field("remaining_candidates", &self.remaining_candidates())
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl Iterator for QueryIter {
    type Item = Result<QueryHit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        while let Some(id) = self.candidates.next() {
            match self.fetch(id) {
                Ok(Some(hit)) => {
                    self.stats.record_hit();
                    return Some(Ok(hit));
                }
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining_candidates()))
    }
}

impl std::iter::FusedIterator for QueryIter {}
