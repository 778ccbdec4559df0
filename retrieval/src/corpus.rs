//! The loaded index paired with its metadata.

use exemplar_artifacts::{DecryptionKey, EncryptedArtifact, open};
use exemplar_embeddings::{Metric, VectorIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ArtifactKind, Result, RetrievalError};
use crate::metadata::{MetadataRecord, parse_metadata};

/// A metadata record ranked against a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// Position of the record (and its vector).
    pub ordinal: usize,

    /// Distance to the query under the index metric; lower is closer.
    pub distance: f32,

    /// The record itself.
    pub record: MetadataRecord,
}

/// Records closest to a query, nearest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborResult {
    /// Metric the distances are expressed in.
    pub metric: Metric,

    /// Neighbors sorted by ascending distance, ties by ascending ordinal.
    pub neighbors: Vec<ScoredRecord>,
}

impl NeighborResult {
    /// Number of neighbors returned.
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Check if no neighbors were returned.
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Iterate over the neighbors, nearest first.
    pub fn iter(&self) -> std::slice::Iter<'_, ScoredRecord> {
        self.neighbors.iter()
    }

    /// Ordinals in rank order.
    pub fn ordinals(&self) -> Vec<usize> {
        self.neighbors.iter().map(|n| n.ordinal).collect()
    }
}

impl IntoIterator for NeighborResult {
    type Item = ScoredRecord;
    type IntoIter = std::vec::IntoIter<ScoredRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.neighbors.into_iter()
    }
}

/// An immutable index with one metadata record per vector.
#[derive(Debug)]
pub struct Corpus {
    index: VectorIndex,
    records: Vec<MetadataRecord>,
}

impl Corpus {
    /// Pair an index with its records. The counts must agree.
    pub fn new(index: VectorIndex, records: Vec<MetadataRecord>) -> Result<Self> {
        if records.len() != index.len() {
            return Err(RetrievalError::Consistency {
                records: records.len(),
                vectors: index.len(),
            });
        }
        Ok(Self { index, records })
    }

    /// Decrypt and parse both sealed artifacts.
    pub fn decode(
        key: &DecryptionKey,
        index: &EncryptedArtifact,
        metadata: &EncryptedArtifact,
    ) -> Result<Self> {
        let index_plain = open(key, index.bytes())
            .map_err(|e| RetrievalError::from_artifact(ArtifactKind::Index, e))?;
        let metadata_plain = open(key, metadata.bytes())
            .map_err(|e| RetrievalError::from_artifact(ArtifactKind::Metadata, e))?;

        let index = VectorIndex::from_bytes(&index_plain)?;
        let records = parse_metadata(&metadata_plain)?;
        let corpus = Self::new(index, records)?;

        info!(
            "Corpus ready: {} entries, dimension {}, metric {}",
            corpus.len(),
            corpus.dimension(),
            corpus.metric()
        );
        Ok(corpus)
    }

    /// Records in ordinal order.
    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the corpus has no entries.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Vector dimension expected of queries.
    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Metric persisted in the index.
    pub fn metric(&self) -> Metric {
        self.index.metric()
    }

    /// Rank records against a query vector.
    pub fn search(&self, query: &[f32], n: usize) -> Result<NeighborResult> {
        let neighbors = self
            .index
            .search(query, n)?
            .into_iter()
            .filter_map(|hit| {
                self.records.get(hit.ordinal).map(|record| ScoredRecord {
                    ordinal: hit.ordinal,
                    distance: hit.distance,
                    record: record.clone(),
                })
            })
            .collect::<Vec<_>>();

        debug!("Matched {} neighbors", neighbors.len());
        Ok(NeighborResult {
            metric: self.metric(),
            neighbors,
        })
    }
}
