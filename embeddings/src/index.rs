//! Immutable vector index and its binary container.
//!
//! Container layout (little-endian):
//!
//! ```text
//! magic     "EXIX"   4 bytes
//! version   u16      currently 1
//! metric    u8       see Metric::code
//! reserved  u8       0
//! dimension u32      >= 1
//! count     u64
//! vectors   count * dimension * f32
//! ```

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EmbeddingError, Result};
use crate::metric::{Metric, normalize};

const MAGIC: &[u8; 4] = b"EXIX";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 20;

/// A search hit: the ordinal of a stored vector and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Zero-based position of the vector in the index.
    pub ordinal: usize,

    /// Distance under the index metric; lower is closer.
    pub distance: f32,
}

/// A flat, read-only index of `len()` vectors of `dimension()` components.
///
/// Vectors are stored contiguously. Search is exhaustive, so results are
/// exact for the persisted metric.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    metric: Metric,
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Build an index from in-memory vectors.
    pub fn from_vectors<I>(metric: Metric, dimension: usize, vectors: I) -> Result<Self>
    where
        I: IntoIterator<Item = Vec<f32>>,
    {
        if dimension == 0 {
            return Err(format_error("dimension must be at least 1".to_string()));
        }
        if u32::try_from(dimension).is_err() {
            return Err(format_error(format!(
                "dimension {dimension} does not fit the container header"
            )));
        }

        let mut data = Vec::new();
        for vector in vectors {
            if vector.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            check_finite(&vector)?;
            data.extend_from_slice(&vector);
        }

        Ok(Self::finish(metric, dimension, data))
    }

    /// Decode an index from its binary container.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(format_error(format!(
                "container is {} bytes, header needs {HEADER_LEN}",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);

        if &header[0..4] != MAGIC {
            return Err(format_error("bad magic".to_string()));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(format_error(format!("unsupported version {version}")));
        }
        let metric = Metric::from_code(header[6])
            .ok_or_else(|| format_error(format!("unknown metric code {}", header[6])))?;
        if header[7] != 0 {
            return Err(format_error("reserved byte is not zero".to_string()));
        }

        let dimension = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        if dimension == 0 {
            return Err(format_error("dimension must be at least 1".to_string()));
        }
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header[12..20]);
        let count = u64::from_le_bytes(count_bytes);

        let expected = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(dimension))
            .and_then(|components| components.checked_mul(4))
            .ok_or_else(|| format_error(format!("{count} x {dimension} vectors overflow")))?;
        if body.len() != expected {
            return Err(format_error(format!(
                "body is {} bytes, {count} vectors of dimension {dimension} need {expected}",
                body.len()
            )));
        }

        let data: Vec<f32> = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if let Some(position) = data.iter().position(|x| !x.is_finite()) {
            return Err(format_error(format!(
                "vector {} has a non-finite component",
                position / dimension
            )));
        }

        let index = Self::finish(metric, dimension, data);
        info!(
            "Decoded vector index: {} vectors, dimension {dimension}, metric {metric}",
            index.len()
        );
        Ok(index)
    }

    /// Encode the index into its binary container.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.push(self.metric.code());
        out.push(0);
        // Both constructors keep the dimension within u32.
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for x in &self.data {
            out.extend_from_slice(&x.to_le_bytes());
        }
        out
    }

    fn finish(metric: Metric, dimension: usize, mut data: Vec<f32>) -> Self {
        if metric == Metric::Cosine {
            for vector in data.chunks_exact_mut(dimension) {
                normalize(vector);
            }
        }
        Self {
            metric,
            dimension,
            data,
        }
    }

    /// Metric the index was built with.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Number of components per vector.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vectors.
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    /// Check if the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stored vector at `ordinal` (normalized for cosine indexes).
    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Find the `k` vectors closest to `query`.
    ///
    /// Returns `min(k, len())` neighbors sorted by ascending distance, ties
    /// broken by ascending ordinal.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(EmbeddingError::ZeroNeighbors);
        }
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        check_finite(query)?;

        let mut query = query.to_vec();
        if self.metric == Metric::Cosine {
            normalize(&mut query);
        }

        // Finite inputs can still overflow, e.g. 3e38 * 2 - 3e38 * 2.
        let mut scored = Vec::with_capacity(self.len());
        for (ordinal, vector) in self.data.chunks_exact(self.dimension).enumerate() {
            let distance = self.metric.distance(&query, vector);
            if !distance.is_finite() {
                return Err(EmbeddingError::NonFiniteDistance { ordinal });
            }
            scored.push((OrderedFloat(distance), ordinal));
        }

        // (distance, ordinal) tuples order ties by ordinal.
        if k < scored.len() {
            scored.select_nth_unstable(k - 1);
            scored.truncate(k);
        }
        scored.sort_unstable();

        debug!("Searched {} vectors, returning {}", self.len(), scored.len());

        Ok(scored
            .into_iter()
            .map(|(distance, ordinal)| Neighbor {
                ordinal,
                distance: distance.0,
            })
            .collect())
    }
}

fn check_finite(vector: &[f32]) -> Result<()> {
    match vector.iter().position(|x| !x.is_finite()) {
        Some(position) => Err(EmbeddingError::NonFinite { position }),
        None => Ok(()),
    }
}

fn format_error(reason: String) -> EmbeddingError {
    EmbeddingError::Format(reason)
}
