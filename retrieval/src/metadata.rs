//! Metadata records aligned with index ordinals.
//!
//! The decrypted metadata artifact is a JSON document:
//!
//! ```json
//! {"version": 1, "records": [
//!   {"kind": "exemplar", "question": "...", "answer": "...", "score": 8.5},
//!   {"kind": "passage", "text": "...", "source": "handbook"}
//! ]}
//! ```
//!
//! Record `i` describes index vector `i`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ArtifactKind, Result, RetrievalError};

const VERSION: u32 = 1;

/// One record of the metadata artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataRecord {
    /// A reference question and answer.
    Exemplar {
        question: String,
        answer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        score: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
    /// Free-standing reference text.
    Passage {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
}

impl MetadataRecord {
    /// Create an exemplar record.
    pub fn exemplar(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self::Exemplar {
            question: question.into(),
            answer: answer.into(),
            score: None,
            feedback: None,
        }
    }

    /// Create a passage record.
    pub fn passage(text: impl Into<String>) -> Self {
        Self::Passage {
            text: text.into(),
            source: None,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::Exemplar {
                question,
                answer,
                score,
                ..
            } => {
                if question.trim().is_empty() {
                    return Err("exemplar question is empty".to_string());
                }
                if answer.trim().is_empty() {
                    return Err("exemplar answer is empty".to_string());
                }
                if score.is_some_and(|s| !s.is_finite()) {
                    return Err("exemplar score is not finite".to_string());
                }
            }
            Self::Passage { text, .. } => {
                if text.trim().is_empty() {
                    return Err("passage text is empty".to_string());
                }
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct MetadataDocument {
    version: u32,
    records: Vec<MetadataRecord>,
}

/// Parse and validate a decrypted metadata document.
pub fn parse_metadata(bytes: &[u8]) -> Result<Vec<MetadataRecord>> {
    let document: MetadataDocument =
        serde_json::from_slice(bytes).map_err(|e| format_error(e.to_string()))?;

    if document.version != VERSION {
        return Err(format_error(format!(
            "unsupported version {}",
            document.version
        )));
    }

    for (ordinal, record) in document.records.iter().enumerate() {
        record
            .validate()
            .map_err(|reason| format_error(format!("record {ordinal}: {reason}")))?;
    }

    info!("Parsed {} metadata records", document.records.len());
    Ok(document.records)
}

/// Serialize records into a metadata document.
pub fn encode_metadata(records: &[MetadataRecord]) -> Result<Vec<u8>> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        version: u32,
        records: &'a [MetadataRecord],
    }

    serde_json::to_vec(&Borrowed {
        version: VERSION,
        records,
    })
    .map_err(|e| format_error(e.to_string()))
}

fn format_error(reason: String) -> RetrievalError {
    RetrievalError::Format {
        kind: ArtifactKind::Metadata,
        reason,
    }
}
