// Vector index module
// Holds embeddings with their chunk metadata, answers exact cosine queries
// and snapshots itself to disk


pub mod consistency;
pub mod persistence;
pub mod similarity;
pub mod vector_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::IndexError;

pub use consistency::ConsistencyReport;
pub use persistence::{Persistence, PersistenceError, RestoreOutcome};
pub use vector_store::{AddReport, RejectedRecord, SearchHit, StoreStats, VectorStore};

/// One embedded chunk of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique identifier, stable across restarts
    pub id: String,
    /// The embedding; resized to the store dimension on insert
    pub vector: Vec<f32>,
    /// The chunk text the embedding was computed from
    pub content: String,
    pub metadata: ChunkMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata for a chunk stored alongside its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// ID of the document this chunk was cut from
    pub document_id: String,
    /// Human-readable title of the parent document
    pub title: String,
    /// When the parent document was created
    pub created_at: DateTime<Utc>,
    /// Free-form fields attached by the ingestion layer
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Everything about a record except its vector.
///
/// This is the row type of the metadata array; position `i` here always
/// describes row `i` of the vector matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VectorRecord {
    /// Create a record with a freshly generated id
    #[inline]
    pub fn new(vector: Vec<f32>, content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), vector, content, metadata)
    }

    #[inline]
    pub fn with_id(
        id: impl Into<String>,
        vector: Vec<f32>,
        content: impl Into<String>,
        metadata: ChunkMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            vector,
            content: content.into(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Split into the vector row and the metadata row
    #[inline]
    pub fn into_parts(self) -> (Vec<f32>, MetadataEntry) {
        let entry = MetadataEntry {
            id: self.id,
            content: self.content,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        (self.vector, entry)
    }
}

impl MetadataEntry {
    /// Rebuild a full record from this entry and its vector row
    #[inline]
    pub fn to_record(&self, vector: &[f32]) -> VectorRecord {
        VectorRecord {
            id: self.id.clone(),
            vector: vector.to_vec(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl ChunkMetadata {
    #[inline]
    pub fn new(document_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            title: title.into(),
            created_at: Utc::now(),
            extra: Map::new(),
        }
    }

    /// Attach an extra field
    #[inline]
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Apply an update: typed fields are replaced, extra fields are merged
    /// with the incoming keys taking precedence.
    #[inline]
    pub fn merge(&mut self, update: Self) {
        self.document_id = update.document_id;
        self.title = update.title;
        self.created_at = update.created_at;
        self.extra.extend(update.extra);
    }
}

/// Resize a vector to `dimension`, truncating extra components or padding
/// with zeros.
#[inline]
pub fn normalize_dimension(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    vector.resize(dimension, 0.0);
    vector
}

/// Reject records that cannot be stored at all
pub(crate) fn validate_record(record: &VectorRecord) -> Result<(), IndexError> {
    if record.id.trim().is_empty() {
        return Err(IndexError::Validation(
            "Record id must not be empty".to_string(),
        ));
    }

    if record.vector.is_empty() {
        return Err(IndexError::Validation(format!(
            "Record {} has an empty vector",
            record.id
        )));
    }

    Ok(())
}

/// Reject vectors containing NaN or infinite components
pub(crate) fn validate_finite(id: &str, vector: &[f32]) -> Result<(), IndexError> {
    if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
        return Err(IndexError::Validation(format!(
            "Vector for {} has a non-finite component at position {}",
            id, position
        )));
    }
    Ok(())
}
