#[cfg(test)]
mod tests;

use serde::Serialize;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::consistency::ConsistencyReport;
use super::persistence::{Persistence, Restored, RestoreOutcome, SnapshotView};
use super::similarity::{cosine_similarities, rank};
use super::{
    ChunkMetadata, MetadataEntry, VectorRecord, normalize_dimension, validate_finite,
    validate_record,
};
use crate::config::Config;
use crate::{IndexError, Result};

/// Number of ids included in [`StoreStats::sample_ids`]
const SAMPLE_ID_COUNT: usize = 10;

/// In-process vector store with exact cosine search.
///
/// Vectors live in one flat row-major matrix, metadata and ids in arrays
/// parallel to it. All three are guarded by a single read-write lock: searches
/// share it, mutations take it exclusively and keep a read hold while the
/// snapshot is written, so the artifacts always describe one logical state.
pub struct VectorStore {
    state: RwLock<StoreState>,
    persistence: Persistence,
    restore_outcome: RestoreOutcome,
    dimension: usize,
    default_top_k: usize,
    default_threshold: f32,
}

/// Search result from vector similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: VectorRecord,
    pub score: f32,
}

/// Outcome of a batch insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    pub added: usize,
    /// Ids that were already present; the stored record was kept
    pub skipped_duplicates: Vec<String>,
    pub rejected: Vec<RejectedRecord>,
}

/// A record refused by validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub record_count: usize,
    pub document_count: usize,
    pub dimension: usize,
    /// Bytes used on disk by both artifacts
    pub storage_size: u64,
    pub sample_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    vectors: Vec<f32>,
    entries: Vec<MetadataEntry>,
    ids: Vec<String>,
    positions: HashMap<String, usize>,
}

impl StoreState {
    fn from_restored(restored: Restored) -> Self {
        let mut state = Self {
            vectors: restored.vectors,
            entries: restored.entries,
            ids: restored.ids,
            positions: HashMap::new(),
        };
        state.rebuild_positions();
        state
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn row(&self, idx: usize, dimension: usize) -> &[f32] {
        &self.vectors[idx * dimension..(idx + 1) * dimension]
    }

    fn record_at(&self, idx: usize, dimension: usize) -> VectorRecord {
        self.entries[idx].to_record(self.row(idx, dimension))
    }

    fn push(&mut self, vector: &[f32], entry: MetadataEntry) {
        let idx = self.entries.len();
        self.vectors.extend_from_slice(vector);
        self.positions.insert(entry.id.clone(), idx);
        self.ids.push(entry.id.clone());
        self.entries.push(entry);
    }

    fn remove_at(&mut self, idx: usize, dimension: usize) {
        self.vectors.drain(idx * dimension..(idx + 1) * dimension);
        self.entries.remove(idx);
        let id = self.ids.remove(idx);
        self.positions.remove(&id);
        for position in self.positions.values_mut() {
            if *position > idx {
                *position -= 1;
            }
        }
    }

    /// Keep only the rows whose entry passes `keep`; returns how many were
    /// dropped.
    fn retain<F>(&mut self, dimension: usize, mut keep: F) -> usize
    where
        F: FnMut(&MetadataEntry) -> bool,
    {
        let before = self.entries.len();
        let entries = std::mem::take(&mut self.entries);
        let ids = std::mem::take(&mut self.ids);
        let vectors = std::mem::take(&mut self.vectors);

        for ((entry, id), row) in entries
            .into_iter()
            .zip(ids)
            .zip(vectors.chunks_exact(dimension))
        {
            if keep(&entry) {
                self.vectors.extend_from_slice(row);
                self.entries.push(entry);
                self.ids.push(id);
            }
        }

        self.rebuild_positions();
        before - self.entries.len()
    }

    fn rebuild_positions(&mut self) {
        self.positions = self
            .ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();
    }

    /// Cheap length check run after every mutation and before every search
    fn check_alignment(&self, dimension: usize) -> Result<()> {
        let rows = self.entries.len();
        if self.vectors.len() != rows * dimension
            || self.ids.len() != rows
            || self.positions.len() != rows
        {
            let message = format!(
                "{} vector values for dimension {}, {} metadata entries, {} ids, {} indexed ids",
                self.vectors.len(),
                dimension,
                rows,
                self.ids.len(),
                self.positions.len()
            );
            error!("Vector store invariant violated: {}", message);
            return Err(IndexError::Consistency(message));
        }
        Ok(())
    }

    fn view(&self, dimension: usize) -> SnapshotView<'_> {
        SnapshotView {
            dimension,
            vectors: &self.vectors,
            entries: &self.entries,
            ids: &self.ids,
        }
    }
}

impl VectorStore {
    /// Create a VectorStore and repopulate it from the configured data
    /// directory.
    ///
    /// Missing or damaged artifacts never fail the call; the store starts
    /// empty and the reason is logged.
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| IndexError::Config(e.to_string()))?;

        let data_dir = config.data_dir_path();
        debug!("Opening vector store at {}", data_dir.display());

        let index = &config.index;
        let persistence = Persistence::new(data_dir, index.dimension);
        let restored = persistence.restore().await;
        if let RestoreOutcome::Reset { reason } = &restored.outcome {
            warn!("Vector store reset to empty: {}", reason);
        }

        let restore_outcome = restored.outcome.clone();
        let state = StoreState::from_restored(restored);
        state.check_alignment(index.dimension)?;

        info!(
            "Vector store initialized with {} records (dimension {})",
            state.len(),
            index.dimension
        );

        Ok(Self {
            state: RwLock::new(state),
            persistence,
            restore_outcome,
            dimension: index.dimension,
            default_top_k: index.default_top_k,
            default_threshold: index.similarity_threshold,
        })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// How the store was populated when it was opened
    #[inline]
    pub fn restore_outcome(&self) -> &RestoreOutcome {
        &self.restore_outcome
    }

    /// Insert a batch of records.
    ///
    /// Records whose id is already stored are skipped and the stored record
    /// is left untouched. Vectors of the wrong length are truncated or
    /// zero-padded. Malformed records are rejected one by one without
    /// failing the batch.
    #[inline]
    pub async fn add(&self, records: Vec<VectorRecord>) -> Result<AddReport> {
        let mut report = AddReport::default();
        if records.is_empty() {
            debug!("No records to add");
            return Ok(report);
        }

        debug!("Adding batch of {} records", records.len());
        let mut state = self.state.write().await;

        for record in records {
            if let Err(e) = validate_record(&record) {
                warn!("Rejecting record {:?}: {}", record.id, e);
                report.rejected.push(RejectedRecord {
                    id: record.id,
                    reason: e.to_string(),
                });
                continue;
            }

            if state.positions.contains_key(&record.id) {
                warn!("Record {} already exists, skipping", record.id);
                report.skipped_duplicates.push(record.id);
                continue;
            }

            let (vector, entry) = record.into_parts();
            let vector = if vector.len() == self.dimension {
                vector
            } else {
                warn!(
                    "Vector dimension mismatch for {}: expected {}, got {}",
                    entry.id,
                    self.dimension,
                    vector.len()
                );
                normalize_dimension(vector, self.dimension)
            };

            if let Err(e) = validate_finite(&entry.id, &vector) {
                warn!("Rejecting record {}: {}", entry.id, e);
                report.rejected.push(RejectedRecord {
                    id: entry.id,
                    reason: e.to_string(),
                });
                continue;
            }

            state.push(&vector, entry);
            report.added += 1;
        }

        state.check_alignment(self.dimension)?;

        if report.added == 0 {
            debug!("Nothing added, skipping snapshot");
            return Ok(report);
        }

        let state = state.downgrade();
        self.persist(&state).await?;

        info!(
            "Added {} records ({} duplicates skipped, {} rejected), {} total",
            report.added,
            report.skipped_duplicates.len(),
            report.rejected.len(),
            state.len()
        );
        Ok(report)
    }

    /// Find the stored records most similar to `query_vector`.
    ///
    /// Results are ordered by descending cosine similarity with ties kept in
    /// insertion order, contain only scores at or above the threshold, and
    /// hold at most `top_k` hits. Omitted arguments use the configured
    /// defaults.
    #[inline]
    pub async fn search(
        &self,
        query_vector: &[f32],
        top_k: Option<usize>,
        similarity_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let top_k = top_k.unwrap_or(self.default_top_k);
        let threshold = similarity_threshold.unwrap_or(self.default_threshold);

        if threshold.is_nan() {
            return Err(IndexError::Validation(
                "Similarity threshold must be a number".to_string(),
            ));
        }
        if query_vector.is_empty() {
            return Err(IndexError::Validation(
                "Query vector must not be empty".to_string(),
            ));
        }
        validate_finite("query", query_vector)?;

        let query: Cow<'_, [f32]> = if query_vector.len() == self.dimension {
            Cow::Borrowed(query_vector)
        } else {
            warn!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimension,
                query_vector.len()
            );
            Cow::Owned(normalize_dimension(query_vector.to_vec(), self.dimension))
        };

        debug!(
            "Searching for similar vectors with top_k: {}, threshold: {}",
            top_k, threshold
        );

        let state = self.state.read().await;
        if state.is_empty() {
            debug!("Vector store is empty");
            return Ok(Vec::new());
        }
        state.check_alignment(self.dimension)?;

        let scores = cosine_similarities(&query, &state.vectors, self.dimension);
        let hits: Vec<SearchHit> = rank(&scores, top_k, threshold)
            .into_iter()
            .map(|(idx, score)| SearchHit {
                record: state.record_at(idx, self.dimension),
                score,
            })
            .collect();

        debug!(
            "Search complete, {} of {} records matched (threshold: {})",
            hits.len(),
            state.len(),
            threshold
        );
        Ok(hits)
    }

    /// Remove a single record; returns `false` when the id is unknown
    #[inline]
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(&idx) = state.positions.get(id) else {
            warn!("Record {} does not exist", id);
            return Ok(false);
        };

        state.remove_at(idx, self.dimension);
        state.check_alignment(self.dimension)?;

        let state = state.downgrade();
        self.persist(&state).await?;

        info!("Deleted record {}", id);
        Ok(true)
    }

    /// Remove every chunk belonging to `document_id`; returns how many were
    /// removed
    #[inline]
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let removed = state.retain(self.dimension, |entry| {
            entry.metadata.document_id != document_id
        });

        if removed == 0 {
            warn!("Document {} has no stored chunks", document_id);
            return Ok(0);
        }
        state.check_alignment(self.dimension)?;

        let state = state.downgrade();
        self.persist(&state).await?;

        info!("Deleted {} chunks of document {}", removed, document_id);
        Ok(removed)
    }

    /// Replace a record's content and metadata in place.
    ///
    /// The vector is left unchanged; re-embedding is the caller's job.
    /// Returns `false` when the id is unknown.
    #[inline]
    pub async fn update(
        &self,
        id: &str,
        new_content: String,
        new_metadata: ChunkMetadata,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(&idx) = state.positions.get(id) else {
            warn!("Record {} does not exist", id);
            return Ok(false);
        };

        let entry = &mut state.entries[idx];
        entry.content = new_content;
        entry.metadata.merge(new_metadata);
        entry.updated_at = chrono::Utc::now();

        let state = state.downgrade();
        self.persist(&state).await?;

        info!("Updated record {}", id);
        Ok(true)
    }

    /// Fetch a single record by id
    #[inline]
    pub async fn get(&self, id: &str) -> Option<VectorRecord> {
        let state = self.state.read().await;
        let idx = *state.positions.get(id)?;
        Some(state.record_at(idx, self.dimension))
    }

    /// One page of records in insertion order; pages start at 1
    #[inline]
    pub async fn list(&self, page: usize, page_size: usize) -> Vec<VectorRecord> {
        let state = self.state.read().await;
        let start = page.max(1).saturating_sub(1).saturating_mul(page_size);
        (start..state.len())
            .take(page_size)
            .map(|idx| state.record_at(idx, self.dimension))
            .collect()
    }

    /// Distinct parent document ids, in order of first appearance
    #[inline]
    pub async fn document_ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut seen = HashSet::new();
        state
            .entries
            .iter()
            .filter(|entry| seen.insert(entry.metadata.document_id.as_str()))
            .map(|entry| entry.metadata.document_id.clone())
            .collect()
    }

    /// Number of stored records
    #[inline]
    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    /// Drop every record and delete the artifacts
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let removed = state.len();
        *state = StoreState::default();

        self.persistence
            .remove_artifacts()
            .await
            .map_err(IndexError::NotDurable)?;

        info!("Cleared vector store ({} records removed)", removed);
        Ok(())
    }

    #[inline]
    pub async fn stats(&self) -> StoreStats {
        let state = self.state.read().await;
        let document_count = state
            .entries
            .iter()
            .map(|entry| entry.metadata.document_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        StoreStats {
            record_count: state.len(),
            document_count,
            dimension: self.dimension,
            storage_size: self.persistence.storage_size().await,
            sample_ids: state.ids.iter().take(SAMPLE_ID_COUNT).cloned().collect(),
        }
    }

    /// Detailed alignment report of the in-memory arrays
    #[inline]
    pub async fn consistency_report(&self) -> ConsistencyReport {
        let state = self.state.read().await;
        ConsistencyReport::inspect(
            self.dimension,
            &state.vectors,
            &state.entries,
            &state.ids,
            &state.positions,
        )
    }

    /// True when the arrays are aligned and a snapshot can be written and
    /// read back with the same record count
    #[inline]
    pub async fn health_check(&self) -> bool {
        let state = self.state.read().await;

        let report = ConsistencyReport::inspect(
            self.dimension,
            &state.vectors,
            &state.entries,
            &state.ids,
            &state.positions,
        );
        if !report.is_consistent {
            return false;
        }

        if let Err(e) = self.persistence.snapshot(state.view(self.dimension)).await {
            error!("Health check failed to write snapshot: {}", e);
            return false;
        }

        match self.persistence.read_snapshot().await {
            Ok(Some(restored)) if restored.len() == state.len() => {
                debug!("Health check passed with {} records", state.len());
                true
            }
            Ok(Some(restored)) => {
                warn!(
                    "Health check read back {} records, expected {}",
                    restored.len(),
                    state.len()
                );
                false
            }
            Ok(None) => {
                warn!("Health check found no snapshot after writing one");
                false
            }
            Err(e) => {
                error!("Health check failed to read snapshot: {}", e);
                false
            }
        }
    }

    async fn persist(&self, state: &StoreState) -> Result<()> {
        self.persistence
            .snapshot(state.view(self.dimension))
            .await
            .map_err(|e| {
                error!("Failed to persist vector store: {}", e);
                IndexError::NotDurable(e)
            })
    }
}
