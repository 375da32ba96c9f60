// Alignment validation for the store's parallel arrays


use std::collections::HashMap;
use tracing::warn;

use super::MetadataEntry;

/// Result of checking that vectors, metadata and ids line up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Complete rows in the vector matrix
    pub vector_rows: usize,
    /// Floats left over after the last complete row
    pub trailing_values: usize,
    /// Entries in the metadata array
    pub metadata_entries: usize,
    /// Entries in the id list
    pub record_ids: usize,
    /// Entries in the id lookup table
    pub indexed_ids: usize,
    /// Positions whose id list entry and metadata id disagree
    pub mismatched_positions: Vec<usize>,
    /// Ids whose lookup position does not point back at them
    pub stale_index_entries: Vec<String>,
    /// Overall consistency status
    pub is_consistent: bool,
}

impl ConsistencyReport {
    /// Inspect the arrays of a store with the given dimension
    #[inline]
    pub fn inspect(
        dimension: usize,
        vectors: &[f32],
        entries: &[MetadataEntry],
        ids: &[String],
        positions: &HashMap<String, usize>,
    ) -> Self {
        let (vector_rows, trailing_values) = if dimension == 0 {
            (0, vectors.len())
        } else {
            (vectors.len() / dimension, vectors.len() % dimension)
        };

        let mismatched_positions: Vec<usize> = entries
            .iter()
            .zip(ids)
            .enumerate()
            .filter(|(_, (entry, id))| entry.id != **id)
            .map(|(idx, _)| idx)
            .collect();

        let mut stale_index_entries: Vec<String> = positions
            .iter()
            .filter(|&(id, &idx)| ids.get(idx) != Some(id))
            .map(|(id, _)| id.clone())
            .collect();
        stale_index_entries.sort();

        let is_consistent = trailing_values == 0
            && vector_rows == entries.len()
            && entries.len() == ids.len()
            && ids.len() == positions.len()
            && mismatched_positions.is_empty()
            && stale_index_entries.is_empty();

        let report = Self {
            vector_rows,
            trailing_values,
            metadata_entries: entries.len(),
            record_ids: ids.len(),
            indexed_ids: positions.len(),
            mismatched_positions,
            stale_index_entries,
            is_consistent,
        };

        if !report.is_consistent {
            warn!("Vector store arrays are misaligned: {}", report.summary());
        }

        report
    }

    /// Total number of problems found
    #[inline]
    pub fn total_issues(&self) -> usize {
        let mut issues = self.mismatched_positions.len() + self.stale_index_entries.len();
        if self.trailing_values != 0 {
            issues += 1;
        }
        let lengths = [
            self.vector_rows,
            self.metadata_entries,
            self.record_ids,
            self.indexed_ids,
        ];
        if lengths.iter().any(|&len| len != lengths[0]) {
            issues += 1;
        }
        issues
    }

    /// Human-readable summary of the report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Store is consistent: {} records ({} vectors, {} metadata entries)",
                self.metadata_entries, self.vector_rows, self.metadata_entries
            )
        } else {
            format!(
                "Store has {} inconsistencies: {} vectors ({} trailing values), {} metadata entries, {} ids, {} indexed ids, {} mismatched positions, {} stale index entries",
                self.total_issues(),
                self.vector_rows,
                self.trailing_values,
                self.metadata_entries,
                self.record_ids,
                self.indexed_ids,
                self.mismatched_positions.len(),
                self.stale_index_entries.len()
            )
        }
    }
}
