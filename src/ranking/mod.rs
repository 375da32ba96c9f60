// Document ranking module
// Groups chunk hits by parent document and ranks the documents


use serde::Serialize;
use tracing::debug;

use crate::Result;
use crate::index::{SearchHit, VectorStore};

/// Number of best chunks kept per document as evidence
pub const MAX_EVIDENCE_CHUNKS: usize = 3;

/// A chunk-level search hit reduced to what aggregation needs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub content_preview: String,
    pub score: f32,
}

/// One retained chunk of a document aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkEvidence {
    pub chunk_id: String,
    pub content_preview: String,
    pub similarity: f32,
}

/// A document ranked by the chunks that matched it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentAggregate {
    pub document_id: String,
    pub document_title: String,
    /// Best chunks in descending similarity, at most [`MAX_EVIDENCE_CHUNKS`]
    pub chunks: Vec<ChunkEvidence>,
    /// Highest similarity over every matching chunk
    pub max_similarity: f32,
    /// Mean similarity over every matching chunk, not only the retained ones
    pub avg_similarity: f32,
    /// Number of hits that contributed to this document
    pub matched_chunks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationParams {
    /// Documents whose best chunk scores below this are dropped
    pub threshold: f32,
    pub limit: usize,
    pub offset: usize,
}

impl ChunkHit {
    /// Build a hit from a store result, cutting the content to `preview_chars`
    #[inline]
    pub fn from_search_hit(hit: &SearchHit, preview_chars: usize) -> Self {
        let record = &hit.record;
        Self {
            chunk_id: record.id.clone(),
            document_id: record.metadata.document_id.clone(),
            document_title: record.metadata.title.clone(),
            content_preview: preview(&record.content, preview_chars),
            score: hit.score,
        }
    }
}

/// Truncate `content` to `max_chars` characters, marking the cut with "..."
#[inline]
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut cut = content.get(..byte_idx).unwrap_or(content).to_string();
            cut.push_str("...");
            cut
        }
        None => content.to_string(),
    }
}

/// Search `store` and rank the matching documents.
///
/// Fetches `top_k * 2` chunk hits so grouping by document can still fill
/// `top_k` results, then aggregates them from the first page.
#[inline]
pub async fn rank_documents(
    store: &VectorStore,
    query_vector: &[f32],
    top_k: usize,
    threshold: f32,
    preview_chars: usize,
) -> Result<Vec<DocumentAggregate>> {
    let hits = store
        .search(query_vector, Some(top_k.saturating_mul(2)), Some(threshold))
        .await?;
    let chunk_hits: Vec<ChunkHit> = hits
        .iter()
        .map(|hit| ChunkHit::from_search_hit(hit, preview_chars))
        .collect();

    Ok(aggregate(
        &chunk_hits,
        &AggregationParams {
            threshold,
            limit: top_k,
            offset: 0,
        },
    ))
}

struct Group<'a> {
    document_id: &'a str,
    document_title: &'a str,
    hits: Vec<&'a ChunkHit>,
}

/// Turn chunk hits into ranked documents.
///
/// Hits are grouped by document in first-seen order (the first hit's title
/// names the document). Each group keeps its best [`MAX_EVIDENCE_CHUNKS`]
/// chunks while max and mean are computed over all of them. Groups are then
/// stable-sorted by max similarity, filtered by `threshold` and paginated.
#[inline]
pub fn aggregate(hits: &[ChunkHit], params: &AggregationParams) -> Vec<DocumentAggregate> {
    let mut groups: Vec<Group<'_>> = Vec::new();
    for hit in hits {
        match groups
            .iter_mut()
            .find(|group| group.document_id == hit.document_id)
        {
            Some(group) => group.hits.push(hit),
            None => groups.push(Group {
                document_id: &hit.document_id,
                document_title: &hit.document_title,
                hits: vec![hit],
            }),
        }
    }

    let mut documents: Vec<DocumentAggregate> = groups.into_iter().map(summarize).collect();
    documents.sort_by(|a, b| b.max_similarity.total_cmp(&a.max_similarity));

    let total = documents.len();
    let ranked: Vec<DocumentAggregate> = documents
        .into_iter()
        .filter(|doc| doc.max_similarity >= params.threshold)
        .skip(params.offset)
        .take(params.limit)
        .collect();

    debug!(
        "Aggregated {} hits into {} documents, returning {}",
        hits.len(),
        total,
        ranked.len()
    );
    ranked
}

fn summarize(group: Group<'_>) -> DocumentAggregate {
    let matched_chunks = group.hits.len();
    let max_similarity = group
        .hits
        .iter()
        .map(|hit| hit.score)
        .fold(f32::NEG_INFINITY, f32::max);
    let total: f32 = group.hits.iter().map(|hit| hit.score).sum();
    let avg_similarity = total / matched_chunks as f32;

    let mut best = group.hits;
    best.sort_by(|a, b| b.score.total_cmp(&a.score));

    DocumentAggregate {
        document_id: group.document_id.to_string(),
        document_title: group.document_title.to_string(),
        chunks: best
            .into_iter()
            .take(MAX_EVIDENCE_CHUNKS)
            .map(|hit| ChunkEvidence {
                chunk_id: hit.chunk_id.clone(),
                content_preview: hit.content_preview.clone(),
                similarity: hit.score,
            })
            .collect(),
        max_similarity,
        avg_similarity,
        matched_chunks,
    }
}
