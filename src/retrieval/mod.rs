//! Query-side retrieval.
//!
//! Embeds a text query through an [`Embedder`], searches the vector store and
//! shapes the hits either into ranked documents or into prompt context.


use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::index::{SearchHit, VectorStore};
use crate::ranking::{DocumentAggregate, preview, rank_documents};
use crate::{IndexError, Result};

/// Turns text into an embedding vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// A chunk quoted as a source of a generated answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub content_preview: String,
    pub similarity: f32,
}

/// Chunk-level context for answering a question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub sources: Vec<SourceChunk>,
    /// Full text of each source, in the same order
    pub contents: Vec<String>,
    /// Mean source similarity capped at 1.0, or 0.0 without sources
    pub confidence: f32,
}

impl RetrievedContext {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

pub struct Retriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    default_top_k: usize,
    default_threshold: f32,
    max_results: usize,
    evidence_preview_chars: usize,
    context_preview_chars: usize,
}

impl Retriever {
    #[inline]
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        Self {
            store,
            embedder,
            default_top_k: config.index.default_top_k,
            default_threshold: config.index.similarity_threshold,
            max_results: config.index.max_results,
            evidence_preview_chars: config.ranking.evidence_preview_chars,
            context_preview_chars: config.ranking.context_preview_chars,
        }
    }

    /// Rank whole documents for `query`.
    ///
    /// Twice as many chunks as requested documents are fetched so that
    /// grouping by document still fills `top_k` results.
    #[inline]
    pub async fn search_documents(
        &self,
        query: &str,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<DocumentAggregate>> {
        let top_k = self.clamp_top_k(top_k);
        let threshold = threshold.unwrap_or(self.default_threshold);
        debug!(
            "Searching documents for '{}' (top_k: {}, threshold: {})",
            query, top_k, threshold
        );

        let embedding = self.embed_query(query).await?;
        let documents = rank_documents(
            &self.store,
            &embedding,
            top_k,
            threshold,
            self.evidence_preview_chars,
        )
        .await?;

        info!("Found {} documents for '{}'", documents.len(), query);
        Ok(documents)
    }

    /// Collect the chunks most relevant to `query` as answer context
    #[inline]
    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<RetrievedContext> {
        let top_k = self.clamp_top_k(top_k);
        let threshold = threshold.unwrap_or(self.default_threshold);

        let hits = self.search_chunks(query, top_k, threshold).await?;

        let confidence = if hits.is_empty() {
            0.0
        } else {
            let mean = hits.iter().map(|hit| hit.score).sum::<f32>() / hits.len() as f32;
            mean.min(1.0)
        };

        let (sources, contents) = hits
            .into_iter()
            .map(|hit| {
                let record = hit.record;
                let source = SourceChunk {
                    content_preview: preview(&record.content, self.context_preview_chars),
                    chunk_id: record.id,
                    document_id: record.metadata.document_id,
                    document_title: record.metadata.title,
                    similarity: hit.score,
                };
                (source, record.content)
            })
            .unzip();

        let context = RetrievedContext {
            sources,
            contents,
            confidence,
        };
        debug!(
            "Retrieved {} context chunks (confidence {:.4})",
            context.sources.len(),
            context.confidence
        );
        Ok(context)
    }

    fn clamp_top_k(&self, top_k: Option<usize>) -> usize {
        top_k.unwrap_or(self.default_top_k).min(self.max_results)
    }

    async fn search_chunks(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let embedding = self.embed_query(query).await?;
        self.store.search(&embedding, Some(top_k), Some(threshold)).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(IndexError::Validation(
                "Query must not be empty".to_string(),
            ));
        }

        self.embedder.embed(query).await.map_err(|e| {
            error!("Failed to generate embedding for query: {:#}", e);
            IndexError::Embedding(format!("{:#}", e))
        })
    }
}
