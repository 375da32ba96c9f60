#[cfg(test)]
mod tests;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::index::{ChunkMetadata, RestoreOutcome, VectorRecord, VectorStore};
use crate::ranking::{ChunkHit, rank_documents};

/// Records handed to the store per `add` call during an import
const IMPORT_BATCH_SIZE: usize = 256;

/// One line of a JSON Lines import file
#[derive(Debug, Deserialize)]
struct ImportLine {
    #[serde(default)]
    id: Option<String>,
    vector: Vec<f32>,
    content: String,
    document_id: String,
    title: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Totals of an import run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub lines: usize,
    pub added: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// Parse one JSON Lines record into a [`VectorRecord`]
#[inline]
pub fn parse_import_line(line: &str) -> Result<VectorRecord> {
    let parsed: ImportLine = serde_json::from_str(line).context("Invalid import record")?;

    let mut metadata = ChunkMetadata::new(parsed.document_id, parsed.title);
    if let Some(created_at) = parsed.created_at {
        metadata.created_at = created_at;
    }
    metadata.extra = parsed.metadata;

    Ok(match parsed.id {
        Some(id) => VectorRecord::with_id(id, parsed.vector, parsed.content, metadata),
        None => VectorRecord::new(parsed.vector, parsed.content, metadata),
    })
}

/// Parse a comma separated list of floats
#[inline]
pub fn parse_vector(input: &str) -> Result<Vec<f32>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f32>()
                .with_context(|| format!("Invalid vector component: {}", part))
        })
        .collect()
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", style("📋 Current Configuration").bold().cyan());
    println!();

    println!("{}", style("Index Settings:").bold().yellow());
    println!("  Dimension: {}", style(config.index.dimension).cyan());
    println!("  Default top_k: {}", style(config.index.default_top_k).cyan());
    println!(
        "  Similarity threshold: {}",
        style(config.index.similarity_threshold).cyan()
    );
    println!("  Max results: {}", style(config.index.max_results).cyan());
    println!();

    println!("{}", style("Ranking Settings:").bold().yellow());
    println!(
        "  Evidence preview: {} chars",
        style(config.ranking.evidence_preview_chars).cyan()
    );
    println!(
        "  Context preview: {} chars",
        style(config.ranking.context_preview_chars).cyan()
    );
    println!();

    println!(
        "Data directory: {}",
        style(config.data_dir_path().display()).dim()
    );
    println!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Apply the given overrides and write the configuration file
#[inline]
pub fn update_config(
    mut config: Config,
    dimension: Option<usize>,
    top_k: Option<usize>,
    threshold: Option<f32>,
) -> Result<()> {
    if let Some(dimension) = dimension {
        if dimension != config.index.dimension {
            warn!(
                "Changing dimension from {} to {}; stored vectors will be resized on next open",
                config.index.dimension, dimension
            );
        }
        config.index.set_dimension(dimension)?;
    }
    if let Some(top_k) = top_k {
        config.index.set_default_top_k(top_k)?;
    }
    if let Some(threshold) = threshold {
        config.index.set_similarity_threshold(threshold)?;
    }

    config.save().context("Failed to save configuration")?;
    println!("{}", style("✓ Configuration saved successfully!").green());
    println!(
        "Configuration saved to: {}",
        style(config.config_file_path().display()).cyan()
    );
    Ok(())
}

#[inline]
pub async fn show_stats(store: &VectorStore) -> Result<()> {
    let stats = store.stats().await;

    println!("📊 Vector Store Statistics");
    println!("{}", "=".repeat(50));
    println!("  Records: {}", stats.record_count);
    println!("  Documents: {}", stats.document_count);
    println!("  Dimension: {}", stats.dimension);
    println!("  Storage: {} bytes", stats.storage_size);
    println!("  Data directory: {}", store.persistence().data_dir().display());
    println!("  Opened as: {}", describe_restore(store.restore_outcome()));

    if !stats.sample_ids.is_empty() {
        println!("  Sample ids:");
        for id in &stats.sample_ids {
            println!("    - {}", id);
        }
    }

    Ok(())
}

#[inline]
pub async fn run_health_check(store: &VectorStore) -> Result<()> {
    let report = store.consistency_report().await;
    println!("🔍 {}", report.summary());

    if store.health_check().await {
        println!("   ✅ Persistence round trip: OK");
        Ok(())
    } else {
        println!("   ❌ Persistence round trip: FAILED");
        bail!("Vector store health check failed")
    }
}

/// Import records from a JSON Lines file.
///
/// Blank lines are ignored. A malformed line aborts the import before
/// anything from its batch is written.
#[inline]
pub async fn import_records(store: &VectorStore, path: &Path) -> Result<ImportSummary> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;

    let lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    info!("Importing {} records from {}", lines.len(), path.display());

    let bar = if console::Term::stderr().is_term() {
        ProgressBar::new(lines.len() as u64).with_style(
            ProgressStyle::with_template("{bar:40} [{pos}/{len}] Importing {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        )
    } else {
        ProgressBar::hidden()
    };

    let mut summary = ImportSummary {
        lines: lines.len(),
        ..ImportSummary::default()
    };

    for batch in lines.chunks(IMPORT_BATCH_SIZE) {
        let records = batch
            .iter()
            .map(|&(line_no, line)| {
                parse_import_line(line).with_context(|| format!("Line {}", line_no + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        let report = store
            .add(records)
            .await
            .context("Failed to add records to the vector store")?;

        for rejected in &report.rejected {
            println!(
                "{} {}: {}",
                style("Rejected").yellow(),
                rejected.id,
                rejected.reason
            );
        }

        summary.added += report.added;
        summary.duplicates += report.skipped_duplicates.len();
        summary.rejected += report.rejected.len();
        bar.inc(batch.len() as u64);
        bar.set_message(path.display().to_string());
    }
    bar.finish_and_clear();

    println!(
        "Imported {} records ({} duplicates skipped, {} rejected)",
        summary.added, summary.duplicates, summary.rejected
    );
    Ok(summary)
}

/// Search with a raw query vector and print chunk or document results
#[inline]
pub async fn search(
    store: &VectorStore,
    config: &Config,
    query_vector: &[f32],
    top_k: Option<usize>,
    threshold: Option<f32>,
    documents: bool,
) -> Result<()> {
    let top_k = top_k
        .unwrap_or(config.index.default_top_k)
        .min(config.index.max_results);
    let threshold = threshold.unwrap_or(config.index.similarity_threshold);

    if !documents {
        let hits = store
            .search(query_vector, Some(top_k), Some(threshold))
            .await?;
        if hits.is_empty() {
            println!("No matching chunks found.");
            return Ok(());
        }

        println!("Found {} chunks:", hits.len());
        for (rank, hit) in hits.iter().enumerate() {
            let chunk = ChunkHit::from_search_hit(hit, config.ranking.evidence_preview_chars);
            println!(
                "{}. [{:.4}] {} ({})",
                rank + 1,
                chunk.score,
                chunk.chunk_id,
                chunk.document_title
            );
            println!("   {}", chunk.content_preview);
        }
        return Ok(());
    }

    let ranked = rank_documents(
        store,
        query_vector,
        top_k,
        threshold,
        config.ranking.evidence_preview_chars,
    )
    .await?;

    if ranked.is_empty() {
        println!("No matching documents found.");
        return Ok(());
    }

    println!("Found {} documents:", ranked.len());
    for (rank, doc) in ranked.iter().enumerate() {
        println!(
            "{}. {} ({}) max {:.4}, avg {:.4}, {} matching chunks",
            rank + 1,
            style(&doc.document_title).bold(),
            doc.document_id,
            doc.max_similarity,
            doc.avg_similarity,
            doc.matched_chunks
        );
        for chunk in &doc.chunks {
            println!(
                "   - [{:.4}] {}: {}",
                chunk.similarity, chunk.chunk_id, chunk.content_preview
            );
        }
    }
    Ok(())
}

#[inline]
pub async fn list_records(store: &VectorStore, page: usize, page_size: usize) -> Result<()> {
    let total = store.len().await;
    let records = store.list(page, page_size).await;

    if records.is_empty() {
        println!("No records on page {} ({} records stored).", page, total);
        return Ok(());
    }

    println!(
        "Records {} (page {}, {} total):",
        records.len(),
        page,
        total
    );
    for record in &records {
        println!(
            "  {} [{}] {}",
            record.id, record.metadata.document_id, record.metadata.title
        );
    }
    Ok(())
}

/// Delete a record, or every chunk of a document when `document` is set
#[inline]
pub async fn delete(store: &VectorStore, target: &str, document: bool) -> Result<()> {
    if document {
        let removed = store.delete_document(target).await?;
        if removed == 0 {
            return Err(anyhow!("No chunks found for document: {}", target));
        }
        println!("✓ Deleted {} chunks of document {}", removed, target);
    } else {
        if !store.delete(target).await? {
            return Err(anyhow!("Record not found: {}", target));
        }
        println!("✓ Deleted record {}", target);
    }
    Ok(())
}

/// Remove every record; asks for confirmation unless `yes` is set
#[inline]
pub async fn clear(store: &VectorStore, yes: bool) -> Result<()> {
    let count = store.len().await;
    if !yes {
        println!("This will delete all {} records and their snapshot files.", count);
        if !Confirm::new()
            .with_prompt("Clear the vector store? This action cannot be undone.")
            .default(false)
            .interact()?
        {
            println!("Clear cancelled.");
            return Ok(());
        }
    }

    store.clear().await?;
    println!("✓ Removed {} records", count);
    Ok(())
}

fn describe_restore(outcome: &RestoreOutcome) -> String {
    match outcome {
        RestoreOutcome::Fresh => "new store".to_string(),
        RestoreOutcome::Loaded => "restored from disk".to_string(),
        RestoreOutcome::Reset { reason } => format!("reset to empty ({})", reason),
    }
}
