use super::*;
use tempfile::TempDir;

fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::new(temp_dir.path());
    config.index.dimension = 3;
    (config, temp_dir)
}

fn create_test_record(id: &str, document_id: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord::with_id(
        id,
        vector,
        format!("This is test content for chunk {}", id),
        ChunkMetadata::new(document_id, format!("Title of {}", document_id))
            .with_extra("chunk_index", 0),
    )
}

async fn seeded_store(config: &Config) -> VectorStore {
    let store = VectorStore::open(config)
        .await
        .expect("should open vector store");
    store
        .add(vec![
            create_test_record("a", "doc_1", vec![1.0, 0.0, 0.0]),
            create_test_record("b", "doc_1", vec![0.9, 0.1, 0.0]),
            create_test_record("c", "doc_2", vec![0.0, 1.0, 0.0]),
        ])
        .await
        .expect("should add records");
    store
}

fn hit_ids(hits: &[SearchHit]) -> Vec<&str> {
    hits.iter().map(|hit| hit.record.id.as_str()).collect()
}

#[tokio::test]
async fn vector_store_initialization() {
    let (config, _temp_dir) = create_test_config();

    let store = VectorStore::open(&config)
        .await
        .expect("should open vector store");

    assert_eq!(store.dimension(), 3);
    assert!(store.is_empty().await);
    assert_eq!(store.persistence().data_dir(), config.data_dir_path());
}

#[tokio::test]
async fn open_rejects_invalid_config() {
    let (mut config, _temp_dir) = create_test_config();
    config.index.dimension = 0;

    let result = VectorStore::open(&config).await;
    assert!(matches!(result, Err(IndexError::Config(_))));
}

#[tokio::test]
async fn add_and_get_record() {
    let (config, _temp_dir) = create_test_config();
    let store = VectorStore::open(&config)
        .await
        .expect("should open vector store");

    let record = create_test_record("chunk_1", "doc_1", vec![0.1, 0.2, 0.3]);
    let report = store
        .add(vec![record.clone()])
        .await
        .expect("should add record");

    assert_eq!(report.added, 1);
    assert!(report.skipped_duplicates.is_empty());
    assert!(report.rejected.is_empty());

    let stored = store.get("chunk_1").await.expect("record should exist");
    assert_eq!(stored, record);
    assert!(store.get("missing").await.is_none());
}

#[tokio::test]
async fn empty_batch_handling() {
    let (config, _temp_dir) = create_test_config();
    let store = VectorStore::open(&config)
        .await
        .expect("should open vector store");

    let report = store.add(Vec::new()).await.expect("empty batch should succeed");
    assert_eq!(report, AddReport::default());
    assert!(!store.persistence().vectors_path().exists());
}

#[tokio::test]
async fn add_skips_duplicate_ids() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    let report = store
        .add(vec![
            create_test_record("a", "doc_9", vec![0.0, 0.0, 1.0]),
            create_test_record("d", "doc_3", vec![0.0, 0.0, 1.0]),
            create_test_record("d", "doc_3", vec![1.0, 1.0, 1.0]),
        ])
        .await
        .expect("should add records");

    assert_eq!(report.added, 1);
    assert_eq!(report.skipped_duplicates, vec!["a", "d"]);
    assert_eq!(store.len().await, 4);

    // The stored record wins over the incoming duplicate
    let a = store.get("a").await.expect("a should exist");
    assert_eq!(a.vector, vec![1.0, 0.0, 0.0]);
    assert_eq!(a.metadata.document_id, "doc_1");
    let d = store.get("d").await.expect("d should exist");
    assert_eq!(d.vector, vec![0.0, 0.0, 1.0]);
}

#[tokio::test]
async fn add_rejects_malformed_records() {
    let (config, _temp_dir) = create_test_config();
    let store = VectorStore::open(&config)
        .await
        .expect("should open vector store");

    let report = store
        .add(vec![
            create_test_record("", "doc_1", vec![1.0, 0.0, 0.0]),
            create_test_record("empty", "doc_1", Vec::new()),
            create_test_record("nan", "doc_1", vec![f32::NAN, 0.0, 0.0]),
            create_test_record("good", "doc_1", vec![1.0, 0.0, 0.0]),
        ])
        .await
        .expect("batch should not fail");

    assert_eq!(report.added, 1);
    let rejected: Vec<&str> = report.rejected.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(rejected, vec!["", "empty", "nan"]);
    assert!(report.rejected[2].reason.contains("non-finite"));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn add_resizes_mismatched_vectors() {
    let (config, _temp_dir) = create_test_config();
    let store = VectorStore::open(&config)
        .await
        .expect("should open vector store");

    store
        .add(vec![
            create_test_record("short", "doc_1", vec![0.5]),
            create_test_record("long", "doc_1", vec![0.1, 0.2, 0.3, 0.4, 0.5]),
        ])
        .await
        .expect("should add records");

    let short = store.get("short").await.expect("short should exist");
    assert_eq!(short.vector, vec![0.5, 0.0, 0.0]);
    let long = store.get("long").await.expect("long should exist");
    assert_eq!(long.vector, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn search_similar_records() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    let hits = store
        .search(&[1.0, 0.0, 0.0], Some(10), Some(0.0))
        .await
        .expect("should search");

    assert_eq!(hit_ids(&hits), vec!["a", "b", "c"]);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert!(hits[1].score < hits[0].score);
    assert_eq!(hits[2].score, 0.0);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn search_respects_top_k_and_threshold() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    let top_one = store
        .search(&[1.0, 0.0, 0.0], Some(1), Some(0.0))
        .await
        .expect("should search");
    assert_eq!(hit_ids(&top_one), vec!["a"]);

    let above_half = store
        .search(&[1.0, 0.0, 0.0], Some(10), Some(0.5))
        .await
        .expect("should search");
    assert_eq!(hit_ids(&above_half), vec!["a", "b"]);
    assert!(above_half.iter().all(|hit| hit.score >= 0.5));

    let none = store
        .search(&[1.0, 0.0, 0.0], Some(0), Some(0.0))
        .await
        .expect("should search");
    assert!(none.is_empty());
}

#[tokio::test]
async fn search_uses_configured_defaults() {
    let (mut config, _temp_dir) = create_test_config();
    config.index.default_top_k = 1;
    config.index.similarity_threshold = 0.9;
    let store = seeded_store(&config).await;

    let hits = store
        .search(&[0.0, 1.0, 0.0], None, None)
        .await
        .expect("should search");
    assert_eq!(hit_ids(&hits), vec!["c"]);
}

#[tokio::test]
async fn search_keeps_insertion_order_for_ties() {
    let (config, _temp_dir) = create_test_config();
    let store = VectorStore::open(&config)
        .await
        .expect("should open vector store");
    store
        .add(vec![
            create_test_record("first", "doc_1", vec![0.0, 2.0, 0.0]),
            create_test_record("second", "doc_1", vec![0.0, 1.0, 0.0]),
            create_test_record("third", "doc_1", vec![0.0, 3.0, 0.0]),
        ])
        .await
        .expect("should add records");

    let hits = store
        .search(&[0.0, 1.0, 0.0], Some(10), Some(0.0))
        .await
        .expect("should search");
    assert_eq!(hit_ids(&hits), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn search_empty_store_returns_nothing() {
    let (config, _temp_dir) = create_test_config();
    let store = VectorStore::open(&config)
        .await
        .expect("should open vector store");

    let hits = store
        .search(&[1.0, 0.0, 0.0], None, None)
        .await
        .expect("should search");
    assert!(hits.is_empty());
}

#[tokio::test]
async fn search_rejects_invalid_queries() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    let empty = store.search(&[], None, None).await;
    assert!(matches!(empty, Err(IndexError::Validation(_))));

    let non_finite = store.search(&[f32::INFINITY, 0.0, 0.0], None, None).await;
    assert!(matches!(non_finite, Err(IndexError::Validation(_))));

    let nan_threshold = store.search(&[1.0, 0.0, 0.0], None, Some(f32::NAN)).await;
    assert!(matches!(nan_threshold, Err(IndexError::Validation(_))));
}

#[tokio::test]
async fn search_resizes_mismatched_query() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    let hits = store
        .search(&[1.0], Some(1), Some(0.0))
        .await
        .expect("short query should be padded");
    assert_eq!(hit_ids(&hits), vec!["a"]);

    let hits = store
        .search(&[0.0, 1.0, 0.0, 7.0], Some(1), Some(0.0))
        .await
        .expect("long query should be truncated");
    assert_eq!(hit_ids(&hits), vec!["c"]);
}

#[tokio::test]
async fn search_with_zero_query_scores_zero() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    let hits = store
        .search(&[0.0, 0.0, 0.0], Some(10), Some(0.0))
        .await
        .expect("should search");
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|hit| hit.score == 0.0));
}

#[tokio::test]
async fn delete_record_keeps_rows_aligned() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    assert!(store.delete("b").await.expect("should delete"));
    assert!(!store.delete("b").await.expect("second delete should succeed"));

    assert!(store.get("b").await.is_none());
    assert_eq!(store.len().await, 2);

    // Rows after the deleted one moved up with their metadata
    let c = store.get("c").await.expect("c should exist");
    assert_eq!(c.vector, vec![0.0, 1.0, 0.0]);

    let hits = store
        .search(&[0.9, 0.1, 0.0], Some(10), Some(-1.0))
        .await
        .expect("should search");
    assert!(!hit_ids(&hits).contains(&"b"));
    assert!(store.consistency_report().await.is_consistent);
}

#[tokio::test]
async fn delete_unknown_record() {
    let (config, _temp_dir) = create_test_config();
    let store = VectorStore::open(&config)
        .await
        .expect("should open vector store");

    assert!(!store.delete("nope").await.expect("should not fail"));
}

#[tokio::test]
async fn delete_document_chunks() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    let removed = store
        .delete_document("doc_1")
        .await
        .expect("should delete document");
    assert_eq!(removed, 2);
    assert_eq!(store.document_ids().await, vec!["doc_2"]);

    let hits = store
        .search(&[1.0, 0.0, 0.0], Some(10), Some(-1.0))
        .await
        .expect("should search");
    assert_eq!(hit_ids(&hits), vec!["c"]);

    let none = store
        .delete_document("doc_1")
        .await
        .expect("should not fail");
    assert_eq!(none, 0);
}

#[tokio::test]
async fn update_record_metadata() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;
    let before = store.get("a").await.expect("a should exist");

    let updated = store
        .update(
            "a",
            "Rewritten content".to_string(),
            ChunkMetadata::new("doc_1", "New Title").with_extra("section", "intro"),
        )
        .await
        .expect("should update");
    assert!(updated);

    let after = store.get("a").await.expect("a should exist");
    assert_eq!(after.content, "Rewritten content");
    assert_eq!(after.metadata.title, "New Title");
    assert_eq!(after.metadata.extra["section"], "intro");
    assert_eq!(after.metadata.extra["chunk_index"], 0);
    assert_eq!(after.vector, before.vector);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at >= before.updated_at);

    let missing = store
        .update("zzz", String::new(), ChunkMetadata::new("doc", "Doc"))
        .await
        .expect("should not fail");
    assert!(!missing);
}

#[tokio::test]
async fn list_records_by_page() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    let first: Vec<String> = store.list(1, 2).await.into_iter().map(|r| r.id).collect();
    assert_eq!(first, vec!["a", "b"]);

    let second: Vec<String> = store.list(2, 2).await.into_iter().map(|r| r.id).collect();
    assert_eq!(second, vec!["c"]);

    assert!(store.list(3, 2).await.is_empty());
    assert_eq!(store.list(0, 2).await.len(), 2);
}

#[tokio::test]
async fn stats_reflect_contents() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    let stats = store.stats().await;
    assert_eq!(stats.record_count, 3);
    assert_eq!(stats.document_count, 2);
    assert_eq!(stats.dimension, 3);
    assert!(stats.storage_size > 0);
    assert_eq!(stats.sample_ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn records_survive_reopen() {
    let (config, _temp_dir) = create_test_config();
    let before = {
        let store = seeded_store(&config).await;
        store.delete("b").await.expect("should delete");
        store.list(1, 10).await
    };

    let reopened = VectorStore::open(&config)
        .await
        .expect("should reopen vector store");
    assert_eq!(reopened.list(1, 10).await, before);

    let hits = reopened
        .search(&[0.0, 1.0, 0.0], Some(1), Some(0.0))
        .await
        .expect("should search");
    assert_eq!(hit_ids(&hits), vec!["c"]);
}

#[tokio::test]
async fn clear_removes_everything() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    store.clear().await.expect("should clear");
    assert!(store.is_empty().await);
    assert!(!store.persistence().vectors_path().exists());
    assert!(!store.persistence().metadata_path().exists());

    let reopened = VectorStore::open(&config)
        .await
        .expect("should reopen vector store");
    assert!(reopened.is_empty().await);
}

#[tokio::test]
async fn health_check_passes() {
    let (config, _temp_dir) = create_test_config();
    let store = seeded_store(&config).await;

    assert!(store.health_check().await);

    let report = store.consistency_report().await;
    assert!(report.is_consistent);
    assert_eq!(report.vector_rows, 3);
}

#[tokio::test]
async fn health_check_on_empty_store() {
    let (config, _temp_dir) = create_test_config();
    let store = VectorStore::open(&config)
        .await
        .expect("should open vector store");

    assert!(store.health_check().await);
}
