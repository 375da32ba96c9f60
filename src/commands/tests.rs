use super::*;
use tempfile::TempDir;

fn create_test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::new(temp_dir.path());
    config.index.dimension = 3;
    config
}

async fn open_store(config: &Config) -> VectorStore {
    VectorStore::open(config)
        .await
        .expect("should open vector store")
}

#[test]
fn parse_import_line_with_all_fields() {
    let record = parse_import_line(
        r#"{"id":"c1","vector":[0.1,0.2,0.3],"content":"hello","document_id":"d1","title":"Doc","created_at":"2024-01-01T00:00:00Z","metadata":{"chunk_index":2}}"#,
    )
    .expect("should parse line");

    assert_eq!(record.id, "c1");
    assert_eq!(record.vector, vec![0.1, 0.2, 0.3]);
    assert_eq!(record.content, "hello");
    assert_eq!(record.metadata.document_id, "d1");
    assert_eq!(record.metadata.title, "Doc");
    assert_eq!(record.metadata.created_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    assert_eq!(record.metadata.extra["chunk_index"], 2);
}

#[test]
fn parse_import_line_generates_id() {
    let record = parse_import_line(
        r#"{"vector":[1.0],"content":"x","document_id":"d1","title":"Doc"}"#,
    )
    .expect("should parse line");

    assert!(uuid::Uuid::parse_str(&record.id).is_ok());
    assert!(record.metadata.extra.is_empty());
}

#[test]
fn parse_import_line_requires_fields() {
    assert!(parse_import_line(r#"{"vector":[1.0],"content":"x"}"#).is_err());
    assert!(parse_import_line("not json").is_err());
}

#[test]
fn parse_vector_values() {
    assert_eq!(
        parse_vector("0.5, -1,2e-1").expect("should parse vector"),
        vec![0.5, -1.0, 0.2]
    );
    assert_eq!(
        parse_vector("1.0,").expect("trailing comma is fine"),
        vec![1.0]
    );
    assert!(parse_vector("1.0,abc").is_err());
    assert!(parse_vector("").expect("empty input parses").is_empty());
}

#[tokio::test]
async fn import_records_from_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(&temp_dir);
    let store = open_store(&config).await;

    let path = temp_dir.path().join("records.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"id":"a","vector":[1,0,0],"content":"A","document_id":"d1","title":"One"}"#,
            "\n\n",
            r#"{"id":"b","vector":[0,1,0],"content":"B","document_id":"d1","title":"One"}"#,
            "\n",
            r#"{"id":"a","vector":[0,0,1],"content":"A again","document_id":"d2","title":"Two"}"#,
            "\n",
            r#"{"id":"c","vector":[],"content":"empty","document_id":"d2","title":"Two"}"#,
            "\n",
        ),
    )
    .expect("should write import file");

    let summary = import_records(&store, &path)
        .await
        .expect("should import records");

    assert_eq!(
        summary,
        ImportSummary {
            lines: 4,
            added: 2,
            duplicates: 1,
            rejected: 1,
        }
    );
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn import_aborts_on_malformed_line() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(&temp_dir);
    let store = open_store(&config).await;

    let path = temp_dir.path().join("broken.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"id":"a","vector":[1,0,0],"content":"A","document_id":"d1","title":"One"}"#,
            "\n{broken\n",
        ),
    )
    .expect("should write import file");

    let err = import_records(&store, &path)
        .await
        .expect_err("malformed line should fail");
    assert!(format!("{:#}", err).contains("Line 2"));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn import_missing_file_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(&temp_dir);
    let store = open_store(&config).await;

    let result = import_records(&store, &temp_dir.path().join("missing.jsonl")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn delete_reports_missing_targets() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(&temp_dir);
    let store = open_store(&config).await;
    store
        .add(vec![VectorRecord::with_id(
            "a",
            vec![1.0, 0.0, 0.0],
            "A",
            ChunkMetadata::new("d1", "One"),
        )])
        .await
        .expect("should add record");

    assert!(delete(&store, "missing", false).await.is_err());
    assert!(delete(&store, "missing-doc", true).await.is_err());

    delete(&store, "d1", true)
        .await
        .expect("should delete document");
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn clear_with_confirmation_flag() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(&temp_dir);
    let store = open_store(&config).await;
    store
        .add(vec![VectorRecord::with_id(
            "a",
            vec![1.0, 0.0, 0.0],
            "A",
            ChunkMetadata::new("d1", "One"),
        )])
        .await
        .expect("should add record");

    clear(&store, true).await.expect("should clear store");
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn search_and_health_commands_succeed() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(&temp_dir);
    let store = open_store(&config).await;
    store
        .add(vec![VectorRecord::with_id(
            "a",
            vec![1.0, 0.0, 0.0],
            "A",
            ChunkMetadata::new("d1", "One"),
        )])
        .await
        .expect("should add record");

    search(&store, &config, &[1.0, 0.0, 0.0], None, None, false)
        .await
        .expect("chunk search should succeed");
    search(&store, &config, &[1.0, 0.0, 0.0], Some(5), Some(0.0), true)
        .await
        .expect("document search should succeed");
    assert!(
        search(&store, &config, &[], None, None, false)
            .await
            .is_err()
    );

    run_health_check(&store)
        .await
        .expect("health check should pass");
    show_stats(&store).await.expect("stats should print");
    list_records(&store, 1, 10)
        .await
        .expect("list should print");
}

#[test]
fn update_config_writes_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::new(temp_dir.path());

    update_config(config, Some(384), Some(5), Some(0.5)).expect("should save config");

    let loaded = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(loaded.index.dimension, 384);
    assert_eq!(loaded.index.default_top_k, 5);
    assert!((loaded.index.similarity_threshold - 0.5).abs() < f32::EPSILON);
}

#[test]
fn update_config_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::new(temp_dir.path());

    assert!(update_config(config.clone(), Some(0), None, None).is_err());
    assert!(update_config(config, None, None, Some(2.0)).is_err());
    assert!(!temp_dir.path().join("config.toml").exists());
}
