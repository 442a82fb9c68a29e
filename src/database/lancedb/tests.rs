use super::*;
use serde_json::json;
use tempfile::TempDir;

async fn create_test_store(dimension: usize) -> (TempDir, LanceStore) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut store = LanceStore::open(temp_dir.path().join("vectors"), dimension)
        .await
        .expect("should open store");
    let strategy = store.initialize().await.expect("should initialize");
    assert_eq!(strategy, RankingStrategy::Native);
    (temp_dir, store)
}

fn row(filename: &str, chunk_id: i64, content: &str, embedding: Vec<f32>) -> NewEmbeddingRow {
    NewEmbeddingRow {
        filename: filename.to_string(),
        chunk_id,
        content: content.to_string(),
        embedding,
        metadata: json!({"filename": filename, "chunk_id": chunk_id}),
    }
}

#[tokio::test]
async fn store_and_rank() {
    let (_temp_dir, store) = create_test_store(3).await;

    let inserted = store
        .insert_batch(&[
            row("pets.pdf", 0, "cats", vec![1.0, 0.0, 0.0]),
            row("pets.pdf", 1, "dogs", vec![0.0, 1.0, 0.0]),
            row("pets.pdf", 2, "cats and dogs", vec![0.7, 0.7, 0.0]),
        ])
        .await
        .expect("should insert");
    assert_eq!(inserted, 3);

    let ranked = store
        .rank_by_similarity(&[1.0, 0.0, 0.0], 2)
        .await
        .expect("should rank");

    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].content, "cats");
    assert!((ranked[0].similarity - 1.0).abs() < 1e-4);
    assert_eq!(ranked[1].content, "cats and dogs");
    assert_eq!(ranked[0].metadata["filename"], "pets.pdf");
}

#[tokio::test]
async fn empty_table_ranks_to_nothing() {
    let (_temp_dir, store) = create_test_store(2).await;
    assert!(
        store
            .rank_by_similarity(&[1.0, 0.0], 3)
            .await
            .expect("should rank")
            .is_empty()
    );
}

#[tokio::test]
async fn listing_and_deleting() {
    let (_temp_dir, store) = create_test_store(2).await;

    store
        .insert_batch(&[
            row("b.pdf", 0, "b0", vec![1.0, 0.0]),
            row("b.pdf", 1, "b1", vec![0.0, 1.0]),
        ])
        .await
        .expect("should insert");
    store
        .insert_batch(&[row("a.pdf", 0, "a0", vec![1.0, 1.0])])
        .await
        .expect("should insert");

    assert_eq!(
        store.list_filenames().await.expect("should list"),
        vec!["a.pdf", "b.pdf"]
    );
    let summaries = store.document_summaries().await.expect("should summarize");
    assert_eq!(summaries[1].chunk_count, 2);

    assert_eq!(store.delete_by_filename("b.pdf").await.expect("should delete"), 2);
    assert_eq!(store.delete_by_filename("b.pdf").await.expect("should delete"), 0);
    assert_eq!(store.delete_all().await.expect("should delete all"), 1);
    assert_eq!(store.count_rows().await.expect("should count"), 0);
}

#[tokio::test]
async fn replace_document_swaps_rows() {
    let (_temp_dir, store) = create_test_store(2).await;

    store
        .insert_batch(&[
            row("a.pdf", 0, "old 0", vec![1.0, 0.0]),
            row("a.pdf", 1, "old 1", vec![1.0, 0.0]),
        ])
        .await
        .expect("should insert");
    store
        .insert_batch(&[row("o'brien.pdf", 0, "other", vec![0.0, 1.0])])
        .await
        .expect("should insert");

    let replaced = store
        .replace_document(
            "a.pdf",
            &[
                vec![row("a.pdf", 0, "new 0", vec![0.0, 1.0])],
                vec![row("a.pdf", 1, "new 1", vec![0.0, 1.0])],
                vec![row("a.pdf", 2, "new 2", vec![0.0, 1.0])],
            ],
        )
        .await
        .expect("should replace");
    assert_eq!(replaced, 2);

    let rows = store.document_rows("a.pdf").await.expect("should load rows");
    let contents: Vec<&str> = rows.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(contents, vec!["new 0", "new 1", "new 2"]);

    let other = store
        .document_rows("o'brien.pdf")
        .await
        .expect("should load rows");
    assert_eq!(other.len(), 1);
}

#[tokio::test]
async fn replace_with_nothing_removes_document() {
    let (_temp_dir, store) = create_test_store(2).await;
    store
        .insert_batch(&[row("a.pdf", 0, "old", vec![1.0, 0.0])])
        .await
        .expect("should insert");

    assert_eq!(
        store
            .replace_document("a.pdf", &[])
            .await
            .expect("should replace"),
        1
    );
    assert!(store.list_filenames().await.expect("should list").is_empty());
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let (_temp_dir, store) = create_test_store(3).await;

    let result = store
        .insert_batch(&[row("a.pdf", 0, "short", vec![1.0, 0.0])])
        .await;
    assert!(matches!(result, Err(DocuchatError::Storage(_))));

    let result = store.rank_by_similarity(&[1.0], 1).await;
    assert!(matches!(result, Err(DocuchatError::Validation(_))));
}

#[tokio::test]
async fn ids_continue_after_reopen() {
    let (temp_dir, store) = create_test_store(2).await;
    store
        .insert_batch(&[
            row("a.pdf", 0, "a0", vec![1.0, 0.0]),
            row("a.pdf", 1, "a1", vec![0.0, 1.0]),
        ])
        .await
        .expect("should insert");
    drop(store);

    let mut reopened = LanceStore::open(temp_dir.path().join("vectors"), 2)
        .await
        .expect("should reopen");
    reopened.initialize().await.expect("should initialize");
    reopened
        .insert_batch(&[row("b.pdf", 0, "b0", vec![1.0, 1.0])])
        .await
        .expect("should insert");

    let first = reopened.document_rows("a.pdf").await.expect("should load");
    let second = reopened.document_rows("b.pdf").await.expect("should load");
    assert!(second[0].id > first[1].id);
}

#[tokio::test]
async fn reopening_with_other_dimension_fails() {
    let (temp_dir, store) = create_test_store(2).await;
    drop(store);

    let mut reopened = LanceStore::open(temp_dir.path().join("vectors"), 4)
        .await
        .expect("should open");
    assert!(matches!(
        reopened.initialize().await,
        Err(DocuchatError::Storage(_))
    ));
}

#[tokio::test]
async fn small_tables_skip_the_index() {
    let (_temp_dir, store) = create_test_store(2).await;
    store
        .insert_batch(&[row("a.pdf", 0, "a0", vec![1.0, 0.0])])
        .await
        .expect("should insert");

    assert!(!store.ensure_vector_index().await.expect("should check index"));
    store.optimize().await.expect("should optimize");
}

#[tokio::test]
async fn unusable_before_initialize() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = LanceStore::open(temp_dir.path().join("vectors"), 2)
        .await
        .expect("should open");
    assert!(store.count_rows().await.is_err());
}

#[tokio::test]
async fn failed_batch_leaves_earlier_batches() {
    let (_temp_dir, store) = create_test_store(2).await;

    store
        .insert_batch(&[row("a.pdf", 0, "first", vec![1.0, 0.0])])
        .await
        .expect("first batch should insert");

    // chunk 0 already exists, so nothing of the second batch is written
    let result = store
        .insert_batch(&[
            row("a.pdf", 1, "second", vec![0.0, 1.0]),
            row("a.pdf", 0, "duplicate", vec![0.0, 1.0]),
        ])
        .await;
    assert!(matches!(result, Err(DocuchatError::Storage(_))));

    let rows = store.document_rows("a.pdf").await.expect("should load rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "first");
}

#[tokio::test]
async fn repeated_chunk_ids_are_rejected() {
    let (_temp_dir, store) = create_test_store(2).await;

    let result = store
        .insert_batch(&[
            row("a.pdf", 0, "one", vec![1.0, 0.0]),
            row("a.pdf", 0, "again", vec![0.0, 1.0]),
        ])
        .await;
    assert!(matches!(result, Err(DocuchatError::Storage(_))));

    // the same chunk id under another document is fine
    store
        .insert_batch(&[row("a.pdf", 0, "a", vec![1.0, 0.0])])
        .await
        .expect("should insert");
    store
        .insert_batch(&[row("b.pdf", 0, "b", vec![0.0, 1.0])])
        .await
        .expect("should insert");

    let result = store
        .replace_document(
            "a.pdf",
            &[
                vec![row("a.pdf", 0, "new 0", vec![0.0, 1.0])],
                vec![row("a.pdf", 0, "new 0 again", vec![0.0, 1.0])],
            ],
        )
        .await;
    assert!(matches!(result, Err(DocuchatError::Storage(_))));

    let rows = store.document_rows("a.pdf").await.expect("should load rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "a");
    assert_eq!(store.count_rows().await.expect("should count"), 2);
}
