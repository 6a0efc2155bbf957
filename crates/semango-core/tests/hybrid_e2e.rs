//! End-to-end ingestion and retrieval scenarios.
//!
//! Each test builds a small corpus in a temp directory, runs the full
//! pipeline with a deterministic in-process embedder, and checks the
//! hybrid search output.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use semango_core::config::FusionKind;
use semango_core::embedder::Embedder;
use semango_core::error::SemangoResult;
use semango_core::types::{meta_keys, Modality};
use semango_core::{Config, Engine};

const DIM: usize = 8;

/// Deterministic bag-of-characters embedder: related texts land close,
/// unrelated texts far, and the output is a unit vector.
struct CharBagEmbedder;

#[async_trait]
impl Embedder for CharBagEmbedder {
    async fn embed(&self, texts: &[String]) -> SemangoResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIM];
                for (i, b) in t.to_lowercase().bytes().enumerate() {
                    v[(b as usize + i % 3) % DIM] += 1.0;
                }
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in &mut v {
                        *x /= norm;
                    }
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Embedder that records call order and batch contents.
struct RecordingEmbedder {
    inner: CharBagEmbedder,
    seen: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    async fn embed(&self, texts: &[String]) -> SemangoResult<Vec<Vec<f32>>> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend(texts.iter().cloned());
        self.inner.embed(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

fn engine_for(root: &Path) -> Engine {
    Engine::with_embedder(Config::defaults(root), Arc::new(CharBagEmbedder)).expect("engine")
}

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    std::fs::write(path, content).expect("write");
}

#[tokio::test(flavor = "multi_thread")]
async fn single_short_text_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_file(dir.path(), "a.md", "hello world");

    let engine = engine_for(dir.path());
    engine.index().await.expect("index");

    let hits = engine.search("hello", 10).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "a.md");
    assert_eq!(hits[0].text, "hello world");
    assert!(hits[0].lexical_score > 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn long_file_chunks_with_stable_offsets() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_file(dir.path(), "long.txt", &"a".repeat(2500));

    let engine = engine_for(dir.path());
    let report = engine.index().await.expect("index");
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.reps_indexed, 3, "ceil((2500-200)/800) chunks");

    let stats = engine.stats().expect("stats");
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.total_chunks, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn csv_rows_summary_schema_and_ranking() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_file(
        dir.path(),
        "t.csv",
        "name,comment\nAlice,Hello world\nBob,Another text\n",
    );

    let engine = engine_for(dir.path());
    let report = engine.index().await.expect("index");
    assert_eq!(report.files_processed, 1);
    // 2 rows + summary + schema
    assert_eq!(report.reps_indexed, 4);

    let hits = engine.search("Hello", 10).await.expect("search");
    assert!(!hits.is_empty());
    let top = &hits[0];
    assert_eq!(top.modality, Modality::TableRow);
    assert!(top.text.contains("Hello world"));
    assert_eq!(
        top.meta.get("col.name").map(String::as_str),
        Some("Alice"),
        "the Alice row ranks first"
    );

    let sources: Vec<&str> = hits
        .iter()
        .filter_map(|h| h.meta.get(meta_keys::SOURCE).map(String::as_str))
        .collect();
    // Summary and schema representations exist in the index even if they
    // rank below the matching row for this query.
    let stats = engine.stats().expect("stats");
    assert_eq!(stats.total_chunks, 4);
    assert!(sources.iter().all(|s| !s.is_empty()));
}

#[tokio::test(flavor = "multi_thread")]
async fn excluded_subtree_never_emitted() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_file(dir.path(), ".git/HEAD", "ref: refs/heads/main");
    write_file(dir.path(), "notes.md", "some ordinary note text");

    let engine = engine_for(dir.path());
    let report = engine.index().await.expect("index");
    assert_eq!(report.files_processed, 1);

    let hits = engine.search("refs heads main", 10).await.expect("search");
    assert!(hits.iter().all(|h| h.path != ".git/HEAD"));
}

#[tokio::test(flavor = "multi_thread")]
async fn embedder_sees_texts_in_order() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_file(dir.path(), "long.txt", &"word ".repeat(700));

    let recorder = Arc::new(RecordingEmbedder {
        inner: CharBagEmbedder,
        seen: std::sync::Mutex::new(Vec::new()),
    });
    let engine =
        Engine::with_embedder(Config::defaults(dir.path()), recorder.clone()).expect("engine");
    engine.index().await.expect("index");

    let seen = recorder
        .seen
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    assert!(seen.len() > 1, "long file should produce several chunks");

    // Re-running search embeds the query exactly once.
    let before = seen.len();
    engine.search("word", 5).await.expect("search");
    let after = recorder
        .seen
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .len();
    assert_eq!(after, before + 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn round_trip_meta_through_index() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_file(dir.path(), "src/lib.rs", "pub fn answer() -> u32 { 42 }\n");

    let engine = engine_for(dir.path());
    engine.index().await.expect("index");

    let hits = engine.search("answer", 10).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "src/lib.rs");
    assert_eq!(
        hits[0].meta.get(meta_keys::LANGUAGE).map(String::as_str),
        Some("rust")
    );
    assert_eq!(
        hits[0].meta.get(meta_keys::SOURCE).map(String::as_str),
        Some("code")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn lexical_only_weights_preserve_lexical_order() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_file(dir.path(), "a.md", "rust rust rust a dense little file");
    write_file(
        dir.path(),
        "b.md",
        "rust mentioned once among many other unrelated words in a longer document",
    );

    let mut config = Config::defaults(dir.path());
    config.hybrid.fusion = FusionKind::Linear;
    config.hybrid.lexical_weight = 1.0;
    config.hybrid.vector_weight = 0.0;
    let engine = Engine::with_embedder(config, Arc::new(CharBagEmbedder)).expect("engine");
    engine.index().await.expect("index");

    let hits = engine.search("rust", 10).await.expect("search");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].path, "a.md");
    assert!(hits[0].lexical_score > hits[1].lexical_score);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test(flavor = "multi_thread")]
async fn persisted_sidecar_is_chunk_id_label_json() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_file(dir.path(), "a.md", "sidecar check text");

    let engine = engine_for(dir.path());
    engine.index().await.expect("index");
    engine.shutdown().expect("shutdown");

    let ids_path = dir.path().join("semango/index/faiss.index.ids");
    let raw = std::fs::read_to_string(&ids_path).expect("sidecar exists");
    let map: HashMap<String, i64> = serde_json::from_str(&raw).expect("chunk_id -> label json");
    assert_eq!(map.len(), 1);
    let (id, label) = map.iter().next().expect("one entry");
    assert_eq!(id.len(), 40);
    assert_eq!(*label, 1);

    assert!(dir.path().join("semango/index/faiss.index").exists());
    assert!(dir.path().join("semango/index/lexical").is_dir());
}

#[tokio::test(flavor = "multi_thread")]
async fn reopened_engine_serves_previous_index() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_file(dir.path(), "a.md", "durable little document");

    {
        let engine = engine_for(dir.path());
        engine.index().await.expect("index");
        engine.shutdown().expect("shutdown");
    }

    let engine = engine_for(dir.path());
    let hits = engine.search("durable", 10).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "a.md");
}
