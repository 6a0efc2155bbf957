//! Pipeline orchestrator.
//!
//! Wires together all subsystems into a coherent indexing + query engine.
//! This is the top-level public API of semango-core.
//!
//! ## Architecture
//!
//! ```text
//! crawler --> path channel --> process_file() --> loader --> embedder
//!                                                     |
//!                                                     v
//!                                        lexical index + vector index
//! ```
//!
//! Ingestion tolerates partial failure: a loader, embedder, or index
//! error marks that file (or representation) failed and the pipeline
//! moves on. Only a terminal crawler error fails the whole run, and it
//! is surfaced after the path stream has drained.
//!
//! Ordering inside one file: all representations are embedded before any
//! index write, and per representation the lexical write is attempted
//! before the vector write. There is no cross-file ordering.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::crawler::Crawler;
use crate::embedder::{build_embedder, Embedder};
use crate::error::{SemangoError, SemangoResult};
use crate::index::{LexicalIndex, VectorIndex};
use crate::loader::LoaderRegistry;
use crate::search::Searcher;
use crate::types::{meta_keys, IndexStats, Representation, SearchHit};

/// The main Semango engine.
///
/// Owns the loader registry, the embedder, and both index handles, and
/// exposes the three core operations: `index`, `search`, `stats`.
pub struct Engine {
    config: Config,
    registry: LoaderRegistry,
    embedder: Arc<dyn Embedder>,
    lexical: Arc<LexicalIndex>,
    vector: Arc<VectorIndex>,
    searcher: Searcher,
}

impl Engine {
    /// Create an engine for the given root, loading `semango.toml` from it.
    pub fn new(root: &Path) -> SemangoResult<Self> {
        let config = Config::load(root)?;
        Self::with_config(config)
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(config: Config) -> SemangoResult<Self> {
        let embedder = build_embedder(&config.embedding)?;
        Self::with_embedder(config, embedder)
    }

    /// Create an engine with an injected embedder (used by tests and by
    /// callers bringing their own backend).
    pub fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> SemangoResult<Self> {
        let lexical = Arc::new(LexicalIndex::open(
            &config.lexical_index_path(),
            config.lexical.bm25_k1,
            config.lexical.bm25_b,
        )?);
        let vector = Arc::new(VectorIndex::open(
            &config.vector_index_path(),
            embedder.dimension(),
        )?);
        let registry = LoaderRegistry::with_defaults(&config);
        let searcher = Searcher::new(
            lexical.clone(),
            vector.clone(),
            embedder.clone(),
            config.hybrid.clone(),
        );

        tracing::info!(
            root = %config.root.display(),
            lexical = %config.lexical_index_path().display(),
            vector = %config.vector_index_path().display(),
            dimensions = embedder.dimension(),
            "engine initialized"
        );

        Ok(Self {
            config,
            registry,
            embedder,
            lexical,
            vector,
            searcher,
        })
    }

    /// Run the full ingestion pipeline over the configured tree.
    pub async fn index(&self) -> SemangoResult<IndexReport> {
        self.index_with_cancel(&CancellationToken::new()).await
    }

    /// Run ingestion under a cancellation token.
    ///
    /// Cancellation stops the crawler after the current entry and skips
    /// remaining files; completed writes are not rolled back.
    pub async fn index_with_cancel(&self, cancel: &CancellationToken) -> SemangoResult<IndexReport> {
        let crawler = Crawler::new(
            &self.config.root,
            &self.config.files.include,
            &self.config.files.exclude,
        )?;
        let mut stream = crawler.spawn(cancel.clone());

        let mut report = IndexReport::default();
        while let Some(rel) = stream.paths.recv().await {
            if cancel.is_cancelled() {
                break;
            }
            match self.process_file(&rel).await {
                Ok(Some(stats)) => {
                    report.files_processed += 1;
                    report.reps_indexed += stats.reps;
                    report.vectors_indexed += stats.vectors;
                }
                Ok(None) => report.files_skipped += 1,
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "failed to process file");
                    report.files_failed += 1;
                }
            }
        }

        let _ = stream.handle.await;

        self.lexical.flush()?;
        self.vector.close()?;

        // A terminal crawler error outranks the per-file tally.
        if let Ok(err) = stream.error.try_recv() {
            return Err(err);
        }

        tracing::info!(
            files = report.files_processed,
            skipped = report.files_skipped,
            failed = report.files_failed,
            reps = report.reps_indexed,
            vectors = report.vectors_indexed,
            "indexing complete"
        );

        Ok(report)
    }

    /// Process one crawled file: load, embed, dual-write.
    ///
    /// Returns `Ok(None)` when no loader claims the file or the loader
    /// produced nothing.
    async fn process_file(&self, rel: &str) -> SemangoResult<Option<FileStats>> {
        let Some(loader) = self.registry.resolve(rel) else {
            tracing::debug!(path = rel, "no loader for extension, skipping");
            return Ok(None);
        };

        let abs = self.config.root.join(rel);
        let rel_owned = rel.to_string();
        let mut reps = tokio::task::spawn_blocking(move || loader.load(&rel_owned, &abs))
            .await
            .map_err(|e| SemangoError::Internal(format!("loader task: {e}")))??;
        if reps.is_empty() {
            return Ok(None);
        }

        // Embed every textual representation of the file before any
        // index write.
        let to_embed: Vec<usize> = reps
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.text.is_empty())
            .map(|(i, _)| i)
            .collect();
        if !to_embed.is_empty() {
            let texts: Vec<String> = to_embed.iter().map(|i| reps[*i].text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            for (slot, vector) in to_embed.into_iter().zip(vectors) {
                reps[slot].vector = Some(vector);
            }
        }

        let mut stats = FileStats::default();
        for rep in &reps {
            stats.reps += 1;
            if self.write_rep(rep) {
                stats.vectors += usize::from(rep.vector.is_some());
            }
        }
        tracing::debug!(path = rel, reps = stats.reps, vectors = stats.vectors, "file indexed");
        Ok(Some(stats))
    }

    /// Write one representation to both indexes, lexical first.
    ///
    /// Index failures are logged per write and do not abort the other
    /// write for the same representation. Returns whether the vector
    /// write (if due) succeeded.
    fn write_rep(&self, rep: &Representation) -> bool {
        let mut meta = rep.meta.clone();
        meta.insert(meta_keys::MODALITY.to_string(), rep.modality.as_str().to_string());

        if let Err(e) = self.lexical.index_document(&rep.id, &rep.text, &meta) {
            tracing::warn!(id = %rep.id, path = %rep.path, error = %e, "lexical write failed");
        }
        if let Some(vector) = &rep.vector {
            if let Err(e) = self.vector.upsert(&rep.id, vector) {
                tracing::warn!(id = %rep.id, path = %rep.path, error = %e, "vector write failed");
                return false;
            }
        }
        true
    }

    /// Execute a hybrid search.
    pub async fn search(&self, query: &str, top_k: usize) -> SemangoResult<Vec<SearchHit>> {
        self.searcher.search(query, top_k).await
    }

    /// Execute a hybrid search under a cancellation token.
    pub async fn search_with_cancel(
        &self,
        query: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> SemangoResult<Vec<SearchHit>> {
        self.searcher.search_with_cancel(query, top_k, cancel).await
    }

    /// Aggregate statistics over both indexes.
    pub fn stats(&self) -> SemangoResult<IndexStats> {
        Ok(IndexStats {
            total_documents: self.lexical.path_count(),
            total_chunks: self.lexical.doc_count(),
            index_size_bytes: self.lexical.size_bytes() + self.vector.size_bytes(),
        })
    }

    /// The engine's effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flush both indexes to disk.
    pub fn shutdown(&self) -> SemangoResult<()> {
        self.lexical.close()?;
        self.vector.close()?;
        tracing::info!("engine shut down");
        Ok(())
    }
}

/// Result of an ingestion run.
///
/// The run reports success even when individual files failed; failures
/// are tallied here and detailed in the logs.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    /// Files fully processed.
    pub files_processed: usize,
    /// Files with no loader or no indexable content.
    pub files_skipped: usize,
    /// Files that errored during load, embed, or write.
    pub files_failed: usize,
    /// Representations written to the lexical index.
    pub reps_indexed: usize,
    /// Representations written to the vector index.
    pub vectors_indexed: usize,
}

/// Per-file ingestion tally.
#[derive(Debug, Default)]
struct FileStats {
    reps: usize,
    vectors: usize,
}
