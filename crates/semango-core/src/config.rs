//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`SEMANGO_*`, plus the provider credential)
//! 2. Project config (`<root>/semango.toml`)
//! 3. Compiled-in defaults
//!
//! Every section rejects unknown fields; the CLI shell maps that failure
//! to its own exit code so typos in config files fail loudly instead of
//! being silently ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SemangoError, SemangoResult};

/// Top-level configuration for Semango.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root directory to crawl and index.
    #[serde(default = "Config::default_root")]
    pub root: PathBuf,

    /// Embedding provider configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Lexical (BM25) index configuration.
    #[serde(default)]
    pub lexical: LexicalConfig,

    /// Vector index configuration.
    #[serde(default)]
    pub vector: VectorConfig,

    /// Hybrid fusion configuration.
    #[serde(default)]
    pub hybrid: HybridConfig,

    /// File crawling and chunking configuration.
    #[serde(default)]
    pub files: FilesConfig,

    /// Tabular ingestion configuration.
    #[serde(default)]
    pub tabular: TabularConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Embedding
// ---------------------------------------------------------------------------

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible remote API (`/v1/embeddings`).
    Openai,
    /// Local ONNX model via `ort`.
    Local,
}

/// Embedding backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Backend selection.
    #[serde(default = "EmbeddingConfig::default_provider")]
    pub provider: EmbeddingProvider,

    /// Model name (remote) or model directory name (local).
    #[serde(default = "EmbeddingConfig::default_model")]
    pub model: String,

    /// Output embedding dimensions.
    #[serde(default = "EmbeddingConfig::default_dimensions")]
    pub dimensions: usize,

    /// Maximum texts per embedding batch.
    #[serde(default = "EmbeddingConfig::default_batch_size")]
    pub batch_size: usize,

    /// Maximum batches in flight simultaneously.
    #[serde(default = "EmbeddingConfig::default_concurrent")]
    pub concurrent: usize,

    /// Token-bucket rate limit in requests per second. 0 disables.
    #[serde(default = "EmbeddingConfig::default_qps")]
    pub qps: u32,

    /// Retries per batch on transient failures.
    #[serde(default = "EmbeddingConfig::default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds; attempt `n` waits `base * 2^(n-1)`.
    #[serde(default = "EmbeddingConfig::default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Base URL for the remote provider.
    #[serde(default = "EmbeddingConfig::default_api_base")]
    pub api_base: String,

    /// Maximum sequence length for the local tokenizer.
    #[serde(default = "EmbeddingConfig::default_max_length")]
    pub max_length: usize,

    /// Explicit path to a local model directory (overrides the cache).
    #[serde(default)]
    pub local_model_path: Option<PathBuf>,

    /// Cache directory for auto-downloaded local models.
    #[serde(default)]
    pub model_cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            model: Self::default_model(),
            dimensions: Self::default_dimensions(),
            batch_size: Self::default_batch_size(),
            concurrent: Self::default_concurrent(),
            qps: Self::default_qps(),
            max_retries: Self::default_max_retries(),
            retry_base_ms: Self::default_retry_base_ms(),
            api_base: Self::default_api_base(),
            max_length: Self::default_max_length(),
            local_model_path: None,
            model_cache_dir: None,
        }
    }
}

impl EmbeddingConfig {
    fn default_provider() -> EmbeddingProvider {
        EmbeddingProvider::Openai
    }
    fn default_model() -> String {
        "text-embedding-3-small".into()
    }
    fn default_dimensions() -> usize {
        1536
    }
    fn default_batch_size() -> usize {
        64
    }
    fn default_concurrent() -> usize {
        4
    }
    fn default_qps() -> u32 {
        8
    }
    fn default_max_retries() -> u32 {
        3
    }
    fn default_retry_base_ms() -> u64 {
        500
    }
    fn default_api_base() -> String {
        "https://api.openai.com/v1".into()
    }
    fn default_max_length() -> usize {
        512
    }
}

// ---------------------------------------------------------------------------
// Lexical index
// ---------------------------------------------------------------------------

/// Lexical (BM25) index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LexicalConfig {
    /// Directory holding the lexical index files.
    #[serde(default = "LexicalConfig::default_index_path")]
    pub index_path: PathBuf,

    /// BM25 term-frequency saturation parameter.
    #[serde(default = "LexicalConfig::default_bm25_k1")]
    pub bm25_k1: f64,

    /// BM25 length-normalization parameter.
    #[serde(default = "LexicalConfig::default_bm25_b")]
    pub bm25_b: f64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            index_path: Self::default_index_path(),
            bm25_k1: Self::default_bm25_k1(),
            bm25_b: Self::default_bm25_b(),
        }
    }
}

impl LexicalConfig {
    fn default_index_path() -> PathBuf {
        PathBuf::from("semango/index/lexical")
    }
    fn default_bm25_k1() -> f64 {
        1.2
    }
    fn default_bm25_b() -> f64 {
        0.75
    }
}

// ---------------------------------------------------------------------------
// Vector index
// ---------------------------------------------------------------------------

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorConfig {
    /// Path of the vector index file. The id map sidecar lives next to it
    /// at `<index_path>.ids`.
    #[serde(default = "VectorConfig::default_index_path")]
    pub index_path: PathBuf,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            index_path: Self::default_index_path(),
        }
    }
}

impl VectorConfig {
    fn default_index_path() -> PathBuf {
        PathBuf::from("semango/index/faiss.index")
    }
}

// ---------------------------------------------------------------------------
// Hybrid fusion
// ---------------------------------------------------------------------------

/// Fusion algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionKind {
    /// Weighted linear combination over normalized scores.
    Linear,
    /// Reciprocal Rank Fusion with constant k = 60.
    Rrf,
}

/// Hybrid search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HybridConfig {
    /// Weight of the semantic side.
    #[serde(default = "HybridConfig::default_vector_weight")]
    pub vector_weight: f64,

    /// Weight of the lexical side.
    #[serde(default = "HybridConfig::default_lexical_weight")]
    pub lexical_weight: f64,

    /// Fusion algorithm.
    #[serde(default = "HybridConfig::default_fusion")]
    pub fusion: FusionKind,

    /// Reranker model name. Declared for config compatibility; the core
    /// ranks with fusion only and ignores this.
    #[serde(default)]
    pub reranker: Option<String>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            vector_weight: Self::default_vector_weight(),
            lexical_weight: Self::default_lexical_weight(),
            fusion: Self::default_fusion(),
            reranker: None,
        }
    }
}

impl HybridConfig {
    fn default_vector_weight() -> f64 {
        0.7
    }
    fn default_lexical_weight() -> f64 {
        0.3
    }
    fn default_fusion() -> FusionKind {
        FusionKind::Rrf
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Crawling and text-chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesConfig {
    /// Include glob patterns. Empty means include everything.
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude glob patterns. A `/**` suffix prunes the whole subtree.
    #[serde(default = "FilesConfig::default_exclude")]
    pub exclude: Vec<String>,

    /// Target chunk size in characters.
    #[serde(default = "FilesConfig::default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    #[serde(default = "FilesConfig::default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Self::default_exclude(),
            chunk_size: Self::default_chunk_size(),
            chunk_overlap: Self::default_chunk_overlap(),
        }
    }
}

impl FilesConfig {
    fn default_exclude() -> Vec<String> {
        vec![
            ".git/**".into(),
            "node_modules/**".into(),
            "target/**".into(),
            "__pycache__/**".into(),
            ".venv/**".into(),
            "semango/**".into(),
        ]
    }
    fn default_chunk_size() -> usize {
        1000
    }
    fn default_chunk_overlap() -> usize {
        200
    }
}

// ---------------------------------------------------------------------------
// Tabular
// ---------------------------------------------------------------------------

/// Row sampling strategy when a source exceeds `max_rows_embedded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingKind {
    /// Uniform random sample.
    Random,
    /// Stratified step sample (every `n/max`-th row).
    Stratified,
}

/// Tabular ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TabularConfig {
    /// Maximum rows embedded per source.
    #[serde(default = "TabularConfig::default_max_rows_embedded")]
    pub max_rows_embedded: usize,

    /// Sampling strategy when the row count exceeds the cap.
    #[serde(default = "TabularConfig::default_sampling")]
    pub sampling: SamplingKind,

    /// Minimum whitespace tokens in a row's joined text; shorter rows
    /// are dropped.
    #[serde(default = "TabularConfig::default_min_text_tokens")]
    pub min_text_tokens: usize,

    /// Field delimiter for `.csv` sources (`.tsv` always uses tab).
    #[serde(default = "TabularConfig::default_delimiter")]
    pub delimiter: char,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            max_rows_embedded: Self::default_max_rows_embedded(),
            sampling: Self::default_sampling(),
            min_text_tokens: Self::default_min_text_tokens(),
            delimiter: Self::default_delimiter(),
        }
    }
}

impl TabularConfig {
    fn default_max_rows_embedded() -> usize {
        2000
    }
    fn default_sampling() -> SamplingKind {
        SamplingKind::Stratified
    }
    fn default_min_text_tokens() -> usize {
        3
    }
    fn default_delimiter() -> char {
        ','
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Whether to output logs as JSON.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    fn default_root() -> PathBuf {
        PathBuf::from(".")
    }

    /// Create a default configuration rooted at the given directory.
    pub fn defaults(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            embedding: EmbeddingConfig::default(),
            lexical: LexicalConfig::default(),
            vector: VectorConfig::default(),
            hybrid: HybridConfig::default(),
            files: FilesConfig::default(),
            tabular: TabularConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration for `root`: `<root>/semango.toml` if present,
    /// defaults otherwise, then environment overrides.
    pub fn load(root: &Path) -> SemangoResult<Self> {
        let config_path = root.join("semango.toml");
        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Self::defaults(root)
        };
        config.root = root.to_path_buf();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file. Unknown fields are a hard error.
    pub fn from_file(path: &Path) -> SemangoResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str::<Self>(&content).map_err(|e| {
            let details = format!("{} in {}", e.message(), path.display());
            if e.message().contains("unknown field") {
                SemangoError::ConfigUnknownField { details }
            } else {
                SemangoError::Config { details }
            }
        })
    }

    /// Apply environment variable overrides (`SEMANGO_*` prefix).
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SEMANGO_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(model) = std::env::var("SEMANGO_MODEL_PATH") {
            self.embedding.local_model_path = Some(PathBuf::from(model));
        }
        if let Ok(base) = std::env::var("SEMANGO_API_BASE") {
            self.embedding.api_base = base;
        }
    }

    /// Sanity-check cross-field constraints that serde cannot express.
    fn validate(&self) -> SemangoResult<()> {
        if self.files.chunk_overlap >= self.files.chunk_size {
            return Err(SemangoError::Config {
                details: format!(
                    "files.chunk_overlap ({}) must be smaller than files.chunk_size ({})",
                    self.files.chunk_overlap, self.files.chunk_size
                ),
            });
        }
        if self.embedding.dimensions == 0 {
            return Err(SemangoError::Config {
                details: "embedding.dimensions must be positive".into(),
            });
        }
        if self.embedding.batch_size == 0 || self.embedding.concurrent == 0 {
            return Err(SemangoError::Config {
                details: "embedding.batch_size and embedding.concurrent must be positive".into(),
            });
        }
        Ok(())
    }

    /// Absolute path of the lexical index directory.
    pub fn lexical_index_path(&self) -> PathBuf {
        self.root.join(&self.lexical.index_path)
    }

    /// Absolute path of the vector index file.
    pub fn vector_index_path(&self) -> PathBuf {
        self.root.join(&self.vector.index_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::defaults(Path::new("/tmp/corpus"));
        assert!(config.validate().is_ok());
        assert_eq!(config.files.chunk_size, 1000);
        assert_eq!(config.files.chunk_overlap, 200);
        assert_eq!(config.hybrid.fusion, FusionKind::Rrf);
        assert_eq!(config.tabular.sampling, SamplingKind::Stratified);
    }

    #[test]
    fn test_unknown_field_is_distinguished() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("semango.toml");
        std::fs::write(&path, "[hybrid]\nfusoin = \"rrf\"\n").expect("write");
        let err = Config::from_file(&path).unwrap_err();
        assert!(
            matches!(err, SemangoError::ConfigUnknownField { .. }),
            "got: {err:?}"
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("semango.toml");
        std::fs::write(
            &path,
            "[files]\nchunk_size = 500\n\n[hybrid]\nfusion = \"linear\"\n",
        )
        .expect("write");
        let config = Config::from_file(&path).expect("parse");
        assert_eq!(config.files.chunk_size, 500);
        assert_eq!(config.files.chunk_overlap, 200);
        assert_eq!(config.hybrid.fusion, FusionKind::Linear);
        assert_eq!(config.embedding.batch_size, 64);
    }

    #[test]
    fn test_overlap_larger_than_chunk_rejected() {
        let mut config = Config::defaults(Path::new("."));
        config.files.chunk_size = 100;
        config.files.chunk_overlap = 100;
        assert!(config.validate().is_err());
    }
}
