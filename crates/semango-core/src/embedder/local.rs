//! Local ONNX embedding backend.
//!
//! Runs embedding inference on this machine with `ort`. No network calls
//! during inference, no API key. Model files are resolved from an
//! explicit path, the cache directory, or downloaded from HuggingFace on
//! first use and cached permanently.
//!
//! The tokenizer file carries the model's special tokens, so encoding
//! with special tokens enabled prepends `[CLS]` and appends `[SEP]`.
//! Sequences are truncated or padded to `max_length`. Pooling follows
//! the model's pooling config (`cls` / `mean` / `max`); the result is
//! L2-normalized so inner product equals cosine similarity.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ort::session::Session;

use crate::config::EmbeddingConfig;
use crate::embedder::{check_batch, Embedder};
use crate::error::{SemangoError, SemangoResult};
use crate::index::vector::l2_normalize;

/// Skip model downloads (CI, tests, offline environments).
const SKIP_DOWNLOAD_ENV: &str = "SEMANGO_SKIP_MODEL_DOWNLOAD";

/// How the token-level hidden states collapse into one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    /// Take the hidden state of the first (`[CLS]`) token.
    Cls,
    /// Attention-mask-weighted mean over token positions.
    Mean,
    /// Elementwise max over unmasked token positions.
    Max,
}

impl PoolingMode {
    /// Read the pooling mode from a sentence-transformers style pooling
    /// config. Missing or unreadable config defaults to mean pooling.
    fn from_config_file(path: &Path) -> Self {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Self::Mean;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            return Self::Mean;
        };
        let flag = |key: &str| value.get(key).and_then(serde_json::Value::as_bool) == Some(true);
        if flag("pooling_mode_cls_token") {
            Self::Cls
        } else if flag("pooling_mode_max_tokens") {
            Self::Max
        } else {
            Self::Mean
        }
    }
}

/// Embedder backed by a local ONNX model.
#[derive(Debug)]
pub struct LocalEmbedder {
    /// `Session::run` needs `&mut self`, so the session sits in a mutex.
    session: std::sync::Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
    pooling: PoolingMode,
    dimensions: usize,
    max_length: usize,
    batch_size: usize,
}

impl LocalEmbedder {
    /// Load (downloading if necessary) the configured model.
    pub fn new(config: &EmbeddingConfig) -> SemangoResult<Self> {
        let model_dir = resolve_model_dir(config)?;
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(SemangoError::embed(format!(
                "model files missing under {} (set embedding.local_model_path or allow download)",
                model_dir.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| SemangoError::embed(format!("ONNX session builder: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| SemangoError::embed(format!("load {}: {e}", model_path.display())))?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| SemangoError::embed(format!("load tokenizer: {e}")))?;

        let pooling = PoolingMode::from_config_file(&model_dir.join("1_Pooling").join("config.json"));

        tracing::info!(
            model = %model_path.display(),
            pooling = ?pooling,
            dimensions = config.dimensions,
            "loaded local embedding model"
        );

        Ok(Self {
            session: std::sync::Mutex::new(session),
            tokenizer,
            pooling,
            dimensions: config.dimensions,
            max_length: config.max_length,
            batch_size: config.batch_size,
        })
    }

    fn embed_sync(&self, texts: &[String]) -> SemangoResult<Vec<Vec<f32>>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| SemangoError::Internal("embedding session poisoned".into()))?;

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.run_inference(&mut session, batch)?;
            all.extend(vectors);
        }
        check_batch(&all, texts.len(), self.dimensions)?;
        Ok(all)
    }

    /// Run ONNX inference on one batch.
    fn run_inference(&self, session: &mut Session, texts: &[String]) -> SemangoResult<Vec<Vec<f32>>> {
        let batch_size = texts.len();
        let max_len = self.max_length;

        let (input_ids, attention_mask, token_type_ids) = self.tokenize_batch(texts, max_len)?;

        let shape = vec![batch_size as i64, max_len as i64];
        let ids_value = ort::value::Tensor::from_array((shape.clone(), input_ids))
            .map_err(|e| SemangoError::embed(format!("ONNX tensor: {e}")))?;
        let mask_value = ort::value::Tensor::from_array((shape.clone(), attention_mask.clone()))
            .map_err(|e| SemangoError::embed(format!("ONNX tensor: {e}")))?;

        use std::borrow::Cow;
        let mut inputs: Vec<(Cow<'_, str>, ort::session::SessionInputValue<'_>)> = vec![
            (Cow::Borrowed("input_ids"), ort::session::SessionInputValue::from(ids_value)),
            (Cow::Borrowed("attention_mask"), ort::session::SessionInputValue::from(mask_value)),
        ];

        // Only pass token_type_ids when the model declares the input.
        let expects_token_type = session.inputs().iter().any(|i| i.name() == "token_type_ids");
        if expects_token_type {
            let type_value = ort::value::Tensor::from_array((shape.clone(), token_type_ids))
                .map_err(|e| SemangoError::embed(format!("ONNX tensor (token_type_ids): {e}")))?;
            inputs.push((
                Cow::Borrowed("token_type_ids"),
                ort::session::SessionInputValue::from(type_value),
            ));
        }

        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or_else(|| SemangoError::embed("model has no outputs"))?;

        let outputs = session
            .run(inputs)
            .map_err(|e| SemangoError::embed(format!("ONNX inference: {e}")))?;

        let output_value = outputs
            .get(&output_name)
            .ok_or_else(|| SemangoError::embed("no output tensor found"))?;
        let (output_shape, output_data) = output_value
            .try_extract_tensor::<f32>()
            .map_err(|e| SemangoError::embed(format!("output extraction: {e}")))?;

        let dims: Vec<usize> = output_shape.iter().map(|&d| d as usize).collect();
        let mut embeddings = Vec::with_capacity(batch_size);

        if dims.len() == 3 {
            // [batch, seq_len, hidden_dim] -> pool per configured mode.
            let seq_len = dims[1];
            let hidden_dim = dims[2];
            if hidden_dim != self.dimensions {
                return Err(SemangoError::Dimension {
                    expected: self.dimensions,
                    actual: hidden_dim,
                });
            }

            for b in 0..batch_size {
                let token_at = |s: usize| {
                    let offset = b * seq_len * hidden_dim + s * hidden_dim;
                    &output_data[offset..offset + hidden_dim]
                };
                let mut pooled = match self.pooling {
                    PoolingMode::Cls => token_at(0).to_vec(),
                    PoolingMode::Mean => {
                        let mut acc = vec![0.0f32; hidden_dim];
                        let mut mask_sum = 0.0f32;
                        for s in 0..seq_len {
                            let mask_val = attention_mask[b * max_len + s] as f32;
                            if mask_val == 0.0 {
                                continue;
                            }
                            mask_sum += mask_val;
                            for (d, value) in token_at(s).iter().enumerate() {
                                acc[d] += value * mask_val;
                            }
                        }
                        if mask_sum > 0.0 {
                            for d in &mut acc {
                                *d /= mask_sum;
                            }
                        }
                        acc
                    }
                    PoolingMode::Max => {
                        let mut acc = vec![f32::MIN; hidden_dim];
                        let mut any = false;
                        for s in 0..seq_len {
                            if attention_mask[b * max_len + s] == 0 {
                                continue;
                            }
                            any = true;
                            for (d, value) in token_at(s).iter().enumerate() {
                                acc[d] = acc[d].max(*value);
                            }
                        }
                        if !any {
                            acc.fill(0.0);
                        }
                        acc
                    }
                };
                l2_normalize(&mut pooled);
                embeddings.push(pooled);
            }
        } else if dims.len() == 2 {
            // [batch, hidden_dim] -> already pooled by the model.
            let hidden_dim = dims[1];
            if hidden_dim != self.dimensions {
                return Err(SemangoError::Dimension {
                    expected: self.dimensions,
                    actual: hidden_dim,
                });
            }
            for b in 0..batch_size {
                let offset = b * hidden_dim;
                let mut vec = output_data[offset..offset + hidden_dim].to_vec();
                l2_normalize(&mut vec);
                embeddings.push(vec);
            }
        } else {
            return Err(SemangoError::embed(format!(
                "unexpected output tensor shape: {dims:?}"
            )));
        }

        Ok(embeddings)
    }

    /// Tokenize one batch with special tokens, truncation, and padding.
    fn tokenize_batch(
        &self,
        texts: &[String],
        max_len: usize,
    ) -> SemangoResult<(Vec<i64>, Vec<i64>, Vec<i64>)> {
        let mut all_input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut all_attention_mask = Vec::with_capacity(texts.len() * max_len);
        let mut all_token_type_ids = Vec::with_capacity(texts.len() * max_len);

        for text in texts {
            let encoding = self
                .tokenizer
                .encode(text.as_str(), true)
                .map_err(|e| SemangoError::embed(format!("tokenization: {e}")))?;

            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let type_ids = encoding.get_type_ids();

            let actual_len = ids.len().min(max_len);
            for i in 0..actual_len {
                all_input_ids.push(i64::from(ids[i]));
                all_attention_mask.push(i64::from(mask[i]));
                all_token_type_ids.push(i64::from(type_ids[i]));
            }
            for _ in actual_len..max_len {
                all_input_ids.push(0);
                all_attention_mask.push(0);
                all_token_type_ids.push(0);
            }
        }

        Ok((all_input_ids, all_attention_mask, all_token_type_ids))
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> SemangoResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        // ONNX inference is CPU-bound; keep it off the async workers.
        tokio::task::block_in_place(|| self.embed_sync(texts))
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// Model resolution and download
// ---------------------------------------------------------------------------

/// Resolve the directory holding `model.onnx` and `tokenizer.json`.
///
/// Order: explicit `local_model_path`; cached copy under
/// `model_cache_dir` (default `<data_local_dir>/semango/models/<model>`);
/// otherwise download from HuggingFace unless downloads are disabled.
fn resolve_model_dir(config: &EmbeddingConfig) -> SemangoResult<PathBuf> {
    if let Some(path) = &config.local_model_path {
        return Ok(path.clone());
    }

    let cache_base = config.model_cache_dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("semango")
            .join("models")
    });
    // HF model ids contain a slash; flatten for the directory name.
    let model_dir = cache_base.join(config.model.replace('/', "--"));

    if model_ready(&model_dir) {
        return Ok(model_dir);
    }
    if std::env::var(SKIP_DOWNLOAD_ENV).is_ok() {
        tracing::info!("{SKIP_DOWNLOAD_ENV} set, not downloading embedding model");
        return Ok(model_dir);
    }

    download_model(&config.model, &model_dir)?;
    Ok(model_dir)
}

fn model_ready(dir: &Path) -> bool {
    let model = dir.join("model.onnx");
    let tokenizer = dir.join("tokenizer.json");
    if !model.exists() || !tokenizer.exists() {
        return false;
    }
    // A tiny model file is a leftover partial download.
    std::fs::metadata(&model).map(|m| m.len() >= 1_000_000).unwrap_or(false)
}

fn download_model(model: &str, dir: &Path) -> SemangoResult<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::create_dir_all(dir.join("1_Pooling"))?;

    let base = format!("https://huggingface.co/{model}/resolve/main");
    tracing::info!(model, dir = %dir.display(), "downloading embedding model (first-time setup)");

    download_file(
        &format!("{base}/onnx/model.onnx"),
        &dir.join("model.onnx"),
        &format!("Downloading {model} model"),
    )?;
    download_file(
        &format!("{base}/tokenizer.json"),
        &dir.join("tokenizer.json"),
        &format!("Downloading {model} tokenizer"),
    )?;
    // Pooling config is optional; models without one pool by mean.
    if let Err(e) = download_file(
        &format!("{base}/1_Pooling/config.json"),
        &dir.join("1_Pooling").join("config.json"),
        &format!("Downloading {model} pooling config"),
    ) {
        tracing::debug!(error = %e, "no pooling config published, defaulting to mean");
    }

    Ok(())
}

/// Download a file to `dest` with a progress bar, via temp-file + rename
/// so partial downloads never look complete.
fn download_file(url: &str, dest: &Path, message: &str) -> SemangoResult<()> {
    let temp_path = dest.with_extension("downloading");

    let response = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(600))
        .build()?
        .get(url)
        .send()?;

    if !response.status().is_success() {
        return Err(SemangoError::embed(format!(
            "download failed: HTTP {} from {url}",
            response.status()
        )));
    }

    let total_size = response.content_length().unwrap_or(0);
    let pb = if total_size > 0 {
        let pb = indicatif::ProgressBar::new(total_size);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{msg}\n  [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message(message.to_string());
        pb
    } else {
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_message(message.to_string());
        pb
    };

    let mut file = std::fs::File::create(&temp_path)?;
    let bytes = response.bytes()?;
    let mut downloaded = 0u64;
    for chunk in bytes.chunks(8192) {
        file.write_all(chunk)?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }
    file.flush()?;
    drop(file);
    pb.finish_with_message(format!("{message} -- done"));

    std::fs::rename(&temp_path, dest)?;
    Ok(())
}
