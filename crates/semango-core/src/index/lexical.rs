//! Lexical inverted index with BM25 scoring.
//!
//! Documents are analyzed into lowercase alphanumeric terms; queries go
//! through the same analyzer, so a match means the same term survived
//! both sides. Scoring is BM25 with the `k1`/`b` parameters taken from
//! configuration rather than hard-coded library constants.
//!
//! `index_document` is an upsert on the chunk id: writing the same id
//! twice leaves the index indistinguishable from writing it once.
//! Writers are serialized by an internal mutex. The whole state persists
//! as a single binary file inside the index directory; `flush` writes
//! it, `close` flushes and drops the handle.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{SemangoError, SemangoResult};

const STATE_FILE: &str = "lexical.bin";

/// Stored fields of an indexed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDoc {
    /// The analyzed (and stored) chunk text.
    pub text: String,
    /// Stored metadata entries.
    pub meta: BTreeMap<String, String>,
    /// Token count of `text` under the index analyzer.
    token_count: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LexState {
    docs: HashMap<String, StoredDoc>,
    /// term -> (doc id -> term frequency)
    postings: HashMap<String, HashMap<String, u32>>,
    total_tokens: u64,
}

/// BM25-scored inverted full-text index, keyed by chunk id.
pub struct LexicalIndex {
    dir: PathBuf,
    k1: f64,
    b: f64,
    state: Mutex<LexState>,
    dirty: Mutex<bool>,
}

impl LexicalIndex {
    /// Open or create an index in `dir` with the given BM25 parameters.
    pub fn open(dir: &Path, k1: f64, b: f64) -> SemangoResult<Self> {
        std::fs::create_dir_all(dir)?;
        let state_path = dir.join(STATE_FILE);
        let state = if state_path.exists() {
            let bytes = std::fs::read(&state_path)?;
            bincode::deserialize(&bytes)
                .map_err(|e| SemangoError::index(format!("corrupt lexical state: {e}")))?
        } else {
            LexState::default()
        };
        tracing::debug!(dir = %dir.display(), docs = state.docs.len(), "lexical index open");
        Ok(Self {
            dir: dir.to_path_buf(),
            k1,
            b,
            state: Mutex::new(state),
            dirty: Mutex::new(false),
        })
    }

    /// Upsert a document under `id`.
    pub fn index_document(
        &self,
        id: &str,
        text: &str,
        meta: &BTreeMap<String, String>,
    ) -> SemangoResult<()> {
        let terms = analyze(text);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for term in &terms {
            *counts.entry(term.clone()).or_insert(0) += 1;
        }

        let mut state = self.state.lock();
        if let Some(old) = state.docs.remove(id) {
            Self::remove_postings(&mut state, id, &old.text);
            state.total_tokens = state.total_tokens.saturating_sub(u64::from(old.token_count));
        }

        for (term, tf) in counts {
            state.postings.entry(term).or_default().insert(id.to_string(), tf);
        }
        #[allow(clippy::cast_possible_truncation)]
        let token_count = terms.len() as u32;
        state.total_tokens += u64::from(token_count);
        state.docs.insert(
            id.to_string(),
            StoredDoc {
                text: text.to_string(),
                meta: meta.clone(),
                token_count,
            },
        );
        drop(state);
        *self.dirty.lock() = true;
        Ok(())
    }

    fn remove_postings(state: &mut LexState, id: &str, old_text: &str) {
        let mut seen = HashSet::new();
        for term in analyze(old_text) {
            if !seen.insert(term.clone()) {
                continue;
            }
            if let Some(docs) = state.postings.get_mut(&term) {
                docs.remove(id);
                if docs.is_empty() {
                    state.postings.remove(&term);
                }
            }
        }
    }

    /// BM25 search. Returns `(id, score)` pairs sorted by score
    /// descending, at most `k` of them.
    pub fn search_text(&self, query: &str, k: usize) -> SemangoResult<Vec<(String, f64)>> {
        let terms = analyze(query);
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.lock();
        let doc_count = state.docs.len();
        if doc_count == 0 {
            return Ok(Vec::new());
        }
        #[allow(clippy::cast_precision_loss)]
        let n = doc_count as f64;
        #[allow(clippy::cast_precision_loss)]
        let avg_len = (state.total_tokens as f64 / n).max(1.0);

        let mut query_terms: HashSet<&str> = HashSet::new();
        let mut scores: HashMap<&str, f64> = HashMap::new();
        for term in &terms {
            if !query_terms.insert(term.as_str()) {
                continue;
            }
            let Some(doc_tfs) = state.postings.get(term.as_str()) else {
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            let df = doc_tfs.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (id, tf) in doc_tfs {
                let Some(doc) = state.docs.get(id) else {
                    continue;
                };
                let tf = f64::from(*tf);
                let dl = f64::from(doc.token_count);
                let denom = tf + self.k1 * (1.0 - self.b + self.b * dl / avg_len);
                *scores.entry(id.as_str()).or_insert(0.0) += idf * tf * (self.k1 + 1.0) / denom;
            }
        }

        let mut results: Vec<(String, f64)> = scores
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect();
        // Tie-break on id so equal scores rank deterministically.
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(k);
        Ok(results)
    }

    /// Fetch the stored fields for `id`.
    pub fn get_document(&self, id: &str) -> Option<StoredDoc> {
        self.state.lock().docs.get(id).cloned()
    }

    /// Number of indexed documents.
    pub fn doc_count(&self) -> usize {
        self.state.lock().docs.len()
    }

    /// Number of distinct source paths across indexed documents.
    pub fn path_count(&self) -> usize {
        let state = self.state.lock();
        state
            .docs
            .values()
            .filter_map(|d| d.meta.get(crate::types::meta_keys::PATH))
            .collect::<HashSet<_>>()
            .len()
    }

    /// On-disk size of the index in bytes.
    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(self.dir.join(STATE_FILE))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Persist the index if it changed since the last flush.
    pub fn flush(&self) -> SemangoResult<()> {
        let mut dirty = self.dirty.lock();
        if !*dirty {
            return Ok(());
        }
        let state = self.state.lock();
        let bytes = bincode::serialize(&*state)
            .map_err(|e| SemangoError::Serialization(e.to_string()))?;
        drop(state);
        let path = self.dir.join(STATE_FILE);
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        *dirty = false;
        Ok(())
    }

    /// Flush and release the index.
    pub fn close(&self) -> SemangoResult<()> {
        self.flush()
    }
}

/// Analyzer shared by documents and queries: lowercase terms split on
/// anything that is not alphanumeric.
fn analyze(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
