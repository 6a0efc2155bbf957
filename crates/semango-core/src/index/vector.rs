//! Flat vector index with inner-product scoring.
//!
//! Vectors are stored in one contiguous `f32` buffer and scanned
//! brute-force at query time. An id↔label layer on top makes upserts
//! addressable by chunk id: labels are dense `i64`s issued from 1, and
//! the `{chunk_id: label}` map is persisted as a JSON sidecar at
//! `<index_path>.ids` after every write, next to the binary index file
//! itself. Reopening resumes label issuance at `max(existing) + 1`.
//!
//! Upserts and the id map are guarded by one mutex; concurrent pipeline
//! writers serialize here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{SemangoError, SemangoResult};

/// Persisted form of the vector data.
#[derive(Debug, Serialize, Deserialize)]
struct VectorFile {
    dim: usize,
    labels: Vec<i64>,
    vectors: Vec<f32>,
}

#[derive(Debug, Default)]
struct VecState {
    labels: Vec<i64>,
    /// Row-major `len * dim` buffer; row `i` belongs to `labels[i]`.
    vectors: Vec<f32>,
    id_to_label: HashMap<String, i64>,
    label_to_id: HashMap<i64, String>,
    label_to_slot: HashMap<i64, usize>,
    next_label: i64,
}

/// Flat inner-product index keyed by chunk id.
#[derive(Debug)]
pub struct VectorIndex {
    path: PathBuf,
    ids_path: PathBuf,
    dim: usize,
    state: Mutex<VecState>,
}

impl VectorIndex {
    /// Open or create the index at `path` for `dim`-dimensional vectors.
    ///
    /// Fails when a persisted index disagrees with `dim`.
    pub fn open(path: &Path, dim: usize) -> SemangoResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let ids_path = sidecar_path(path);

        let mut state = VecState {
            next_label: 1,
            ..VecState::default()
        };

        if path.exists() {
            let bytes = std::fs::read(path)?;
            let file: VectorFile = bincode::deserialize(&bytes)
                .map_err(|e| SemangoError::index(format!("corrupt vector index: {e}")))?;
            if file.dim != dim {
                return Err(SemangoError::Dimension {
                    expected: dim,
                    actual: file.dim,
                });
            }
            for (slot, label) in file.labels.iter().enumerate() {
                state.label_to_slot.insert(*label, slot);
            }
            state.labels = file.labels;
            state.vectors = file.vectors;

            if ids_path.exists() {
                let raw = std::fs::read_to_string(&ids_path)?;
                let map: HashMap<String, i64> = serde_json::from_str(&raw)
                    .map_err(|e| SemangoError::index(format!("corrupt id map: {e}")))?;
                for (id, label) in &map {
                    state.label_to_id.insert(*label, id.clone());
                }
                state.id_to_label = map;
            }
            state.next_label = state.labels.iter().copied().max().unwrap_or(0) + 1;
        }

        tracing::debug!(
            path = %path.display(),
            vectors = state.labels.len(),
            next_label = state.next_label,
            "vector index open"
        );

        Ok(Self {
            path: path.to_path_buf(),
            ids_path,
            dim,
            state: Mutex::new(state),
        })
    }

    /// Insert or overwrite the vector for `id`.
    pub fn upsert(&self, id: &str, vector: &[f32]) -> SemangoResult<()> {
        if vector.len() != self.dim {
            return Err(SemangoError::Dimension {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        let mut state = self.state.lock();
        if let Some(label) = state.id_to_label.get(id).copied() {
            let slot = *state
                .label_to_slot
                .get(&label)
                .ok_or_else(|| SemangoError::index(format!("label {label} has no slot")))?;
            let start = slot * self.dim;
            state.vectors[start..start + self.dim].copy_from_slice(vector);
        } else {
            let label = state.next_label;
            state.next_label += 1;
            let slot = state.labels.len();
            state.labels.push(label);
            state.vectors.extend_from_slice(vector);
            state.label_to_slot.insert(label, slot);
            state.id_to_label.insert(id.to_string(), label);
            state.label_to_id.insert(label, id.to_string());
        }
        self.persist(&state)
    }

    /// Inner-product search. Returns `(id, score)` sorted descending,
    /// at most `k` entries.
    pub fn search(&self, query: &[f32], k: usize) -> SemangoResult<Vec<(String, f64)>> {
        if query.len() != self.dim {
            return Err(SemangoError::Dimension {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.lock();
        let mut scored: Vec<(i64, f32)> = state
            .labels
            .iter()
            .enumerate()
            .map(|(slot, label)| {
                let start = slot * self.dim;
                let row = &state.vectors[start..start + self.dim];
                let dot: f32 = row.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (*label, dot)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .filter_map(|(label, score)| {
                state
                    .label_to_id
                    .get(&label)
                    .map(|id| (id.clone(), f64::from(score)))
            })
            .collect())
    }

    /// Configured vector dimensionality.
    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.state.lock().labels.len()
    }

    /// Whether the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// On-disk size of the index and its sidecar in bytes.
    pub fn size_bytes(&self) -> u64 {
        let main = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let ids = std::fs::metadata(&self.ids_path).map(|m| m.len()).unwrap_or(0);
        main + ids
    }

    /// Persist and release the index.
    pub fn close(&self) -> SemangoResult<()> {
        let state = self.state.lock();
        self.persist(&state)
    }

    fn persist(&self, state: &VecState) -> SemangoResult<()> {
        let file = VectorFile {
            dim: self.dim,
            labels: state.labels.clone(),
            vectors: state.vectors.clone(),
        };
        let bytes =
            bincode::serialize(&file).map_err(|e| SemangoError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, bytes)?;

        let ids = serde_json::to_string(&state.id_to_label)
            .map_err(|e| SemangoError::Serialization(e.to_string()))?;
        std::fs::write(&self.ids_path, ids)?;
        Ok(())
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".ids");
    PathBuf::from(os)
}

/// Normalize `v` to unit L2 length in place. Zero vectors are left as-is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
