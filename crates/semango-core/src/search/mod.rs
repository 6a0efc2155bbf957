//! Hybrid search.
//!
//! A query fans out to both indexes in parallel: the lexical side runs
//! BM25 over the analyzed query, the semantic side embeds the query and
//! scans the vector index. The two ranked lists are fused into one by
//! either Reciprocal Rank Fusion or a weighted linear combination over
//! normalized scores.
//!
//! Normalization: BM25 is unbounded, so raw lexical scores go through
//! the order-preserving squash `x / (x + 1)` into `[0, 1)`. Inner
//! products of unit vectors already live in `[-1, 1]` and are used
//! as-is. The same squash must be applied to both fusion inputs of the
//! linear mode for the weights to be meaningful.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{FusionKind, HybridConfig};
use crate::embedder::Embedder;
use crate::error::{SemangoError, SemangoResult};
use crate::index::{LexicalIndex, VectorIndex};
use crate::types::{meta_keys, Modality, SearchHit};

/// RRF rank constant.
const RRF_K: f64 = 60.0;

/// Hard ceiling on `top_k`.
const MAX_TOP_K: usize = 100;

/// `top_k` used when the caller passes 0.
const DEFAULT_TOP_K: usize = 10;

/// Hybrid query executor over the two indexes.
pub struct Searcher {
    lexical: Arc<LexicalIndex>,
    vector: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: HybridConfig,
}

impl Searcher {
    /// Wire a searcher over shared index handles and an embedder.
    pub fn new(
        lexical: Arc<LexicalIndex>,
        vector: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: HybridConfig,
    ) -> Self {
        Self {
            lexical,
            vector,
            embedder,
            config,
        }
    }

    /// Execute a hybrid query.
    pub async fn search(&self, query: &str, top_k: usize) -> SemangoResult<Vec<SearchHit>> {
        self.search_with_cancel(query, top_k, &CancellationToken::new())
            .await
    }

    /// Execute a hybrid query under a cancellation token.
    ///
    /// Cancellation before the response is assembled aborts both
    /// subqueries and returns [`SemangoError::Cancelled`]. Sub-query
    /// errors fail the whole search.
    pub async fn search_with_cancel(
        &self,
        query: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> SemangoResult<Vec<SearchHit>> {
        let top_k = clamp_top_k(top_k);
        let fetch = top_k * 2;

        // Fan out: BM25 on a blocking thread, embed + vector scan here.
        let lexical = self.lexical.clone();
        let owned_query = query.to_string();
        let lex_task =
            tokio::task::spawn_blocking(move || lexical.search_text(&owned_query, fetch));

        let sem_task = async {
            let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
            let query_vector = vectors
                .pop()
                .ok_or_else(|| SemangoError::embed("embedder returned no query vector"))?;
            self.vector.search(&query_vector, fetch)
        };

        let (lex_results, sem_results) = tokio::select! {
            _ = cancel.cancelled() => return Err(SemangoError::Cancelled),
            joined = async { tokio::join!(lex_task, sem_task) } => {
                let (lex, sem) = joined;
                let lex = lex
                    .map_err(|e| SemangoError::Internal(format!("lexical task: {e}")))??;
                (lex, sem?)
            }
        };

        if cancel.is_cancelled() {
            return Err(SemangoError::Cancelled);
        }

        // Merge: rank and raw-score maps per side, semantic deduped by id.
        let mut lex_rank: HashMap<&str, usize> = HashMap::new();
        let mut lex_score: HashMap<&str, f64> = HashMap::new();
        for (position, (id, score)) in lex_results.iter().enumerate() {
            lex_rank.insert(id.as_str(), position + 1);
            lex_score.insert(id.as_str(), *score);
        }

        let mut sem_rank: HashMap<&str, usize> = HashMap::new();
        let mut sem_score: HashMap<&str, f64> = HashMap::new();
        for (id, score) in &sem_results {
            if sem_rank.contains_key(id.as_str()) {
                continue;
            }
            let next_rank = sem_rank.len() + 1;
            sem_rank.insert(id.as_str(), next_rank);
            sem_score.insert(id.as_str(), *score);
        }

        let mut union: Vec<&str> = lex_rank
            .keys()
            .chain(sem_rank.keys())
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        union.sort_unstable();

        // Fetch stored payloads first; an id the lexical index cannot
        // produce indicates index drift and drops out before ranking.
        let mut fused: Vec<(String, f64, crate::index::lexical::StoredDoc)> =
            Vec::with_capacity(union.len());
        for id in union {
            let Some(doc) = self.lexical.get_document(id) else {
                tracing::warn!(id = %id, "semantic hit missing from lexical index, skipping");
                continue;
            };
            let lex = lex_rank.get(id).map(|r| (*r, lex_score[id]));
            let sem = sem_rank.get(id).map(|r| (*r, sem_score[id]));
            let score = fused_score(&self.config, lex, sem);
            fused.push((id.to_string(), score, doc));
        }
        fused.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        fused.truncate(top_k);

        if cancel.is_cancelled() {
            return Err(SemangoError::Cancelled);
        }

        let mut hits = Vec::with_capacity(fused.len());
        for (id, score, doc) in fused {
            let in_lexical = lex_rank.contains_key(id.as_str());
            let highlights = if in_lexical {
                find_highlights(&doc.text, query)
            } else {
                Vec::new()
            };
            let modality = doc
                .meta
                .get(meta_keys::MODALITY)
                .map(|s| Modality::from_str_lossy(s))
                .unwrap_or(Modality::Text);
            let path = doc
                .meta
                .get(meta_keys::PATH)
                .cloned()
                .unwrap_or_default();
            hits.push(SearchHit {
                rank: hits.len() + 1,
                score,
                lexical_score: lex_score.get(id.as_str()).copied().unwrap_or(0.0),
                semantic_score: sem_score.get(id.as_str()).copied().unwrap_or(0.0),
                modality,
                path,
                text: doc.text,
                meta: doc.meta,
                highlights,
            });
        }

        Ok(hits)
    }
}

/// Clamp `top_k` into `[1, 100]`, with 0 meaning the default of 10.
fn clamp_top_k(top_k: usize) -> usize {
    if top_k == 0 {
        DEFAULT_TOP_K
    } else {
        top_k.min(MAX_TOP_K)
    }
}

/// Squash an unbounded non-negative score into `[0, 1)`, monotonically.
fn squash(score: f64) -> f64 {
    score / (score + 1.0)
}

/// Compute the fused score of one id from its per-side `(rank, raw)`
/// observations. A side the id missed contributes nothing.
fn fused_score(
    config: &HybridConfig,
    lex: Option<(usize, f64)>,
    sem: Option<(usize, f64)>,
) -> f64 {
    match config.fusion {
        FusionKind::Linear => {
            let norm_lex = lex.map_or(0.0, |(_, raw)| squash(raw));
            let norm_sem = sem.map_or(0.0, |(_, raw)| raw);
            config.lexical_weight * norm_lex + config.vector_weight * norm_sem
        }
        FusionKind::Rrf => {
            #[allow(clippy::cast_precision_loss)]
            let side = |entry: Option<(usize, f64)>, weight: f64| {
                entry.map_or(0.0, |(rank, _)| weight / (RRF_K + rank as f64))
            };
            side(lex, config.lexical_weight) + side(sem, config.vector_weight)
        }
    }
}

/// Char offsets of non-overlapping case-insensitive exact matches of
/// `query` in `text`.
fn find_highlights(text: &str, query: &str) -> Vec<(usize, usize)> {
    let text_chars: Vec<char> = text.chars().collect();
    let query_chars: Vec<char> = query.chars().collect();
    if query_chars.is_empty() || query_chars.len() > text_chars.len() {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut start = 0;
    while start + query_chars.len() <= text_chars.len() {
        let matched = text_chars[start..start + query_chars.len()]
            .iter()
            .zip(query_chars.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b));
        if matched {
            spans.push((start, start + query_chars.len()));
            start += query_chars.len();
        } else {
            start += 1;
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    fn linear_config(lexical_weight: f64, vector_weight: f64) -> HybridConfig {
        HybridConfig {
            vector_weight,
            lexical_weight,
            fusion: FusionKind::Linear,
            reranker: None,
        }
    }

    fn rrf_config(lexical_weight: f64, vector_weight: f64) -> HybridConfig {
        HybridConfig {
            vector_weight,
            lexical_weight,
            fusion: FusionKind::Rrf,
            reranker: None,
        }
    }

    #[test]
    fn test_clamp_top_k() {
        assert_eq!(clamp_top_k(0), 10);
        assert_eq!(clamp_top_k(1), 1);
        assert_eq!(clamp_top_k(50), 50);
        assert_eq!(clamp_top_k(500), 100);
    }

    #[test]
    fn test_squash_is_monotone_into_unit_interval() {
        assert!((squash(3.0) - 0.75).abs() < 1e-12);
        assert_eq!(squash(0.0), 0.0);
        assert!(squash(10.0) < 1.0);
        assert!(squash(2.0) < squash(3.0));
    }

    #[test]
    fn test_linear_fusion_literal_example() {
        // Raw lex: A=3.0, B=absent. Raw sem: A=0.1, B=0.9.
        // w_lex=0.3, w_sem=0.7: A scores 0.295, B scores 0.63.
        let config = linear_config(0.3, 0.7);
        let a = fused_score(&config, Some((1, 3.0)), Some((2, 0.1)));
        let b = fused_score(&config, None, Some((1, 0.9)));
        assert!((a - 0.295).abs() < 1e-12, "a = {a}");
        assert!((b - 0.63).abs() < 1e-12, "b = {b}");
        assert!(b > a);
    }

    #[test]
    fn test_rrf_fusion_literal_example() {
        // Lex rank: A=1, B=absent. Sem rank: A=2, B=1. Equal weights 0.5.
        let config = rrf_config(0.5, 0.5);
        let a = fused_score(&config, Some((1, 3.0)), Some((2, 0.1)));
        let b = fused_score(&config, None, Some((1, 0.9)));
        let expected_a = 0.5 / 61.0 + 0.5 / 62.0;
        let expected_b = 0.5 / 61.0;
        assert!((a - expected_a).abs() < 1e-12);
        assert!((b - expected_b).abs() < 1e-12);
        assert!(a > b);
    }

    #[test]
    fn test_linear_lexical_only_weights_preserve_lexical_order() {
        let config = linear_config(1.0, 0.0);
        let first = fused_score(&config, Some((1, 5.0)), Some((9, 0.99)));
        let second = fused_score(&config, Some((2, 2.0)), Some((1, 0.01)));
        assert!(first > second);
    }

    #[test]
    fn test_find_highlights_case_insensitive() {
        let spans = find_highlights("Hello world, hello again", "hello");
        assert_eq!(spans, vec![(0, 5), (13, 18)]);
    }

    #[test]
    fn test_find_highlights_empty_and_missing() {
        assert!(find_highlights("abc", "").is_empty());
        assert!(find_highlights("abc", "zzzz").is_empty());
    }

    // -- end-to-end over in-memory indexes ---------------------------------

    struct KeywordEmbedder;

    /// Maps any text to a 2-D unit vector: axis 0 if it mentions "cat",
    /// axis 1 otherwise. Deterministic and dependency-free.
    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> SemangoResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("cat") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn meta_for(path: &str) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::new();
        meta.insert(meta_keys::PATH.to_string(), path.to_string());
        meta.insert(meta_keys::MODALITY.to_string(), "text".to_string());
        meta
    }

    fn build_searcher(config: HybridConfig) -> (tempfile::TempDir, Searcher) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let lexical =
            Arc::new(LexicalIndex::open(&dir.path().join("lex"), 1.2, 0.75).expect("lexical"));
        let vector =
            Arc::new(VectorIndex::open(&dir.path().join("vec.index"), 2).expect("vector"));

        lexical
            .index_document("id-cat", "the cat sat on the mat", &meta_for("cat.txt"))
            .expect("index");
        lexical
            .index_document("id-dog", "the dog slept in the sun", &meta_for("dog.txt"))
            .expect("index");
        vector.upsert("id-cat", &[1.0, 0.0]).expect("upsert");
        vector.upsert("id-dog", &[0.0, 1.0]).expect("upsert");

        let searcher = Searcher::new(lexical, vector, Arc::new(KeywordEmbedder), config);
        (dir, searcher)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hybrid_search_finds_both_sides() {
        let (_dir, searcher) = build_searcher(rrf_config(0.5, 0.5));
        let hits = searcher.search("cat", 10).await.expect("search");
        assert!(!hits.is_empty());
        assert_eq!(hits[0].path, "cat.txt");
        assert!(hits[0].lexical_score > 0.0);
        assert!(hits[0].semantic_score > 0.0);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[0].highlights, vec![(4, 7)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scores_sorted_non_increasing() {
        let (_dir, searcher) = build_searcher(rrf_config(0.5, 0.5));
        let hits = searcher.search("the cat and the dog", 10).await.expect("search");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_token_returns_cancelled() {
        let (_dir, searcher) = build_searcher(rrf_config(0.5, 0.5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = searcher
            .search_with_cancel("cat", 10, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SemangoError::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drifted_vector_id_is_skipped() {
        // A vector entry whose id the lexical index does not know must
        // be dropped with a warning, not crash or surface empty hits.
        let (_dir, searcher) = build_searcher(rrf_config(0.5, 0.5));
        searcher
            .vector
            .upsert("id-ghost", &[0.7, 0.7])
            .expect("upsert");
        let hits = searcher.search("cat", 10).await.expect("search");
        assert!(hits.iter().all(|h| !h.path.is_empty()));
        assert!(hits.iter().all(|h| !h.text.is_empty()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_semantic_only_hit_has_no_highlights() {
        // Query that matches nothing lexically still surfaces the
        // nearest vector, with empty highlights.
        let (_dir, searcher) = build_searcher(rrf_config(0.5, 0.5));
        let hits = searcher.search("feline", 10).await.expect("search");
        let semantic_only: Vec<_> = hits.iter().filter(|h| h.lexical_score == 0.0).collect();
        assert!(!semantic_only.is_empty());
        assert!(semantic_only.iter().all(|h| h.highlights.is_empty()));
    }
}
