//! Nearest-neighbor index over reference artwork embeddings.
//!
//! An explicit handle owns the global catalog state; its lifecycle is tied
//! to process start/stop with an explicit rebuild on reindex, rather than a
//! module-level singleton. Reads run concurrently; writes are serialized
//! against in-flight searches so a query never sees a half-updated
//! neighbor set.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

/// The search structure is not yet built or has been corrupted. Fatal to
/// the current resolve call; no partial results are returned.
#[derive(Debug, Error)]
#[error("catalog index unavailable: {0}")]
pub struct IndexUnavailable(pub String);

/// One nearest-neighbor hit, highest similarity first.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub artwork_id: i64,
    pub similarity: f32,
}

struct IndexState {
    /// False until the first successful load; searching an unbuilt index is
    /// an error, searching an empty-but-built one is not.
    ready: bool,
    vectors: HashMap<i64, Vec<f32>>,
}

/// In-memory cosine-similarity index over the artwork catalog.
pub struct CatalogIndex {
    inner: RwLock<IndexState>,
}

impl CatalogIndex {
    /// A fresh, unbuilt handle. Call [`CatalogIndex::load`] (or
    /// `Matcher::rebuild_index`) before searching.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexState {
                ready: false,
                vectors: HashMap::new(),
            }),
        }
    }

    /// Replace the entire index contents and mark it ready.
    pub fn load(&self, entries: Vec<(i64, Vec<f32>)>) {
        let mut state = self.write_state();
        state.vectors = entries.into_iter().collect();
        state.ready = true;
        tracing::info!(artworks = state.vectors.len(), "Catalog index built");
    }

    /// Insert or replace one artwork's reference vector. Idempotent on
    /// re-insert of the same id.
    pub fn insert(&self, artwork_id: i64, vector: Vec<f32>) {
        let mut state = self.write_state();
        state.vectors.insert(artwork_id, vector);
    }

    /// Remove all traces of an artwork; subsequent searches never return it.
    pub fn remove(&self, artwork_id: i64) {
        let mut state = self.write_state();
        state.vectors.remove(&artwork_id);
    }

    pub fn len(&self) -> usize {
        self.read_state().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ready(&self) -> bool {
        self.read_state().ready
    }

    /// Top-k cosine-similarity search, highest similarity first. Exactly
    /// equal scores order by ascending artwork id, so results are stable
    /// across calls. An empty index returns an empty vec, never an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexUnavailable> {
        let state = self.read_state();
        if !state.ready {
            return Err(IndexUnavailable("index has not been built".to_string()));
        }
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = state
            .vectors
            .iter()
            .filter_map(|(&artwork_id, vector)| {
                if vector.len() != query.len() {
                    // Stored by an incompatible extractor version; comparing
                    // would produce a meaningless score.
                    tracing::warn!(
                        artwork_id,
                        stored_dim = vector.len(),
                        query_dim = query.len(),
                        "skipping embedding with mismatched dimensionality"
                    );
                    return None;
                }
                Some(SearchHit {
                    artwork_id,
                    similarity: cosine_similarity(query, vector),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.artwork_id.cmp(&b.artwork_id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, IndexState> {
        // A poisoned lock means a writer panicked mid-update; the map itself
        // is still a valid HashMap, so recover the guard.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, IndexState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CatalogIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}
