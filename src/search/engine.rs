//! Hybrid ranking engine: semantic, lexical, and fused search over the
//! listing store.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::thread::ScopedJoinHandle;

use serde::Serialize;

use super::embedding::{self, cosine_similarity, Embedder, SIMILARITY_THRESHOLD};
use super::error::SearchError;
use crate::core::listing::{Listing, SearchFilters};
use crate::store::ListingStore;

/// Weight of the semantic score in hybrid fusion.
pub const SEMANTIC_WEIGHT: f32 = 0.7;

/// Weight of the lexical score in hybrid fusion.
pub const LEXICAL_WEIGHT: f32 = 0.3;

/// Raw full-text relevance is divided by this and clamped to 1.0.
const TEXT_SCORE_SCALE: f32 = 10.0;

/// Similarity assigned to unscored lexical matches (empty-query scan).
const NEUTRAL_SIMILARITY: f32 = 0.5;

/// A listing with its ranking score in [0, 1]. Transient; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    pub listing: Listing,
    pub similarity: f32,
}

/// Ranking engine over a listing store and an embedding provider.
pub struct SearchEngine<'s> {
    store: &'s ListingStore,
    embedder: &'s dyn Embedder,
}

impl<'s> SearchEngine<'s> {
    /// Engine backed by the process-wide embedding provider.
    pub fn new(store: &'s ListingStore) -> Self {
        Self {
            store,
            embedder: embedding::global(),
        }
    }

    /// Engine with a caller-supplied embedding provider.
    pub fn with_embedder(store: &'s ListingStore, embedder: &'s dyn Embedder) -> Self {
        Self { store, embedder }
    }

    /// Rank listings by cosine similarity between the query embedding and
    /// each candidate's stored embedding. Only candidates carrying an
    /// embedding of the standard dimension enter the ranking; scores below
    /// the similarity floor are dropped. Fails with
    /// [`SearchError::Unavailable`] when the query cannot be embedded; the
    /// orchestrator owns the lexical fallback, so this is not caught here.
    pub fn semantic_search(
        &self,
        query: &str,
        category_id: Option<&str>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        let query_embedding = self.embedder.embed(query)?;
        let candidates = self.store.semantic_candidates(category_id, filters)?;

        let mut results = Vec::new();
        for listing in candidates {
            let Some(stored) = listing.embedding.as_deref() else {
                continue;
            };
            let similarity = cosine_similarity(&query_embedding, stored)?;
            if similarity >= SIMILARITY_THRESHOLD {
                results.push(SimilarityResult { listing, similarity });
            }
        }

        sort_ranked(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    /// Full-text ranking. Scored relevance is normalized into [0, 1] by a
    /// fixed scale; an empty query degrades to an unscored recency scan
    /// with a flat neutral score.
    pub fn lexical_search(
        &self,
        query: &str,
        category_id: Option<&str>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        let rows = self.store.text_search(query, category_id, filters, limit)?;

        let mut results: Vec<SimilarityResult> = rows
            .into_iter()
            .map(|(listing, relevance)| SimilarityResult {
                similarity: match relevance {
                    Some(score) => (score as f32 / TEXT_SCORE_SCALE).min(1.0),
                    None => NEUTRAL_SIMILARITY,
                },
                listing,
            })
            .collect();

        sort_ranked(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    /// The default search: semantic and lexical sub-searches run
    /// concurrently and are fused by listing identity. A semantic failure
    /// propagates (the orchestrator owns the fallback); a lexical failure
    /// degrades to an empty lexical contribution.
    pub fn hybrid_search(
        &self,
        query: &str,
        category_id: Option<&str>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        let (semantic, lexical) = std::thread::scope(|scope| {
            let semantic =
                scope.spawn(|| self.semantic_search(query, category_id, filters, limit));
            let lexical = scope.spawn(|| self.lexical_search(query, category_id, filters, limit));
            (join_sub_search(semantic), join_sub_search(lexical))
        });

        let semantic = semantic?;
        let lexical = lexical.unwrap_or_else(|e| {
            tracing::warn!("lexical sub-search failed, fusing semantic results only: {e}");
            Vec::new()
        });

        Ok(fuse(semantic, lexical, limit))
    }
}

fn join_sub_search(
    handle: ScopedJoinHandle<'_, Result<Vec<SimilarityResult>, SearchError>>,
) -> Result<Vec<SimilarityResult>, SearchError> {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Fuse semantic and lexical result sets by listing identity. A listing in
/// both sets combines the weighted scores, capped at 1.0; a listing in one
/// set keeps its single weighted contribution. Fused scores below the
/// similarity floor are dropped.
fn fuse(
    semantic: Vec<SimilarityResult>,
    lexical: Vec<SimilarityResult>,
    limit: usize,
) -> Vec<SimilarityResult> {
    let mut combined: HashMap<String, SimilarityResult> = HashMap::new();

    for result in semantic {
        let id = result.listing.id.clone();
        combined.insert(
            id,
            SimilarityResult {
                similarity: result.similarity * SEMANTIC_WEIGHT,
                listing: result.listing,
            },
        );
    }

    for result in lexical {
        let contribution = result.similarity * LEXICAL_WEIGHT;
        match combined.entry(result.listing.id.clone()) {
            Entry::Occupied(mut entry) => {
                let fused = entry.get_mut();
                fused.similarity = (fused.similarity + contribution).min(1.0);
            }
            Entry::Vacant(entry) => {
                entry.insert(SimilarityResult {
                    similarity: contribution,
                    listing: result.listing,
                });
            }
        }
    }

    let mut fused: Vec<SimilarityResult> = combined
        .into_values()
        .filter(|result| result.similarity >= SIMILARITY_THRESHOLD)
        .collect();
    sort_ranked(&mut fused);
    fused.truncate(limit);
    fused
}

/// Descending by score, newest-first on equal scores. Deterministic.
fn sort_ranked(results: &mut [SimilarityResult]) {
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.listing.created_at.cmp(&a.listing.created_at))
    });
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::DateTime;

    use super::*;
    use crate::core::listing::AttributeValue;
    use crate::search::embedding::{global, EMBEDDING_DIM};
    use crate::search::error::EmbeddingError;

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("model offline".to_string()))
        }
    }

    fn listing(id: &str, title: &str, created: i64) -> Listing {
        Listing {
            id: id.to_string(),
            title: title.to_string(),
            description: format!("{title} for sale"),
            price: 50.0,
            location: None,
            category_id: None,
            category: None,
            attributes: BTreeMap::new(),
            embedding: None,
            search_text: format!("{title} {title} for sale").to_lowercase(),
            created_at: DateTime::from_timestamp(created, 0).unwrap(),
            updated_at: DateTime::from_timestamp(created, 0).unwrap(),
        }
    }

    fn result(id: &str, similarity: f32, created: i64) -> SimilarityResult {
        SimilarityResult {
            listing: listing(id, "Item", created),
            similarity,
        }
    }

    /// Unit vector with a chosen cosine against a normalized base vector.
    fn vector_at_cosine(base: &[f32], target: f32) -> Vec<f32> {
        // Gram-Schmidt an axis against the base to get an orthogonal unit
        // vector, then mix.
        let axis_index = base
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        let mut axis = vec![0.0f32; base.len()];
        axis[axis_index] = 1.0;

        let dot: f32 = base.iter().zip(&axis).map(|(b, a)| b * a).sum();
        let mut orthogonal: Vec<f32> = axis
            .iter()
            .zip(base)
            .map(|(a, b)| a - dot * b)
            .collect();
        let norm: f32 = orthogonal.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut orthogonal {
            *x /= norm;
        }

        let sine = (1.0 - target * target).sqrt();
        base.iter()
            .zip(&orthogonal)
            .map(|(b, o)| target * b + sine * o)
            .collect()
    }

    fn seeded_store(query: &str) -> ListingStore {
        let store = ListingStore::open_in_memory().unwrap();
        let base = global().embed(query).unwrap();

        let mut exact = listing("exact", "Exact match", 100);
        exact.embedding = Some(base.clone());
        store.upsert_listing(&exact).unwrap();

        let mut close = listing("close", "Close match", 200);
        close.embedding = Some(vector_at_cosine(&base, 0.5));
        store.upsert_listing(&close).unwrap();

        let mut far = listing("far", "Far match", 300);
        far.embedding = Some(vector_at_cosine(&base, 0.05));
        store.upsert_listing(&far).unwrap();

        store.upsert_listing(&listing("bare", "No embedding", 400)).unwrap();

        store
    }

    #[test]
    fn test_semantic_search_scores_and_floor() {
        let query = "red mountain bicycle";
        let store = seeded_store(query);
        let engine = SearchEngine::new(&store);

        let results = engine
            .semantic_search(query, None, &SearchFilters::new(), 10)
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.listing.id.as_str()).collect();
        // "far" sits below the 0.2 floor, "bare" has no embedding.
        assert_eq!(ids, vec!["exact", "close"]);
        assert!((results[0].similarity - 1.0).abs() < 1e-3);
        assert!((results[1].similarity - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_semantic_search_respects_limit() {
        let query = "red mountain bicycle";
        let store = seeded_store(query);
        let engine = SearchEngine::new(&store);

        let results = engine
            .semantic_search(query, None, &SearchFilters::new(), 1)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].listing.id, "exact");
    }

    #[test]
    fn test_semantic_search_ties_break_by_recency() {
        let store = ListingStore::open_in_memory().unwrap();
        let base = global().embed("vintage lamp").unwrap();

        for (id, created) in [("older", 100), ("newer", 900), ("middle", 500)] {
            let mut l = listing(id, "Lamp", created);
            l.embedding = Some(base.clone());
            store.upsert_listing(&l).unwrap();
        }

        let engine = SearchEngine::new(&store);
        let results = engine
            .semantic_search("vintage lamp", None, &SearchFilters::new(), 10)
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.listing.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "middle", "older"]);
    }

    #[test]
    fn test_semantic_search_applies_attribute_filters() {
        let query = "espresso machine";
        let store = ListingStore::open_in_memory().unwrap();
        let base = global().embed(query).unwrap();

        for (id, brand) in [("a", "DeLonghi"), ("b", "Gaggia")] {
            let mut l = listing(id, "Espresso machine", 100);
            l.attributes.insert(
                "brand".to_string(),
                AttributeValue::String(brand.to_string()),
            );
            l.embedding = Some(base.clone());
            store.upsert_listing(&l).unwrap();
        }

        let mut filters = SearchFilters::new();
        filters.insert("brand".to_string(), vec!["Gaggia".to_string()]);

        let engine = SearchEngine::new(&store);
        let results = engine.semantic_search(query, None, &filters, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].listing.id, "b");
    }

    #[test]
    fn test_semantic_search_empty_query_is_unavailable() {
        let store = ListingStore::open_in_memory().unwrap();
        let engine = SearchEngine::new(&store);

        let err = engine
            .semantic_search("  ", None, &SearchFilters::new(), 10)
            .unwrap_err();
        assert!(matches!(err, SearchError::Unavailable(_)));
    }

    #[test]
    fn test_lexical_search_empty_query_is_neutral_recency_scan() {
        let store = ListingStore::open_in_memory().unwrap();
        store.upsert_listing(&listing("old", "Desk", 100)).unwrap();
        store.upsert_listing(&listing("new", "Desk", 200)).unwrap();

        let engine = SearchEngine::new(&store);
        let results = engine
            .lexical_search("", None, &SearchFilters::new(), 10)
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.similarity == 0.5));
        assert_eq!(results[0].listing.id, "new");
    }

    #[test]
    fn test_lexical_search_scores_are_normalized() {
        let store = ListingStore::open_in_memory().unwrap();
        store.upsert_listing(&listing("a", "Kayak paddle", 100)).unwrap();
        store.upsert_listing(&listing("b", "Office desk", 100)).unwrap();

        let engine = SearchEngine::new(&store);
        let results = engine
            .lexical_search("kayak", None, &SearchFilters::new(), 10)
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].listing.id, "a");
        assert!(results[0].similarity > 0.0);
        assert!(results[0].similarity <= 1.0);
    }

    #[test]
    fn test_hybrid_search_propagates_embedding_failure() {
        let store = ListingStore::open_in_memory().unwrap();
        store.upsert_listing(&listing("a", "Bike", 100)).unwrap();

        let failing = FailingEmbedder;
        let engine = SearchEngine::with_embedder(&store, &failing);

        let err = engine
            .hybrid_search("bike", None, &SearchFilters::new(), 10)
            .unwrap_err();
        assert!(matches!(err, SearchError::Unavailable(_)));
    }

    #[test]
    fn test_hybrid_search_ranks_exact_match_first() {
        let query = "red mountain bicycle";
        let store = seeded_store(query);
        let engine = SearchEngine::new(&store);

        let results = engine
            .hybrid_search(query, None, &SearchFilters::new(), 10)
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].listing.id, "exact");
        assert!(results.iter().all(|r| r.similarity >= SIMILARITY_THRESHOLD));
        assert!(results.iter().all(|r| r.similarity <= 1.0));
    }

    #[test]
    fn test_fuse_combines_overlapping_scores() {
        let fused = fuse(
            vec![result("x", 0.8, 100)],
            vec![result("x", 0.9, 100)],
            10,
        );

        assert_eq!(fused.len(), 1);
        // 0.8 * 0.7 + 0.9 * 0.3 = 0.83
        assert!((fused[0].similarity - 0.83).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_single_set_contribution() {
        let fused = fuse(vec![result("x", 0.4, 100)], Vec::new(), 10);

        assert_eq!(fused.len(), 1);
        // 0.4 * 0.7 = 0.28, above the floor
        assert!((fused[0].similarity - 0.28).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_drops_results_below_floor() {
        // 0.25 * 0.7 = 0.175 and 0.5 * 0.3 = 0.15, both below 0.2.
        let fused = fuse(
            vec![result("semantic-only", 0.25, 100)],
            vec![result("lexical-only", 0.5, 100)],
            10,
        );
        assert!(fused.is_empty());
    }

    #[test]
    fn test_fuse_caps_combined_score_at_one() {
        let fused = fuse(
            vec![result("x", 1.0, 100)],
            vec![result("x", 1.5, 100)],
            10,
        );
        assert_eq!(fused[0].similarity, 1.0);
    }

    #[test]
    fn test_fuse_sorts_and_truncates() {
        let fused = fuse(
            vec![
                result("low", 0.5, 100),
                result("high", 0.9, 100),
                result("mid", 0.7, 100),
            ],
            Vec::new(),
            2,
        );

        let ids: Vec<&str> = fused.iter().map(|r| r.listing.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }

    #[test]
    fn test_fuse_equal_scores_break_by_recency() {
        let fused = fuse(
            vec![result("older", 0.8, 100), result("newer", 0.8, 200)],
            Vec::new(),
            10,
        );

        let ids: Vec<&str> = fused.iter().map(|r| r.listing.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }
}
