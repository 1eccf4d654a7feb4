//! Search orchestration: method dispatch, lexical fallback, pagination,
//! facets and timing.

use std::time::Instant;

use anyhow::Result;
use serde::Serialize;

use super::embedding::{self, Embedder};
use super::engine::{SearchEngine, SimilarityResult};
use super::error::SearchError;
use super::facets::{Facet, FacetEngine};
use crate::core::listing::{Listing, SearchFilters};
use crate::store::ListingStore;

/// Ranked searches materialize at most this many candidates before a page
/// is sliced. The full capped set is computed first so changing page never
/// re-ranks; the cap bounds worst-case ranking cost.
pub const RANKED_CANDIDATE_CAP: usize = 1000;

/// Default page size.
pub const DEFAULT_PAGE_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// Weighted fusion of semantic and lexical ranking (the default).
    Hybrid,
    /// Embedding similarity only.
    Semantic,
    /// Full-text ranking only.
    Text,
    /// No ranking: recency pagination for an empty query. Reported, never
    /// requested.
    Filter,
}

impl SearchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::Semantic => "semantic",
            Self::Text => "text",
            Self::Filter => "filter",
        }
    }
}

impl std::str::FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(Self::Hybrid),
            "semantic" => Ok(Self::Semantic),
            "text" => Ok(Self::Text),
            other => Err(format!(
                "unknown search method '{other}' (expected hybrid, semantic or text)"
            )),
        }
    }
}

/// A search request as the transport layer hands it over.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Category slug; `None` and `"all"` mean unscoped.
    pub category: Option<String>,
    pub filters: SearchFilters,
    pub page: usize,
    pub limit: usize,
    pub method: SearchMethod,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            category: None,
            filters: SearchFilters::new(),
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            method: SearchMethod::Hybrid,
        }
    }
}

/// One result row: the listing, annotated with its ranking score when the
/// ranked path produced one.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub listing: Listing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub facets: Vec<Facet>,
    pub pagination: Pagination,
    /// The method that actually produced the results, which differs from
    /// the requested one after a fallback.
    pub method: SearchMethod,
    pub processing_time_ms: u64,
}

/// Thin composition over the ranking engine, facet engine and store.
pub struct SearchService<'s> {
    store: &'s ListingStore,
    embedder: &'s dyn Embedder,
}

impl<'s> SearchService<'s> {
    /// Service backed by the process-wide embedding provider.
    pub fn new(store: &'s ListingStore) -> Self {
        Self {
            store,
            embedder: embedding::global(),
        }
    }

    /// Service with a caller-supplied embedding provider.
    pub fn with_embedder(store: &'s ListingStore, embedder: &'s dyn Embedder) -> Self {
        Self { store, embedder }
    }

    /// Run one search request end to end.
    ///
    /// A present query dispatches to the requested ranked search; any
    /// failure there falls back to the store's native text pagination, so
    /// a search only fails outright when the store itself does. An empty
    /// query skips ranking and pages by recency. Facets are computed for
    /// the same category/filters/query context.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();

        let page = request.page.max(1);
        let limit = request.limit.max(1);
        let query = request.query.trim();
        let category_id = self.resolve_category(request.category.as_deref())?;
        let category_id = category_id.as_deref();

        let (results, total, method) = if query.is_empty() {
            let (listings, total) =
                self.store
                    .recency_page(category_id, &request.filters, page, limit)?;
            (unranked_hits(listings), total, SearchMethod::Filter)
        } else {
            match self.ranked(query, category_id, &request.filters, request.method) {
                Ok(ranked) => {
                    let total = ranked.len();
                    (page_slice(ranked, page, limit), total, request.method)
                }
                Err(e) => {
                    tracing::warn!(
                        "{} search failed, falling back to text pagination: {e}",
                        request.method.as_str()
                    );
                    let (listings, total) =
                        self.store
                            .text_page(query, category_id, &request.filters, page, limit)?;
                    (unranked_hits(listings), total, SearchMethod::Text)
                }
            }
        };

        let facets = FacetEngine::with_embedder(self.store, self.embedder).generate_facets(
            category_id,
            &request.filters,
            (!query.is_empty()).then_some(query),
        );

        Ok(SearchResponse {
            results,
            facets,
            pagination: Pagination {
                page,
                limit,
                total,
                total_pages: total.div_ceil(limit),
            },
            method,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// The full ranked candidate set, capped. Materialized before any page
    /// is sliced so relative order is stable across pages.
    fn ranked(
        &self,
        query: &str,
        category_id: Option<&str>,
        filters: &SearchFilters,
        method: SearchMethod,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        let engine = SearchEngine::with_embedder(self.store, self.embedder);
        match method {
            SearchMethod::Semantic => {
                engine.semantic_search(query, category_id, filters, RANKED_CANDIDATE_CAP)
            }
            SearchMethod::Text => {
                engine.lexical_search(query, category_id, filters, RANKED_CANDIDATE_CAP)
            }
            SearchMethod::Hybrid | SearchMethod::Filter => {
                engine.hybrid_search(query, category_id, filters, RANKED_CANDIDATE_CAP)
            }
        }
    }

    /// Category slug to id. Absent, `"all"` and unknown slugs all mean
    /// unscoped.
    fn resolve_category(&self, slug: Option<&str>) -> Result<Option<String>> {
        match slug {
            None | Some("") | Some("all") => Ok(None),
            Some(slug) => Ok(self.store.category_by_slug(slug)?.map(|c| c.id)),
        }
    }
}

fn unranked_hits(listings: Vec<Listing>) -> Vec<SearchHit> {
    listings
        .into_iter()
        .map(|listing| SearchHit {
            listing,
            similarity: None,
        })
        .collect()
}

fn page_slice(ranked: Vec<SimilarityResult>, page: usize, limit: usize) -> Vec<SearchHit> {
    ranked
        .into_iter()
        .skip((page - 1) * limit)
        .take(limit)
        .map(|result| SearchHit {
            listing: result.listing,
            similarity: Some(result.similarity),
        })
        .collect()
}
