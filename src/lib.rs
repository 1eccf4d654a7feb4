//! bazaar-search library
//!
//! Marketplace listing search engine with hybrid semantic + full-text
//! ranking and faceted filtering.
//!
//! # Modules
//!
//! - `core`: Domain types (listings, categories, attribute schemas)
//! - `search`: Embeddings, hybrid ranking, facets, orchestration
//! - `store`: SQLite-backed listing repository

pub mod core;
pub mod search;
pub mod store;

// Re-exports for convenience
pub use crate::core::listing::{AttributeValue, Category, Listing, SearchFilters};
pub use crate::search::embedding::{cosine_similarity, Embedder, TextEmbedder, EMBEDDING_DIM};
pub use crate::search::engine::{SearchEngine, SimilarityResult};
pub use crate::search::error::{EmbeddingError, SearchError};
pub use crate::search::facets::{Facet, FacetEngine, FacetValue};
pub use crate::search::service::{SearchMethod, SearchRequest, SearchResponse, SearchService};
pub use crate::store::ListingStore;
