//! Hybrid search: embeddings, ranking, facet derivation and orchestration.

pub mod embedding;
pub mod engine;
pub mod error;
pub mod facets;
pub mod service;

pub use embedding::{cosine_similarity, Embedder, TextEmbedder, EMBEDDING_DIM};
pub use engine::{SearchEngine, SimilarityResult};
pub use error::{EmbeddingError, SearchError};
pub use facets::{Facet, FacetEngine, FacetValue};
pub use service::{SearchMethod, SearchRequest, SearchResponse, SearchService};
