use thiserror::Error;

/// Failures from an embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Nothing left to embed after trimming.
    #[error("empty text provided for embedding")]
    EmptyInput,
    /// The backing model could not be loaded or invoked.
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
}

/// Failures from the ranking engine and its collaborators.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Similarity requested over vectors of unequal length. A data error,
    /// never expected in steady state; surfaced, not retried.
    #[error("cannot compare embeddings of dimension {left} and {right}")]
    DimensionMismatch { left: usize, right: usize },

    /// The vector stage could not embed the query. Recoverable: the
    /// orchestrator falls back to lexical pagination.
    #[error("search unavailable: {0}")]
    Unavailable(#[from] EmbeddingError),

    /// Listing store failure. Propagated unchanged; there is no retry
    /// policy at this layer.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
