//! Deterministic text embeddings.
//!
//! The default provider uses harmonic token projection: each token is
//! encoded as an integer over its Unicode code points, reduced modulo a set
//! of coprime moduli, and projected onto the unit circle per modulus. Token
//! vectors are mean-pooled and L2-normalized. The same input always yields
//! the same vector, with no model download or warm-up.

use std::f64::consts::PI;

use lazy_static::lazy_static;

use super::error::{EmbeddingError, SearchError};

/// Output dimension of every embedding (two components per modulus).
pub const EMBEDDING_DIM: usize = 384;

/// Listings scoring below this similarity never appear in semantic or
/// hybrid results.
pub const SIMILARITY_THRESHOLD: f32 = 0.2;

/// Display band: scores at or above this are highly relevant.
pub const HIGH_SIMILARITY_THRESHOLD: f32 = 0.7;

/// Display band: scores at or above this are moderately relevant.
pub const MEDIUM_SIMILARITY_THRESHOLD: f32 = 0.5;

const NUM_MODULI: usize = EMBEDDING_DIM / 2;

/// Longest token prefix (in code points) folded into the integer encoding.
const MAX_TOKEN_CHARS: usize = 64;

lazy_static! {
    static ref GLOBAL_EMBEDDER: TextEmbedder = TextEmbedder::new();
}

/// The process-wide embedding provider.
///
/// Initialized lazily on first use and reused for the life of the process;
/// initialization is idempotent and there is no teardown.
pub fn global() -> &'static TextEmbedder {
    &GLOBAL_EMBEDDER
}

/// A text-to-vector provider.
///
/// `embed` must be deterministic per input (up to model versioning).
/// Implementations wrapping a fallible model report load or invocation
/// failures as [`EmbeddingError::Unavailable`].
pub trait Embedder: Send + Sync {
    /// Fixed output dimension of this provider.
    fn dimension(&self) -> usize;

    /// Embed one text. Input is trimmed and lower-cased first; fails with
    /// [`EmbeddingError::EmptyInput`] when nothing remains.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts independently. A failed entry is replaced
    /// with a zero vector of the standard dimension so downstream
    /// comparisons stay well-typed; one failure never aborts the batch.
    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts
            .iter()
            .map(|text| {
                self.embed(text).unwrap_or_else(|e| {
                    tracing::warn!("embedding failed, substituting zero vector: {e}");
                    vec![0.0; self.dimension()]
                })
            })
            .collect()
    }
}

/// Harmonic token projection embedder.
pub struct TextEmbedder {
    moduli: Vec<u64>,
}

impl TextEmbedder {
    pub fn new() -> Self {
        Self {
            moduli: first_primes(NUM_MODULI),
        }
    }

    /// Project a single token onto the unit circle for each modulus:
    /// r = N mod m, then [sin(2πr/m), cos(2πr/m)].
    fn embed_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);

        let mut projected = Vec::with_capacity(EMBEDDING_DIM);
        for &m in &self.moduli {
            let r = n % m;
            let theta = 2.0 * PI * (r as f64) / (m as f64);
            projected.push(theta.sin());
            projected.push(theta.cos());
        }
        projected
    }
}

impl Default for TextEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for TextEmbedder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let tokens: Vec<&str> = normalized
            .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            // Punctuation-only input degenerates to the zero vector.
            return Ok(vec![0.0; EMBEDDING_DIM]);
        }

        // Mean-pool the token projections.
        let mut pooled = vec![0.0f64; EMBEDDING_DIM];
        for token in &tokens {
            for (i, component) in self.embed_token(token).iter().enumerate() {
                pooled[i] += component;
            }
        }
        for component in &mut pooled {
            *component /= tokens.len() as f64;
        }

        // L2 normalize and narrow to f32.
        let norm: f64 = pooled.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            Ok(pooled.iter().map(|x| (*x / norm) as f32).collect())
        } else {
            Ok(pooled.iter().map(|x| *x as f32).collect())
        }
    }
}

/// Encode a token as a base-2^16 integer over its code points, wrapping on
/// overflow.
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_CHARS)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// First `count` primes, which are pairwise coprime by construction.
fn first_primes(count: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(count);
    let mut candidate: u64 = 2;
    while primes.len() < count {
        let is_prime = primes
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0);
        if is_prime {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

/// Cosine similarity between two vectors of equal length.
///
/// Returns 0.0 when either vector has zero norm; never divides by zero.
/// Fails with [`SearchError::DimensionMismatch`] on unequal lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SearchError> {
    if a.len() != b.len() {
        return Err(SearchError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        Ok(0.0)
    } else {
        Ok(dot / denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_deterministic() {
        let embedder = TextEmbedder::new();

        let a = embedder.embed("road bike with carbon frame").unwrap();
        let b = embedder.embed("road bike with carbon frame").unwrap();
        let c = embedder.embed("vintage armchair").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_embedding_is_normalized() {
        let embedder = TextEmbedder::new();
        let e = embedder.embed("mountain bike").unwrap();
        let norm: f32 = e.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_embedding_case_and_whitespace_insensitive() {
        let embedder = TextEmbedder::new();
        let a = embedder.embed("  iPhone 13  ").unwrap();
        let b = embedder.embed("iphone 13").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_input_fails() {
        let embedder = TextEmbedder::new();
        assert!(matches!(
            embedder.embed("   "),
            Err(EmbeddingError::EmptyInput)
        ));
    }

    #[test]
    fn test_batch_replaces_failures_with_zero_vector() {
        let embedder = TextEmbedder::new();
        let batch = embedder.embed_batch(&["leather sofa", ""]);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].len(), EMBEDDING_DIM);
        assert_eq!(batch[1], vec![0.0; EMBEDDING_DIM]);
    }

    #[test]
    fn test_global_provider_is_shared() {
        let a = global().embed("shared provider").unwrap();
        let b = global().embed("shared provider").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_first_primes() {
        assert_eq!(first_primes(8), vec![2, 3, 5, 7, 11, 13, 17, 19]);
        assert_eq!(first_primes(NUM_MODULI).len(), NUM_MODULI);
    }

    #[test]
    fn test_cosine_symmetric_and_self() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-2.0, 0.5, 1.0];

        let ab = cosine_similarity(&a, &b).unwrap();
        let ba = cosine_similarity(&b, &a).unwrap();
        assert_eq!(ab, ba);

        let aa = cosine_similarity(&a, &a).unwrap();
        assert!((aa - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &zero).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_opposite_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0, 3.0, 4.0];
        assert!(matches!(
            cosine_similarity(&a, &b),
            Err(SearchError::DimensionMismatch { left: 3, right: 4 })
        ));
    }
}
