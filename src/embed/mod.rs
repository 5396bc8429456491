#[cfg(feature = "onnx")]
pub mod minilm;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Vector width of the MiniLM sentence-encoder family.
pub const EMBEDDING_DIMENSION: usize = 384;

const TEXT_SEPARATOR: &str = " [SEP] ";

#[derive(Debug, Error)]
#[error("encoding failed: {0}")]
pub struct EncodeError(pub String);

/// The text-to-vector capability. Model identity lives in configuration;
/// the engine only assumes a fixed output dimension per encoder.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError>;
}

/// Wraps a [`TextEncoder`] behind a request-scoped cache keyed by the hash
/// of the whitespace-normalized text, so repeated embeddings of the same
/// text within one request return the identical vector.
pub struct EncoderGateway {
    encoder: Arc<dyn TextEncoder>,
    cache: Mutex<HashMap<u64, Arc<Vec<f32>>>>,
    max_cached: usize,
}

impl EncoderGateway {
    pub fn new(encoder: Arc<dyn TextEncoder>, max_cached: usize) -> Self {
        Self {
            encoder,
            cache: Mutex::new(HashMap::new()),
            max_cached,
        }
    }

    pub fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>, EncodeError> {
        let normalized = normalize_text(text);
        let key = cache_key(&normalized);

        if let Some(vector) = self.cache.lock().unwrap().get(&key) {
            return Ok(Arc::clone(vector));
        }

        let vector = Arc::new(self.encoder.encode(&normalized)?);
        let mut cache = self.cache.lock().unwrap();
        if cache.len() < self.max_cached {
            cache.insert(key, Arc::clone(&vector));
        } else {
            tracing::debug!(cap = self.max_cached, "embedding cache full, not inserting");
        }
        Ok(vector)
    }

    /// Embed each text in order. The output index i always corresponds to
    /// the input index i.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Arc<Vec<f32>>>, EncodeError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

/// Text a candidate is embedded from: title joined to the abstract with a
/// fixed separator, or the title alone when no abstract exists.
pub fn candidate_text(title: &str, abstract_text: Option<&str>) -> String {
    match abstract_text {
        Some(a) if !a.trim().is_empty() => format!("{}{}{}", title, TEXT_SEPARATOR, a),
        _ => title.to_string(),
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cache_key(normalized: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic embedding derived from the text hash via xorshift.
/// Stands in for a real model when the `onnx` feature is off: the geometry
/// carries no meaning, but identical text always maps to the identical
/// vector, which is all determinism tests need.
pub struct HashEncoder {
    dimension: usize,
}

impl HashEncoder {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIMENSION,
        }
    }
}

impl Default for HashEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TextEncoder for HashEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        let mut rng_state = cache_key(text) | 1;
        Ok((0..self.dimension)
            .map(|_| {
                rng_state ^= rng_state << 13;
                rng_state ^= rng_state >> 7;
                rng_state ^= rng_state << 17;
                ((rng_state as f32) / (u64::MAX as f32)) * 2.0 - 1.0
            })
            .collect())
    }
}
