use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Mutex,
};

use crate::{
    error::{Error, Result},
    model_manager::{ModelManager, normalize},
};

/// Turns text into fixed-size dense vectors.
///
/// One embedder instance is shared between the knowledge index and the
/// conversation memory so both live in the same vector space.
pub trait Embedder: Send + Sync {
    /// Embed each text into a vector. All vectors returned by one embedder
    /// have the same length.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Identifies the vector space this embedder produces. Two embedders
    /// with the same fingerprint produce comparable vectors.
    fn fingerprint(&self) -> String;

    /// Embed a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| {
                Error::Embedding("embedder returned no vector".into())
            })
    }
}

/// Dense embeddings from a ColBERT model, mean-pooled per text.
pub struct ColbertEmbedder {
    model_id: String,
    model: Mutex<ModelManager>,
}

impl ColbertEmbedder {
    pub fn new(model: ModelManager) -> Self {
        Self {
            model_id: model.model_id().to_string(),
            model: Mutex::new(model),
        }
    }
}

impl Embedder for ColbertEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| Error::Embedding("model lock poisoned".into()))?;
        model.encode_pooled(texts)
    }

    fn fingerprint(&self) -> String {
        format!("colbert:{}", self.model_id)
    }
}

/// Default dimensionality of [`HashingEmbedder`].
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// A model-free embedder that hashes lowercase word unigrams into buckets.
///
/// Texts sharing vocabulary land close together, which is enough for
/// offline use and for tests. Vectors are L2-normalized.
///
/// # Examples
///
/// ```
/// use examrag::embedding::{Embedder, HashingEmbedder};
///
/// let embedder = HashingEmbedder::new(64);
/// let v = embedder.embed_one("finite automata").unwrap();
/// assert_eq!(v.len(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        normalize(vector)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn fingerprint(&self) -> String {
        format!("hashing:{}", self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[test]
    fn hashing_is_deterministic_and_case_insensitive() {
        let e = HashingEmbedder::new(32);
        assert_eq!(
            e.embed_one("Turing Machine").unwrap(),
            e.embed_one("turing machine").unwrap()
        );
    }

    #[test]
    fn shared_vocabulary_is_closer() {
        let e = HashingEmbedder::default();
        let q = e.embed_one("pumping lemma for regular languages").unwrap();
        let near = e.embed_one("state the pumping lemma").unwrap();
        let far = e.embed_one("photosynthesis in plants").unwrap();
        assert!(distance(&q, &near) < distance(&q, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(8);
        assert_eq!(e.embed_one("").unwrap(), vec![0.0; 8]);
    }

    #[test]
    fn batch_preserves_order() {
        let e = HashingEmbedder::new(16);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = e.embed(&texts).unwrap();
        assert_eq!(batch[0], e.embed_one("alpha").unwrap());
        assert_eq!(batch[1], e.embed_one("beta").unwrap());
    }

    #[test]
    fn fingerprints_name_the_vector_space() {
        assert_eq!(HashingEmbedder::new(32).fingerprint(), "hashing:32");
        assert_ne!(
            HashingEmbedder::new(32).fingerprint(),
            HashingEmbedder::new(64).fingerprint()
        );

        let colbert = ColbertEmbedder::new(ModelManager::with_model_id(
            "org/model".to_string(),
        ));
        assert_eq!(colbert.fingerprint(), "colbert:org/model");
    }
}
