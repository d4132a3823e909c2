use candle_core::{DType, Device, Tensor};
use pylate_rs::ColBERT;

use crate::error::{Error, Result};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "EXAMRAG_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Manages the ColBERT model lifecycle, supporting lazy loading on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `EXAMRAG_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`lightonai/GTE-ModernColBERT-v1`)
    ///
    /// The model is not loaded until the first call to `encode_pooled`.
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());

        Self {
            model: None,
            model_id,
        }
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| {
                    Error::Embedding(format!(
                        "failed to load model {}: {e}",
                        self.model_id
                    ))
                })?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::Embedding("model not loaded".to_string()))
    }

    /// Encode texts into one L2-normalized vector each.
    ///
    /// ColBERT produces a `[batch, tokens, dim]` tensor of per-token
    /// embeddings; the token axis is mean-pooled so every text lands in a
    /// single flat vector space shared by documents and queries.
    pub fn encode_pooled(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.ensure_loaded()?;
        let embeddings = model
            .encode(texts, false)
            .map_err(|e| Error::Embedding(format!("encode failed: {e}")))?;

        let pooled = mean_pool(&embeddings).map_err(map_candle_err)?;
        let rows = pooled.to_vec2::<f32>().map_err(map_candle_err)?;
        Ok(rows.into_iter().map(normalize).collect())
    }
}

fn mean_pool(embeddings: &Tensor) -> candle_core::Result<Tensor> {
    // [B, T, D] -> [B, D]
    embeddings.mean(1)?.to_dtype(DType::F32)
}

/// Scale a vector to unit length; zero vectors are returned unchanged.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::Embedding(format!("tensor computation error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_model_id() {
        let manager = ModelManager::with_model_id("custom/model".to_string());
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.is_loaded());
    }

    #[test]
    fn encoding_nothing_does_not_load_model() {
        let mut manager =
            ModelManager::with_model_id(DEFAULT_MODEL_ID.to_string());
        assert!(manager.encode_pooled(&[]).unwrap().is_empty());
        assert!(!manager.is_loaded());
    }

    #[test]
    fn mean_pool_averages_tokens() {
        // batch 1, 2 tokens, dim 2
        let t = Tensor::from_vec(
            vec![1.0f32, 0.0, 3.0, 2.0],
            (1, 2, 2),
            &Device::Cpu,
        )
        .unwrap();
        let pooled = mean_pool(&t).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(pooled, vec![vec![2.0, 1.0]]);
    }

    #[test]
    fn normalize_produces_unit_vectors() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
