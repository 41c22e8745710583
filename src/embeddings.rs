//! Text embeddings for the knowledge base.
//!
//! Two backends implement [`Embedder`]:
//!
//! - [`MiniLmEmbedder`]: `sentence-transformers/all-MiniLM-L6-v2` running on
//!   candle (pure Rust). Weights are fetched from the Hugging Face Hub on first
//!   use and cached by `hf-hub`. 384 dimensions.
//! - [`HashingEmbedder`]: feature hashing over lowercase word tokens. Needs no
//!   download and is fully deterministic, at the cost of only matching shared
//!   vocabulary.
//!
//! Both produce L2-normalised vectors, so Euclidean distance ranks the same way
//! as cosine similarity.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::info;

use crate::config::EmbeddingBackend;
use crate::error::{ParleyError, Result};

/// Dimension of the MiniLM sentence embeddings.
pub const MINILM_DIMENSION: usize = 384;

const MINILM_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Turns text into fixed-length vectors.
pub trait Embedder: Send + Sync {
    /// Names the model and its settings. Vectors from embedders with
    /// different ids are not comparable, even at the same dimension.
    fn id(&self) -> String;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the embedder selected in the configuration.
pub fn from_backend(backend: EmbeddingBackend) -> Result<Arc<dyn Embedder>> {
    Ok(match backend {
        EmbeddingBackend::MiniLm => Arc::new(MiniLmEmbedder::load()?),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::default()),
    })
}

fn embedding_err(context: &str, err: impl std::fmt::Display) -> ParleyError {
    ParleyError::Embedding(format!("{context}: {err}"))
}

/// Sentence embeddings with candle.
pub struct MiniLmEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl MiniLmEmbedder {
    /// Download (or reuse the cached) model files and load them on the CPU.
    pub fn load() -> Result<Self> {
        let device = Device::Cpu;
        info!("Loading embedding model {MINILM_MODEL_ID}");

        let repo = Repo::with_revision(MINILM_MODEL_ID.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(|e| embedding_err("hub", e))?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo
            .get("config.json")
            .map_err(|e| embedding_err("config.json", e))?;
        let tokenizer_filename = api_repo
            .get("tokenizer.json")
            .map_err(|e| embedding_err("tokenizer.json", e))?;
        let weights_filename = api_repo
            .get("model.safetensors")
            .map_err(|e| embedding_err("model.safetensors", e))?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| embedding_err("tokenizer", e))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Mean of the token embeddings, ignoring padding.
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor> {
        // [1, seq_len, 1] so the mask broadcasts over the hidden dimension
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        Ok(sum.broadcast_div(&count)?.squeeze(0)?)
    }

    fn normalize(tensor: &Tensor) -> Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

impl Embedder for MiniLmEmbedder {
    fn id(&self) -> String {
        format!("minilm:{MINILM_MODEL_ID}")
    }

    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // the tokenizer truncates at the model's 512 token limit
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| embedding_err("tokenize", e))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let pooled = self.mean_pooling(&output, tokens.get_attention_mask())?;
        Ok(Self::normalize(&pooled)?.to_vec1::<f32>()?)
    }
}

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("static regex"));

/// Signed feature hashing of word unigrams.
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
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(MINILM_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn id(&self) -> String {
        format!("hashing:{}", self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension];
        let lowered = text.to_lowercase();
        for word in WORD.find_iter(&lowered) {
            let hash = blake3::hash(word.as_str().as_bytes());
            let bytes = hash.as_bytes();
            let mut slot = [0u8; 8];
            slot.copy_from_slice(&bytes[..8]);
            let index = (u64::from_le_bytes(slot) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// Euclidean distance between two equal-length vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_embedder_is_normalised_and_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Rust is a systems programming language").unwrap();
        let b = embedder.embed("Rust is a systems programming language").unwrap();
        assert_eq!(a.len(), MINILM_DIMENSION);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_embedder_ranks_shared_vocabulary_closer() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("how do rust lifetimes work").unwrap();
        let related = embedder.embed("Rust lifetimes describe how long references live").unwrap();
        let unrelated = embedder.embed("Bake the bread at two hundred degrees").unwrap();
        assert!(euclidean_distance(&query, &related) < euclidean_distance(&query, &unrelated));
    }

    #[test]
    fn test_hashing_embedder_handles_empty_text() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed("   ").unwrap();
        assert_eq!(v, vec![0.0; 16]);
    }

    #[test]
    fn test_from_backend_hashing() {
        let embedder = from_backend(EmbeddingBackend::Hashing).unwrap();
        assert_eq!(embedder.dimension(), MINILM_DIMENSION);
        assert_eq!(embedder.id(), "hashing:384");
        assert_ne!(embedder.id(), HashingEmbedder::new(64).id());
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2 from the Hugging Face Hub"]
    fn test_minilm_embedder() {
        let embedder = MiniLmEmbedder::load().unwrap();
        let v = embedder.embed("Rust is cool.").unwrap();
        assert_eq!(v.len(), MINILM_DIMENSION);
    }
}
