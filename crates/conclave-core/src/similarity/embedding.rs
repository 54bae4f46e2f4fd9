//! Sentence-embedding similarity backend using local ONNX inference via
//! `fastembed`. Falls back to `None` (the caller then falls back to TF-IDF)
//! if the model cannot be initialized.

#[cfg(feature = "embeddings")]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

use super::{normalize_text, SimilarityBackend};
use crate::cache::Cache;

/// Dimensions after Matryoshka truncation: the first N dims of the 768-dim
/// nomic-embed-text-v1.5 output ARE a valid N-dim representation, so
/// truncating trades a small quality loss for smaller cache entries.
pub const EMBEDDING_DIMENSIONS: usize = 256;

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "conclave", "server") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn truncate_and_normalize(mut v: Vec<f32>) -> Vec<f32> {
    v.truncate(EMBEDDING_DIMENSIONS);
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0).max(0.0) as f64
}

#[cfg(feature = "embeddings")]
pub struct EmbeddingBackend {
    model: Mutex<TextEmbedding>,
    /// The decision graph's shared L2 (text -> embedding) cache, when this
    /// backend is wired into the retrieval path. `None` for standalone uses
    /// (e.g. round-to-round convergence scoring) that have no cache to share.
    cache: Option<Arc<Cache>>,
}

#[cfg(feature = "embeddings")]
impl EmbeddingBackend {
    pub fn try_new(cache: Option<Arc<Cache>>) -> Option<Self> {
        let dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, "failed to create fastembed cache dir");
        }
        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(dir);
        match TextEmbedding::try_new(options) {
            Ok(model) => Some(Self { model: Mutex::new(model), cache }),
            Err(e) => {
                tracing::warn!(error = %e, "embedding model init failed, falling back to tf-idf");
                None
            }
        }
    }

    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return None;
        }
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get_embedding(&normalized) {
                return Some(cached);
            }
        }
        let mut model = self.model.lock().ok()?;
        let embeddings = model.embed(vec![normalized.clone()], None).ok()?;
        let vector = embeddings.into_iter().next().map(truncate_and_normalize)?;
        if let Some(cache) = &self.cache {
            cache.put_embedding(normalized, vector.clone());
        }
        Some(vector)
    }
}

#[cfg(feature = "embeddings")]
impl SimilarityBackend for EmbeddingBackend {
    fn name(&self) -> &'static str {
        "embedding"
    }

    fn compute_similarity(&self, a: &str, b: &str) -> f64 {
        match (self.embed(a), self.embed(b)) {
            (Some(va), Some(vb)) => cosine(&va, &vb),
            _ => 0.0,
        }
    }
}

#[cfg(not(feature = "embeddings"))]
pub struct EmbeddingBackend;

#[cfg(not(feature = "embeddings"))]
impl EmbeddingBackend {
    pub fn try_new(_cache: Option<Arc<Cache>>) -> Option<Self> {
        None
    }
}

#[cfg(not(feature = "embeddings"))]
impl SimilarityBackend for EmbeddingBackend {
    fn name(&self) -> &'static str {
        "embedding"
    }

    fn compute_similarity(&self, _a: &str, _b: &str) -> f64 {
        0.0
    }
}
