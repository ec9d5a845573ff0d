//! Model collaborator: turns texts into fixed-length unit vectors.

mod ollama;

pub use ollama::{OllamaEmbedder, normalize};

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Returns a fixed set of vectors whatever the input.
#[cfg(test)]
pub struct StaticEmbedder {
    vectors: Vec<Vec<f32>>,
}

#[cfg(test)]
impl StaticEmbedder {
    pub fn new(vectors: Vec<Vec<f32>>) -> Self {
        Self { vectors }
    }
}

#[cfg(test)]
#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.vectors.clone())
    }
}
