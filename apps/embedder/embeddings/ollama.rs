use super::Embedder;
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use ollama_rs::{Ollama, generation::embeddings::request::GenerateEmbeddingsRequest};
use tracing::{debug, info};

/// Embedding client for an Ollama server.
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    batch_size: usize,
    dimension: Option<usize>,
}

impl OllamaEmbedder {
    pub fn from_config(config: &ModelConfig) -> Self {
        // Ollama::new wants a scheme on the host
        let host = if !config.host.starts_with("http://") && !config.host.starts_with("https://")
        {
            format!("http://{}", config.host)
        } else {
            config.host.clone()
        };

        info!(
            host = %host,
            port = config.port,
            model = %config.name,
            batch_size = config.batch_size,
            "Initializing Ollama embedder"
        );

        Self {
            client: Ollama::new(host, config.port),
            model: config.name.clone(),
            batch_size: config.batch_size.max(1),
            dimension: config.dimension,
        }
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), texts.into());

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| Error::Model(format!("failed to generate embeddings: {e}")))?;

        if response.embeddings.len() != expected {
            return Err(Error::Model(format!(
                "embedding count mismatch: expected {expected}, got {}",
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            debug!(batch = chunk.len(), "Embedding batch");
            for mut embedding in self.embed_batch(chunk.to_vec()).await? {
                if let Some(dimension) = self.dimension {
                    if embedding.len() != dimension {
                        return Err(Error::Model(format!(
                            "embedding dimension mismatch: expected {dimension}, got {}",
                            embedding.len()
                        )));
                    }
                }
                normalize(&mut embedding);
                all_embeddings.push(embedding);
            }
        }

        Ok(all_embeddings)
    }
}

/// Scales `vector` to unit L2 length in place. Zero vectors are left as is.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_host_gets_scheme() {
        let embedder = OllamaEmbedder::from_config(&ModelConfig {
            host: "ollama".to_string(),
            ..ModelConfig::default()
        });
        assert_eq!(embedder.model, ModelConfig::default().name);
        assert!(embedder.batch_size >= 1);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_request() {
        let embedder = OllamaEmbedder::from_config(&ModelConfig::default());
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
