use crate::codec;
use crate::error::{Error, Result};
use crate::models::{SimilarPost, SimilarPostsResponse};
use crate::store::{self, MappingStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read side of the mappings: text and vector by id, id by vector content.
#[derive(Clone)]
pub struct Lookup {
    store: Arc<dyn MappingStore>,
}

impl Lookup {
    pub fn new(store: Arc<dyn MappingStore>) -> Self {
        Self { store }
    }

    pub async fn text(&self, id: &str) -> Result<String> {
        self.required(&store::text_key(id)).await
    }

    pub async fn embedding(&self, id: &str) -> Result<Vec<f32>> {
        let json = self.required(&store::embedding_key(id)).await?;
        codec::from_json(&json)
    }

    /// Id last stored with a bit-identical vector.
    pub async fn id_for_vector(&self, vector: &[f32]) -> Result<String> {
        let digest = codec::digest_vector(vector);
        self.required(&store::reverse_key(&digest)).await
    }

    /// Up to `limit` stored posts closest to `id` by cosine similarity, best
    /// first.
    ///
    /// Every stored vector is scored, then mapped back to its owner through
    /// the reverse index. A vector stored by several posts is reported once,
    /// under the id that stored it last, and never as the query post itself.
    pub async fn similar(&self, id: &str, limit: usize) -> Result<SimilarPostsResponse> {
        let query = self.embedding(id).await?;
        let text = self.text(id).await?;

        let mut scored = Vec::new();
        for key in self.store.keys(store::EMBEDDING_KEY_PREFIX).await? {
            if key.strip_prefix(store::EMBEDDING_KEY_PREFIX) == Some(id) {
                continue;
            }
            // Overwritten or removed since the scan.
            let Some(json) = self.store.get(&key).await? else {
                continue;
            };
            let vector = match codec::from_json(&json) {
                Ok(vector) => vector,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable embedding");
                    continue;
                }
            };
            if let Some(similarity) = cosine_similarity(&query, &vector) {
                scored.push((similarity, vector));
            }
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        debug!(post_id = %id, candidates = scored.len(), "Scored similar posts");

        let mut seen = HashSet::from([id.to_string()]);
        let mut similar = Vec::new();
        for (similarity, vector) in scored {
            if similar.len() >= limit {
                break;
            }
            let owner = match self.id_for_vector(&vector).await {
                Ok(owner) => owner,
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !seen.insert(owner.clone()) {
                continue;
            }
            let text = match self.text(&owner).await {
                Ok(text) => text,
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            similar.push(SimilarPost {
                post_id: owner,
                text,
                similarity,
            });
        }

        Ok(SimilarPostsResponse {
            post_id: id.to_string(),
            text,
            similar,
        })
    }

    pub async fn raw(&self, key: &str) -> Result<String> {
        self.required(key).await
    }

    pub async fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidRecord("Key cannot be empty".to_string()));
        }
        self.store.put(key, value).await
    }

    async fn required(&self, key: &str) -> Result<String> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Key '{key}' not found")))
    }
}

/// `None` for vectors of different length, zero vectors and non-finite
/// scores.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let similarity = dot_product / (norm_a * norm_b);
    similarity.is_finite().then_some(similarity)
}
