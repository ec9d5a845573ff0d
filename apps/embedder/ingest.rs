use crate::bus::{Channel, NotificationBus};
use crate::codec;
use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::models::{EmbeddingItem, EmbeddingRecord, EmbeddingResponse};
use crate::store::{self, MappingStore};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub const STORED_MESSAGE: &str = "Embeddings stored successfully.";

/// Writes forward and reverse mappings for each record and announces it on
/// the data channel.
#[derive(Clone)]
pub struct IngestionCoordinator {
    store: Arc<dyn MappingStore>,
    bus: Arc<dyn NotificationBus>,
    expected_dimension: Option<usize>,
}

impl IngestionCoordinator {
    pub fn new(store: Arc<dyn MappingStore>, bus: Arc<dyn NotificationBus>) -> Self {
        Self {
            store,
            bus,
            expected_dimension: None,
        }
    }

    /// Rejects records whose vector length differs from `dimension`.
    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.expected_dimension = dimension;
        self
    }

    /// Stores `batch` in order and returns how many records were written.
    ///
    /// The batch is not atomic: the first failing record aborts the batch
    /// and the records before it stay written. A failed notification
    /// publish is logged and does not abort.
    #[instrument(name = "ingest", skip_all, fields(batch_size = batch.len()))]
    pub async fn ingest(&self, batch: &[EmbeddingRecord]) -> Result<usize> {
        let mut written = 0;

        for (index, record) in batch.iter().enumerate() {
            if let Err(e) = self.store_record(record).await {
                error!(
                    post_id = %record.id,
                    index,
                    written,
                    error = %e,
                    "Ingest aborted, earlier records in the batch remain stored"
                );
                return Err(e);
            }

            if let Err(e) = self.bus.publish(Channel::NewEmbedding, &record.id).await {
                warn!(post_id = %record.id, error = %e, "Failed to announce new embedding");
            }

            written += 1;
        }

        info!(count = written, "Batch ingested");
        Ok(written)
    }

    /// Ingest operation behind `POST /embeddings/generate`: embeds the texts
    /// with `embedder`, then stores them.
    pub async fn generate_and_store(
        &self,
        embedder: &dyn Embedder,
        items: Vec<EmbeddingItem>,
    ) -> Result<EmbeddingResponse> {
        let texts: Vec<String> = items.iter().map(|item| item.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;

        if vectors.len() != items.len() {
            return Err(Error::Model(format!(
                "expected {} embeddings, model returned {}",
                items.len(),
                vectors.len()
            )));
        }

        let batch: Vec<EmbeddingRecord> = items
            .into_iter()
            .zip(vectors)
            .map(|(item, vector)| EmbeddingRecord::new(item.post_id, item.text, vector))
            .collect();

        let count = self.ingest(&batch).await?;
        Ok(EmbeddingResponse {
            message: STORED_MESSAGE.to_string(),
            count,
        })
    }

    async fn store_record(&self, record: &EmbeddingRecord) -> Result<()> {
        if let Some(dimension) = self.expected_dimension {
            if record.vector.len() != dimension {
                return Err(Error::InvalidRecord(format!(
                    "post {} has {} dimensions, expected {}",
                    record.id,
                    record.vector.len(),
                    dimension
                )));
            }
        }

        self.store
            .put(&store::text_key(&record.id), &record.text)
            .await?;
        self.store
            .put(
                &store::embedding_key(&record.id),
                &codec::to_json(&record.vector)?,
            )
            .await?;

        let digest = codec::digest_vector(&record.vector);
        self.store
            .put(&store::reverse_key(&digest), &record.id)
            .await?;

        debug!(post_id = %record.id, digest = %digest, "Stored embedding");
        Ok(())
    }
}
