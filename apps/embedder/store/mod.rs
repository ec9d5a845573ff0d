//! Key-value persistence for the forward (`id -> text`, `id -> vector`) and
//! reverse (`digest -> id`) mappings.
//!
//! Every write is an independent single-key overwrite. There is no
//! cross-key transaction, so a failed batch can leave some keys written.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::codec::VectorDigest;
use crate::error::Result;
use async_trait::async_trait;

pub const TEXT_KEY_PREFIX: &str = "post:";
pub const EMBEDDING_KEY_PREFIX: &str = "embedding:post:";
pub const REVERSE_KEY_PREFIX: &str = "post_from_embedding:";

pub fn text_key(id: &str) -> String {
    format!("{TEXT_KEY_PREFIX}{id}")
}

pub fn embedding_key(id: &str) -> String {
    format!("{EMBEDDING_KEY_PREFIX}{id}")
}

pub fn reverse_key(digest: &VectorDigest) -> String {
    format!("{REVERSE_KEY_PREFIX}{digest}")
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Overwrites `key`. Fails with `StoreUnavailable`.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Every key starting with `prefix`. Order is unspecified and keys
    /// written during the scan may or may not appear.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
