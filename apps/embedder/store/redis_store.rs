use super::MappingStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 500;
use utils::errors::{REDIS_CLIENT_FAILED, REDIS_CONNECTION_FAILED, REDIS_PING_FAILED};

/// Mapping store over one shared Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting mapping store to Redis");

        let client = Client::open(redis_url)
            .map_err(|e| Error::StoreUnavailable(format!("{REDIS_CLIENT_FAILED}: {e}")))?;
        Self::from_client(client).await
    }

    pub async fn from_client(client: Client) -> Result<Self> {
        let mut redis = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("{REDIS_CONNECTION_FAILED}: {e}")))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut redis)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("{REDIS_PING_FAILED}: {e}")))?;

        info!("Mapping store connected");
        Ok(Self { redis })
    }
}

#[async_trait]
impl MappingStore for RedisStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        debug!(key = %key, value_len = value.len(), "SET");
        let _: () = self
            .redis
            .clone()
            .set(key, value)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("SET {key}: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.redis
            .clone()
            .get::<_, Option<String>>(key)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("GET {key}: {e}")))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut redis = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut redis)
                .await
                .map_err(|e| Error::StoreUnavailable(format!("SCAN {pattern}: {e}")))?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        debug!(prefix = %prefix, count = keys.len(), "SCAN");
        Ok(keys)
    }
}

/// Escapes the characters SCAN MATCH treats as glob syntax.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
