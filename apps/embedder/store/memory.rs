use super::MappingStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Process-local store used for development (`STORE_BACKEND=memory`) and
/// tests. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<AtomicUsize>,
    write_budget: Arc<Mutex<Option<usize>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows `budget` more successful writes; every write after that fails
    /// with `StoreUnavailable`. `None` removes the limit.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        *self.lock_budget() = budget;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still structurally valid; keep serving it.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_budget(&self) -> std::sync::MutexGuard<'_, Option<usize>> {
        self.write_budget.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut budget = self.lock_budget();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(Error::StoreUnavailable(format!(
                        "write to '{key}' rejected: store offline"
                    )));
                }
                *remaining -= 1;
            }
        }

        self.lock_entries().insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock_entries().get(key).cloned())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .lock_entries()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
