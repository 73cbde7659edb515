use async_trait::async_trait;
use metahost_core::{CoreError, Result, Store};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Thread-safe in-memory store. Clones share the same storage.
#[derive(Debug)]
pub struct InMemoryStore<V> {
    storage: Arc<RwLock<HashMap<String, V>>>,
}

impl<V> InMemoryStore<V> {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.storage.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Clone for InMemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> CoreError {
    CoreError::Store("Storage lock poisoned".to_string())
}

#[async_trait]
impl<V> Store<V> for InMemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        let storage = self.storage.read().map_err(|_| poisoned())?;
        Ok(storage.get(key).cloned())
    }

    async fn get_all(&self) -> Result<HashMap<String, V>> {
        let storage = self.storage.read().map_err(|_| poisoned())?;
        Ok(storage.clone())
    }

    async fn update(&self, key: &str, value: V) -> Result<()> {
        let mut storage = self.storage.write().map_err(|_| poisoned())?;
        storage.insert(key.to_string(), value);
        Ok(())
    }
}
