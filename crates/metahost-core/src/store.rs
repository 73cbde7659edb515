use async_trait::async_trait;
use std::collections::HashMap;

use crate::Result;

/// Key/value store contract shared by the type registry, the instance
/// directory and each worker's local instance store. `update` is an upsert
/// with last-write-wins semantics.
#[async_trait]
pub trait Store<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>>;

    async fn get_all(&self) -> Result<HashMap<String, V>>;

    async fn update(&self, key: &str, value: V) -> Result<()>;
}
