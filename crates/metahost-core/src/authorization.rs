use async_trait::async_trait;
use std::collections::HashSet;

use crate::Result;

/// Ownership relation `uid -> set(instance_id)`, owned by an external
/// authorization service. An instance has at most one owner at a time.
///
/// `Err` means the service itself could not be consulted; a negative answer
/// is `Ok(false)` or an empty set.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn make_owner(&self, uid: &str, instance_id: &str) -> Result<bool>;

    async fn revoke_ownership(&self, instance_id: &str, uid: &str) -> Result<bool>;

    async fn is_user_instance(&self, instance_id: &str, uid: &str) -> Result<bool>;

    async fn get_user_instances(&self, uid: &str) -> Result<HashSet<String>>;
}
