use async_trait::async_trait;
use metahost_core::{Authorizer, CoreError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Ownership table kept in process memory.
///
/// Refuses to hand an instance to a second owner: reassignment has to go
/// through `revoke_ownership` first.
#[derive(Debug, Clone, Default)]
pub struct LocalAuthorizer {
    table: Arc<RwLock<OwnershipTable>>,
}

/// `by_user` and `by_instance` always describe the same relation.
#[derive(Debug, Default)]
struct OwnershipTable {
    by_user: HashMap<String, HashSet<String>>,
    by_instance: HashMap<String, String>,
}

impl LocalAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner_of(&self, instance_id: &str) -> Option<String> {
        self.table
            .read()
            .ok()
            .and_then(|table| table.by_instance.get(instance_id).cloned())
    }
}

fn poisoned() -> CoreError {
    CoreError::Authorization("Ownership lock poisoned".to_string())
}

#[async_trait]
impl Authorizer for LocalAuthorizer {
    async fn make_owner(&self, uid: &str, instance_id: &str) -> Result<bool> {
        let mut table = self.table.write().map_err(|_| poisoned())?;
        if let Some(owner) = table.by_instance.get(instance_id) {
            if owner != uid {
                debug!(%uid, %instance_id, "Instance already owned by another user");
                return Ok(false);
            }
        }

        table
            .by_instance
            .insert(instance_id.to_string(), uid.to_string());
        table
            .by_user
            .entry(uid.to_string())
            .or_default()
            .insert(instance_id.to_string());
        Ok(true)
    }

    async fn revoke_ownership(&self, instance_id: &str, uid: &str) -> Result<bool> {
        let mut table = self.table.write().map_err(|_| poisoned())?;
        if table.by_instance.get(instance_id).map(String::as_str) != Some(uid) {
            return Ok(false);
        }

        table.by_instance.remove(instance_id);
        if let Some(ids) = table.by_user.get_mut(uid) {
            ids.remove(instance_id);
            if ids.is_empty() {
                table.by_user.remove(uid);
            }
        }
        Ok(true)
    }

    async fn is_user_instance(&self, instance_id: &str, uid: &str) -> Result<bool> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table.by_instance.get(instance_id).map(String::as_str) == Some(uid))
    }

    async fn get_user_instances(&self, uid: &str) -> Result<HashSet<String>> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table.by_user.get(uid).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_make_owner_and_query() {
        let authz = LocalAuthorizer::new();
        assert!(authz.make_owner("u1", "i-1").await.unwrap());
        assert!(authz.make_owner("u1", "i-2").await.unwrap());

        assert!(authz.is_user_instance("i-1", "u1").await.unwrap());
        assert!(!authz.is_user_instance("i-1", "u2").await.unwrap());

        let ids = authz.get_user_instances("u1").await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(authz.get_user_instances("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_owner_until_revoked() {
        let authz = LocalAuthorizer::new();
        assert!(authz.make_owner("u1", "i-1").await.unwrap());
        assert!(!authz.make_owner("u2", "i-1").await.unwrap());
        assert_eq!(authz.owner_of("i-1").as_deref(), Some("u1"));

        assert!(authz.revoke_ownership("i-1", "u1").await.unwrap());
        assert!(authz.make_owner("u2", "i-1").await.unwrap());
        assert_eq!(authz.owner_of("i-1").as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn test_make_owner_is_idempotent_for_same_user() {
        let authz = LocalAuthorizer::new();
        assert!(authz.make_owner("u1", "i-1").await.unwrap());
        assert!(authz.make_owner("u1", "i-1").await.unwrap());
        assert_eq!(authz.get_user_instances("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_unknown_is_false() {
        let authz = LocalAuthorizer::new();
        assert!(!authz.revoke_ownership("i-1", "u1").await.unwrap());
        authz.make_owner("u1", "i-1").await.unwrap();
        assert!(!authz.revoke_ownership("i-1", "u2").await.unwrap());
        assert!(authz.is_user_instance("i-1", "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_owner_index_follows_revocation() {
        let authz = LocalAuthorizer::new();
        for id in ["i-1", "i-2", "i-3"] {
            authz.make_owner("u1", id).await.unwrap();
        }
        authz.make_owner("u2", "i-4").await.unwrap();

        assert!(authz.revoke_ownership("i-2", "u1").await.unwrap());
        assert_eq!(authz.owner_of("i-1").as_deref(), Some("u1"));
        assert_eq!(authz.owner_of("i-2"), None);
        assert_eq!(authz.owner_of("i-4").as_deref(), Some("u2"));
        assert!(!authz.is_user_instance("i-2", "u1").await.unwrap());

        let ids = authz.get_user_instances("u1").await.unwrap();
        assert_eq!(ids, HashSet::from(["i-1".to_string(), "i-3".to_string()]));
    }
}
