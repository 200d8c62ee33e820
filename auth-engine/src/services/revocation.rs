//! Revocation store: the cache entry whose existence is the proof that a
//! refresh/reset/magic-link token has not been used or revoked.
//!
//! At most one entry exists per issued token; deleting it is the only
//! revocation mechanism (absence = invalid, so no blacklist is needed).

use std::sync::Arc;

use uuid::Uuid;

use crate::services::cache::KeyValueCache;
use crate::services::error::EngineError;

/// Purposes tracked in the revocation cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Refresh,
    PasswordReset,
    MagicLink,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Refresh => "refresh",
            TokenPurpose::PasswordReset => "password_reset",
            TokenPurpose::MagicLink => "magic_link",
        }
    }
}

#[derive(Clone)]
pub struct RevocationStore {
    cache: Arc<dyn KeyValueCache>,
}

impl RevocationStore {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    /// Cache key layout: `{tenant}:{purpose}:{token}`.
    fn key(tenant: Uuid, purpose: TokenPurpose, token: &str) -> String {
        format!("{}:{}:{}", tenant, purpose.as_str(), token)
    }

    /// Record a live token with a TTL equal to its validity window.
    pub async fn put(
        &self,
        purpose: TokenPurpose,
        tenant: Uuid,
        token: &str,
        subject: Uuid,
        ttl_seconds: i64,
    ) -> Result<(), EngineError> {
        self.cache
            .put(
                &Self::key(tenant, purpose, token),
                &subject.to_string(),
                ttl_seconds,
            )
            .await
            .map_err(EngineError::Cache)
    }

    /// Look up the subject a live token was issued to.
    pub async fn get(
        &self,
        purpose: TokenPurpose,
        tenant: Uuid,
        token: &str,
    ) -> Result<Option<Uuid>, EngineError> {
        let value = self
            .cache
            .get(&Self::key(tenant, purpose, token))
            .await
            .map_err(EngineError::Cache)?;

        Ok(value.and_then(|v| match v.parse::<Uuid>() {
            Ok(subject) => Some(subject),
            Err(_) => {
                tracing::warn!(
                    purpose = purpose.as_str(),
                    tenant_id = %tenant,
                    "Unparseable subject in revocation entry; treating as absent"
                );
                None
            }
        }))
    }

    /// Revoke (or consume) a token. Returns whether an entry existed.
    pub async fn delete(
        &self,
        purpose: TokenPurpose,
        tenant: Uuid,
        token: &str,
    ) -> Result<bool, EngineError> {
        self.cache
            .delete(&Self::key(tenant, purpose, token))
            .await
            .map_err(EngineError::Cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MemoryCache;

    fn store() -> RevocationStore {
        RevocationStore::new(Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let store = store();
        let tenant = Uuid::new_v4();
        let subject = Uuid::new_v4();

        store
            .put(TokenPurpose::Refresh, tenant, "tok", subject, 60)
            .await
            .unwrap();

        assert_eq!(
            store.get(TokenPurpose::Refresh, tenant, "tok").await.unwrap(),
            Some(subject)
        );

        assert!(store.delete(TokenPurpose::Refresh, tenant, "tok").await.unwrap());
        assert_eq!(store.get(TokenPurpose::Refresh, tenant, "tok").await.unwrap(), None);
        // Second delete is a no-op.
        assert!(!store.delete(TokenPurpose::Refresh, tenant, "tok").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_are_tenant_scoped() {
        let store = store();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let subject = Uuid::new_v4();

        store
            .put(TokenPurpose::MagicLink, tenant_a, "tok", subject, 60)
            .await
            .unwrap();

        assert_eq!(
            store.get(TokenPurpose::MagicLink, tenant_b, "tok").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_entries_are_purpose_scoped() {
        let store = store();
        let tenant = Uuid::new_v4();
        let subject = Uuid::new_v4();

        store
            .put(TokenPurpose::PasswordReset, tenant, "tok", subject, 60)
            .await
            .unwrap();

        assert_eq!(store.get(TokenPurpose::Refresh, tenant, "tok").await.unwrap(), None);
    }
}
