//! Brute-force lockout guard.
//!
//! Counts recent failures per (identity, tenant) and per (origin, tenant) in
//! the shared cache. Lock state is derived from the counters at check time,
//! so lockouts self-expire as the window slides; there is no unlock step.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::LockoutConfig;
use crate::services::cache::KeyValueCache;
use crate::services::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    Clear,
    Locked { until: DateTime<Utc> },
}

#[derive(Clone)]
pub struct LockoutGuard {
    cache: Arc<dyn KeyValueCache>,
    max_failures: i64,
    window_seconds: i64,
}

impl LockoutGuard {
    pub fn new(cache: Arc<dyn KeyValueCache>, config: &LockoutConfig) -> Self {
        Self {
            cache,
            max_failures: config.max_failures,
            window_seconds: config.window_seconds,
        }
    }

    fn identity_key(tenant: Uuid, login_name: &str) -> String {
        format!("{}:lockout:ident:{}", tenant, login_name.to_lowercase())
    }

    fn origin_key(tenant: Uuid, origin: &str) -> String {
        format!("{}:lockout:origin:{}", tenant, origin)
    }

    /// Evaluate before any credential work: either threshold locks, and a
    /// locked caller learns nothing about whether the identity exists.
    pub async fn check(
        &self,
        login_name: &str,
        origin: &str,
        tenant: Uuid,
    ) -> Result<LockoutStatus, EngineError> {
        for key in [
            Self::identity_key(tenant, login_name),
            Self::origin_key(tenant, origin),
        ] {
            let count = self
                .cache
                .get(&key)
                .await
                .map_err(EngineError::Cache)?
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);

            if count >= self.max_failures {
                let remaining = self
                    .cache
                    .ttl_remaining(&key)
                    .await
                    .map_err(EngineError::Cache)?
                    .unwrap_or(self.window_seconds);
                return Ok(LockoutStatus::Locked {
                    until: Utc::now() + Duration::seconds(remaining),
                });
            }
        }

        Ok(LockoutStatus::Clear)
    }

    /// Count a failed attempt against both the identity and the origin.
    pub async fn record_failure(
        &self,
        login_name: &str,
        origin: &str,
        tenant: Uuid,
    ) -> Result<(), EngineError> {
        let identity_count = self
            .cache
            .increment(&Self::identity_key(tenant, login_name), self.window_seconds)
            .await
            .map_err(EngineError::Cache)?;
        self.cache
            .increment(&Self::origin_key(tenant, origin), self.window_seconds)
            .await
            .map_err(EngineError::Cache)?;

        if identity_count == self.max_failures {
            tracing::warn!(
                security_event = "lockout_threshold_reached",
                tenant_id = %tenant,
                origin = origin,
                failures = identity_count,
                "Identity reached the lockout threshold"
            );
        }

        Ok(())
    }

    /// Reset the identity counter after a successful login. The origin
    /// counter keeps its window so a distributed guesser cannot reset
    /// itself by signing in to its own account.
    pub async fn clear(&self, login_name: &str, tenant: Uuid) -> Result<(), EngineError> {
        self.cache
            .delete(&Self::identity_key(tenant, login_name))
            .await
            .map_err(EngineError::Cache)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MemoryCache;

    fn guard(max_failures: i64, window_seconds: i64) -> LockoutGuard {
        LockoutGuard::new(
            Arc::new(MemoryCache::new()),
            &LockoutConfig {
                max_failures,
                window_seconds,
            },
        )
    }

    #[tokio::test]
    async fn test_clear_below_threshold() {
        let guard = guard(3, 60);
        let tenant = Uuid::new_v4();

        guard.record_failure("alice", "203.0.113.7", tenant).await.unwrap();
        guard.record_failure("alice", "203.0.113.7", tenant).await.unwrap();

        assert_eq!(
            guard.check("alice", "203.0.113.7", tenant).await.unwrap(),
            LockoutStatus::Clear
        );
    }

    #[tokio::test]
    async fn test_identity_threshold_locks() {
        let guard = guard(3, 60);
        let tenant = Uuid::new_v4();

        for _ in 0..3 {
            guard.record_failure("alice", "203.0.113.7", tenant).await.unwrap();
        }

        assert!(matches!(
            guard.check("alice", "203.0.113.7", tenant).await.unwrap(),
            LockoutStatus::Locked { .. }
        ));
        // A fresh origin does not help: the identity counter locks alone.
        assert!(matches!(
            guard.check("alice", "198.51.100.9", tenant).await.unwrap(),
            LockoutStatus::Locked { .. }
        ));
    }

    #[tokio::test]
    async fn test_origin_threshold_locks_other_identities() {
        let guard = guard(3, 60);
        let tenant = Uuid::new_v4();

        // One origin spraying different identities.
        guard.record_failure("a@x.com", "203.0.113.7", tenant).await.unwrap();
        guard.record_failure("b@x.com", "203.0.113.7", tenant).await.unwrap();
        guard.record_failure("c@x.com", "203.0.113.7", tenant).await.unwrap();

        assert!(matches!(
            guard.check("d@x.com", "203.0.113.7", tenant).await.unwrap(),
            LockoutStatus::Locked { .. }
        ));
    }

    #[tokio::test]
    async fn test_lockout_is_tenant_scoped() {
        let guard = guard(3, 60);
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        for _ in 0..3 {
            guard.record_failure("alice", "203.0.113.7", tenant_a).await.unwrap();
        }

        assert_eq!(
            guard.check("alice", "203.0.113.7", tenant_b).await.unwrap(),
            LockoutStatus::Clear
        );
    }

    #[tokio::test]
    async fn test_clear_resets_identity_counter() {
        let guard = guard(3, 60);
        let tenant = Uuid::new_v4();

        for _ in 0..3 {
            guard.record_failure("alice", "203.0.113.7", tenant).await.unwrap();
        }
        guard.clear("alice", tenant).await.unwrap();

        // Identity counter is gone; origin counter remains at 3 and still locks.
        assert!(matches!(
            guard.check("alice", "203.0.113.7", tenant).await.unwrap(),
            LockoutStatus::Locked { .. }
        ));
        assert_eq!(
            guard.check("alice", "198.51.100.9", tenant).await.unwrap(),
            LockoutStatus::Clear
        );
    }

    #[tokio::test]
    async fn test_lockout_expires_with_window() {
        let guard = guard(2, 1);
        let tenant = Uuid::new_v4();

        guard.record_failure("alice", "203.0.113.7", tenant).await.unwrap();
        guard.record_failure("alice", "203.0.113.7", tenant).await.unwrap();
        assert!(matches!(
            guard.check("alice", "203.0.113.7", tenant).await.unwrap(),
            LockoutStatus::Locked { .. }
        ));

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        assert_eq!(
            guard.check("alice", "203.0.113.7", tenant).await.unwrap(),
            LockoutStatus::Clear
        );
    }
}
