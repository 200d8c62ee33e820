//! Session registry: per-device session lifecycle on top of the session store.
//!
//! Enforces the per-user session cap by evicting the oldest active sessions
//! when a new one pushes the count over the limit.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::models::{DeviceInfo, Session};
use crate::services::database::SessionStore;
use crate::services::error::EngineError;

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    max_per_user: usize,
    session_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, config: &SessionConfig, session_ttl: Duration) -> Self {
        Self {
            store,
            max_per_user: config.max_per_user,
            session_ttl,
        }
    }

    /// Create a session for a fresh refresh token, then evict the oldest
    /// active sessions if the user is over the cap. The cap is soft: a burst
    /// of concurrent logins may briefly exceed it, and the next creation
    /// trims back down.
    pub async fn create(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        refresh_token: &str,
        device: DeviceInfo,
        origin_address: String,
    ) -> Result<Session, EngineError> {
        let session = Session::new(
            user_id,
            tenant_id,
            refresh_token,
            device,
            origin_address,
            self.session_ttl,
        );
        self.store
            .insert(&session)
            .await
            .map_err(EngineError::Store)?;

        let active = self
            .store
            .list_active(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?;
        if active.len() > self.max_per_user {
            let excess = active.len() - self.max_per_user;
            // list_active is ordered oldest first.
            for victim in active.iter().take(excess) {
                self.store
                    .revoke(victim.session_id, tenant_id, user_id, Utc::now())
                    .await
                    .map_err(EngineError::Store)?;
                tracing::info!(
                    session_id = %victim.session_id,
                    user_id = %user_id,
                    tenant_id = %tenant_id,
                    device = %victim.device_name,
                    "Evicted oldest session over the per-user cap"
                );
            }
        }

        Ok(session)
    }

    /// Find the live session holding this refresh token, if any.
    pub async fn find_live_by_refresh(
        &self,
        tenant_id: Uuid,
        refresh_token: &str,
    ) -> Result<Option<Session>, EngineError> {
        let session = self
            .store
            .find_by_fingerprint(tenant_id, &Session::fingerprint(refresh_token))
            .await
            .map_err(EngineError::Store)?;
        Ok(session.filter(|s| s.is_active()))
    }

    /// Rebind a session to a new refresh token after rotation.
    pub async fn rotate(
        &self,
        session_id: Uuid,
        new_refresh_token: &str,
    ) -> Result<(), EngineError> {
        self.store
            .set_fingerprint(session_id, &Session::fingerprint(new_refresh_token), Utc::now())
            .await
            .map_err(EngineError::Store)
    }

    pub async fn touch(&self, session_id: Uuid) -> Result<(), EngineError> {
        self.store
            .touch(session_id, Utc::now())
            .await
            .map_err(EngineError::Store)
    }

    /// Active sessions for the user, oldest first.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Session>, EngineError> {
        self.store
            .list_active(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)
    }

    pub async fn find(&self, session_id: Uuid) -> Result<Option<Session>, EngineError> {
        self.store
            .find(session_id)
            .await
            .map_err(EngineError::Store)
    }

    /// Revoke one session the user owns. False if it is already revoked,
    /// missing, or not theirs.
    pub async fn revoke(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, EngineError> {
        self.store
            .revoke(session_id, tenant_id, user_id, Utc::now())
            .await
            .map_err(EngineError::Store)
    }

    /// Revoke every active session for the user except `keep`.
    pub async fn revoke_all(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<u64, EngineError> {
        let revoked = self
            .store
            .revoke_all(tenant_id, user_id, keep, Utc::now())
            .await
            .map_err(EngineError::Store)?;
        if revoked > 0 {
            tracing::info!(
                user_id = %user_id,
                tenant_id = %tenant_id,
                revoked = revoked,
                "Revoked all sessions for user"
            );
        }
        Ok(revoked)
    }
}
