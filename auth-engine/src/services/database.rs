//! Durable store seams and their PostgreSQL implementation.
//!
//! The engine holds no long-lived in-process state: identities, sessions,
//! and backup codes live behind these traits so multiple engine instances
//! can share one backend. `MemoryStores` ships for tests and embedding.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::models::{BackupCode, Identity, MfaState, Session};

// ==================== Store traits ====================

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_for_login(
        &self,
        tenant_id: Uuid,
        login_name: &str,
    ) -> Result<Option<Identity>, anyhow::Error>;

    async fn find_by_id(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Identity>, anyhow::Error>;

    /// Returns false if the identity does not exist in that tenant.
    async fn set_password_hash(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, anyhow::Error>;

    async fn set_mfa_pending(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        secret: &str,
    ) -> Result<bool, anyhow::Error>;

    /// Activates the pending secret; the secret itself is left in place.
    async fn set_mfa_enabled(&self, tenant_id: Uuid, user_id: Uuid)
        -> Result<bool, anyhow::Error>;

    /// Disables MFA and clears the stored secret.
    async fn set_mfa_disabled(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), anyhow::Error>;

    async fn find(&self, session_id: Uuid) -> Result<Option<Session>, anyhow::Error>;

    async fn find_by_fingerprint(
        &self,
        tenant_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Session>, anyhow::Error>;

    /// Active (non-revoked, non-expired) sessions, oldest first.
    async fn list_active(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Session>, anyhow::Error>;

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error>;

    /// Swap the refresh fingerprint on rotation; also bumps last activity.
    async fn set_fingerprint(
        &self,
        session_id: Uuid,
        fingerprint: &str,
        at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error>;

    /// Owner-scoped revocation. Returns false if the session is missing,
    /// already revoked, or owned by someone else.
    async fn revoke(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error>;

    async fn revoke_all(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<u64, anyhow::Error>;
}

#[async_trait]
pub trait BackupCodeStore: Send + Sync {
    /// Replace the user's whole batch atomically.
    async fn replace_all(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), anyhow::Error>;

    async fn find_unused(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<BackupCode>, anyhow::Error>;

    /// Compare-and-set the used flag. Exactly one of two concurrent callers
    /// for the same code observes true.
    async fn mark_used(
        &self,
        backup_code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error>;

    async fn delete_all(&self, tenant_id: Uuid, user_id: Uuid) -> Result<u64, anyhow::Error>;
}

// ==================== PostgreSQL implementation ====================

/// PostgreSQL-backed stores.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                anyhow::anyhow!("Database health check failed: {}", e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for Database {
    async fn find_for_login(
        &self,
        tenant_id: Uuid,
        login_name: &str,
    ) -> Result<Option<Identity>, anyhow::Error> {
        sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE tenant_id = $1 AND LOWER(login_name) = LOWER($2)",
        )
        .bind(tenant_id)
        .bind(login_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }

    async fn find_by_id(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Identity>, anyhow::Error> {
        sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }

    async fn set_password_hash(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE identities SET password_hash = $1 WHERE tenant_id = $2 AND user_id = $3",
        )
        .bind(password_hash)
        .bind(tenant_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_mfa_pending(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        secret: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE identities SET mfa_state_code = $1, mfa_secret = $2 \
             WHERE tenant_id = $3 AND user_id = $4",
        )
        .bind(MfaState::Pending.as_str())
        .bind(secret)
        .bind(tenant_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_mfa_enabled(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, anyhow::Error> {
        // Guarded on the pending state so the activation proof cannot be skipped.
        let result = sqlx::query(
            "UPDATE identities SET mfa_state_code = $1 \
             WHERE tenant_id = $2 AND user_id = $3 AND mfa_state_code = $4",
        )
        .bind(MfaState::Enabled.as_str())
        .bind(tenant_id)
        .bind(user_id)
        .bind(MfaState::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_mfa_disabled(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE identities SET mfa_state_code = $1, mfa_secret = NULL \
             WHERE tenant_id = $2 AND user_id = $3",
        )
        .bind(MfaState::Disabled.as_str())
        .bind(tenant_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn insert(&self, session: &Session) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id, tenant_id, refresh_fingerprint,
                                  device_type, device_name, origin_address,
                                  last_activity_utc, created_utc, expires_utc, revoked_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(session.tenant_id)
        .bind(&session.refresh_fingerprint)
        .bind(&session.device_type)
        .bind(&session.device_name)
        .bind(&session.origin_address)
        .bind(session.last_activity_utc)
        .bind(session.created_utc)
        .bind(session.expires_utc)
        .bind(session.revoked_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn find(&self, session_id: Uuid) -> Result<Option<Session>, anyhow::Error> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }

    async fn find_by_fingerprint(
        &self,
        tenant_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Session>, anyhow::Error> {
        sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE tenant_id = $1 AND refresh_fingerprint = $2",
        )
        .bind(tenant_id)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }

    async fn list_active(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Session>, anyhow::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE tenant_id = $1 AND user_id = $2
              AND revoked_utc IS NULL AND expires_utc > NOW()
            ORDER BY created_utc ASC
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE sessions SET last_activity_utc = $1 WHERE session_id = $2")
            .bind(at)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn set_fingerprint(
        &self,
        session_id: Uuid,
        fingerprint: &str,
        at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            "UPDATE sessions SET refresh_fingerprint = $1, last_activity_utc = $2 \
             WHERE session_id = $3",
        )
        .bind(fingerprint)
        .bind(at)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn revoke(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET revoked_utc = $1
            WHERE session_id = $2 AND tenant_id = $3 AND user_id = $4
              AND revoked_utc IS NULL
            "#,
        )
        .bind(at)
        .bind(session_id)
        .bind(tenant_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<u64, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET revoked_utc = $1
            WHERE tenant_id = $2 AND user_id = $3
              AND revoked_utc IS NULL
              AND ($4::uuid IS NULL OR session_id <> $4)
            "#,
        )
        .bind(at)
        .bind(tenant_id)
        .bind(user_id)
        .bind(except)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BackupCodeStore for Database {
    async fn replace_all(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), anyhow::Error> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;

        sqlx::query("DELETE FROM backup_codes WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        for code in codes {
            sqlx::query(
                r#"
                INSERT INTO backup_codes (backup_code_id, user_id, tenant_id, code_hash,
                                          used, used_utc, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(code.backup_code_id)
            .bind(code.user_id)
            .bind(code.tenant_id)
            .bind(&code.code_hash)
            .bind(code.used)
            .bind(code.used_utc)
            .bind(code.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        }

        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn find_unused(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<BackupCode>, anyhow::Error> {
        sqlx::query_as::<_, BackupCode>(
            "SELECT * FROM backup_codes \
             WHERE tenant_id = $1 AND user_id = $2 AND used = FALSE",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }

    async fn mark_used(
        &self,
        backup_code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        // The `used = FALSE` guard is the CAS: one of two racing consumers
        // gets rows_affected = 0 and reports an invalid code.
        let result = sqlx::query(
            "UPDATE backup_codes SET used = TRUE, used_utc = $1 \
             WHERE backup_code_id = $2 AND used = FALSE",
        )
        .bind(at)
        .bind(backup_code_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, tenant_id: Uuid, user_id: Uuid) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM backup_codes WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected())
    }
}

// ==================== In-memory implementation ====================

/// In-memory stores for tests and embedded use.
#[derive(Default)]
pub struct MemoryStores {
    identities: Mutex<HashMap<Uuid, Identity>>,
    sessions: Mutex<HashMap<Uuid, Session>>,
    backup_codes: Mutex<HashMap<Uuid, BackupCode>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an identity, as the external user-profile store would.
    pub fn seed_identity(&self, identity: Identity) {
        self.identities
            .lock()
            .expect("identity mutex poisoned")
            .insert(identity.user_id, identity);
    }

    fn lock_identities(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Identity>>, anyhow::Error> {
        self.identities
            .lock()
            .map_err(|e| anyhow::anyhow!("identity mutex poisoned: {}", e))
    }

    fn lock_sessions(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Session>>, anyhow::Error> {
        self.sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("session mutex poisoned: {}", e))
    }

    fn lock_backup_codes(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, BackupCode>>, anyhow::Error> {
        self.backup_codes
            .lock()
            .map_err(|e| anyhow::anyhow!("backup code mutex poisoned: {}", e))
    }
}

#[async_trait]
impl IdentityStore for MemoryStores {
    async fn find_for_login(
        &self,
        tenant_id: Uuid,
        login_name: &str,
    ) -> Result<Option<Identity>, anyhow::Error> {
        let identities = self.lock_identities()?;
        Ok(identities
            .values()
            .find(|i| i.tenant_id == tenant_id && i.login_name.eq_ignore_ascii_case(login_name))
            .cloned())
    }

    async fn find_by_id(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Identity>, anyhow::Error> {
        let identities = self.lock_identities()?;
        Ok(identities
            .get(&user_id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn set_password_hash(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, anyhow::Error> {
        let mut identities = self.lock_identities()?;
        match identities.get_mut(&user_id).filter(|i| i.tenant_id == tenant_id) {
            Some(identity) => {
                identity.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_mfa_pending(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        secret: &str,
    ) -> Result<bool, anyhow::Error> {
        let mut identities = self.lock_identities()?;
        match identities.get_mut(&user_id).filter(|i| i.tenant_id == tenant_id) {
            Some(identity) => {
                identity.mfa_state_code = MfaState::Pending.as_str().to_string();
                identity.mfa_secret = Some(secret.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_mfa_enabled(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, anyhow::Error> {
        let mut identities = self.lock_identities()?;
        match identities.get_mut(&user_id).filter(|i| {
            i.tenant_id == tenant_id && i.mfa_state() == MfaState::Pending
        }) {
            Some(identity) => {
                identity.mfa_state_code = MfaState::Enabled.as_str().to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_mfa_disabled(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, anyhow::Error> {
        let mut identities = self.lock_identities()?;
        match identities.get_mut(&user_id).filter(|i| i.tenant_id == tenant_id) {
            Some(identity) => {
                identity.mfa_state_code = MfaState::Disabled.as_str().to_string();
                identity.mfa_secret = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStores {
    async fn insert(&self, session: &Session) -> Result<(), anyhow::Error> {
        let mut sessions = self.lock_sessions()?;
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn find(&self, session_id: Uuid) -> Result<Option<Session>, anyhow::Error> {
        let sessions = self.lock_sessions()?;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn find_by_fingerprint(
        &self,
        tenant_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Session>, anyhow::Error> {
        let sessions = self.lock_sessions()?;
        Ok(sessions
            .values()
            .find(|s| s.tenant_id == tenant_id && s.refresh_fingerprint == fingerprint)
            .cloned())
    }

    async fn list_active(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Session>, anyhow::Error> {
        let sessions = self.lock_sessions()?;
        let mut active: Vec<Session> = sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id && s.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|s| s.created_utc);
        Ok(active)
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut sessions = self.lock_sessions()?;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.last_activity_utc = at;
        }
        Ok(())
    }

    async fn set_fingerprint(
        &self,
        session_id: Uuid,
        fingerprint: &str,
        at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        let mut sessions = self.lock_sessions()?;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.refresh_fingerprint = fingerprint.to_string();
            session.last_activity_utc = at;
        }
        Ok(())
    }

    async fn revoke(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let mut sessions = self.lock_sessions()?;
        match sessions.get_mut(&session_id).filter(|s| {
            s.tenant_id == tenant_id && s.user_id == user_id && s.revoked_utc.is_none()
        }) {
            Some(session) => {
                session.revoked_utc = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<u64, anyhow::Error> {
        let mut sessions = self.lock_sessions()?;
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.tenant_id == tenant_id
                && session.user_id == user_id
                && session.revoked_utc.is_none()
                && except != Some(session.session_id)
            {
                session.revoked_utc = Some(at);
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl BackupCodeStore for MemoryStores {
    async fn replace_all(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), anyhow::Error> {
        let mut backup_codes = self.lock_backup_codes()?;
        backup_codes.retain(|_, c| !(c.tenant_id == tenant_id && c.user_id == user_id));
        for code in codes {
            backup_codes.insert(code.backup_code_id, code.clone());
        }
        Ok(())
    }

    async fn find_unused(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<BackupCode>, anyhow::Error> {
        let backup_codes = self.lock_backup_codes()?;
        Ok(backup_codes
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.user_id == user_id && !c.used)
            .cloned()
            .collect())
    }

    async fn mark_used(
        &self,
        backup_code_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let mut backup_codes = self.lock_backup_codes()?;
        match backup_codes.get_mut(&backup_code_id).filter(|c| !c.used) {
            Some(code) => {
                code.used = true;
                code.used_utc = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_all(&self, tenant_id: Uuid, user_id: Uuid) -> Result<u64, anyhow::Error> {
        let mut backup_codes = self.lock_backup_codes()?;
        let before = backup_codes.len();
        backup_codes.retain(|_, c| !(c.tenant_id == tenant_id && c.user_id == user_id));
        Ok((before - backup_codes.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceInfo;
    use chrono::Duration;

    #[tokio::test]
    async fn test_memory_identity_tenant_scoping() {
        let stores = MemoryStores::new();
        let tenant = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();
        let identity = Identity::new(tenant, "alice@example.com".into(), "$2b$hash".into());
        let user_id = identity.user_id;
        stores.seed_identity(identity);

        assert!(stores.find_by_id(tenant, user_id).await.unwrap().is_some());
        assert!(stores.find_by_id(other_tenant, user_id).await.unwrap().is_none());
        assert!(stores
            .find_for_login(tenant, "ALICE@EXAMPLE.COM")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_memory_mfa_enabled_requires_pending() {
        let stores = MemoryStores::new();
        let tenant = Uuid::new_v4();
        let identity = Identity::new(tenant, "alice@example.com".into(), "$2b$hash".into());
        let user_id = identity.user_id;
        stores.seed_identity(identity);

        // Not pending yet: the enable guard refuses.
        assert!(!stores.set_mfa_enabled(tenant, user_id).await.unwrap());

        assert!(stores.set_mfa_pending(tenant, user_id, "SECRET").await.unwrap());
        assert!(stores.set_mfa_enabled(tenant, user_id).await.unwrap());

        let identity = stores.find_by_id(tenant, user_id).await.unwrap().unwrap();
        assert_eq!(identity.mfa_state(), MfaState::Enabled);
        assert_eq!(identity.mfa_secret.as_deref(), Some("SECRET"));
    }

    #[tokio::test]
    async fn test_memory_backup_code_mark_used_is_single_shot() {
        let stores = MemoryStores::new();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (_, records) = BackupCode::generate_batch(user, tenant, 1);
        let id = records[0].backup_code_id;
        stores.replace_all(tenant, user, &records).await.unwrap();

        assert!(stores.mark_used(id, Utc::now()).await.unwrap());
        assert!(!stores.mark_used(id, Utc::now()).await.unwrap());
        assert!(stores.find_unused(tenant, user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_revoke_is_owner_scoped() {
        let stores = MemoryStores::new();
        let tenant = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let session = Session::new(
            owner,
            tenant,
            "tok",
            DeviceInfo::unknown(),
            "203.0.113.7".into(),
            Duration::days(7),
        );
        let session_id = session.session_id;
        stores.insert(&session).await.unwrap();

        assert!(!stores.revoke(session_id, tenant, stranger, Utc::now()).await.unwrap());
        assert!(stores.revoke(session_id, tenant, owner, Utc::now()).await.unwrap());
        // Idempotent: a second revoke reports false.
        assert!(!stores.revoke(session_id, tenant, owner, Utc::now()).await.unwrap());
    }
}
