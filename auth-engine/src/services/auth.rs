//! Authentication orchestrator.
//!
//! Ties the codec, revocation store, lockout guard, session registry, and
//! MFA verifier into the credential and token flows. Expected denials are
//! values (`Denied`, `None`, `false`); `Err` means a backend failed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{DeviceInfo, MfaState, Session};
use crate::services::cache::KeyValueCache;
use crate::services::database::{BackupCodeStore, IdentityStore, SessionStore};
use crate::services::error::EngineError;
use crate::services::lockout::{LockoutGuard, LockoutStatus};
use crate::services::mfa::{MfaEnrollment, MfaVerifier};
use crate::services::revocation::{RevocationStore, TokenPurpose};
use crate::services::sessions::SessionRegistry;
use crate::services::token::{Claims, TokenCodec, TokenKind};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// A granted token pair, bound to one device session.
#[derive(Debug, Clone)]
pub struct Grant {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    InvalidCredentials,
    LockedOut { until: DateTime<Utc> },
    IdentityInactive,
    InvalidToken,
    MfaNotEnabled,
    InvalidMfaCode,
}

/// Outcome of a password login.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Granted(Grant),
    /// Credentials were correct but a second factor is required. No tokens
    /// and no session exist yet.
    MfaRequired { pending_subject: Uuid },
    Denied(DenyReason),
}

/// Outcome of the token-producing flows other than password login.
#[derive(Debug, Clone)]
pub enum TokenOutcome {
    Granted(Grant),
    Denied(DenyReason),
}

/// Second factor presented to complete an MFA login.
#[derive(Debug, Clone)]
pub enum SecondFactor {
    Totp(String),
    BackupCode(String),
}

#[derive(Clone)]
pub struct AuthEngine {
    identities: Arc<dyn IdentityStore>,
    codec: TokenCodec,
    revocations: RevocationStore,
    lockout: LockoutGuard,
    registry: SessionRegistry,
    mfa: MfaVerifier,
}

impl AuthEngine {
    pub fn new(
        config: &EngineConfig,
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
        backup_codes: Arc<dyn BackupCodeStore>,
        cache: Arc<dyn KeyValueCache>,
    ) -> Self {
        let codec = TokenCodec::new(&config.token);
        let refresh_ttl = codec.ttl_for(TokenKind::Refresh);
        Self {
            identities,
            codec,
            revocations: RevocationStore::new(cache.clone()),
            lockout: LockoutGuard::new(cache, &config.lockout),
            registry: SessionRegistry::new(sessions, &config.sessions, refresh_ttl),
            mfa: MfaVerifier::new(backup_codes, &config.mfa),
        }
    }

    // ==================== Login flows ====================

    /// Password login. The lockout guard runs before any credential work so
    /// a locked caller learns nothing about the identity.
    pub async fn login(
        &self,
        tenant_id: Uuid,
        login_name: &str,
        password: &Password,
        device_descriptor: &str,
        origin_address: &str,
    ) -> Result<LoginOutcome, EngineError> {
        if let LockoutStatus::Locked { until } =
            self.lockout.check(login_name, origin_address, tenant_id).await?
        {
            return Ok(LoginOutcome::Denied(DenyReason::LockedOut { until }));
        }

        let identity = match self
            .identities
            .find_for_login(tenant_id, login_name)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) => identity,
            None => {
                // Unknown identities count toward lockout like wrong passwords.
                self.lockout
                    .record_failure(login_name, origin_address, tenant_id)
                    .await?;
                return Ok(LoginOutcome::Denied(DenyReason::InvalidCredentials));
            }
        };

        let stored = PasswordHashString::new(identity.password_hash.clone());
        if verify_password(password, &stored).is_err() {
            self.lockout
                .record_failure(login_name, origin_address, tenant_id)
                .await?;
            return Ok(LoginOutcome::Denied(DenyReason::InvalidCredentials));
        }

        if !identity.active {
            return Ok(LoginOutcome::Denied(DenyReason::IdentityInactive));
        }

        self.lockout.clear(login_name, tenant_id).await?;

        if identity.mfa_enabled() {
            return Ok(LoginOutcome::MfaRequired {
                pending_subject: identity.user_id,
            });
        }

        let grant = self
            .establish_session(identity.user_id, tenant_id, device_descriptor, origin_address)
            .await?;
        tracing::info!(
            user_id = %identity.user_id,
            tenant_id = %tenant_id,
            session_id = %grant.session_id,
            "Login succeeded"
        );
        Ok(LoginOutcome::Granted(grant))
    }

    /// Complete a login that stopped at `MfaRequired`.
    pub async fn complete_mfa(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        factor: SecondFactor,
        device_descriptor: &str,
        origin_address: &str,
    ) -> Result<TokenOutcome, EngineError> {
        let identity = match self
            .identities
            .find_by_id(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) => identity,
            None => return Ok(TokenOutcome::Denied(DenyReason::InvalidCredentials)),
        };

        // Guessed factors count toward the same window as guessed passwords,
        // so the gate has to run here too, before any factor is examined.
        if let LockoutStatus::Locked { until } = self
            .lockout
            .check(&identity.login_name, origin_address, tenant_id)
            .await?
        {
            return Ok(TokenOutcome::Denied(DenyReason::LockedOut { until }));
        }

        if !identity.active {
            return Ok(TokenOutcome::Denied(DenyReason::IdentityInactive));
        }
        if identity.mfa_state() != MfaState::Enabled {
            return Ok(TokenOutcome::Denied(DenyReason::MfaNotEnabled));
        }

        let verified = match &factor {
            SecondFactor::Totp(code) => match &identity.mfa_secret {
                Some(secret) => self.mfa.verify_totp(secret, &identity.login_name, code),
                None => false,
            },
            SecondFactor::BackupCode(code) => {
                self.mfa.consume_backup_code(tenant_id, user_id, code).await?
            }
        };

        if !verified {
            // Guessed second factors count toward the same lockout window.
            self.lockout
                .record_failure(&identity.login_name, origin_address, tenant_id)
                .await?;
            return Ok(TokenOutcome::Denied(DenyReason::InvalidMfaCode));
        }

        self.lockout.clear(&identity.login_name, tenant_id).await?;
        let grant = self
            .establish_session(user_id, tenant_id, device_descriptor, origin_address)
            .await?;
        Ok(TokenOutcome::Granted(grant))
    }

    /// Issue tokens for an identity whose authentication happened elsewhere,
    /// such as a federated sign-in already validated upstream.
    pub async fn login_verified(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        device_descriptor: &str,
        origin_address: &str,
    ) -> Result<TokenOutcome, EngineError> {
        let identity = match self
            .identities
            .find_by_id(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) => identity,
            None => return Ok(TokenOutcome::Denied(DenyReason::InvalidCredentials)),
        };
        if !identity.active {
            return Ok(TokenOutcome::Denied(DenyReason::IdentityInactive));
        }

        let grant = self
            .establish_session(user_id, tenant_id, device_descriptor, origin_address)
            .await?;
        Ok(TokenOutcome::Granted(grant))
    }

    /// Mint a token pair and its session, recording the refresh token in the
    /// revocation cache before the session row exists. A failure partway
    /// leaves at most a dangling cache entry that no session backs and that
    /// dies by TTL, never an orphaned session holding a cap slot.
    async fn establish_session(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        device_descriptor: &str,
        origin_address: &str,
    ) -> Result<Grant, EngineError> {
        let refresh_ttl = self.codec.ttl_for(TokenKind::Refresh);
        let refresh_token =
            self.codec
                .issue(user_id, tenant_id, TokenKind::Refresh, refresh_ttl, None)?;

        self.revocations
            .put(
                TokenPurpose::Refresh,
                tenant_id,
                &refresh_token,
                user_id,
                refresh_ttl.num_seconds(),
            )
            .await?;

        let session = self
            .registry
            .create(
                user_id,
                tenant_id,
                &refresh_token,
                DeviceInfo::classify(device_descriptor),
                origin_address.to_string(),
            )
            .await?;

        let access_token = self.codec.issue(
            user_id,
            tenant_id,
            TokenKind::Access,
            self.codec.ttl_for(TokenKind::Access),
            Some(session.session_id),
        )?;

        Ok(Grant {
            access_token,
            refresh_token,
            expires_in: self.codec.access_ttl_seconds(),
            session_id: session.session_id,
        })
    }

    // ==================== Token flows ====================

    /// Rotate a refresh token: a valid presentation yields a new pair and
    /// permanently retires the old token.
    ///
    /// The new revocation entry is written before the old one is deleted, so
    /// a crash in between leaves both tokens live rather than stranding the
    /// session with neither.
    pub async fn refresh(
        &self,
        tenant_id: Uuid,
        refresh_token: &str,
    ) -> Result<TokenOutcome, EngineError> {
        let claims = match self.codec.verify(refresh_token, TokenKind::Refresh, Some(tenant_id)) {
            Some(claims) => claims,
            None => return Ok(TokenOutcome::Denied(DenyReason::InvalidToken)),
        };

        match self
            .revocations
            .get(TokenPurpose::Refresh, tenant_id, refresh_token)
            .await?
        {
            Some(subject) if subject == claims.sub => {}
            _ => {
                // Structurally valid but absent from the cache: revoked, or
                // already rotated and now replayed.
                tracing::warn!(
                    security_event = "refresh_token_replay",
                    subject = %claims.sub,
                    tenant_id = %tenant_id,
                    "Refresh token presented without a live revocation entry"
                );
                return Ok(TokenOutcome::Denied(DenyReason::InvalidToken));
            }
        }

        let identity = match self
            .identities
            .find_by_id(tenant_id, claims.sub)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) => identity,
            None => return Ok(TokenOutcome::Denied(DenyReason::InvalidToken)),
        };
        if !identity.active {
            return Ok(TokenOutcome::Denied(DenyReason::IdentityInactive));
        }

        let session = match self.registry.find_live_by_refresh(tenant_id, refresh_token).await? {
            Some(session) if session.user_id == claims.sub => session,
            _ => return Ok(TokenOutcome::Denied(DenyReason::InvalidToken)),
        };

        let refresh_ttl = self.codec.ttl_for(TokenKind::Refresh);
        let new_refresh =
            self.codec
                .issue(claims.sub, tenant_id, TokenKind::Refresh, refresh_ttl, None)?;
        let new_access = self.codec.issue(
            claims.sub,
            tenant_id,
            TokenKind::Access,
            self.codec.ttl_for(TokenKind::Access),
            Some(session.session_id),
        )?;

        self.revocations
            .put(
                TokenPurpose::Refresh,
                tenant_id,
                &new_refresh,
                claims.sub,
                refresh_ttl.num_seconds(),
            )
            .await?;
        self.registry.rotate(session.session_id, &new_refresh).await?;
        self.revocations
            .delete(TokenPurpose::Refresh, tenant_id, refresh_token)
            .await?;

        Ok(TokenOutcome::Granted(Grant {
            access_token: new_access,
            refresh_token: new_refresh,
            expires_in: self.codec.access_ttl_seconds(),
            session_id: session.session_id,
        }))
    }

    /// End the session holding this refresh token. Returns whether anything
    /// was revoked; repeating a logout is a quiet no-op.
    pub async fn logout(&self, tenant_id: Uuid, refresh_token: &str) -> Result<bool, EngineError> {
        let entry_existed = self
            .revocations
            .delete(TokenPurpose::Refresh, tenant_id, refresh_token)
            .await?;

        let session_revoked = match self
            .registry
            .find_live_by_refresh(tenant_id, refresh_token)
            .await?
        {
            Some(session) => {
                self.registry
                    .revoke(session.session_id, tenant_id, session.user_id)
                    .await?
            }
            None => false,
        };

        Ok(entry_existed || session_revoked)
    }

    /// Verify an access token for the given tenant. A live claim with a
    /// session id also bumps that session's activity timestamp.
    pub async fn verify_access(
        &self,
        token: &str,
        tenant_id: Uuid,
    ) -> Result<Option<Claims>, EngineError> {
        let claims = match self.codec.verify(token, TokenKind::Access, Some(tenant_id)) {
            Some(claims) => claims,
            None => return Ok(None),
        };

        if let Some(session_id) = claims.sid {
            self.registry.touch(session_id).await?;
        }

        Ok(Some(claims))
    }

    // ==================== Password recovery ====================

    /// Issue a single-use password reset token. Returns `None` for unknown
    /// or inactive identities, indistinguishable from success to the caller
    /// delivering the message.
    pub async fn request_password_reset(
        &self,
        tenant_id: Uuid,
        login_name: &str,
    ) -> Result<Option<String>, EngineError> {
        let identity = match self
            .identities
            .find_for_login(tenant_id, login_name)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) if identity.active => identity,
            _ => return Ok(None),
        };

        let ttl = self.codec.ttl_for(TokenKind::PasswordReset);
        let token = self.codec.issue(
            identity.user_id,
            tenant_id,
            TokenKind::PasswordReset,
            ttl,
            None,
        )?;
        self.revocations
            .put(
                TokenPurpose::PasswordReset,
                tenant_id,
                &token,
                identity.user_id,
                ttl.num_seconds(),
            )
            .await?;
        Ok(Some(token))
    }

    /// Consume a reset token and set the new password. The entry is deleted
    /// before the password is written, so concurrent presenters of the same
    /// token produce at most one password change. Success revokes every
    /// session.
    pub async fn complete_password_reset(
        &self,
        tenant_id: Uuid,
        token: &str,
        new_password: &Password,
    ) -> Result<bool, EngineError> {
        let claims = match self.codec.verify(token, TokenKind::PasswordReset, Some(tenant_id)) {
            Some(claims) => claims,
            None => return Ok(false),
        };

        match self
            .revocations
            .get(TokenPurpose::PasswordReset, tenant_id, token)
            .await?
        {
            Some(subject) if subject == claims.sub => {}
            _ => return Ok(false),
        }
        if !self
            .revocations
            .delete(TokenPurpose::PasswordReset, tenant_id, token)
            .await?
        {
            // Another presenter consumed it between the get and the delete.
            return Ok(false);
        }

        let hash = hash_password(new_password).map_err(EngineError::Hashing)?;
        if !self
            .identities
            .set_password_hash(tenant_id, claims.sub, hash.as_str())
            .await
            .map_err(EngineError::Store)?
        {
            return Ok(false);
        }

        self.registry.revoke_all(tenant_id, claims.sub, None).await?;
        tracing::info!(
            user_id = %claims.sub,
            tenant_id = %tenant_id,
            "Password reset completed; all sessions revoked"
        );
        Ok(true)
    }

    /// Change a password with the current one in hand. Revokes every other
    /// session, sparing `keep_session` when supplied.
    pub async fn change_password(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        current_password: &Password,
        new_password: &Password,
        keep_session: Option<Uuid>,
    ) -> Result<bool, EngineError> {
        let identity = match self
            .identities
            .find_by_id(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) if identity.active => identity,
            _ => return Ok(false),
        };

        let stored = PasswordHashString::new(identity.password_hash.clone());
        if verify_password(current_password, &stored).is_err() {
            return Ok(false);
        }

        let hash = hash_password(new_password).map_err(EngineError::Hashing)?;
        if !self
            .identities
            .set_password_hash(tenant_id, user_id, hash.as_str())
            .await
            .map_err(EngineError::Store)?
        {
            return Ok(false);
        }

        self.registry.revoke_all(tenant_id, user_id, keep_session).await?;
        Ok(true)
    }

    // ==================== Magic links ====================

    /// Issue a single-use magic-link token, `None` for unknown or inactive
    /// identities.
    pub async fn issue_magic_link(
        &self,
        tenant_id: Uuid,
        login_name: &str,
    ) -> Result<Option<String>, EngineError> {
        let identity = match self
            .identities
            .find_for_login(tenant_id, login_name)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) if identity.active => identity,
            _ => return Ok(None),
        };

        let ttl = self.codec.ttl_for(TokenKind::MagicLink);
        let token =
            self.codec
                .issue(identity.user_id, tenant_id, TokenKind::MagicLink, ttl, None)?;
        self.revocations
            .put(
                TokenPurpose::MagicLink,
                tenant_id,
                &token,
                identity.user_id,
                ttl.num_seconds(),
            )
            .await?;
        Ok(Some(token))
    }

    /// Exchange a magic-link token for a session. Single-use: the entry is
    /// consumed before tokens are minted.
    pub async fn consume_magic_link(
        &self,
        tenant_id: Uuid,
        token: &str,
        device_descriptor: &str,
        origin_address: &str,
    ) -> Result<TokenOutcome, EngineError> {
        let claims = match self.codec.verify(token, TokenKind::MagicLink, Some(tenant_id)) {
            Some(claims) => claims,
            None => return Ok(TokenOutcome::Denied(DenyReason::InvalidToken)),
        };

        match self
            .revocations
            .get(TokenPurpose::MagicLink, tenant_id, token)
            .await?
        {
            Some(subject) if subject == claims.sub => {}
            _ => return Ok(TokenOutcome::Denied(DenyReason::InvalidToken)),
        }
        if !self
            .revocations
            .delete(TokenPurpose::MagicLink, tenant_id, token)
            .await?
        {
            return Ok(TokenOutcome::Denied(DenyReason::InvalidToken));
        }

        let identity = match self
            .identities
            .find_by_id(tenant_id, claims.sub)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) => identity,
            None => return Ok(TokenOutcome::Denied(DenyReason::InvalidToken)),
        };
        if !identity.active {
            return Ok(TokenOutcome::Denied(DenyReason::IdentityInactive));
        }

        let grant = self
            .establish_session(claims.sub, tenant_id, device_descriptor, origin_address)
            .await?;
        Ok(TokenOutcome::Granted(grant))
    }

    // ==================== MFA lifecycle ====================

    /// Start TOTP enrollment. Allowed from `NotConfigured` and `Disabled`
    /// only; the identity moves to `Pending` and gets a fresh backup-code
    /// batch. Login does not demand a factor until activation proves the
    /// authenticator works.
    pub async fn begin_mfa_enrollment(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MfaEnrollment>, EngineError> {
        let identity = match self
            .identities
            .find_by_id(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) if identity.active => identity,
            _ => return Ok(None),
        };
        if !matches!(
            identity.mfa_state(),
            MfaState::NotConfigured | MfaState::Disabled
        ) {
            return Ok(None);
        }

        let (secret, otpauth_uri) = self.mfa.generate_enrollment(&identity.login_name)?;
        if !self
            .identities
            .set_mfa_pending(tenant_id, user_id, &secret)
            .await
            .map_err(EngineError::Store)?
        {
            return Ok(None);
        }
        let backup_codes = self.mfa.issue_backup_codes(tenant_id, user_id).await?;

        Ok(Some(MfaEnrollment {
            secret,
            otpauth_uri,
            backup_codes,
        }))
    }

    /// Prove the pending authenticator with one TOTP code and move the
    /// identity to `Enabled`.
    pub async fn activate_mfa(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        totp_code: &str,
    ) -> Result<bool, EngineError> {
        let identity = match self
            .identities
            .find_by_id(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) => identity,
            None => return Ok(false),
        };
        let secret = match (&identity.mfa_secret, identity.mfa_state()) {
            (Some(secret), MfaState::Pending) => secret.clone(),
            _ => return Ok(false),
        };

        if !self.mfa.verify_totp(&secret, &identity.login_name, totp_code) {
            return Ok(false);
        }

        let enabled = self
            .identities
            .set_mfa_enabled(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?;
        if enabled {
            tracing::info!(user_id = %user_id, tenant_id = %tenant_id, "MFA enabled");
        }
        Ok(enabled)
    }

    /// Disable MFA, discarding the secret and any remaining backup codes.
    pub async fn disable_mfa(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool, EngineError> {
        let identity = match self
            .identities
            .find_by_id(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) => identity,
            None => return Ok(false),
        };
        if !matches!(identity.mfa_state(), MfaState::Enabled | MfaState::Pending) {
            return Ok(false);
        }

        let disabled = self
            .identities
            .set_mfa_disabled(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?;
        if disabled {
            self.mfa.clear_backup_codes(tenant_id, user_id).await?;
            tracing::info!(user_id = %user_id, tenant_id = %tenant_id, "MFA disabled");
        }
        Ok(disabled)
    }

    /// Mint a replacement backup-code batch for an MFA-enabled identity,
    /// invalidating every prior code.
    pub async fn regenerate_backup_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Vec<String>>, EngineError> {
        let identity = match self
            .identities
            .find_by_id(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?
        {
            Some(identity) if identity.mfa_state() == MfaState::Enabled => identity,
            _ => return Ok(None),
        };

        let codes = self
            .mfa
            .issue_backup_codes(tenant_id, identity.user_id)
            .await?;
        Ok(Some(codes))
    }

    // ==================== Session management ====================

    /// Active sessions for the user, oldest first.
    pub async fn list_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Session>, EngineError> {
        self.registry.list(tenant_id, user_id).await
    }

    /// Revoke one of the user's sessions by id.
    pub async fn revoke_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<bool, EngineError> {
        self.registry.revoke(session_id, tenant_id, user_id).await
    }

    /// Revoke every session for the user, optionally keeping the caller's
    /// own. Refreshing requires a live session, so revocation here also cuts
    /// off the refresh tokens those sessions held.
    pub async fn revoke_all_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        keep_session: Option<Uuid>,
    ) -> Result<u64, EngineError> {
        self.registry.revoke_all(tenant_id, user_id, keep_session).await
    }
}
