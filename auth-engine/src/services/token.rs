//! Token codec: signed, tenant-scoped bearer tokens.
//!
//! Pure CPU; the codec holds only the shared signing key and deployment
//! constants (issuer, audience, per-kind lifetimes). Revocation is the
//! caller's job via the revocation store.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::services::error::EngineError;

/// Token kinds. Each kind has its own lifetime and is only accepted where
/// that kind is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    PasswordReset,
    MagicLink,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::PasswordReset => "password_reset",
            TokenKind::MagicLink => "magic_link",
        }
    }
}

/// Signed claims. One tagged struct for all kinds; the `kind` tag is checked
/// on every verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Tenant the token is bound to
    pub tenant: Uuid,
    pub kind: TokenKind,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    /// Unique token id, so two tokens minted in the same second for the
    /// same subject still differ
    pub jti: Uuid,
    /// Session ID, carried by access tokens only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>,
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    reset_ttl: Duration,
    magic_link_ttl: Duration,
}

impl TokenCodec {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::minutes(config.access_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_ttl_days),
            reset_ttl: Duration::minutes(config.reset_ttl_minutes),
            magic_link_ttl: Duration::minutes(config.magic_link_ttl_minutes),
        }
    }

    /// Issue a signed token. Fails only on signer misconfiguration.
    ///
    /// `session_id` is honored for access tokens and ignored otherwise.
    pub fn issue(
        &self,
        subject: Uuid,
        tenant: Uuid,
        kind: TokenKind,
        ttl: Duration,
        session_id: Option<Uuid>,
    ) -> Result<String, EngineError> {
        let now = Utc::now();

        let claims = Claims {
            sub: subject,
            tenant,
            kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            sid: session_id.filter(|_| kind == TokenKind::Access),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Verify signature, expiry, issuer/audience, kind, and tenant binding.
    ///
    /// Returns `None` for anything invalid; a bad token is an expected
    /// outcome, not an error. When `expected_tenant` is supplied and the
    /// token's tenant claim differs, the token is invalid regardless of its
    /// signature: this is the tenant-isolation guarantee.
    pub fn verify(
        &self,
        token: &str,
        expected_kind: TokenKind,
        expected_tenant: Option<Uuid>,
    ) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .ok()?
            .claims;

        if claims.kind != expected_kind {
            return None;
        }

        if let Some(tenant) = expected_tenant {
            if claims.tenant != tenant {
                tracing::warn!(
                    security_event = "cross_tenant_token",
                    subject = %claims.sub,
                    token_tenant = %claims.tenant,
                    expected_tenant = %tenant,
                    kind = claims.kind.as_str(),
                    "Token presented against a different tenant"
                );
                return None;
            }
        }

        Some(claims)
    }

    pub fn ttl_for(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::PasswordReset => self.reset_ttl,
            TokenKind::MagicLink => self.magic_link_ttl,
        }
    }

    /// Access token lifetime in seconds (for the `expires_in` field).
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }
}
