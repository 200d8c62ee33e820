//! Identity model - the tenant-scoped account as the engine sees it.
//!
//! Identities are owned by the external user-profile store; the engine only
//! reads them and writes the MFA fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// MFA enrollment states.
///
/// `Pending -> Enabled` requires one successful TOTP verification with the
/// pending secret; there is no direct path from `NotConfigured` to `Enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaState {
    NotConfigured,
    Pending,
    Enabled,
    Disabled,
}

impl MfaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaState::NotConfigured => "not_configured",
            MfaState::Pending => "pending",
            MfaState::Enabled => "enabled",
            MfaState::Disabled => "disabled",
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "pending" => MfaState::Pending,
            "enabled" => MfaState::Enabled,
            "disabled" => MfaState::Disabled,
            _ => MfaState::NotConfigured,
        }
    }
}

/// Tenant-scoped identity.
#[derive(Debug, Clone, FromRow)]
pub struct Identity {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub login_name: String,
    pub password_hash: String,
    pub active: bool,
    pub mfa_state_code: String,
    pub mfa_secret: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Identity {
    pub fn new(tenant_id: Uuid, login_name: String, password_hash: String) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            login_name,
            password_hash,
            active: true,
            mfa_state_code: MfaState::NotConfigured.as_str().to_string(),
            mfa_secret: None,
            created_utc: Utc::now(),
        }
    }

    pub fn mfa_state(&self) -> MfaState {
        MfaState::parse(&self.mfa_state_code)
    }

    /// A second factor is demanded at login only in the `Enabled` state.
    pub fn mfa_enabled(&self) -> bool {
        self.mfa_state() == MfaState::Enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_identity_has_no_mfa() {
        let identity = Identity::new(Uuid::new_v4(), "alice@example.com".into(), "$2b$hash".into());

        assert_eq!(identity.mfa_state(), MfaState::NotConfigured);
        assert!(!identity.mfa_enabled());
        assert!(identity.active);
    }

    #[test]
    fn test_mfa_state_round_trip() {
        for state in [
            MfaState::NotConfigured,
            MfaState::Pending,
            MfaState::Enabled,
            MfaState::Disabled,
        ] {
            assert_eq!(MfaState::parse(state.as_str()), state);
        }
    }

    #[test]
    fn test_unknown_state_code_defaults_to_not_configured() {
        assert_eq!(MfaState::parse("garbage"), MfaState::NotConfigured);
    }

    #[test]
    fn test_pending_is_not_enabled() {
        let mut identity =
            Identity::new(Uuid::new_v4(), "bob@example.com".into(), "$2b$hash".into());
        identity.mfa_state_code = MfaState::Pending.as_str().to_string();

        assert!(!identity.mfa_enabled());
    }
}
