//! TOTP second factor and single-use backup codes.

use std::sync::Arc;

use chrono::Utc;
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::config::MfaConfig;
use crate::models::BackupCode;
use crate::services::database::BackupCodeStore;
use crate::services::error::EngineError;

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Everything produced by starting an MFA enrollment. The secret and the
/// backup codes are disclosed to the user exactly once, here.
#[derive(Debug, Clone)]
pub struct MfaEnrollment {
    /// Base32-encoded shared secret.
    pub secret: String,
    /// otpauth:// URI for authenticator-app provisioning.
    pub otpauth_uri: String,
    /// Plaintext backup codes.
    pub backup_codes: Vec<String>,
}

#[derive(Clone)]
pub struct MfaVerifier {
    codes: Arc<dyn BackupCodeStore>,
    issuer: String,
    backup_code_count: usize,
}

impl MfaVerifier {
    pub fn new(codes: Arc<dyn BackupCodeStore>, config: &MfaConfig) -> Self {
        Self {
            codes,
            issuer: config.totp_issuer.clone(),
            backup_code_count: config.backup_code_count,
        }
    }

    fn totp(&self, secret_base32: &str, account: &str) -> Result<TOTP, EngineError> {
        let secret = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| EngineError::Mfa(anyhow::anyhow!("Invalid TOTP secret: {:?}", e)))?;
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| EngineError::Mfa(anyhow::anyhow!("Failed to build TOTP: {}", e)))
    }

    /// Generate a fresh secret and its provisioning URI for `account`.
    pub fn generate_enrollment(&self, account: &str) -> Result<(String, String), EngineError> {
        let secret_base32 = Secret::generate_secret().to_encoded().to_string();
        let totp = self.totp(&secret_base32, account)?;
        Ok((secret_base32, totp.get_url()))
    }

    /// Check a TOTP code against a stored secret, accepting one step of
    /// clock skew either way. A malformed secret or code is just a failed
    /// check, not an error.
    pub fn verify_totp(&self, secret_base32: &str, account: &str, code: &str) -> bool {
        match self.totp(secret_base32, account) {
            Ok(totp) => totp.check_current(code.trim()).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Mint a new backup-code batch, replacing any prior batch. Returns the
    /// plaintext codes for one-time display.
    pub async fn issue_backup_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<String>, EngineError> {
        let (plaintext, records) =
            BackupCode::generate_batch(user_id, tenant_id, self.backup_code_count);
        self.codes
            .replace_all(tenant_id, user_id, &records)
            .await
            .map_err(EngineError::Store)?;
        Ok(plaintext)
    }

    /// Consume a backup code. True at most once per code: the store-level
    /// compare-and-set decides the winner when two consumers race.
    pub async fn consume_backup_code(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        candidate: &str,
    ) -> Result<bool, EngineError> {
        let candidate_hash = BackupCode::hash_code(candidate);
        let unused = self
            .codes
            .find_unused(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?;

        for code in &unused {
            if code
                .code_hash
                .as_bytes()
                .ct_eq(candidate_hash.as_bytes())
                .into()
            {
                return self
                    .codes
                    .mark_used(code.backup_code_id, Utc::now())
                    .await
                    .map_err(EngineError::Store);
            }
        }

        Ok(false)
    }

    pub async fn clear_backup_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), EngineError> {
        self.codes
            .delete_all(tenant_id, user_id)
            .await
            .map_err(EngineError::Store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::MemoryStores;

    fn verifier() -> MfaVerifier {
        MfaVerifier::new(
            Arc::new(MemoryStores::new()),
            &MfaConfig {
                totp_issuer: "auth-engine-test".to_string(),
                backup_code_count: 3,
            },
        )
    }

    #[test]
    fn test_current_totp_code_verifies() {
        let verifier = verifier();
        let (secret, uri) = verifier.generate_enrollment("alice@example.com").unwrap();
        assert!(uri.starts_with("otpauth://totp/"));

        let totp = verifier.totp(&secret, "alice@example.com").unwrap();
        let code = totp.generate_current().unwrap();

        assert!(verifier.verify_totp(&secret, "alice@example.com", &code));
    }

    #[test]
    fn test_wrong_totp_code_fails() {
        let verifier = verifier();
        let (secret, _) = verifier.generate_enrollment("alice@example.com").unwrap();

        assert!(!verifier.verify_totp(&secret, "alice@example.com", "000000"));
        assert!(!verifier.verify_totp("not-base32!!", "alice@example.com", "123456"));
    }

    #[tokio::test]
    async fn test_backup_code_consumed_once() {
        let verifier = verifier();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();

        let codes = verifier.issue_backup_codes(tenant, user).await.unwrap();
        assert_eq!(codes.len(), 3);

        assert!(verifier.consume_backup_code(tenant, user, &codes[0]).await.unwrap());
        assert!(!verifier.consume_backup_code(tenant, user, &codes[0]).await.unwrap());
        // Other codes in the batch are unaffected.
        assert!(verifier.consume_backup_code(tenant, user, &codes[1]).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_backup_code_rejected() {
        let verifier = verifier();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();

        verifier.issue_backup_codes(tenant, user).await.unwrap();

        assert!(!verifier.consume_backup_code(tenant, user, "ZZZZ-ZZZZ").await.unwrap());
    }

    #[tokio::test]
    async fn test_reissue_invalidates_old_batch() {
        let verifier = verifier();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();

        let old = verifier.issue_backup_codes(tenant, user).await.unwrap();
        let new = verifier.issue_backup_codes(tenant, user).await.unwrap();

        assert!(!verifier.consume_backup_code(tenant, user, &old[0]).await.unwrap());
        assert!(verifier.consume_backup_code(tenant, user, &new[0]).await.unwrap());
    }
}
