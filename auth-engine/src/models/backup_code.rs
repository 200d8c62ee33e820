//! Single-use MFA backup codes, stored as one-way hashes.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Alphabet without lookalike characters (no 0/O, 1/I/L).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// A single backup code record. The plaintext code is shown to the user once
/// at generation time and never stored.
#[derive(Debug, Clone, FromRow)]
pub struct BackupCode {
    pub backup_code_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub code_hash: String,
    pub used: bool,
    pub used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl BackupCode {
    pub fn new(user_id: Uuid, tenant_id: Uuid, code: &str) -> Self {
        Self {
            backup_code_id: Uuid::new_v4(),
            user_id,
            tenant_id,
            code_hash: Self::hash_code(code),
            used: false,
            used_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Hash a candidate code for storage or comparison.
    ///
    /// Codes are normalized (trimmed, uppercased) so user re-entry with
    /// different casing still matches.
    pub fn hash_code(code: &str) -> String {
        let normalized = code.trim().to_ascii_uppercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate a fresh batch. Returns the plaintext codes (to show the user
    /// once) alongside the records to persist. The batch replaces all prior
    /// codes for the user atomically at the store layer.
    pub fn generate_batch(
        user_id: Uuid,
        tenant_id: Uuid,
        count: usize,
    ) -> (Vec<String>, Vec<BackupCode>) {
        let mut plaintext = Vec::with_capacity(count);
        let mut records = Vec::with_capacity(count);

        for _ in 0..count {
            let code = generate_code();
            records.push(BackupCode::new(user_id, tenant_id, &code));
            plaintext.push(code);
        }

        (plaintext, records)
    }
}

/// Generate one code in `XXXX-XXXX` form.
fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut chars: Vec<u8> = (0..8)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())])
        .collect();
    chars.insert(4, b'-');
    String::from_utf8(chars).expect("code alphabet is ASCII")
}
