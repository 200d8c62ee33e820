use thiserror::Error;

/// Infrastructure failures surfaced to the caller as retryable errors.
///
/// Expected negative outcomes (wrong credentials, invalid or expired tokens,
/// already-used backup codes, lockout) are typed results on the operations
/// themselves, never errors, so transport layers can collapse them into a
/// uniform "authentication failed" response.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(anyhow::Error),

    #[error("revocation cache error: {0}")]
    Cache(anyhow::Error),

    #[error("durable store error: {0}")]
    Store(anyhow::Error),

    #[error("token signer error: {0}")]
    Signer(#[from] jsonwebtoken::errors::Error),

    #[error("password hashing error: {0}")]
    Hashing(anyhow::Error),

    #[error("mfa provisioning error: {0}")]
    Mfa(anyhow::Error),
}
