pub mod auth;
pub mod cache;
pub mod database;
pub mod error;
pub mod lockout;
pub mod mfa;
pub mod revocation;
pub mod sessions;
pub mod token;

pub use auth::{AuthEngine, DenyReason, Grant, LoginOutcome, SecondFactor, TokenOutcome};
pub use cache::{KeyValueCache, MemoryCache, RedisCache};
pub use database::{BackupCodeStore, Database, IdentityStore, MemoryStores, SessionStore};
pub use error::EngineError;
pub use lockout::{LockoutGuard, LockoutStatus};
pub use mfa::{MfaEnrollment, MfaVerifier};
pub use revocation::{RevocationStore, TokenPurpose};
pub use sessions::SessionRegistry;
pub use token::{Claims, TokenCodec, TokenKind};
