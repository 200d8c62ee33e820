//! Shared setup for auth-engine integration tests.
//!
//! Builds an engine wired to the in-memory stores and cache, so tests run
//! without PostgreSQL or Redis.

#![allow(dead_code)]

use std::sync::Arc;

use auth_engine::config::{
    DatabaseConfig, EngineConfig, Environment, LockoutConfig, MfaConfig, RedisConfig,
    SessionConfig, TokenConfig,
};
use auth_engine::models::Identity;
use auth_engine::services::{AuthEngine, MemoryCache, MemoryStores};
use auth_engine::utils::{hash_password, Password};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

/// A desktop Chrome User-Agent for session metadata.
pub const DEVICE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const ORIGIN: &str = "203.0.113.7";

/// Route engine log output through the test harness when RUST_LOG is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct TestHarness {
    pub engine: AuthEngine,
    pub stores: Arc<MemoryStores>,
    pub config: EngineConfig,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        environment: Environment::Dev,
        database: DatabaseConfig {
            url: "postgres://localhost/auth_engine_test".to_string(),
            max_connections: 5,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        },
        token: TokenConfig {
            signing_secret: "integration-test-signing-secret-0123".to_string(),
            issuer: "auth-engine-test".to_string(),
            audience: "api-test".to_string(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 7,
            reset_ttl_minutes: 30,
            magic_link_ttl_minutes: 15,
        },
        lockout: LockoutConfig {
            max_failures: 3,
            window_seconds: 1800,
        },
        sessions: SessionConfig { max_per_user: 3 },
        mfa: MfaConfig {
            totp_issuer: "auth-engine-test".to_string(),
            backup_code_count: 5,
        },
    }
}

pub fn build_harness(config: EngineConfig) -> TestHarness {
    init_tracing();
    let stores = Arc::new(MemoryStores::new());
    let cache = Arc::new(MemoryCache::new());
    let engine = AuthEngine::new(
        &config,
        stores.clone(),
        stores.clone(),
        stores.clone(),
        cache,
    );
    TestHarness {
        engine,
        stores,
        config,
    }
}

pub fn harness() -> TestHarness {
    build_harness(test_config())
}

/// Seed an identity with a bcrypt-hashed password and return its id.
pub fn seed_identity(harness: &TestHarness, tenant_id: Uuid, login_name: &str, password: &str) -> Uuid {
    let hash = hash_password(&Password::new(password.to_string())).expect("hashing failed");
    let identity = Identity::new(tenant_id, login_name.to_string(), hash.into_string());
    let user_id = identity.user_id;
    harness.stores.seed_identity(identity);
    user_id
}

/// Generate the current TOTP code for a base32 secret, using the same
/// parameters the engine provisions authenticators with.
pub fn current_totp_code(secret_base32: &str, account: &str) -> String {
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .expect("secret should be base32"),
        Some("auth-engine-test".to_string()),
        account.to_string(),
    )
    .expect("TOTP construction failed");
    totp.generate_current().expect("clock should be readable")
}
