//! Multi-tenant authentication engine: token issuance and verification,
//! refresh rotation, per-device sessions, brute-force lockout, TOTP second
//! factor with single-use backup codes, password recovery, and magic links.
//!
//! The engine is transport-agnostic. Embed [`AuthEngine`] behind whatever
//! API layer the deployment uses, wired to PostgreSQL and Redis in
//! production or to the in-memory stores for tests.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use config::EngineConfig;
pub use services::{
    AuthEngine, Claims, DenyReason, EngineError, Grant, LoginOutcome, MfaEnrollment,
    SecondFactor, TokenCodec, TokenKind, TokenOutcome,
};
