use serde::Deserialize;
use std::env;

use crate::services::error::EngineError;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub token: TokenConfig,
    pub lockout: LockoutConfig,
    pub sessions: SessionConfig,
    pub mfa: MfaConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub signing_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub reset_ttl_minutes: i64,
    pub magic_link_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    pub max_failures: i64,
    pub window_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub max_per_user: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfaConfig {
    pub totp_issuer: String,
    pub backup_code_count: usize,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| EngineError::Config(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = EngineConfig {
            environment,
            database: DatabaseConfig {
                url: get_env(
                    "DATABASE_URL",
                    Some("postgres://localhost/auth_engine_dev"),
                    is_prod,
                )?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "5", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            token: TokenConfig {
                signing_secret: get_env(
                    "TOKEN_SIGNING_SECRET",
                    Some("dev-only-signing-secret-0123456789ab"),
                    is_prod,
                )?,
                issuer: get_env("TOKEN_ISSUER", Some("auth-engine"), is_prod)?,
                audience: get_env("TOKEN_AUDIENCE", Some("api"), is_prod)?,
                access_ttl_minutes: parse_env("ACCESS_TOKEN_TTL_MINUTES", "15", is_prod)?,
                refresh_ttl_days: parse_env("REFRESH_TOKEN_TTL_DAYS", "7", is_prod)?,
                reset_ttl_minutes: parse_env("PASSWORD_RESET_TTL_MINUTES", "30", is_prod)?,
                magic_link_ttl_minutes: parse_env("MAGIC_LINK_TTL_MINUTES", "15", is_prod)?,
            },
            lockout: LockoutConfig {
                max_failures: parse_env("LOCKOUT_MAX_FAILURES", "5", is_prod)?,
                window_seconds: parse_env("LOCKOUT_WINDOW_SECONDS", "1800", is_prod)?,
            },
            sessions: SessionConfig {
                max_per_user: parse_env("MAX_SESSIONS_PER_USER", "5", is_prod)?,
            },
            mfa: MfaConfig {
                totp_issuer: get_env("TOTP_ISSUER", Some("auth-engine"), is_prod)?,
                backup_code_count: parse_env("BACKUP_CODE_COUNT", "10", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.token.access_ttl_minutes <= 0 {
            return Err(EngineError::Config(anyhow::anyhow!(
                "ACCESS_TOKEN_TTL_MINUTES must be positive"
            )));
        }

        if self.token.refresh_ttl_days <= 0 {
            return Err(EngineError::Config(anyhow::anyhow!(
                "REFRESH_TOKEN_TTL_DAYS must be positive"
            )));
        }

        if self.token.reset_ttl_minutes <= 0 || self.token.magic_link_ttl_minutes <= 0 {
            return Err(EngineError::Config(anyhow::anyhow!(
                "single-use token TTLs must be positive"
            )));
        }

        if self.lockout.max_failures <= 0 || self.lockout.window_seconds <= 0 {
            return Err(EngineError::Config(anyhow::anyhow!(
                "LOCKOUT_MAX_FAILURES and LOCKOUT_WINDOW_SECONDS must be positive"
            )));
        }

        if self.database.max_connections == 0
            || self.database.min_connections > self.database.max_connections
        {
            return Err(EngineError::Config(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.sessions.max_per_user == 0 {
            return Err(EngineError::Config(anyhow::anyhow!(
                "MAX_SESSIONS_PER_USER must be greater than 0"
            )));
        }

        if self.environment == Environment::Prod && self.token.signing_secret.len() < 32 {
            return Err(EngineError::Config(anyhow::anyhow!(
                "TOKEN_SIGNING_SECRET must be at least 32 bytes in production"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, EngineError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(EngineError::Config(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(EngineError::Config(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str, is_prod: bool) -> Result<T, EngineError>
where
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| {
            EngineError::Config(anyhow::anyhow!(format!("{}: {}", key, e)))
        })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_config() -> EngineConfig {
        EngineConfig {
            environment: Environment::Dev,
            database: DatabaseConfig {
                url: "postgres://localhost/auth_engine_dev".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            token: TokenConfig {
                signing_secret: "dev-only-signing-secret-0123456789ab".to_string(),
                issuer: "auth-engine".to_string(),
                audience: "api".to_string(),
                access_ttl_minutes: 15,
                refresh_ttl_days: 7,
                reset_ttl_minutes: 30,
                magic_link_ttl_minutes: 15,
            },
            lockout: LockoutConfig {
                max_failures: 5,
                window_seconds: 1800,
            },
            sessions: SessionConfig { max_per_user: 5 },
            mfa: MfaConfig {
                totp_issuer: "auth-engine".to_string(),
                backup_code_count: 10,
            },
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(dev_config().validate().is_ok());
    }

    #[test]
    fn test_nonpositive_ttl_rejected() {
        let mut config = dev_config();
        config.token.access_ttl_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_session_cap_rejected() {
        let mut config = dev_config();
        config.sessions.max_per_user = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_secret_rejected_in_prod_only() {
        let mut config = dev_config();
        config.token.signing_secret = "short".to_string();
        assert!(config.validate().is_ok());

        config.environment = Environment::Prod;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
