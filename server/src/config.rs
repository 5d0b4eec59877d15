//! Origin process configuration, resolved from environment variables.

use std::env;

/// Environment variable names - single source of truth.
pub mod env_vars {
    pub const PORT: &str = "ACE_PORT";
    pub const AMOUNT_MICRO_USDC: &str = "ACE_AMOUNT_MICRO_USDC";
    pub const CHALLENGE_SECRET: &str = "ACE_CHALLENGE_SECRET";
    pub const CHALLENGE_TTL_SECONDS: &str = "ACE_CHALLENGE_TTL_SECONDS";
    pub const LEDGER_PATH: &str = "ACE_LEDGER_PATH";
}

/// Default values.
pub mod defaults {
    pub const PORT: u16 = 8402;
    pub const AMOUNT_MICRO_USDC: u64 = 10_000;
    pub const CHALLENGE_TTL_SECONDS: i64 = 60;
    pub const LEDGER_PATH: &str = "./.ace/ledger.json";
}

#[derive(Clone, Debug)]
pub struct OriginConfig {
    pub port: u16,
    pub amount_micro_usdc: u64,
    pub challenge_secret: String,
    pub challenge_ttl_seconds: i64,
    pub ledger_path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set (no default for the challenge-MAC secret)")]
    MissingSecret(&'static str),
    #[error("{0} must be a valid {1}, got {2:?}")]
    Invalid(&'static str, &'static str, String),
}

impl OriginConfig {
    /// Resolve configuration from the process environment. The challenge
    /// secret has no default and must be set explicitly.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var(env_vars::PORT) {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid(env_vars::PORT, "u16", v))?,
            Err(_) => defaults::PORT,
        };
        let amount_micro_usdc = match env::var(env_vars::AMOUNT_MICRO_USDC) {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid(env_vars::AMOUNT_MICRO_USDC, "u64", v))?,
            Err(_) => defaults::AMOUNT_MICRO_USDC,
        };
        let challenge_secret = env::var(env_vars::CHALLENGE_SECRET)
            .map_err(|_| ConfigError::MissingSecret(env_vars::CHALLENGE_SECRET))?;
        let challenge_ttl_seconds = match env::var(env_vars::CHALLENGE_TTL_SECONDS) {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid(env_vars::CHALLENGE_TTL_SECONDS, "i64", v))?,
            Err(_) => defaults::CHALLENGE_TTL_SECONDS,
        };
        let ledger_path = env::var(env_vars::LEDGER_PATH)
            .unwrap_or_else(|_| defaults::LEDGER_PATH.to_string());

        Ok(Self {
            port,
            amount_micro_usdc,
            challenge_secret,
            challenge_ttl_seconds,
            ledger_path,
        })
    }
}
