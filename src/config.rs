use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub token_store_path: PathBuf,
}

impl Config {
    /// Read configuration from the environment. Call `dotenvy::dotenv()` first to honour `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            max_connections: try_load("DB_MAX_CONNECTIONS", "5")?,
            token_store_path: try_load("VOTER_STORE_PATH", ".voter_tokens.json")?,
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key)
        .map_err(|_| {
            warn!("Environment variable {key} not found");
        })
        .ok()
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    match value.parse() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_unset_keys() {
        let port: u32 = try_load("POLL_VOTE_TEST_UNSET_KEY", "5").unwrap();
        assert_eq!(port, 5);
    }

    #[test]
    fn unparsable_default_is_invalid() {
        let err = try_load::<u32>("POLL_VOTE_TEST_UNSET_KEY", "five").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "POLL_VOTE_TEST_UNSET_KEY", .. }));
    }
}
