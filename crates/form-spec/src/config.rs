use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TIMEOUT_ENV: &str = "FORMFLOW_HTTP_TIMEOUT_MS";
pub const USER_AGENT_ENV: &str = "FORMFLOW_USER_AGENT";

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {name} value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings for outbound HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_user_agent() -> String {
    format!("formflow/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `FORMFLOW_HTTP_TIMEOUT_MS` and `FORMFLOW_USER_AGENT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = env::var(TIMEOUT_ENV) {
            config.http_timeout_ms = value.trim().parse::<u64>().map_err(|error| {
                ConfigError::Invalid {
                    name: TIMEOUT_ENV,
                    value: value.clone(),
                    reason: error.to_string(),
                }
            })?;
        }

        if let Ok(value) = env::var(USER_AGENT_ENV)
            && !value.trim().is_empty()
        {
            config.user_agent = value.trim().to_owned();
        }

        Ok(config)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.http_timeout_ms = timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
