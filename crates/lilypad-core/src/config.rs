// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Lilypad control-plane configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL for the document store
    pub database_url: String,
    /// Minimum interval between grants snapshot rebuilds
    pub grants_refresh: Duration,
    /// Minimum interval between progress updates on a running invocation
    pub progress_min_interval: Duration,
    /// Terminal invocations kept per function when the function declares none
    pub default_history_limit: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `LILYPAD_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `LILYPAD_GRANTS_REFRESH_SECS`: grants rebuild interval (default: 120)
    /// - `LILYPAD_PROGRESS_MIN_SECS`: progress rate limit (default: 2)
    /// - `LILYPAD_DEFAULT_HISTORY_LIMIT`: history rotation fallback (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("LILYPAD_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("LILYPAD_DATABASE_URL"))?;

        let grants_refresh_secs: u64 = std::env::var("LILYPAD_GRANTS_REFRESH_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("LILYPAD_GRANTS_REFRESH_SECS", "must be a number of seconds")
            })?;

        let progress_min_secs: u64 = std::env::var("LILYPAD_PROGRESS_MIN_SECS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("LILYPAD_PROGRESS_MIN_SECS", "must be a number of seconds")
            })?;

        let default_history_limit: usize = std::env::var("LILYPAD_DEFAULT_HISTORY_LIMIT")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "LILYPAD_DEFAULT_HISTORY_LIMIT",
                    "must be a non-negative integer",
                )
            })?;

        Ok(Self {
            database_url,
            grants_refresh: Duration::from_secs(grants_refresh_secs),
            progress_min_interval: Duration::from_secs(progress_min_secs),
            default_history_limit,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            grants_refresh: Duration::from_secs(120),
            progress_min_interval: Duration::from_secs(2),
            default_history_limit: 10,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
