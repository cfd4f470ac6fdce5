// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

const DEFAULT_KEYCLOAK_IMAGE: &str = "registry.redhat.io/rhbk/keycloak-rhel9:24-17";

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Delay before re-checking a resource that is waiting on something else
    pub requeue_interval: Duration,
    /// First retry delay after a transient error, doubled per consecutive failure
    pub error_backoff_base: Duration,
    pub error_backoff_max: Duration,
    /// Deadline for all API calls made during one reconciliation
    pub api_timeout: Duration,
    /// Job-level retry count for realm import jobs
    pub import_job_backoff_limit: i32,
    pub keycloak_image: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            requeue_interval: Duration::from_secs(30),
            error_backoff_base: Duration::from_secs(5),
            error_backoff_max: Duration::from_secs(300),
            api_timeout: Duration::from_secs(30),
            import_job_backoff_limit: 1,
            keycloak_image: DEFAULT_KEYCLOAK_IMAGE.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        Ok(Config {
            requeue_interval: secs_var("REQUEUE_INTERVAL_SECS", defaults.requeue_interval)?,
            error_backoff_base: secs_var("ERROR_BACKOFF_BASE_SECS", defaults.error_backoff_base)?,
            error_backoff_max: secs_var("ERROR_BACKOFF_MAX_SECS", defaults.error_backoff_max)?,
            api_timeout: secs_var("API_TIMEOUT_SECS", defaults.api_timeout)?,
            import_job_backoff_limit: match env::var("IMPORT_JOB_BACKOFF_LIMIT") {
                Ok(v) => v
                    .parse()
                    .with_context(|| format!("IMPORT_JOB_BACKOFF_LIMIT is not a number: {}", v))?,
                Err(_) => defaults.import_job_backoff_limit,
            },
            keycloak_image: env::var("KEYCLOAK_IMAGE").unwrap_or(defaults.keycloak_image),
        })
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    match env::var(name) {
        Ok(v) => {
            let secs: u64 = v
                .parse()
                .with_context(|| format!("{} is not a number of seconds: {}", name, v))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
