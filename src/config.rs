use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub ingest_token: String,
    pub server_port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batch_attempts")]
    pub max_batch_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "std::env::temp_dir")]
    pub spool_dir: PathBuf,
    #[serde(default = "default_zstd_window_log_max")]
    pub zstd_window_log_max: u32,
}

fn default_rate_limit_rps() -> u64 {
    200
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_batch_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_db_max_connections() -> u32 {
    30
}

fn default_request_timeout_secs() -> u64 {
    3600
}

// 2 GiB; monthly dumps are compressed with windows well past the zstd default.
fn default_zstd_window_log_max() -> u32 {
    31
}

impl AppConfig {
    /// Creates a new `AppConfig` by reading from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn new_from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    #[must_use]
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            batch_size: self.batch_size.max(1),
            max_batch_attempts: self.max_batch_attempts.max(1),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            window_log_max: self.zstd_window_log_max,
        }
    }
}

/// Knobs for a single import run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub max_batch_attempts: u32,
    pub retry_backoff: Duration,
    pub window_log_max: u32,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            batch_size: default_batch_size(),
            max_batch_attempts: default_max_batch_attempts(),
            retry_backoff: Duration::from_millis(default_retry_backoff_ms()),
            window_log_max: default_zstd_window_log_max(),
        }
    }
}
