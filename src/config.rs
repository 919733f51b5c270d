// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::error::RelayError;

/// Runtime configuration for the relay.
#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// TCP port for the signaling endpoint.
    #[arg(long, env = "PORT", default_value_t = 9000)]
    pub port: u16,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Interval between server pings, in milliseconds.
    #[arg(long, env = "HEARTBEAT_INTERVAL", default_value_t = 30_000)]
    pub heartbeat_interval_ms: u64,

    /// How long a session may go without a pong before it is closed, in milliseconds.
    #[arg(long, env = "PONG_TIMEOUT", default_value_t = 60_000)]
    pub pong_timeout_ms: u64,

    /// Grace period after an ungraceful disconnect before the client is
    /// evicted and its leave broadcast, in milliseconds.
    #[arg(long, env = "DISCONNECT_TIMEOUT", default_value_t = 90_000)]
    pub disconnect_timeout_ms: u64,

    /// Redis URL for cross-instance relaying. Unset disables the bridge.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Max envelopes cached per disconnected client (oldest dropped first).
    #[arg(long, env = "MESSAGE_CACHE_LIMIT", default_value_t = 256)]
    pub message_cache_limit: usize,

    /// PEM certificate chain for TLS. Requires --tls-key-file.
    #[arg(long, env = "TLS_CERT_FILE")]
    pub tls_cert_file: Option<PathBuf>,

    /// PEM private key for TLS. Requires --tls-cert-file.
    #[arg(long, env = "TLS_KEY_FILE")]
    pub tls_key_file: Option<PathBuf>,

    /// Additional PEM certificates appended to the served chain.
    #[arg(long, env = "TLS_CA_FILES", value_delimiter = ',')]
    pub tls_ca_files: Vec<PathBuf>,
}

impl Config {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Validate the configuration. Called once at startup; any failure is
    /// fatal.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(RelayError::ConfigInvalid("HEARTBEAT_INTERVAL must be > 0".to_owned()));
        }
        if self.pong_timeout_ms == 0 {
            return Err(RelayError::ConfigInvalid("PONG_TIMEOUT must be > 0".to_owned()));
        }
        if self.disconnect_timeout_ms == 0 {
            return Err(RelayError::ConfigInvalid("DISCONNECT_TIMEOUT must be > 0".to_owned()));
        }
        if let Some(ref url) = self.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(RelayError::ConfigInvalid(format!(
                    "REDIS_URL must be redis:// or rediss://, got {url}"
                )));
            }
        }
        match (&self.tls_cert_file, &self.tls_key_file) {
            (Some(_), None) => {
                return Err(RelayError::ConfigInvalid(
                    "TLS_CERT_FILE set without TLS_KEY_FILE".to_owned(),
                ));
            }
            (None, Some(_)) => {
                return Err(RelayError::ConfigInvalid(
                    "TLS_KEY_FILE set without TLS_CERT_FILE".to_owned(),
                ));
            }
            _ => {}
        }
        if !self.tls_ca_files.is_empty() && self.tls_cert_file.is_none() {
            return Err(RelayError::ConfigInvalid(
                "TLS_CA_FILES set without TLS_CERT_FILE".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 9000,
            log_level: "info".to_owned(),
            heartbeat_interval_ms: 30_000,
            pong_timeout_ms: 60_000,
            disconnect_timeout_ms: 90_000,
            redis_url: None,
            message_cache_limit: 256,
            tls_cert_file: None,
            tls_key_file: None,
            tls_ca_files: Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
