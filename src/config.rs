// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide engine configuration (§4.11, §3 `EngineConfig`): the knobs
//! that don't belong to any one channel. Loaded once at startup and
//! immutable thereafter, mirroring the teacher's config-file conventions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StegoError};

fn default_http_timeout_secs() -> u64 {
    5
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_tracing_filter() -> String {
    "info".to_string()
}

fn default_btc_primary() -> String {
    "https://blockchain.info/q/latesthash".to_string()
}

fn default_btc_fallback() -> String {
    "https://blockstream.info/api/blocks/tip".to_string()
}

fn default_nist_url() -> String {
    "https://beacon.nist.gov/beacon/2.0/pulse/last".to_string()
}

/// Process-wide knobs: HTTP client timeouts, beacon provider URLs, the
/// tracing filter directive, and the poll scheduler's tick interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_tracing_filter")]
    pub tracing_filter: String,
    #[serde(default = "default_btc_primary")]
    pub btc_primary_url: String,
    #[serde(default = "default_btc_fallback")]
    pub btc_fallback_url: String,
    #[serde(default = "default_nist_url")]
    pub nist_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            http_timeout_secs: default_http_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            tracing_filter: default_tracing_filter(),
            btc_primary_url: default_btc_primary(),
            btc_fallback_url: default_btc_fallback(),
            nist_url: default_nist_url(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StegoError::Other(format!("invalid engine config: {e}")))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Build an `HttpBeaconSource` wired to this config's provider URLs and
    /// HTTP timeout, so embedders never have to hand-copy those fields.
    pub fn build_http_beacon_source(&self, client: reqwest::Client) -> crate::beacon::HttpBeaconSource {
        crate::beacon::HttpBeaconSource::new(
            client,
            self.btc_primary_url.clone(),
            self.btc_fallback_url.clone(),
            self.nist_url.clone(),
            self.http_timeout(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_populated_from_empty_toml() {
        let cfg = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.poll_interval_secs, 30);
        assert_eq!(cfg.tracing_filter, "info");
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let cfg = EngineConfig::from_toml_str("poll_interval_secs = 10\n").unwrap();
        assert_eq!(cfg.poll_interval_secs, 10);
        assert_eq!(cfg.http_timeout_secs, 5);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(EngineConfig::from_toml_str("not valid = [").is_err());
    }
}
