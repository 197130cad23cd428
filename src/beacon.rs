// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The beacon oracle: fetches and caches the public entropy value (Bitcoin
//! block hash, NIST randomness pulse, or UTC date) that anchors epoch keys.
//! Grounded on the teacher's `forest_beacon::drand` module — a cached,
//! lockable fetch-or-reuse oracle — generalized from a single Drand chain to
//! three interchangeable beacon kinds and from signature-verified rounds to
//! regex-validated HTTP bodies.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, StegoError};

/// How many previous values the oracle keeps per non-date beacon kind, for
/// the receiver's grace-period probe (§4.3). Comfortably covers the largest
/// `epochs_to_check` (2) plus margin for a slow poller.
const HISTORY_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconKind {
    Btc,
    Nist,
    Date,
}

impl BeaconKind {
    /// The `beacon_id` string folded into epoch-key derivation (§4.3).
    pub fn id(self) -> &'static str {
        match self {
            BeaconKind::Btc => "btc",
            BeaconKind::Nist => "nist",
            BeaconKind::Date => "date",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "btc" => Some(BeaconKind::Btc),
            "nist" => Some(BeaconKind::Nist),
            "date" => Some(BeaconKind::Date),
            _ => None,
        }
    }

    fn cache_ttl(self) -> Duration {
        match self {
            BeaconKind::Btc => Duration::from_secs(60),
            BeaconKind::Nist => Duration::from_secs(30),
            // Computed per-fetch against the real clock, see `fetch_date`.
            BeaconKind::Date => Duration::from_secs(0),
        }
    }
}

/// Constants returned by `get_epoch_info` (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochInfo {
    pub epoch_duration: Duration,
    pub grace_period: Duration,
    pub epochs_to_check: u32,
}

pub fn epoch_info(kind: BeaconKind) -> EpochInfo {
    match kind {
        BeaconKind::Btc => EpochInfo {
            epoch_duration: Duration::from_secs(600),
            grace_period: Duration::from_secs(120),
            epochs_to_check: 2,
        },
        BeaconKind::Nist => EpochInfo {
            epoch_duration: Duration::from_secs(60),
            grace_period: Duration::from_secs(30),
            epochs_to_check: 1,
        },
        BeaconKind::Date => EpochInfo {
            epoch_duration: Duration::from_secs(86_400),
            grace_period: Duration::from_secs(300),
            epochs_to_check: 1,
        },
    }
}

struct CacheEntry {
    value: String,
    fetched_at: std::time::Instant,
    expires_at: std::time::Instant,
}

/// Pluggable fetch strategy, so tests can substitute canned responses for the
/// real HTTP endpoints of §6.3 without a network.
#[async_trait::async_trait]
pub trait BeaconSource: Send + Sync {
    async fn fetch_btc(&self) -> Result<String>;
    async fn fetch_nist(&self) -> Result<String>;
}

/// The default source: primary+fallback Bitcoin provider, single-retry NIST
/// provider, both over the ambient `reqwest` client.
pub struct HttpBeaconSource {
    client: reqwest::Client,
    btc_primary: String,
    btc_fallback: String,
    nist_url: String,
    timeout: Duration,
}

impl HttpBeaconSource {
    pub fn new(client: reqwest::Client, btc_primary: String, btc_fallback: String, nist_url: String, timeout: Duration) -> Self {
        Self {
            client,
            btc_primary,
            btc_fallback,
            nist_url,
            timeout,
        }
    }
}

fn is_btc_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn is_nist_pulse(s: &str) -> bool {
    s.len() == 128 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[derive(serde::Deserialize)]
struct BtcHashJson {
    hash: String,
}

#[derive(serde::Deserialize)]
struct NistPulseJson {
    pulse: NistPulseInner,
}

#[derive(serde::Deserialize)]
struct NistPulseInner {
    #[serde(rename = "outputValue")]
    output_value: String,
}

#[async_trait::async_trait]
impl BeaconSource for HttpBeaconSource {
    async fn fetch_btc(&self) -> Result<String> {
        let timeout = self.timeout;
        let primary = self
            .client
            .get(&self.btc_primary)
            .timeout(timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Ok(resp) = primary {
            if let Ok(body) = resp.text().await {
                let trimmed = body.trim().to_ascii_lowercase();
                if is_btc_hash(&trimmed) {
                    return Ok(trimmed);
                }
            }
        }
        let fallback = self
            .client
            .get(&self.btc_fallback)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        let parsed: BtcHashJson = fallback.json().await?;
        let trimmed = parsed.hash.trim().to_ascii_lowercase();
        if !is_btc_hash(&trimmed) {
            return Err(StegoError::Other("bitcoin fallback returned malformed hash".into()));
        }
        Ok(trimmed)
    }

    async fn fetch_nist(&self) -> Result<String> {
        let timeout = self.timeout;
        let mut last_err = None;
        for attempt in 0..2 {
            match self.client.get(&self.nist_url).timeout(timeout).send().await {
                Ok(resp) => match resp.error_for_status() {
                    Ok(resp) => match resp.json::<NistPulseJson>().await {
                        Ok(parsed) => {
                            let trimmed = parsed.pulse.output_value.trim().to_ascii_lowercase();
                            if is_nist_pulse(&trimmed) {
                                return Ok(trimmed);
                            }
                            last_err = Some(StegoError::Other("nist pulse malformed".into()));
                        }
                        Err(e) => last_err = Some(StegoError::Http(e)),
                    },
                    Err(e) => last_err = Some(StegoError::Http(e)),
                },
                Err(e) => last_err = Some(StegoError::Http(e)),
            }
            if attempt == 0 {
                debug!("nist pulse fetch failed, retrying once");
            }
        }
        Err(last_err.unwrap_or_else(|| StegoError::Other("nist pulse fetch failed".into())))
    }
}

struct KindState {
    cache: Option<CacheEntry>,
    history: VecDeque<String>,
}

impl Default for KindState {
    fn default() -> Self {
        KindState {
            cache: None,
            history: VecDeque::new(),
        }
    }
}

/// Caches and serializes access to beacon values across every channel that
/// shares this oracle (§5: "beacon oracle's cache is shared across
/// channels; mutations are serialized").
pub struct BeaconOracle {
    source: Box<dyn BeaconSource>,
    btc: RwLock<KindState>,
    nist: RwLock<KindState>,
}

impl BeaconOracle {
    pub fn new(source: Box<dyn BeaconSource>) -> Self {
        BeaconOracle {
            source,
            btc: RwLock::new(KindState::default()),
            nist: RwLock::new(KindState::default()),
        }
    }

    fn state_for(&self, kind: BeaconKind) -> &RwLock<KindState> {
        match kind {
            BeaconKind::Btc => &self.btc,
            BeaconKind::Nist => &self.nist,
            BeaconKind::Date => unreachable!("date beacon has no mutable cache state"),
        }
    }

    /// Fetch (or serve from cache) the current beacon value for `kind`.
    pub async fn get_beacon_value(&self, kind: BeaconKind) -> Result<String> {
        if kind == BeaconKind::Date {
            return Ok(today_utc_string());
        }

        let now = std::time::Instant::now();
        {
            let state = self.state_for(kind).read().await;
            if let Some(entry) = &state.cache {
                if now < entry.expires_at {
                    return Ok(entry.value.clone());
                }
            }
        }

        let fetched = match kind {
            BeaconKind::Btc => self.source.fetch_btc().await,
            BeaconKind::Nist => self.source.fetch_nist().await,
            BeaconKind::Date => unreachable!(),
        };

        let mut state = self.state_for(kind).write().await;
        match fetched {
            Ok(value) => {
                let changed = state.cache.as_ref().map(|e| e.value != value).unwrap_or(true);
                if changed {
                    state.history.push_front(value.clone());
                    state.history.truncate(HISTORY_CAP);
                }
                state.cache = Some(CacheEntry {
                    value: value.clone(),
                    fetched_at: now,
                    expires_at: now + kind.cache_ttl(),
                });
                Ok(value)
            }
            Err(e) => {
                if let Some(entry) = &state.cache {
                    warn!(kind = kind.id(), error = %e, "beacon fetch failed, serving cached value");
                    Ok(entry.value.clone())
                } else {
                    Err(StegoError::BeaconUnavailable(kind))
                }
            }
        }
    }

    /// Ordered (epoch_key material, beacon_value) candidates for the
    /// receiver's grace-period probe (§4.3): newest-first history for
    /// btc/nist, or today + previous UTC days for date.
    pub async fn candidate_values(&self, kind: BeaconKind) -> Vec<String> {
        match kind {
            BeaconKind::Date => {
                let info = epoch_info(kind);
                let mut out = Vec::with_capacity(info.epochs_to_check as usize + 1);
                let today = Utc::now().date_naive();
                out.push(today.format("%Y-%m-%d").to_string());
                for i in 1..=info.epochs_to_check as i64 {
                    out.push((today - chrono::Duration::days(i)).format("%Y-%m-%d").to_string());
                }
                out
            }
            _ => {
                let state = self.state_for(kind).read().await;
                if !state.history.is_empty() {
                    state.history.iter().cloned().collect()
                } else if let Some(entry) = &state.cache {
                    vec![entry.value.clone()]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

fn today_utc_string() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}
