// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel identity and configuration: the shared secret, its textual
//! encoding (§6.1), and the per-channel knobs that drive selection and
//! feature extraction.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::beacon::BeaconKind;
use crate::crypto::{SecretKey, KEY_LEN};
use crate::error::{Result, StegoError};
use crate::features::FeatureKind;

/// `(0.0, 1.0]`; the spec's practical range is `[0.10, 0.50]` but callers may
/// go outside it deliberately (e.g. tests), so only the hard bound is
/// enforced here.
fn validate_rate(rate: f64) -> Result<()> {
    if rate > 0.0 && rate <= 1.0 {
        Ok(())
    } else {
        Err(StegoError::InvalidChannelKeyFormat(format!(
            "selection rate {rate} outside (0, 1]"
        )))
    }
}

/// A single channel's full configuration (§3 `ChannelConfig`).
#[derive(Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: String,
    #[serde(skip_serializing)]
    pub channel_key: ChannelKeyBytes,
    pub beacon: BeaconKind,
    pub selection_rate: f64,
    pub feature_set: Vec<FeatureKind>,
    pub length_threshold: usize,
    pub my_sources: Vec<String>,
    pub their_sources: Vec<String>,
}

/// Serde-friendly wrapper so `ChannelConfig` can round-trip through TOML
/// without ever serializing raw key bytes by accident (the field above is
/// marked `skip_serializing`; this type exists purely for the `Deserialize`
/// derive to have somewhere to land the key when loading config files that
/// do carry one, e.g. test fixtures). Zeroizes on drop like `SecretKey`
/// (§3, §5: "ChannelKey ... zeroed on lock").
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ChannelKeyBytes(#[serde(with = "hex::serde")] pub [u8; KEY_LEN]);

impl ChannelKeyBytes {
    pub fn to_secret(&self) -> SecretKey {
        SecretKey::new(self.0)
    }

    pub fn zero(&mut self) {
        self.0.zeroize();
    }
}

impl ChannelConfig {
    pub fn channel_key(&self) -> SecretKey {
        self.channel_key.to_secret()
    }
}

fn parse_beacon(s: &str) -> Result<BeaconKind> {
    BeaconKind::parse(s).ok_or_else(|| StegoError::InvalidChannelKeyFormat(format!("unknown beacon kind {s:?}")))
}

fn feature_from_textual_id(id: &str) -> Result<FeatureKind> {
    match id {
        "len" => Ok(FeatureKind::Len),
        "media" => Ok(FeatureKind::Media),
        // §6.1's textual charset spells the punctuation feature "punct";
        // it is the same feature §4.5 calls `qmark` internally.
        "punct" | "qmark" => Ok(FeatureKind::Qmark),
        "time" | "emoji" => Err(StegoError::InvalidChannelKeyFormat(format!(
            "feature {id:?} is reserved and not yet implemented"
        ))),
        other => Err(StegoError::InvalidChannelKeyFormat(format!("unknown feature {other:?}"))),
    }
}

/// Parse the `features` field of a textual channel key (§6.1). The literal
/// string `v0` is a standalone alias for `len,media,punct`, not a member of
/// the comma-separated list.
fn parse_feature_field(field: &str) -> Result<Vec<FeatureKind>> {
    if field == "v0" {
        return Ok(vec![FeatureKind::Len, FeatureKind::Media, FeatureKind::Qmark]);
    }
    field.split(',').map(feature_from_textual_id).collect()
}

/// Parse `stegochannel:v0:<base64url_key>:<beacon>:<rate>:<features>`.
pub fn parse_textual_key(s: &str) -> Result<(SecretKey, BeaconKind, f64, Vec<FeatureKind>)> {
    let fields: Vec<&str> = s.split(':').collect();
    if fields.len() != 6 {
        return Err(StegoError::InvalidChannelKeyFormat(format!(
            "expected 6 colon-separated fields, found {}",
            fields.len()
        )));
    }
    if fields[0] != "stegochannel" {
        return Err(StegoError::InvalidChannelKeyFormat("missing 'stegochannel' prefix".into()));
    }
    if fields[1] != "v0" {
        return Err(StegoError::InvalidChannelKeyFormat(format!("unsupported version {:?}", fields[1])));
    }
    let key_bytes = URL_SAFE_NO_PAD
        .decode(fields[2])
        .map_err(|e| StegoError::InvalidChannelKeyFormat(format!("invalid base64url key: {e}")))?;
    let key = SecretKey::from_slice(&key_bytes)
        .ok_or_else(|| StegoError::InvalidChannelKeyFormat(format!("key decodes to {} bytes, want 32", key_bytes.len())))?;
    let beacon = parse_beacon(fields[3])?;
    let rate: f64 = fields[4]
        .parse()
        .map_err(|_| StegoError::InvalidChannelKeyFormat(format!("invalid rate {:?}", fields[4])))?;
    validate_rate(rate)?;
    let features = parse_feature_field(fields[5])?;
    Ok((key, beacon, rate, features))
}

/// Render a textual channel key. Always uses `v0` as the literal features
/// alias when `features` is exactly `[len, media, qmark]`, to keep
/// `format_textual_key` and `parse_textual_key` round-tripping on the
/// common case `stegoctl keygen` produces.
pub fn format_textual_key(key: &SecretKey, beacon: BeaconKind, rate: f64, features: &[FeatureKind]) -> String {
    let encoded_key = URL_SAFE_NO_PAD.encode(key.as_bytes());
    let feature_field = if features == [FeatureKind::Len, FeatureKind::Media, FeatureKind::Qmark] {
        "v0".to_string()
    } else {
        features
            .iter()
            .map(|f| match f {
                FeatureKind::Len => "len",
                FeatureKind::Media => "media",
                FeatureKind::Qmark => "punct",
                FeatureKind::Fword => "fword",
            })
            .collect::<Vec<_>>()
            .join(",")
    };
    format!("stegochannel:v0:{encoded_key}:{}:{rate}:{feature_field}", beacon.id())
}
