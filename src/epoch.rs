// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Epoch-key derivation: a deterministic, pure function tying the shared
//! channel secret to the current public beacon value.

use crate::beacon::{BeaconKind, BeaconOracle};
use crate::crypto::{hkdf_expand, SecretKey, KEY_LEN};
use crate::error::Result;

/// derive_epoch_key(channel_key, beacon_id, beacon_value) =
/// HKDF-Expand(channel_key, "{beacon_id}:{beacon_value}:stegochannel-v0", 32)
pub fn derive_epoch_key(channel_key: &SecretKey, beacon_id: &str, beacon_value: &str) -> SecretKey {
    let info = format!("{beacon_id}:{beacon_value}:stegochannel-v0");
    let okm = hkdf_expand(channel_key.as_bytes(), info.as_bytes(), KEY_LEN)
        .expect("32-byte output never exceeds HKDF's length limit");
    SecretKey::from_slice(&okm).expect("hkdf_expand(.., 32) returns exactly 32 bytes")
}

/// One candidate epoch the receiver should try during grace-period decoding:
/// the derived key plus the beacon value it came from (useful for logging
/// and for nonce/seq bookkeeping upstream).
pub struct EpochCandidate {
    pub epoch_key: SecretKey,
    pub beacon_value: String,
}

/// Ordered list of candidate epochs for the receiver's grace-period probe
/// (§4.3): most-recent beacon value first, then progressively older ones.
pub async fn candidate_epochs(
    channel_key: &SecretKey,
    kind: BeaconKind,
    oracle: &BeaconOracle,
) -> Result<Vec<EpochCandidate>> {
    let values = oracle.candidate_values(kind).await;
    Ok(values
        .into_iter()
        .map(|beacon_value| {
            let epoch_key = derive_epoch_key(channel_key, kind.id(), &beacon_value);
            EpochCandidate {
                epoch_key,
                beacon_value,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let ck = SecretKey::new([1u8; KEY_LEN]);
        let a = derive_epoch_key(&ck, "date", "2025-01-15");
        let b = derive_epoch_key(&ck, "date", "2025-01-15");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn derivation_depends_on_beacon_value() {
        let ck = SecretKey::new([1u8; KEY_LEN]);
        let a = derive_epoch_key(&ck, "date", "2025-01-15");
        let b = derive_epoch_key(&ck, "date", "2025-01-16");
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
