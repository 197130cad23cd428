// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The keyed post-selection function (§4.4): decides, without looking at
//! post content, whether a given post id is a "signal post" under an epoch
//! key. Deterministic and side-channel-safe by construction — the only
//! variable-time step (the decimal scaling) operates on public constants,
//! never secret data.

use crate::crypto::{ct_lt_u64, sha256_concat, SecretKey};

/// Scale used to turn a decimal `rate` into an integer threshold without the
/// IEEE-754 drift that `(rate * u64::MAX as f64) as u64` suffers near
/// `rate == 1.0` (§4.4 step 3).
const DECIMAL_SCALE: u64 = 1_000_000_000;

/// `⌊rate · (2⁶⁴−1)⌋`, computed via 9-digit decimal scaling.
pub fn selection_threshold(rate: f64) -> u64 {
    debug_assert!((0.0..=1.0).contains(&rate));
    let scaled_rate = (rate * DECIMAL_SCALE as f64).round() as u128;
    let numerator = scaled_rate * u64::MAX as u128;
    (numerator / DECIMAL_SCALE as u128) as u64
}

/// The raw 64-bit selection value for `(epoch_key, post_id)`, exposed
/// separately from [`is_signal_post`] for diagnostics (e.g. `stegoctl
/// signal`) and for the fixed test vector in §8 scenario 6.
pub fn selection_value(epoch_key: &SecretKey, post_id: &str) -> u64 {
    let h = sha256_concat(&[epoch_key.as_bytes(), post_id.as_bytes()]);
    u64::from_be_bytes(h[0..8].try_into().unwrap())
}

/// `is_signal_post(epoch_key, post_id, rate)`: true iff the post's selection
/// value falls below the channel's selection threshold.
pub fn is_signal_post(epoch_key: &SecretKey, post_id: &str, rate: f64) -> bool {
    let value = selection_value(epoch_key, post_id);
    let threshold = selection_threshold(rate);
    ct_lt_u64(value, threshold)
}
