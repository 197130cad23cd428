// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// Why a candidate bit stream failed to decode into a valid frame.
///
/// Callers in the receiver trial loop must treat every variant identically
/// (a non-success for this candidate) so that an observer poking at the feed
/// cannot learn which layer rejected the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    TooFewBits,
    LenInconsistent,
    RsUncorrectable,
    AuthFailure,
    DecryptFailure,
}

impl std::fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecodeFailure::TooFewBits => "too few bits for a frame header",
            DecodeFailure::LenInconsistent => "LEN_BITS inconsistent with decoded block",
            DecodeFailure::RsUncorrectable => "Reed-Solomon block uncorrectable",
            DecodeFailure::AuthFailure => "HMAC tag mismatch",
            DecodeFailure::DecryptFailure => "AEAD decryption failed",
        };
        f.write_str(s)
    }
}

/// Crate-wide error taxonomy. Kept as a single flat enum (the teacher's
/// `forest_db::Error` / `EncryptedKeyStoreError` style) rather than a tree of
/// per-module error types.
#[derive(Debug, Error)]
pub enum StegoError {
    #[error("beacon unavailable: no live value and nothing cached for {0:?}")]
    BeaconUnavailable(crate::beacon::BeaconKind),

    #[error("channel {0} is not registered")]
    ChannelUnknown(String),

    #[error("channel is locked")]
    Locked,

    #[error("invalid channel key format: {0}")]
    InvalidChannelKeyFormat(String),

    #[error("message too large: {len} bytes exceeds the {max}-byte frame capacity")]
    MessageTooLarge { len: usize, max: usize },

    #[error("hkdf output length too large")]
    HkdfOutputTooLarge,

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("persistence backend failed: {0}")]
    Persistence(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StegoError>;
