// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives used throughout the protocol: SHA-256, truncated
//! HMAC-SHA-256, HKDF-Expand, XChaCha20-Poly1305 AEAD, Argon2id, and
//! constant-time comparisons. Nothing here is protocol-aware; callers supply
//! already-derived keys and nonces.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::{ConstantTimeEq, ConstantTimeLess};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, StegoError};

/// Length in bytes of a [`ChannelKey`] or [`EpochKey`].
pub const KEY_LEN: usize = 32;

/// HMAC tag length carried in a frame (truncated from the full 32-byte
/// HMAC-SHA-256 output, per §4.1).
pub const TAG_LEN: usize = 8;

/// 24-byte nonce used by XChaCha20-Poly1305.
pub const NONCE_LEN: usize = 24;

/// A 32-byte secret that zeroes itself on drop. Used for both `ChannelKey`
/// and `EpochKey` — the two share the same representation and lifetime
/// discipline (§3, §5: "zeroed on lock/cancel/complete").
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        SecretKey(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEY_LEN {
            return None;
        }
        let mut buf = [0u8; KEY_LEN];
        buf.copy_from_slice(bytes);
        Some(SecretKey(buf))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// True iff every byte is zero — the post-zeroization state asserted by
    /// the zeroization property in §8.
    pub fn is_zeroed(&self) -> bool {
        self.0.ct_eq(&[0u8; KEY_LEN]).into()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over several concatenated slices, avoiding an intermediate
/// allocation for the common "prefix ‖ suffix" shape used throughout the
/// frame codec and selector.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// HMAC-SHA-256, truncated to the first 8 bytes (the 64-bit TAG of §4.6).
pub fn hmac_sha256_trunc64(key: &[u8], data: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    let full = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&full[..TAG_LEN]);
    tag
}

/// HKDF-Expand(prk, info, out_len). `prk` is used directly as the HKDF
/// pseudorandom key (no extract step) — callers already hold a
/// uniformly-random 32-byte secret.
pub fn hkdf_expand(prk: &[u8; KEY_LEN], info: &[u8], out_len: usize) -> Result<Vec<u8>> {
    if out_len > 255 * 32 {
        return Err(StegoError::HkdfOutputTooLarge);
    }
    let hk = Hkdf::<Sha256>::from_prk(prk).expect("32-byte PRK matches SHA-256 output length");
    let mut okm = vec![0u8; out_len];
    hk.expand(info, &mut okm)
        .map_err(|_| StegoError::HkdfOutputTooLarge)?;
    Ok(okm)
}

/// Encrypt `plaintext` under XChaCha20-Poly1305 with a 24-byte nonce.
/// Returns ciphertext ‖ 16-byte tag.
pub fn aead_encrypt(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .expect("encryption with a fixed-size key/nonce cannot fail")
}

/// Decrypt a ciphertext produced by [`aead_encrypt`]. Fails (returns `None`,
/// never panics) on tag mismatch — the `AuthFailure` path of §4.1.
pub fn aead_decrypt(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Option<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &[],
            },
        )
        .ok()
}

/// Argon2id(password, salt, opslimit=3, memlimit=64 MiB, out_len=32), used by
/// embedding applications to unlock a locally persisted `ChannelKey` from a
/// user passphrase — not part of the wire protocol itself.
pub fn argon2id(password: &[u8], salt: &[u8; 16], out_len: usize) -> Result<Vec<u8>> {
    let params = Params::new(64 * 1024, 3, 1, Some(out_len))
        .map_err(|e| StegoError::Other(format!("invalid argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = vec![0u8; out_len];
    argon2
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| StegoError::Other(format!("argon2id failed: {e}")))?;
    Ok(out)
}

/// Constant-time byte equality.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Constant-time `a < b` over two big-endian u64 values, used by the post
/// selector (§4.4) so that the selection decision leaks no timing signal.
pub fn ct_lt_u64(a: u64, b: u64) -> bool {
    a.ct_lt(&b).into()
}
