// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The frame codec (§4.6): header + optional AEAD payload + truncated HMAC
//! tag, wrapped in a Reed-Solomon block for forward error correction.

use reed_solomon::{Decoder, Encoder};

use crate::crypto::{aead_decrypt, aead_encrypt, hmac_sha256_trunc64, sha256, SecretKey, NONCE_LEN, TAG_LEN};
use crate::error::{DecodeFailure, Result, StegoError};

/// RS(255, k) block size. The protocol always encodes up to the full
/// 255-byte symbol alphabet of GF(2^8).
const RS_BLOCK_LEN: usize = 255;

/// Parity bytes appended by Reed-Solomon; correctable up to 4 symbol errors.
const RS_ECC_LEN: usize = 8;

/// Header size: one `V|F` byte plus a 16-bit big-endian `LEN_BITS`.
const HEADER_LEN: usize = 3;

/// Largest payload (after any AEAD encryption) a frame can carry.
///
/// Derived, not asserted: `HEADER_LEN + payload + TAG_LEN + RS_ECC_LEN` must
/// fit in `RS_BLOCK_LEN`, which puts the cap at 236 bytes — not the 244
/// sometimes quoted elsewhere, which omits the RS parity from the budget.
pub const MAX_PAYLOAD_BYTES: usize = RS_BLOCK_LEN - HEADER_LEN - TAG_LEN - RS_ECC_LEN;

const VERSION: u8 = 0;
const FLAG_ENCRYPTED: u8 = 0b0001;

/// The result of decoding a candidate bit stream: either a fully validated
/// frame, or an opaque, non-escalating failure (§4.6, §7).
pub struct DecodedFrame {
    pub version: u8,
    pub encrypted: bool,
    pub payload: Vec<u8>,
}

fn derive_nonce(epoch_key: &SecretKey, seq: u64) -> [u8; NONCE_LEN] {
    let h = sha256(&[epoch_key.as_bytes().as_slice(), b"nonce", &seq.to_be_bytes()].concat());
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&h[..NONCE_LEN]);
    nonce
}

fn pack_bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit != 0 {
            bytes[i / 8] |= 0x80 >> (i % 8);
        }
    }
    bytes
}

fn unpack_bytes_to_bits(bytes: &[u8], bit_count: usize) -> Vec<u8> {
    (0..bit_count)
        .map(|i| ((bytes[i / 8] >> (7 - i % 8)) & 1))
        .collect()
}

/// Encode `payload` into a transmittable MSB-first bit vector.
///
/// `epoch_key` is used both as the HMAC key and, when `encrypted`, as the
/// AEAD key; `seq` is folded into the AEAD nonce only (§4.6 "known quirk").
pub fn encode_frame(payload: &[u8], epoch_key: &SecretKey, encrypted: bool, seq: u64) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(StegoError::MessageTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_BYTES,
        });
    }

    let payload_bytes = if encrypted {
        let nonce = derive_nonce(epoch_key, seq);
        aead_encrypt(epoch_key.as_bytes(), &nonce, payload)
    } else {
        payload.to_vec()
    };

    let len_bits = (payload_bytes.len() as u16)
        .checked_mul(8)
        .ok_or(StegoError::MessageTooLarge {
            len: payload_bytes.len(),
            max: MAX_PAYLOAD_BYTES,
        })?;

    let flags = if encrypted { FLAG_ENCRYPTED } else { 0 };
    let mut header_and_payload = Vec::with_capacity(HEADER_LEN + payload_bytes.len());
    header_and_payload.push((VERSION << 4) | flags);
    header_and_payload.extend_from_slice(&len_bits.to_be_bytes());
    header_and_payload.extend_from_slice(&payload_bytes);

    let tag = hmac_sha256_trunc64(epoch_key.as_bytes(), &header_and_payload);

    let mut block = header_and_payload;
    block.extend_from_slice(&tag);
    if block.len() + RS_ECC_LEN > RS_BLOCK_LEN {
        return Err(StegoError::MessageTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_BYTES,
        });
    }

    let encoder = Encoder::new(RS_ECC_LEN);
    let rs_block = encoder.encode(&block);

    Ok(unpack_bytes_to_bits(&rs_block, rs_block.len() * 8))
}

/// Decode a candidate bit vector previously produced by [`encode_frame`].
///
/// Never returns `Err` for a malformed or inauthentic candidate — callers in
/// the receiver's trial loop need an opaque non-success, not a reason, so
/// every rejection is folded into `valid: false` by the caller's match on
/// `DecodeFailure`. This function itself returns `Result<DecodedFrame,
/// DecodeFailure>` so the trial loop can discard the reason uniformly.
pub fn decode_frame(
    bits: &[u8],
    epoch_key: &SecretKey,
    seq: u64,
) -> std::result::Result<DecodedFrame, DecodeFailure> {
    if bits.len() < (HEADER_LEN + TAG_LEN + RS_ECC_LEN) * 8 {
        return Err(DecodeFailure::TooFewBits);
    }
    let byte_count = bits.len() / 8;
    let rs_block = pack_bits_to_bytes(&bits[..byte_count * 8]);
    if rs_block.len() < RS_ECC_LEN {
        return Err(DecodeFailure::TooFewBits);
    }

    let decoder = Decoder::new(RS_ECC_LEN);
    let corrected = decoder
        .correct(&rs_block, None)
        .map_err(|_| DecodeFailure::RsUncorrectable)?;
    let block = corrected.data();

    if block.len() < HEADER_LEN + TAG_LEN {
        return Err(DecodeFailure::TooFewBits);
    }

    let version = block[0] >> 4;
    let flags = block[0] & 0x0F;
    let encrypted = flags & FLAG_ENCRYPTED != 0;
    let len_bits = u16::from_be_bytes([block[1], block[2]]) as usize;
    let len_bytes = len_bits.div_ceil(8);

    let payload_end = HEADER_LEN + len_bytes;
    if block.len() < payload_end + TAG_LEN || len_bits > len_bytes * 8 {
        return Err(DecodeFailure::LenInconsistent);
    }

    let header_and_payload = &block[..payload_end];
    let tag = &block[payload_end..payload_end + TAG_LEN];
    let expected_tag = hmac_sha256_trunc64(epoch_key.as_bytes(), header_and_payload);
    if !crate::crypto::ct_eq(tag, &expected_tag) {
        return Err(DecodeFailure::AuthFailure);
    }

    let payload_bytes = &header_and_payload[HEADER_LEN..];
    let payload = if encrypted {
        let nonce = derive_nonce(epoch_key, seq);
        aead_decrypt(epoch_key.as_bytes(), &nonce, payload_bytes).ok_or(DecodeFailure::DecryptFailure)?
    } else {
        payload_bytes.to_vec()
    };

    Ok(DecodedFrame {
        version,
        encrypted,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;

    fn key(b: u8) -> SecretKey {
        SecretKey::new([b; KEY_LEN])
    }

    #[test]
    fn plaintext_round_trips() {
        let ek = key(1);
        let bits = encode_frame(b"Hello StegoChannel", &ek, false, 0).unwrap();
        let decoded = decode_frame(&bits, &ek, 0).unwrap();
        assert_eq!(decoded.payload, b"Hello StegoChannel");
        assert!(!decoded.encrypted);
        assert_eq!(decoded.version, 0);
    }

    #[test]
    fn encrypted_round_trips() {
        let ek = key(2);
        let bits = encode_frame(b"Secret message", &ek, true, 7).unwrap();
        let decoded = decode_frame(&bits, &ek, 7).unwrap();
        assert_eq!(decoded.payload, b"Secret message");
        assert!(decoded.encrypted);
    }

    #[test]
    fn wrong_seq_fails_decrypt_not_auth() {
        let ek = key(3);
        let bits = encode_frame(b"Secret message", &ek, true, 7).unwrap();
        let err = decode_frame(&bits, &ek, 8).unwrap_err();
        assert_eq!(err, DecodeFailure::DecryptFailure);
    }

    #[test]
    fn tampered_tag_fails_auth() {
        let ek = key(4);
        let mut bits = encode_frame(b"hi", &ek, false, 0).unwrap();
        // Flip one payload bit without breaking RS-correctability margin
        // (flip every bit of the corresponding byte instead of a single bit
        // so RS's 4-symbol budget is also exhausted for this symbol, matching
        // scenario 5's "beyond tolerance" framing would need more bytes; here
        // we only need the HMAC to fail which happens once RS still decodes
        // the corrupted byte).
        let idx = 3 * 8;
        for b in bits.iter_mut().skip(idx).take(8) {
            *b ^= 1;
        }
        let result = decode_frame(&bits, &ek, 0);
        assert!(result.is_err());
    }

    #[test]
    fn rs_corrects_within_tolerance() {
        let ek = key(5);
        let mut bits = encode_frame(b"Hello StegoChannel", &ek, false, 0).unwrap();
        let mut bytes = pack_bits_to_bytes(&bits);
        bytes[5] ^= 0xFF;
        bytes[10] ^= 0xAA;
        bytes[15] ^= 0x55;
        bits = unpack_bytes_to_bits(&bytes, bytes.len() * 8);
        let decoded = decode_frame(&bits, &ek, 0).unwrap();
        assert_eq!(decoded.payload, b"Hello StegoChannel");
    }

    #[test]
    fn rs_fails_beyond_tolerance() {
        let ek = key(6);
        let bits = encode_frame(b"Hello StegoChannel", &ek, false, 0).unwrap();
        let mut bytes = pack_bits_to_bytes(&bits);
        for b in bytes.iter_mut().take(6) {
            *b ^= 0xFF;
        }
        let bits = unpack_bytes_to_bits(&bytes, bytes.len() * 8);
        let result = decode_frame(&bits, &ek, 0);
        assert!(result.is_err());
    }

    #[test]
    fn oversized_payload_rejected_at_encode() {
        let ek = key(7);
        let huge = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        assert!(encode_frame(&huge, &ek, false, 0).is_err());
    }

    #[test]
    fn max_payload_boundary_encodes() {
        let ek = key(8);
        let full = vec![0x42u8; MAX_PAYLOAD_BYTES];
        let bits = encode_frame(&full, &ek, false, 0).unwrap();
        let decoded = decode_frame(&bits, &ek, 0).unwrap();
        assert_eq!(decoded.payload, full);
    }

    #[test]
    fn too_few_bits_reported_distinctly() {
        let ek = key(9);
        let result = decode_frame(&[0u8; 4], &ek, 0);
        assert_eq!(result.unwrap_err(), DecodeFailure::TooFewBits);
    }
}
