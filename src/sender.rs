// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The sender pipeline (§4.7): a per-channel queue of outgoing messages,
//! drained one frame at a time by matching the frame's bits against the
//! features of posts the caller is about to publish.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::info;
use zeroize::Zeroize;

use crate::crypto::SecretKey;
use crate::features::{extract_bits, feature_bit_count, FeatureKind};
use crate::frame::encode_frame;

/// Relative send order within the queue; `High` jumps the line (used by
/// `cancel_transmission` to re-queue an in-flight message, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal,
    High,
}

struct QueuedMessage {
    priority: Priority,
    plaintext: Vec<u8>,
    encrypted: bool,
}

/// A transmission in progress: the encoded frame's bits, how far the
/// receiver-side matching has advanced, and the epoch key it was framed
/// under.
struct ActiveTransmission {
    epoch_key: SecretKey,
    epoch_expires_at: Instant,
    pending_bits: Vec<u8>,
    bit_position: usize,
    total_bits: usize,
    signal_posts_used: Vec<String>,
    seq: u64,
}

/// What `confirm_post` learned about a just-published post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmOutcome {
    pub was_signal: bool,
    pub advanced: bool,
    pub completed: bool,
}

/// What `check_post` tells a caller about a draft before they publish it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    NoActiveTransmission,
    TransmissionComplete,
    WouldMatch { bits_needed: usize },
    WouldMismatch { bits_needed: usize },
}

/// Per-channel sender state machine. Not `Send`-shared directly — the
/// engine wraps one of these per channel behind a `tokio::sync::Mutex`
/// (§5: "per-channel state is accessed only from the poll task... serialized
/// by a per-channel lock").
pub struct SenderState {
    queue: VecDeque<QueuedMessage>,
    active: Option<ActiveTransmission>,
    sender_seq_num: u64,
    feature_set: Vec<FeatureKind>,
    length_threshold: usize,
    selection_rate: f64,
    epoch_duration: Duration,
}

impl SenderState {
    pub fn new(feature_set: Vec<FeatureKind>, length_threshold: usize, selection_rate: f64, epoch_duration: Duration, sender_seq_num: u64) -> Self {
        SenderState {
            queue: VecDeque::new(),
            active: None,
            sender_seq_num,
            feature_set,
            length_threshold,
            selection_rate,
            epoch_duration,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn sender_seq_num(&self) -> u64 {
        self.sender_seq_num
    }

    /// `queue_message`: appends; the engine is responsible for calling
    /// `start_next` afterwards when the channel was idle (§4.7).
    pub fn queue_message(&mut self, plaintext: Vec<u8>, encrypted: bool, priority: Priority) {
        let msg = QueuedMessage {
            priority,
            plaintext,
            encrypted,
        };
        match priority {
            Priority::High => self.queue.push_front(msg),
            Priority::Normal => self.queue.push_back(msg),
        }
    }

    /// Pop the head of the queue, frame-encode it under `epoch_key`, and
    /// transition to `Active`. Returns `false` if the queue was empty.
    pub fn start_next(
        &mut self,
        epoch_key: SecretKey,
        epoch_expires_at: Instant,
        channel_id: &str,
    ) -> crate::error::Result<bool> {
        let Some(msg) = self.queue.pop_front() else {
            return Ok(false);
        };
        let seq = self.sender_seq_num;
        let bits = encode_frame(&msg.plaintext, &epoch_key, msg.encrypted, seq)?;
        let total_bits = bits.len();
        self.active = Some(ActiveTransmission {
            epoch_key,
            epoch_expires_at,
            pending_bits: bits,
            bit_position: 0,
            total_bits,
            signal_posts_used: Vec::new(),
            seq,
        });
        self.sender_seq_num += 1;
        info!(channel_id, total_bits, seq, "transmission started");
        Ok(true)
    }

    fn remaining_bits(&self, tx: &ActiveTransmission) -> usize {
        tx.total_bits - tx.bit_position
    }

    /// Pure preview of what publishing `(draft_text, has_media)` right now
    /// would do, without consuming any state (§4.7).
    pub fn check_post(&self, draft_text: &str, has_media: bool) -> PreviewOutcome {
        let Some(tx) = &self.active else {
            return PreviewOutcome::NoActiveTransmission;
        };
        let remaining = self.remaining_bits(tx);
        if remaining == 0 {
            return PreviewOutcome::TransmissionComplete;
        }
        let k = feature_bit_count(&self.feature_set).min(remaining);
        let bits = extract_bits(draft_text, has_media, &self.feature_set, self.length_threshold);
        if bits[..k.min(bits.len())] == tx.pending_bits[..k.min(tx.pending_bits.len())] {
            PreviewOutcome::WouldMatch { bits_needed: k }
        } else {
            PreviewOutcome::WouldMismatch { bits_needed: k }
        }
    }

    /// `confirm_post`: the external post sink returned `post_uri` as the
    /// canonical id for a post actually published. Tells the caller whether
    /// it was a signal post and whether it advanced the transmission.
    pub fn confirm_post(&mut self, post_uri: &str, post_id: &str, text: &str, has_media: bool, channel_id: &str) -> ConfirmOutcome {
        let Some(tx) = &mut self.active else {
            return ConfirmOutcome {
                was_signal: false,
                advanced: false,
                completed: false,
            };
        };
        let was_signal = crate::selector::is_signal_post(&tx.epoch_key, post_id, self.selection_rate);
        if !was_signal {
            return ConfirmOutcome {
                was_signal: false,
                advanced: false,
                completed: false,
            };
        }

        let remaining = self.remaining_bits(tx);
        let k = feature_bit_count(&self.feature_set).min(remaining);
        let bits = extract_bits(text, has_media, &self.feature_set, self.length_threshold);
        let matches = k > 0 && bits.len() >= k && tx.pending_bits[tx.bit_position..tx.bit_position + k] == bits[..k];

        if !matches {
            return ConfirmOutcome {
                was_signal: true,
                advanced: false,
                completed: false,
            };
        }

        tx.bit_position += k;
        tx.signal_posts_used.push(post_uri.to_string());
        let completed = tx.bit_position == tx.total_bits;
        info!(channel_id, bit_position = tx.bit_position, total_bits = tx.total_bits, "signal post matched");

        if completed {
            self.complete_tx(channel_id);
        }

        ConfirmOutcome {
            was_signal: true,
            advanced: true,
            completed,
        }
    }

    /// Zero the transmission's secrets and clear it. The engine calls
    /// `start_next` afterwards if the queue is non-empty.
    fn complete_tx(&mut self, channel_id: &str) {
        self.active = None;
        info!(channel_id, "transmission completed");
    }

    /// `cancel_transmission`: reconstruct the in-flight message is not
    /// possible from bits alone (the frame is one-way), so the caller must
    /// supply the original plaintext/encrypted flag it still holds; this
    /// re-queues it at `Priority::High` and zeroes the in-flight secrets.
    pub fn cancel_transmission(&mut self, plaintext: Vec<u8>, encrypted: bool, channel_id: &str) {
        self.active = None;
        self.queue_message(plaintext, encrypted, Priority::High);
        info!(channel_id, "transmission cancelled and requeued");
    }

    /// `get_or_refresh_epoch_key`: true if the active transmission's cached
    /// epoch key is still within its validity window.
    pub fn epoch_key_still_valid(&self, now: Instant) -> bool {
        self.active.as_ref().is_some_and(|tx| now < tx.epoch_expires_at)
    }

    pub fn epoch_duration(&self) -> Duration {
        self.epoch_duration
    }

    pub fn signal_posts_used(&self) -> &[String] {
        self.active.as_ref().map(|tx| tx.signal_posts_used.as_slice()).unwrap_or(&[])
    }

    /// Zero the active transmission's epoch key in place, leaving its queue
    /// position and bit progress untouched (§3, §5: "EpochKey ... zeroed
    /// on lock"). A locked channel rejects every call that would resume
    /// matching against it, so the zeroed buffer is never read again until
    /// the transmission is cancelled or a fresh one is started.
    pub fn zero_active_epoch_key(&mut self) {
        if let Some(tx) = &mut self.active {
            tx.epoch_key.zeroize();
        }
    }

    /// True if there is no active transmission, or its epoch key buffer has
    /// been zeroed — the testable post-lock property from §8.
    pub fn active_epoch_key_is_zeroed(&self) -> bool {
        self.active.as_ref().map(|tx| tx.epoch_key.is_zeroed()).unwrap_or(true)
    }
}
