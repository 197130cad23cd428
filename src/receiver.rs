// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The receiver pipeline (§4.8): one polling tick walks candidate epochs
//! most-recent-first, filters posts down to signal posts, extracts and
//! deduplicates bits, and trials a small window of sequence numbers against
//! the frame codec.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::channel::ChannelConfig;
use crate::crypto::{sha256, SecretKey};
use crate::epoch::candidate_epochs;
use crate::features::{extract_bits, normalize_text};
use crate::frame::decode_frame;
use crate::post::{FetchOptions, Post, PostSource};
use crate::selector::is_signal_post;

/// §4.8 step (f): the window of sequence numbers tried past the receiver's
/// current expectation before giving up for this tick.
pub const MAX_SEQ_SKIP: u64 = 5;

/// One hour, in milliseconds — the dedup bucket width (§4.8 step (e)).
const DEDUP_BUCKET_MS: i64 = 3_600_000;

/// Per-channel receiver state: the only durable fact is the next expected
/// sequence number (§6.4: "sequence numbers MUST persist").
pub struct ReceiverState {
    pub receiver_seq_num: u64,
}

impl ReceiverState {
    pub fn new(receiver_seq_num: u64) -> Self {
        ReceiverState { receiver_seq_num }
    }
}

/// A successfully decoded message, plus the bookkeeping the caller needs to
/// advance state.
pub struct ReceivedMessage {
    pub payload: Vec<u8>,
    pub encrypted: bool,
    pub used_seq: u64,
}

fn dedup_key(text: &str, bits: &[u8], published_at_ms: i64) -> [u8; 32] {
    let normalized = normalize_text(text);
    let bits_str: String = bits.iter().map(|b| if *b == 0 { '0' } else { '1' }).collect();
    let bucket = published_at_ms / DEDUP_BUCKET_MS;
    sha256(format!("{normalized}{bits_str}{bucket}").as_bytes())
}

fn deterministic_order(a: &Post, b: &Post) -> std::cmp::Ordering {
    a.published_at.cmp(&b.published_at).then_with(|| a.id.cmp(&b.id))
}

/// Fetch every `config.their_sources`, tolerating per-source failures
/// (§4.8 step 2, §5 "feed fetches... failures are isolated").
async fn fetch_all_sources(sources: &[(String, &dyn PostSource)], channel_id: &str) -> Vec<Post> {
    let fetches = sources.iter().map(|(handle, source)| async move {
        match source.get_author_feed(handle, FetchOptions::default()).await {
            Ok(page) => Some(page.posts),
            Err(e) => {
                warn!(channel_id, source = %handle, error = %e, "feed fetch failed, skipping source");
                None
            }
        }
    });
    futures::future::join_all(fetches).await.into_iter().flatten().flatten().collect()
}

/// Run one polling tick for a channel. `sources` pairs each of
/// `config.their_sources` with the adapter that serves it.
pub async fn poll_tick(
    config: &ChannelConfig,
    state: &mut ReceiverState,
    oracle: &crate::beacon::BeaconOracle,
    sources: &[(String, &dyn PostSource)],
) -> Option<ReceivedMessage> {
    let epochs = match candidate_epochs(&config.channel_key(), config.beacon, oracle).await {
        Ok(e) => e,
        Err(e) => {
            warn!(channel_id = %config.channel_id, error = %e, "could not compute candidate epochs this tick");
            return None;
        }
    };

    let posts = fetch_all_sources(sources, &config.channel_id).await;
    debug!(channel_id = %config.channel_id, post_count = posts.len(), "fetched posts for tick");

    let mut processed_post_ids: HashSet<String> = HashSet::new();

    for candidate in &epochs {
        if let Some(result) = try_epoch(config, state, &candidate.epoch_key, &posts, &mut processed_post_ids) {
            return Some(result);
        }
    }

    None
}

fn try_epoch(
    config: &ChannelConfig,
    state: &mut ReceiverState,
    epoch_key: &SecretKey,
    posts: &[Post],
    processed_post_ids: &mut HashSet<String>,
) -> Option<ReceivedMessage> {
    let mut signals: Vec<&Post> = posts
        .iter()
        .filter(|p| is_signal_post(epoch_key, &p.id, config.selection_rate))
        .filter(|p| !processed_post_ids.contains(&p.id))
        .collect();
    for p in &signals {
        processed_post_ids.insert(p.id.clone());
    }
    signals.sort_by(|a, b| deterministic_order(a, b));

    let mut seen_dedup_keys: HashSet<[u8; 32]> = HashSet::new();
    let mut all_bits = Vec::new();
    for post in signals {
        let bits = extract_bits(&post.text, post.has_media, &config.feature_set, config.length_threshold);
        let key = dedup_key(&post.text, &bits, post.published_at.timestamp_millis());
        if !seen_dedup_keys.insert(key) {
            continue;
        }
        all_bits.extend(bits);
    }

    if all_bits.is_empty() {
        return None;
    }

    for candidate_seq in state.receiver_seq_num..=state.receiver_seq_num + MAX_SEQ_SKIP {
        if let Ok(decoded) = decode_frame(&all_bits, epoch_key, candidate_seq) {
            info!(
                channel_id = %config.channel_id,
                used_seq = candidate_seq,
                bit_count = all_bits.len(),
                "decoded a message"
            );
            state.receiver_seq_num = candidate_seq + 1;
            return Some(ReceivedMessage {
                payload: decoded.payload,
                encrypted: decoded.encrypted,
                used_seq: candidate_seq,
            });
        }
    }
    None
}
