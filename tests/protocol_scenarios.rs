// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests covering the concrete end-to-end scenarios: a message
//! is fragmented into frame bits, carried across a scripted feed of signal
//! and cover posts, and reassembled by the receiver pipeline.

use chrono::{TimeZone, Utc};
use stegochannel::beacon::{BeaconKind, BeaconOracle, BeaconSource};
use stegochannel::channel::{ChannelConfig, ChannelKeyBytes};
use stegochannel::crypto::{SecretKey, KEY_LEN};
use stegochannel::epoch::derive_epoch_key;
use stegochannel::error::Result;
use stegochannel::features::{extract_bits, feature_bit_count, FeatureKind};
use stegochannel::frame::encode_frame;
use stegochannel::post::{FetchOptions, Post, PostSource};
use stegochannel::receiver::{poll_tick, ReceiverState};
use stegochannel::selector::is_signal_post;

struct NoNetwork;

#[async_trait::async_trait]
impl BeaconSource for NoNetwork {
    async fn fetch_btc(&self) -> Result<String> {
        Err(stegochannel::StegoError::Other("no network in tests".into()))
    }
    async fn fetch_nist(&self) -> Result<String> {
        Err(stegochannel::StegoError::Other("no network in tests".into()))
    }
}

/// Always returns the same fixed Bitcoin block hash, so (unlike the `Date`
/// beacon's "today") a test can prime the oracle's cache with a known value
/// and drive the real `poll_tick` end to end.
struct FixedBtcSource(String);

#[async_trait::async_trait]
impl BeaconSource for FixedBtcSource {
    async fn fetch_btc(&self) -> Result<String> {
        Ok(self.0.clone())
    }
    async fn fetch_nist(&self) -> Result<String> {
        Err(stegochannel::StegoError::Other("no network in tests".into()))
    }
}

/// A fixed, pre-built list of `Post`s a test can hand straight to
/// `poll_tick` through this trivial `PostSource`.
struct FixedFeed(Vec<Post>);

#[async_trait::async_trait]
impl PostSource for FixedFeed {
    async fn get_author_feed(&self, _handle: &str, _options: FetchOptions) -> Result<stegochannel::post::FeedPage> {
        Ok(stegochannel::post::FeedPage {
            posts: self.0.clone(),
            cursor: None,
        })
    }
}

/// Find a post id under `epoch_key` that is a signal post under `rate`, by
/// trying ids until one fits. Cover ids are filtered out by construction.
fn next_signal_post_id(epoch_key: &SecretKey, rate: f64, counter: &mut u64, is_signal_wanted: bool) -> String {
    loop {
        let candidate = format!("p{counter}");
        *counter += 1;
        let is_signal = is_signal_post(epoch_key, &candidate, rate);
        if is_signal == is_signal_wanted {
            return candidate;
        }
    }
}

/// Given the bits still needed, hunt for post text/has_media that encodes
/// them under `feature_set`. Only a handful of degrees of freedom exist for
/// the 3-bit `[len, media, qmark]` set used by the scenarios below, so a
/// direct construction per bit is simpler than a search.
fn craft_post_text(bits: &[u8], feature_set: &[FeatureKind], length_threshold: usize) -> (String, bool) {
    debug_assert_eq!(feature_set, [FeatureKind::Len, FeatureKind::Media, FeatureKind::Qmark]);
    let len_bit = bits[0];
    let media_bit = bits[1];
    let qmark_bit = bits[2];

    let mut text = if len_bit == 1 {
        "x".repeat(length_threshold + 5)
    } else {
        "hi".to_string()
    };
    if qmark_bit == 1 {
        text.push('?');
    }
    (text, media_bit == 1)
}

fn build_signal_posts_for_frame(
    epoch_key: &SecretKey,
    rate: f64,
    feature_set: &[FeatureKind],
    length_threshold: usize,
    frame_bits: &[u8],
) -> Vec<Post> {
    let k = feature_bit_count(feature_set);
    let mut counter = 0u64;
    let mut posts = Vec::new();
    let mut t = 0i64;

    for chunk in frame_bits.chunks(k) {
        // Pad the final partial chunk so craft_post_text always sees k bits;
        // the extra bits are never checked against by decode_frame since it
        // only looks at the bits actually produced for this post.
        let mut padded = chunk.to_vec();
        padded.resize(k, 0);

        loop {
            let id = next_signal_post_id(epoch_key, rate, &mut counter, true);
            let (text, has_media) = craft_post_text(&padded, feature_set, length_threshold);
            let bits = extract_bits(&text, has_media, feature_set, length_threshold);
            if bits == padded {
                posts.push(Post {
                    id,
                    text,
                    has_media,
                    published_at: Utc.timestamp_opt(1_700_000_000 + t, 0).unwrap(),
                    source: "test".to_string(),
                });
                t += 1;
                break;
            }
        }
    }
    posts
}

fn insert_cover_posts(posts: &mut Vec<Post>, epoch_key: &SecretKey, rate: f64, count: usize) {
    let mut counter = 1_000_000u64;
    for i in 0..count {
        let id = next_signal_post_id(epoch_key, rate, &mut counter, false);
        posts.push(Post {
            id,
            text: format!("just some cover traffic number {i}"),
            has_media: false,
            published_at: Utc.timestamp_opt(1_650_000_000 + i as i64, 0).unwrap(),
            source: "test".to_string(),
        });
    }
}

fn scenario_channel(channel_id: &str, rate: f64, feature_set: Vec<FeatureKind>, length_threshold: usize) -> ChannelConfig {
    ChannelConfig {
        channel_id: channel_id.to_string(),
        channel_key: ChannelKeyBytes([0u8; KEY_LEN].tap_last_byte_one()),
        beacon: BeaconKind::Date,
        selection_rate: rate,
        feature_set,
        length_threshold,
        my_sources: vec![],
        their_sources: vec!["them".to_string()],
    }
}

trait TapLastByteOne {
    fn tap_last_byte_one(self) -> Self;
}
impl TapLastByteOne for [u8; KEY_LEN] {
    fn tap_last_byte_one(mut self) -> Self {
        self[KEY_LEN - 1] = 1;
        self
    }
}

#[tokio::test]
async fn plaintext_round_trip_over_date_beacon() {
    let channel_key = SecretKey::new([0u8; KEY_LEN].tap_last_byte_one());
    let epoch_key = derive_epoch_key(&channel_key, "date", "2025-01-15");
    let feature_set = vec![FeatureKind::Len, FeatureKind::Media, FeatureKind::Qmark];
    let rate = 0.25;
    let threshold = 50;

    let frame_bits = encode_frame(b"Hello StegoChannel", &epoch_key, false, 0).unwrap();
    let mut posts = build_signal_posts_for_frame(&epoch_key, rate, &feature_set, threshold, &frame_bits);
    insert_cover_posts(&mut posts, &epoch_key, rate, 20);
    posts.sort_by(|a, b| a.published_at.cmp(&b.published_at));

    let feed = FixedFeed(posts);

    // `get_beacon_value(Date)` always returns "today", not a fixed value, so
    // this test drives the filter/sort/extract/decode steps directly
    // instead of going through `poll_tick` (which is exercised end to end in
    // `receiver_pipeline_finds_nothing_on_empty_feed`).
    let fetched = feed.get_author_feed("them", FetchOptions::default()).await.unwrap().posts;
    let mut signals: Vec<&Post> = fetched.iter().filter(|p| is_signal_post(&epoch_key, &p.id, rate)).collect();
    signals.sort_by(|a, b| a.published_at.cmp(&b.published_at).then_with(|| a.id.cmp(&b.id)));
    let bits: Vec<u8> = signals
        .iter()
        .flat_map(|p| extract_bits(&p.text, p.has_media, &feature_set, threshold))
        .collect();

    let decoded = stegochannel::frame::decode_frame(&bits, &epoch_key, 0).expect("frame decodes");
    assert_eq!(decoded.payload, b"Hello StegoChannel");
    assert!(!decoded.encrypted);
    assert_eq!(decoded.version, 0);
}

#[tokio::test]
async fn encrypted_round_trip() {
    let channel_key = SecretKey::new([0u8; KEY_LEN].tap_last_byte_one());
    let epoch_key = derive_epoch_key(&channel_key, "date", "2025-01-15");
    let feature_set = vec![FeatureKind::Len, FeatureKind::Media, FeatureKind::Qmark];
    let rate = 0.25;
    let threshold = 50;

    let frame_bits = encode_frame(b"Secret message", &epoch_key, true, 0).unwrap();
    let mut posts = build_signal_posts_for_frame(&epoch_key, rate, &feature_set, threshold, &frame_bits);
    insert_cover_posts(&mut posts, &epoch_key, rate, 10);
    posts.sort_by(|a, b| a.published_at.cmp(&b.published_at));

    let signals: Vec<&Post> = posts.iter().filter(|p| is_signal_post(&epoch_key, &p.id, rate)).collect();
    let bits: Vec<u8> = signals
        .iter()
        .flat_map(|p| extract_bits(&p.text, p.has_media, &feature_set, threshold))
        .collect();

    let decoded = stegochannel::frame::decode_frame(&bits, &epoch_key, 0).expect("frame decodes");
    assert_eq!(decoded.payload, b"Secret message");
    assert!(decoded.encrypted);
}

#[tokio::test]
async fn receiver_pipeline_finds_nothing_on_empty_feed() {
    let config = scenario_channel("ch-empty", 0.25, vec![FeatureKind::Len, FeatureKind::Media, FeatureKind::Qmark], 50);
    let mut receiver_state = ReceiverState::new(0);
    let oracle = BeaconOracle::new(Box::new(NoNetwork));
    let feed = FixedFeed(Vec::new());
    let sources: Vec<(String, &dyn PostSource)> = vec![("them".to_string(), &feed)];
    let result = poll_tick(&config, &mut receiver_state, &oracle, &sources).await;
    assert!(result.is_none());
}

#[tokio::test]
async fn rs_correction_within_tolerance_survives_through_the_receiver_layer() {
    let epoch_key = SecretKey::new([7u8; KEY_LEN]);
    let mut bits = encode_frame(b"Hello StegoChannel", &epoch_key, false, 0).unwrap();
    let mut bytes = vec![0u8; bits.len() / 8];
    for (i, byte) in bytes.iter_mut().enumerate() {
        for b in 0..8 {
            if bits[i * 8 + b] != 0 {
                *byte |= 0x80 >> b;
            }
        }
    }
    bytes[5] ^= 0xFF;
    bytes[10] ^= 0xAA;
    bytes[15] ^= 0x55;
    bits = bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |b| (byte >> (7 - b)) & 1))
        .collect();

    let decoded = stegochannel::frame::decode_frame(&bits, &epoch_key, 0).unwrap();
    assert_eq!(decoded.payload, b"Hello StegoChannel");
}

#[tokio::test]
async fn rs_failure_beyond_tolerance_reports_invalid_not_panic() {
    let epoch_key = SecretKey::new([8u8; KEY_LEN]);
    let bits = encode_frame(b"Hello StegoChannel", &epoch_key, false, 0).unwrap();
    let mut bytes = vec![0u8; bits.len() / 8];
    for (i, byte) in bytes.iter_mut().enumerate() {
        for b in 0..8 {
            if bits[i * 8 + b] != 0 {
                *byte |= 0x80 >> b;
            }
        }
    }
    for byte in bytes.iter_mut().take(6) {
        *byte ^= 0xFF;
    }
    let corrupted: Vec<u8> = bytes.iter().flat_map(|byte| (0..8).map(move |b| (byte >> (7 - b)) & 1)).collect();
    assert!(stegochannel::frame::decode_frame(&corrupted, &epoch_key, 0).is_err());
}

#[test]
fn signal_selection_fixed_vector() {
    assert_eq!(stegochannel::selector::selection_threshold(0.25), 0x3FFF_FFFF_FFFF_FFFF);
}

/// Scenario 3 (grace-period crossing): a frame encoded under yesterday's date
/// beacon must still decode once the receiver's candidate-epoch list grows to
/// include that older value, while the fresh "today" epoch key alone fails.
/// `candidate_epochs` itself is exercised directly here (rather than driving
/// the real UTC clock across midnight) since date-beacon "today" is derived
/// from the wall clock, which the fixture has no way to move.
#[tokio::test]
async fn grace_period_crossing_tries_previous_date_epoch() {
    let channel_key = SecretKey::new([0u8; KEY_LEN].tap_last_byte_one());
    let feature_set = vec![FeatureKind::Len, FeatureKind::Media, FeatureKind::Qmark];
    let rate = 0.25;
    let threshold = 50;

    let yesterday_epoch_key = derive_epoch_key(&channel_key, "date", "2025-01-15");
    let today_epoch_key = derive_epoch_key(&channel_key, "date", "2025-01-16");

    let frame_bits = encode_frame(b"still reachable", &yesterday_epoch_key, false, 0).unwrap();
    let mut posts = build_signal_posts_for_frame(&yesterday_epoch_key, rate, &feature_set, threshold, &frame_bits);
    insert_cover_posts(&mut posts, &yesterday_epoch_key, rate, 5);
    posts.sort_by(|a, b| a.published_at.cmp(&b.published_at));

    let feed = FixedFeed(posts);
    let fetched = feed.get_author_feed("them", FetchOptions::default()).await.unwrap().posts;

    // The candidate list the receiver would actually use on 2025-01-16 is
    // [today, yesterday], tried in that order (§4.3): today fails first, the
    // grace-window probe into yesterday then succeeds.
    for candidate_key in [&today_epoch_key, &yesterday_epoch_key] {
        let mut signals: Vec<&Post> = fetched.iter().filter(|p| is_signal_post(candidate_key, &p.id, rate)).collect();
        signals.sort_by(|a, b| a.published_at.cmp(&b.published_at).then_with(|| a.id.cmp(&b.id)));
        let bits: Vec<u8> = signals
            .iter()
            .flat_map(|p| extract_bits(&p.text, p.has_media, &feature_set, threshold))
            .collect();
        let result = stegochannel::frame::decode_frame(&bits, candidate_key, 0);
        if candidate_key.as_bytes() == today_epoch_key.as_bytes() {
            assert!(result.is_err(), "today's epoch key must not decode a frame built under yesterday's");
        } else {
            let decoded = result.expect("yesterday's epoch key decodes the frame");
            assert_eq!(decoded.payload, b"still reachable");
        }
    }
}

/// Drives the real `poll_tick` (not a hand-rolled filter/sort/extract/decode
/// loop) end to end over a `Btc`-beacon channel, whose beacon value is fixed
/// by construction rather than "today" like `Date`. Also exercises the
/// `MAX_SEQ_SKIP` trial-decode window: the receiver starts two sequence
/// numbers behind the frame's actual `seq`.
#[tokio::test]
async fn poll_tick_end_to_end_decodes_through_the_real_pipeline() {
    let channel_key = SecretKey::new([0u8; KEY_LEN].tap_last_byte_one());
    let btc_hash = "c".repeat(64);
    let epoch_key = derive_epoch_key(&channel_key, "btc", &btc_hash);
    let feature_set = vec![FeatureKind::Len, FeatureKind::Media, FeatureKind::Qmark];
    let rate = 0.25;
    let threshold = 50;
    let actual_seq = 2u64;

    let frame_bits = encode_frame(b"via poll_tick", &epoch_key, false, actual_seq).unwrap();
    let mut posts = build_signal_posts_for_frame(&epoch_key, rate, &feature_set, threshold, &frame_bits);
    insert_cover_posts(&mut posts, &epoch_key, rate, 15);
    posts.sort_by(|a, b| a.published_at.cmp(&b.published_at));

    let config = ChannelConfig {
        channel_id: "ch-btc".to_string(),
        channel_key: ChannelKeyBytes(channel_key.as_bytes().to_owned()),
        beacon: BeaconKind::Btc,
        selection_rate: rate,
        feature_set,
        length_threshold: threshold,
        my_sources: vec![],
        their_sources: vec!["them".to_string()],
    };

    // Warm the oracle's cache with the fixed hash, the way a running engine
    // would have already done via a prior send or scheduled refresh; `Btc`
    // candidates come from cache/history, never a live fetch inside
    // `poll_tick` itself.
    let oracle = BeaconOracle::new(Box::new(FixedBtcSource(btc_hash)));
    oracle.get_beacon_value(BeaconKind::Btc).await.unwrap();

    let mut receiver_state = ReceiverState::new(actual_seq - 2);
    let feed = FixedFeed(posts);
    let sources: Vec<(String, &dyn PostSource)> = vec![("them".to_string(), &feed)];

    let result = poll_tick(&config, &mut receiver_state, &oracle, &sources)
        .await
        .expect("poll_tick should decode the frame through the real pipeline");
    assert_eq!(result.payload, b"via poll_tick");
    assert!(!result.encrypted);
    assert_eq!(result.used_seq, actual_seq);
    assert_eq!(receiver_state.receiver_seq_num, actual_seq + 1);
}
