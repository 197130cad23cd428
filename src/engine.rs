// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `Engine`: the single value that composes the beacon oracle, the
//! channel registry, and the poll scheduler (§5 "no global singletons...
//! a single 'engine' value composes the subsystems").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::beacon::{epoch_info, BeaconOracle};
use crate::channel::ChannelConfig;
use crate::config::EngineConfig;
use crate::crypto::SecretKey;
use crate::error::{Result, StegoError};
use crate::persistence::{transmission_key, StateStore};
use crate::post::{PostSink, PostSource};
use crate::receiver::{poll_tick, ReceivedMessage, ReceiverState};
use crate::sender::{ConfirmOutcome, PreviewOutcome, Priority, SenderState};

/// Everything the engine tracks for one registered channel: its static
/// configuration plus the two state machines and a poll task handle.
struct ChannelHandle {
    config: ChannelConfig,
    sender: Mutex<SenderState>,
    receiver: Mutex<ReceiverState>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    locked: Mutex<bool>,
}

/// The top-level engine: owns the channel registry, the shared beacon
/// oracle, and process-wide configuration. Implementations embedding this
/// crate construct exactly one `Engine`.
pub struct Engine {
    config: EngineConfig,
    oracle: Arc<BeaconOracle>,
    store: Arc<dyn StateStore>,
    channels: Mutex<HashMap<String, Arc<ChannelHandle>>>,
}

impl Engine {
    pub fn new(config: EngineConfig, oracle: BeaconOracle, store: Arc<dyn StateStore>) -> Self {
        Engine {
            config,
            oracle: Arc::new(oracle),
            store,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a channel, restoring `sender_seq_num`/`receiver_seq_num`
    /// from whatever the persistence shim has for it (§6.4).
    pub async fn register_channel(&self, config: ChannelConfig) -> Result<()> {
        let key = transmission_key(&config.channel_id);
        let (sender_seq, receiver_seq) = match self.store.get(&key).await? {
            Some(bytes) => decode_seq_pair(&bytes)?,
            None => (0, 0),
        };

        let epoch_duration = epoch_info(config.beacon).epoch_duration;
        let handle = Arc::new(ChannelHandle {
            sender: Mutex::new(SenderState::new(
                config.feature_set.clone(),
                config.length_threshold,
                config.selection_rate,
                epoch_duration,
                sender_seq,
            )),
            receiver: Mutex::new(ReceiverState::new(receiver_seq)),
            poll_task: Mutex::new(None),
            locked: Mutex::new(false),
            config,
        });

        let mut channels = self.channels.lock().await;
        let channel_id = handle.config.channel_id.clone();
        channels.insert(channel_id.clone(), handle);
        info!(channel_id, "channel registered");
        Ok(())
    }

    /// Remove a channel, zeroing its in-flight secrets first (§5).
    pub async fn deregister_channel(&self, channel_id: &str) -> Result<()> {
        self.stop_polling(channel_id).await?;
        let mut channels = self.channels.lock().await;
        channels.remove(channel_id);
        info!(channel_id, "channel deregistered");
        Ok(())
    }

    async fn handle(&self, channel_id: &str) -> Result<Arc<ChannelHandle>> {
        self.channels
            .lock()
            .await
            .get(channel_id)
            .cloned()
            .ok_or_else(|| StegoError::ChannelUnknown(channel_id.to_string()))
    }

    async fn ensure_unlocked(&self, handle: &ChannelHandle) -> Result<()> {
        if *handle.locked.lock().await {
            Err(StegoError::Locked)
        } else {
            Ok(())
        }
    }

    /// Lock a channel: subsequent mutating calls fail with `Locked` until
    /// `unlock_channel` is called. Also zeroes the active transmission's
    /// in-memory epoch key, if any (§3, §5: "EpochKey ... zeroed on lock").
    /// The channel key itself is not destroyed here — it zeroes on drop
    /// when the channel is later deregistered — since it must still be
    /// available to derive a fresh epoch key once unlocked.
    pub async fn lock_channel(&self, channel_id: &str) -> Result<()> {
        let handle = self.handle(channel_id).await?;
        *handle.locked.lock().await = true;
        handle.sender.lock().await.zero_active_epoch_key();
        Ok(())
    }

    pub async fn unlock_channel(&self, channel_id: &str) -> Result<()> {
        let handle = self.handle(channel_id).await?;
        *handle.locked.lock().await = false;
        Ok(())
    }

    /// `queue_message` + `start_next` if the channel was idle (§4.7).
    pub async fn queue_message(&self, channel_id: &str, plaintext: Vec<u8>, encrypted: bool, priority: Priority) -> Result<()> {
        let handle = self.handle(channel_id).await?;
        self.ensure_unlocked(&handle).await?;

        let mut sender = handle.sender.lock().await;
        let was_idle = sender.is_idle();
        sender.queue_message(plaintext, encrypted, priority);
        if was_idle {
            self.start_next_locked(&handle, &mut sender).await?;
        }
        self.persist_seq(&handle, &sender).await
    }

    async fn start_next_locked(&self, handle: &ChannelHandle, sender: &mut SenderState) -> Result<()> {
        let beacon_value = self.oracle.get_beacon_value(handle.config.beacon).await?;
        let epoch_key = crate::epoch::derive_epoch_key(&handle.config.channel_key(), handle.config.beacon.id(), &beacon_value);
        let expires_at = Instant::now() + sender.epoch_duration();
        sender.start_next(epoch_key, expires_at, &handle.config.channel_id)
    }

    /// Preview what publishing `(draft_text, has_media)` would do (§4.7
    /// `check_post`, pure and state-free).
    pub async fn check_post(&self, channel_id: &str, draft_text: &str, has_media: bool) -> Result<PreviewOutcome> {
        let handle = self.handle(channel_id).await?;
        let sender = handle.sender.lock().await;
        Ok(sender.check_post(draft_text, has_media))
    }

    /// `confirm_post`: report the real, published post to the sender state
    /// machine (§4.7 `confirm_post`).
    pub async fn confirm_post(&self, channel_id: &str, post_uri: &str, post_id: &str, text: &str, has_media: bool) -> Result<ConfirmOutcome> {
        let handle = self.handle(channel_id).await?;
        self.ensure_unlocked(&handle).await?;
        let mut sender = handle.sender.lock().await;
        let outcome = sender.confirm_post(post_uri, post_id, text, has_media, &handle.config.channel_id);
        if outcome.completed {
            self.start_next_locked(&handle, &mut sender).await.ok();
        }
        self.persist_seq(&handle, &sender).await?;
        Ok(outcome)
    }

    /// `cancel_transmission`: re-queue the caller-supplied plaintext at high
    /// priority and zero the in-flight secrets (§4.7).
    pub async fn cancel_transmission(&self, channel_id: &str, plaintext: Vec<u8>, encrypted: bool) -> Result<()> {
        let handle = self.handle(channel_id).await?;
        self.ensure_unlocked(&handle).await?;
        let mut sender = handle.sender.lock().await;
        sender.cancel_transmission(plaintext, encrypted, &handle.config.channel_id);
        self.persist_seq(&handle, &sender).await
    }

    /// Publish `text` via `sink`, then feed the result straight into
    /// `confirm_post`. `source` maps the sink's returned URI to the
    /// canonical `PostId` the selector consumes (§6.2 `extract_post_id`) —
    /// for adapters where the two differ, this matters: `confirm_post`
    /// must receive the same id the receiver side would derive from the
    /// same post. A convenience wrapper; callers that need to inspect the
    /// preview before publishing should call `check_post` first.
    pub async fn publish_and_confirm(
        &self,
        channel_id: &str,
        sink: &dyn PostSink,
        source: &dyn PostSource,
        text: &str,
        has_media: bool,
    ) -> Result<ConfirmOutcome> {
        let uri = sink.create_post(text, &[]).await?;
        let post_id = source.extract_post_id(&uri);
        self.confirm_post(channel_id, &uri, &post_id, text, has_media).await
    }

    /// Run a single poll tick for `channel_id` against `sources` (§4.8).
    pub async fn poll_once(&self, channel_id: &str, sources: &[(String, &dyn PostSource)]) -> Result<Option<ReceivedMessage>> {
        let handle = self.handle(channel_id).await?;
        self.ensure_unlocked(&handle).await?;
        let mut receiver = handle.receiver.lock().await;
        let result = poll_tick(&handle.config, &mut receiver, &self.oracle, sources).await;
        self.persist_receiver_seq(&handle, &receiver).await?;
        Ok(result)
    }

    /// Start a `tokio::time::interval`-driven poll loop for `channel_id`.
    /// `stop_polling` later cancels the returned task handle by `abort()`
    /// (§5 Runtime note). Exactly one tick runs at a time per channel
    /// (§5: "a second tick while the first is still running is skipped"),
    /// enforced here by `try_lock` on the receiver mutex.
    pub async fn start_polling<F>(self: &Arc<Self>, channel_id: &str, sources_fn: F)
    where
        F: Fn() -> Vec<(String, Box<dyn PostSource>)> + Send + Sync + 'static,
    {
        let engine = Arc::clone(self);
        let channel_id = channel_id.to_string();
        let interval = engine.config.poll_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Ok(handle) = engine.handle(&channel_id).await else {
                    break;
                };
                let Ok(mut receiver) = handle.receiver.try_lock() else {
                    continue;
                };
                let owned_sources = sources_fn();
                let borrowed: Vec<(String, &dyn PostSource)> =
                    owned_sources.iter().map(|(h, s)| (h.clone(), s.as_ref())).collect();
                let result = poll_tick(&handle.config, &mut receiver, &engine.oracle, &borrowed).await;
                if let Err(e) = engine.persist_receiver_seq(&handle, &receiver).await {
                    warn!(channel_id, error = %e, "failed to persist receiver state after tick");
                }
                if let Some(msg) = result {
                    info!(channel_id, used_seq = msg.used_seq, "message received during scheduled poll");
                }
            }
        });

        if let Ok(handle) = self.handle(&channel_id).await {
            let mut slot = handle.poll_task.lock().await;
            if let Some(old) = slot.take() {
                old.abort();
            }
            *slot = Some(task);
        }
    }

    /// Cancel the per-channel poll timer; any in-flight fetch's result is
    /// discarded (§4.8 "Cancellation").
    pub async fn stop_polling(&self, channel_id: &str) -> Result<()> {
        let handle = self.handle(channel_id).await?;
        if let Some(task) = handle.poll_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }

    async fn persist_seq(&self, handle: &ChannelHandle, sender: &SenderState) -> Result<()> {
        let receiver_seq = handle.receiver.lock().await.receiver_seq_num;
        let bytes = encode_seq_pair(sender.sender_seq_num(), receiver_seq);
        self.store.put(&transmission_key(&handle.config.channel_id), bytes).await
    }

    async fn persist_receiver_seq(&self, handle: &ChannelHandle, receiver: &ReceiverState) -> Result<()> {
        let sender_seq = handle.sender.lock().await.sender_seq_num();
        let bytes = encode_seq_pair(sender_seq, receiver.receiver_seq_num);
        self.store.put(&transmission_key(&handle.config.channel_id), bytes).await
    }
}

fn encode_seq_pair(sender_seq: u64, receiver_seq: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&sender_seq.to_be_bytes());
    out.extend_from_slice(&receiver_seq.to_be_bytes());
    out
}

fn decode_seq_pair(bytes: &[u8]) -> Result<(u64, u64)> {
    if bytes.len() != 16 {
        return Err(StegoError::Persistence(format!(
            "transmission state blob has {} bytes, want 16",
            bytes.len()
        )));
    }
    let sender_seq = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
    let receiver_seq = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
    Ok((sender_seq, receiver_seq))
}
