// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The state persistence shim (§6.4): an opaque blob store keyed by
//! `transmission:{channelId}`, boundary to whatever encrypted store an
//! embedding application provides. Grounded on the teacher's
//! `forest_db::{Store, MemoryDB}` pair — a minimal get/put trait plus an
//! in-memory reference implementation backed by a lock-guarded map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Opaque key/value persistence boundary. Implementations need not be
/// transactional across keys; each channel's transmission state is read and
/// written independently.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// `transmission:{channelId}`, the one schema key this module knows about
/// (§6.4); everything else about the blob's contents is opaque to this
/// trait and owned by `sender`/`receiver`.
pub fn transmission_key(channel_id: &str) -> String {
    format!("transmission:{channel_id}")
}

/// Reference `StateStore` for tests and for embedding applications that
/// don't yet need durable storage. Mirrors the teacher's `MemoryDB`:
/// an `Arc<RwLock<HashMap<..>>>` with no eviction.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}
