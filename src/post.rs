// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post identity and the feed adapter boundary (§6.2). Concrete microblog or
//! RSS/Atom clients implement [`PostSource`]/[`PostSink`]; the engine only
//! ever sees the platform-agnostic [`Post`] shape.

use async_trait::async_trait;

use crate::error::Result;

/// Platform-stable identifier, invariant across refetches of the same post.
pub type PostId = String;

/// A single fetched post, normalized across microblog and RSS/Atom sources.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: PostId,
    pub text: String,
    pub has_media: bool,
    pub published_at: chrono::DateTime<chrono::Utc>,
    pub source: String,
}

/// A page of posts plus an opaque pagination cursor.
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub cursor: Option<String>,
}

/// Options for a single feed fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// The read side of a feed adapter (§6.2).
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn get_author_feed(&self, handle_or_source_id: &str, options: FetchOptions) -> Result<FeedPage>;

    /// Maps a platform URI/identifier to the opaque [`PostId`] the selector
    /// operates on. Default implementation is the identity map, which is
    /// correct whenever `get_author_feed` already yields stable ids.
    fn extract_post_id(&self, uri: &str) -> PostId {
        uri.to_string()
    }
}

/// The write side of a feed adapter (§6.2): publishes a post and returns the
/// platform's canonical, stable identifier.
#[async_trait]
pub trait PostSink: Send + Sync {
    async fn create_post(&self, text: &str, images: &[Vec<u8>]) -> Result<PostId>;
}
