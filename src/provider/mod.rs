//! Media provider: resolves playlists and tracks, and serves byte streams

pub mod client;
pub mod links;
pub mod models;

#[cfg(test)]
pub mod fake;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use client::InvidiousClient;

/// A playlist as listed by the provider
#[derive(Debug, Clone)]
pub struct RemotePlaylist {
    pub title: String,
    pub items: Vec<PlaylistItem>,
}

/// One playlist entry, before its own metadata is fetched
#[derive(Debug, Clone)]
pub struct PlaylistItem {
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration_human: String,
    /// Page URL of the track
    pub url: String,
}

/// Full metadata of a single track, including its stream formats
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub title: String,
    pub author: String,
    /// Highest-resolution thumbnail, if any
    pub cover: Option<String>,
    pub duration_human: String,
    pub formats: Vec<StreamFormat>,
}

/// A downloadable stream variant
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFormat {
    /// Provider format tag; higher means better within a codec family
    pub itag: u32,
    pub codec: Option<String>,
    pub audio_only: bool,
    pub url: String,
    pub content_length: Option<u64>,
}

/// An open HTTP body
pub struct ByteStream {
    /// Total size when the server announced it
    pub total: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

/// Black-box source of metadata and media bytes
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// List the entries of a playlist
    async fn playlist(&self, url: &str) -> Result<RemotePlaylist>;

    /// Fetch metadata and stream formats for one track
    async fn track(&self, url: &str) -> Result<RemoteTrack>;

    /// Open a media or image URL for streaming
    async fn open(&self, url: &str) -> Result<ByteStream>;
}
