//! Invidious API HTTP client

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::links::{playlist_id, video_id};
use super::models::*;
use super::{ByteStream, MediaProvider, PlaylistItem, RemotePlaylist, RemoteTrack, StreamFormat};
use crate::utils::format_duration;

/// Page URL recorded for each track
const WATCH_URL: &str = "https://music.youtube.com/watch?v=";

/// HTTP client for an Invidious instance
#[derive(Clone)]
pub struct InvidiousClient {
    base_url: Url,
    request_timeout: Duration,
    http_client: Client,
}

impl InvidiousClient {
    /// Create a new client for the instance at `base_url`
    pub fn new(base_url: &str, connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .with_context(|| format!("Invalid provider URL: {}", base_url))?;

        let http_client = Client::builder()
            .user_agent(concat!("ytmusic-offline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            request_timeout,
            http_client,
        })
    }

    /// Build an API URL relative to the instance
    fn build_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid API path: {}", path))
    }

    /// Thumbnails and proxied streams may come back instance-relative
    fn absolute(&self, url: &str) -> String {
        self.base_url
            .join(url)
            .map(String::from)
            .unwrap_or_else(|_| url.to_string())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        debug!("Fetching {}: {}", what, url);

        let response = self
            .http_client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", what))?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to fetch {} (status {})", what, response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    fn to_remote_track(&self, video: VideoResponse) -> RemoteTrack {
        let cover = best_thumbnail(&video.video_thumbnails).map(|t| self.absolute(&t.url));

        let formats = video
            .adaptive_formats
            .iter()
            .map(|f| StreamFormat {
                itag: f.itag,
                codec: f.codec(),
                audio_only: f.is_audio_only(),
                url: self.absolute(&f.url),
                content_length: f.clen.as_deref().and_then(|c| c.parse().ok()),
            })
            .collect();

        RemoteTrack {
            id: video.video_id,
            title: video.title,
            author: video.author,
            cover,
            duration_human: format_duration(video.length_seconds),
            formats,
        }
    }
}

/// Pick the largest thumbnail; on equal area the later entry wins
pub fn best_thumbnail(thumbnails: &[Thumbnail]) -> Option<&Thumbnail> {
    thumbnails
        .iter()
        .max_by_key(|t| u64::from(t.width) * u64::from(t.height))
}

#[async_trait]
impl MediaProvider for InvidiousClient {
    async fn playlist(&self, url: &str) -> Result<RemotePlaylist> {
        let id = playlist_id(url)
            .ok_or_else(|| anyhow::anyhow!("Not a playlist link: {}", url))?;
        let api = self.build_url(&format!("api/v1/playlists/{}", urlencoding::encode(&id)))?;

        let playlist: PlaylistResponse = self.get_json(api, "playlist").await?;
        debug!(
            "Playlist {} has {} entries",
            playlist.playlist_id.as_deref().unwrap_or(&id),
            playlist.videos.len()
        );

        let items = playlist
            .videos
            .into_iter()
            .map(|v| PlaylistItem {
                url: format!("{}{}", WATCH_URL, v.video_id),
                id: v.video_id,
                title: v.title,
                author: v.author,
                duration_human: format_duration(v.length_seconds),
            })
            .collect();

        Ok(RemotePlaylist {
            title: playlist.title,
            items,
        })
    }

    async fn track(&self, url: &str) -> Result<RemoteTrack> {
        let id = video_id(url).ok_or_else(|| anyhow::anyhow!("Not a track link: {}", url))?;
        let mut api = self.build_url(&format!("api/v1/videos/{}", urlencoding::encode(&id)))?;
        // Proxy streams through the instance so they stay reachable
        api.query_pairs_mut().append_pair("local", "true");

        let video: VideoResponse = self.get_json(api, "track").await?;
        Ok(self.to_remote_track(video))
    }

    async fn open(&self, url: &str) -> Result<ByteStream> {
        debug!("Opening stream: {}", url);

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .context("Failed to open stream")?;

        if !response.status().is_success() {
            anyhow::bail!("Stream request failed (status {})", response.status());
        }

        let total = response.content_length();
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.context("Stream interrupted"))
            .boxed();

        Ok(ByteStream { total, chunks })
    }
}
