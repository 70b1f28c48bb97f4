//! In-memory provider used by the queue and resolver tests

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{ByteStream, MediaProvider, PlaylistItem, RemotePlaylist, RemoteTrack, StreamFormat};
use crate::catalog::{Membership, TrackDescriptor};

const CHUNK: usize = 16 * 1024;
pub const AUDIO_LEN: usize = 4 * CHUNK;

pub fn watch_url(id: &str) -> String {
    format!("https://music.example/watch?v={id}")
}

pub fn cover_url(id: &str) -> String {
    format!("https://img.example/{id}.jpg")
}

fn audio_url(id: &str) -> String {
    format!("https://cdn.example/{id}/251")
}

/// Descriptor for a track registered with [`FakeProvider::with_track`]
pub fn descriptor(id: &str, title: &str, author: &str, playlist: Membership) -> TrackDescriptor {
    TrackDescriptor {
        id: id.to_string(),
        title: title.to_string(),
        author: author.to_string(),
        cover: cover_url(id),
        duration_human: "3:00".to_string(),
        source_url: watch_url(id),
        playlist,
    }
}

/// Decrements the active stream count when the stream is dropped
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeProvider {
    playlists: HashMap<String, RemotePlaylist>,
    tracks: HashMap<String, RemoteTrack>,
    blobs: HashMap<String, Vec<u8>>,
    failing_tracks: HashSet<String>,
    broken_streams: HashSet<String>,
    unanswered: HashSet<String>,
    reported_totals: HashMap<String, u64>,
    pub track_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
    active_streams: Arc<AtomicUsize>,
    pub max_active_streams: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a track with one opus format, one AAC format and a cover
    pub fn with_track(mut self, id: &str, title: &str, author: &str) -> Self {
        self.tracks.insert(
            watch_url(id),
            RemoteTrack {
                id: id.to_string(),
                title: title.to_string(),
                author: author.to_string(),
                cover: Some(cover_url(id)),
                duration_human: "3:00".to_string(),
                formats: vec![
                    StreamFormat {
                        itag: 140,
                        codec: Some("mp4a.40.2".into()),
                        audio_only: true,
                        url: format!("https://cdn.example/{id}/140"),
                        content_length: None,
                    },
                    StreamFormat {
                        itag: 251,
                        codec: Some("opus".into()),
                        audio_only: true,
                        url: audio_url(id),
                        content_length: Some(AUDIO_LEN as u64),
                    },
                ],
            },
        );
        self.blobs.insert(audio_url(id), vec![7u8; AUDIO_LEN]);
        self.blobs.insert(cover_url(id), b"not really a jpeg".to_vec());
        self
    }

    pub fn with_playlist(mut self, url: &str, title: &str, ids: &[&str]) -> Self {
        let items = ids
            .iter()
            .map(|id| PlaylistItem {
                id: id.to_string(),
                title: format!("Listed {id}"),
                author: "Listed Artist".to_string(),
                duration_human: "3:00".to_string(),
                url: watch_url(id),
            })
            .collect();
        self.playlists.insert(
            url.to_string(),
            RemotePlaylist {
                title: title.to_string(),
                items,
            },
        );
        self
    }

    /// Metadata lookups for `id` fail
    pub fn failing_track(mut self, id: &str) -> Self {
        self.failing_tracks.insert(watch_url(id));
        self
    }

    /// The audio stream of `id` breaks after the first chunk
    pub fn broken_stream(mut self, id: &str) -> Self {
        self.broken_streams.insert(audio_url(id));
        self
    }

    /// Opening the audio stream of `id` never gets a response
    pub fn unanswered_open(mut self, id: &str) -> Self {
        self.unanswered.insert(audio_url(id));
        self
    }

    /// The cover of `id` claims to be `total` bytes long
    pub fn cover_length(mut self, id: &str, total: u64) -> Self {
        self.reported_totals.insert(cover_url(id), total);
        self
    }

    /// Serve `data` as the cover of `id`
    pub fn cover_bytes(mut self, id: &str, data: Vec<u8>) -> Self {
        self.blobs.insert(cover_url(id), data);
        self
    }

    /// Cover requests for `id` fail
    pub fn missing_cover(mut self, id: &str) -> Self {
        self.blobs.remove(&cover_url(id));
        self
    }
}

#[async_trait]
impl MediaProvider for FakeProvider {
    async fn playlist(&self, url: &str) -> Result<RemotePlaylist> {
        self.playlists
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such playlist: {url}"))
    }

    async fn track(&self, url: &str) -> Result<RemoteTrack> {
        self.track_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        if self.failing_tracks.contains(url) {
            anyhow::bail!("simulated network error for {url}");
        }
        self.tracks
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such track: {url}"))
    }

    async fn open(&self, url: &str) -> Result<ByteStream> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.unanswered.contains(url) {
            futures::future::pending::<()>().await;
        }
        let data = self
            .blobs
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("404 for {url}"))?;

        // Only audio transfers count towards concurrency
        let guard = url.starts_with("https://cdn.example/").then(|| {
            let now = self.active_streams.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active_streams.fetch_max(now, Ordering::SeqCst);
            ActiveGuard(self.active_streams.clone())
        });

        let broken = self.broken_streams.contains(url);
        let total = self
            .reported_totals
            .get(url)
            .copied()
            .unwrap_or(data.len() as u64);
        let mut chunks: Vec<Result<Bytes>> = data
            .chunks(CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if broken {
            chunks.truncate(1);
            chunks.push(Err(anyhow::anyhow!("connection reset")));
        }

        let chunks = futures::stream::iter(chunks)
            .then(move |chunk| {
                let _held = &guard;
                async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    chunk
                }
            })
            .boxed();

        Ok(ByteStream {
            total: Some(total),
            chunks,
        })
    }
}
