//! Read-only view of the offline library for playback surfaces

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::catalog::{CatalogDocument, CatalogError, CatalogStore, Membership, PersistedTrack};
use crate::download::worker::{AUDIO_EXTENSION, COVER_EXTENSION};
use crate::download::DownloadEvent;
use crate::utils::{generate_m3u, parse_duration, sanitize_filename};

/// The catalog as currently persisted, with the root its paths are relative to
#[derive(Debug, Clone, Serialize)]
pub struct LibrarySnapshot {
    #[serde(rename = "data")]
    pub document: CatalogDocument,
    #[serde(rename = "path")]
    pub root: PathBuf,
}

/// A downloaded track with everything a player needs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration_human: String,
    pub audio_path: PathBuf,
    /// Local cover file, or the remote URL when no cover was saved
    pub cover: String,
    pub playlists: Vec<Membership>,
}

/// Directory holding one author's files
fn author_dir(root: &Path, author: &str) -> PathBuf {
    root.join(sanitize_filename(author))
}

/// Whether `path` is a regular file; unreadable counts as absent
pub async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

impl LibrarySnapshot {
    /// Resolve one record to its local files
    pub async fn entry_for(&self, track: &PersistedTrack) -> LibraryEntry {
        let dir = author_dir(&self.root, &track.author);
        let audio_path = dir.join(format!("{}.{}", track.filename, AUDIO_EXTENSION));
        let cover_path = dir.join(format!("{}.{}", track.filename, COVER_EXTENSION));

        let cover = if is_file(&cover_path).await {
            cover_path.to_string_lossy().into_owned()
        } else {
            track.cover.clone()
        };

        LibraryEntry {
            id: track.id.clone(),
            title: track.title.clone(),
            author: track.author.clone(),
            duration_human: track.duration_human.clone(),
            audio_path,
            cover,
            playlists: track.playlists.clone(),
        }
    }

    /// Entries of one bucket, or of the whole library when `membership` is `None`
    pub async fn entries(&self, membership: Option<&Membership>) -> Vec<LibraryEntry> {
        let tracks = match membership {
            Some(m) => self.document.bucket(m),
            None => &self.document.all,
        };
        let mut entries = Vec::with_capacity(tracks.len());
        for track in tracks {
            entries.push(self.entry_for(track).await);
        }
        entries
    }

    /// Names of the playlist buckets, sorted
    pub fn playlist_names(&self) -> Vec<&str> {
        self.document.playlists.keys().map(String::as_str).collect()
    }

    /// Extended M3U of a bucket's local audio files
    pub async fn playlist_m3u(&self, membership: &Membership) -> String {
        let tracks: Vec<_> = self
            .entries(Some(membership))
            .await
            .into_iter()
            .map(|e| {
                (
                    parse_duration(&e.duration_human),
                    format!("{} - {}", e.author, e.title),
                    e.audio_path.to_string_lossy().into_owned(),
                )
            })
            .collect();
        generate_m3u(&tracks)
    }
}

/// Library access for the offline player
#[derive(Clone)]
pub struct OfflineLibrary {
    store: CatalogStore,
    events: broadcast::Sender<DownloadEvent>,
}

impl OfflineLibrary {
    pub fn new(store: CatalogStore, events: broadcast::Sender<DownloadEvent>) -> Self {
        Self { store, events }
    }

    /// Read the persisted catalog
    pub async fn get_library(&self) -> Result<LibrarySnapshot, CatalogError> {
        let document = self.store.read().await?;
        debug!("Library snapshot: {} tracks", document.all.len());
        Ok(LibrarySnapshot {
            document,
            root: self.store.root().to_path_buf(),
        })
    }

    /// Tracks completed from now on
    pub fn subscribe(&self) -> NewDownloads {
        NewDownloads {
            events: self.events.subscribe(),
        }
    }
}

/// Stream of finished downloads
pub struct NewDownloads {
    events: broadcast::Receiver<DownloadEvent>,
}

impl NewDownloads {
    /// Next completed track; `None` once the download manager is gone
    pub async fn next(&mut self) -> Option<PersistedTrack> {
        loop {
            match self.events.recv().await {
                Ok(DownloadEvent::NewDownload { track }) => return Some(track),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {} download events, reload the library to catch up", missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
