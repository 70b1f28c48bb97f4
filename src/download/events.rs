//! Notifications published by the download manager

use serde::Serialize;

use crate::catalog::{Membership, PersistedTrack};

/// Why an enqueue request did not start a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Already downloaded and filed under the requested playlist
    AlreadyDownloaded,
    /// The same track and playlist are already waiting in the queue
    AlreadyQueued,
    /// Descriptor has no title or id
    Incomplete,
}

/// Queue transitions and library changes, in the order they happen
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DownloadEvent {
    /// Track appended to the queue
    Queued {
        id: String,
        title: String,
        position: usize,
    },
    /// Track moved from queued to downloading
    Started {
        id: String,
        title: String,
        author: String,
    },
    /// Transfer progress in `[0, 1]`, throttled
    Progress { id: String, fraction: f64 },
    /// Download finished and the catalog was saved
    NewDownload { track: PersistedTrack },
    /// Known track filed under another playlist without downloading
    MembershipAdded { id: String, playlist: Membership },
    Skipped { id: String, reason: SkipReason },
    /// Download dropped; the queue moves on
    Failed {
        id: String,
        title: String,
        error: String,
    },
}
