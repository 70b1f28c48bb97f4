//! Strict FIFO of pending downloads with a single active entry

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::catalog::{Membership, TrackDescriptor};

/// Lifecycle of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Queued,
    Downloading,
    Completed, // terminal
    Failed,    // terminal
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Completed | EntryState::Failed)
    }
}

/// Bytes moved so far for the active download
///
/// Shared with the worker, which updates it without going through the queue.
#[derive(Debug, Default)]
pub struct TransferProgress {
    transferred: AtomicU64,
    total: AtomicU64,
}

impl TransferProgress {
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn add(&self, bytes: u64) -> u64 {
        self.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    /// Fraction in `[0, 1]`, or `None` while the size is unknown
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total.load(Ordering::Relaxed);
        (total > 0).then(|| (self.transferred() as f64 / total as f64).min(1.0))
    }
}

/// A track waiting for, or going through, download
#[derive(Debug)]
pub struct QueueEntry {
    pub track: TrackDescriptor,
    pub state: EntryState,
    pub progress: Arc<TransferProgress>,
}

/// The pending downloads, head first
#[derive(Debug, Default)]
pub struct DownloadQueue {
    entries: VecDeque<QueueEntry>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including the active one
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `id` is already waiting to be filed under `playlist`
    pub fn contains(&self, id: &str, playlist: &Membership) -> bool {
        self.entries
            .iter()
            .any(|e| e.track.id == id && &e.track.playlist == playlist)
    }

    /// Append a track; returns its position (0 = head)
    pub fn push(&mut self, track: TrackDescriptor) -> usize {
        self.entries.push_back(QueueEntry {
            track,
            state: EntryState::Queued,
            progress: Arc::new(TransferProgress::default()),
        });
        self.entries.len() - 1
    }

    /// The entry currently downloading
    pub fn active(&self) -> Option<&QueueEntry> {
        self.entries
            .front()
            .filter(|e| e.state == EntryState::Downloading)
    }

    pub fn is_busy(&self) -> bool {
        self.active().is_some()
    }

    /// Move the head from `Queued` to `Downloading`
    ///
    /// Returns `None` when the queue is empty or the head is already active.
    pub fn start_next(&mut self) -> Option<&QueueEntry> {
        let head = self.entries.front_mut()?;
        if head.state != EntryState::Queued {
            return None;
        }
        head.state = EntryState::Downloading;
        Some(&*head)
    }

    /// Settle the active head and remove it
    ///
    /// `outcome` must be terminal. Returns `None` if nothing was downloading.
    pub fn finish(&mut self, outcome: EntryState) -> Option<QueueEntry> {
        debug_assert!(outcome.is_terminal());
        if !self.is_busy() {
            return None;
        }
        let mut entry = self.entries.pop_front()?;
        entry.state = outcome;
        Some(entry)
    }

    /// Entries in the given state
    pub fn count(&self, state: EntryState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> TrackDescriptor {
        TrackDescriptor {
            id: id.to_string(),
            title: id.to_uppercase(),
            author: "Artist".to_string(),
            cover: String::new(),
            duration_human: String::new(),
            source_url: String::new(),
            playlist: Membership::NoPlaylist,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = DownloadQueue::new();
        assert_eq!(queue.push(track("a")), 0);
        assert_eq!(queue.push(track("b")), 1);

        assert_eq!(queue.start_next().unwrap().track.id, "a");
        let done = queue.finish(EntryState::Completed).unwrap();
        assert_eq!(done.track.id, "a");
        assert_eq!(done.state, EntryState::Completed);

        assert_eq!(queue.start_next().unwrap().track.id, "b");
        assert_eq!(queue.finish(EntryState::Failed).unwrap().state, EntryState::Failed);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_single_active_entry() {
        let mut queue = DownloadQueue::new();
        queue.push(track("a"));
        queue.push(track("b"));
        queue.push(track("c"));

        assert!(queue.start_next().is_some());
        // Head is already downloading, nothing else may start
        assert!(queue.start_next().is_none());
        assert_eq!(queue.count(EntryState::Downloading), 1);
        assert_eq!(queue.count(EntryState::Queued), 2);
    }

    #[test]
    fn test_finish_without_active_is_noop() {
        let mut queue = DownloadQueue::new();
        queue.push(track("a"));
        assert!(queue.finish(EntryState::Completed).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_contains_matches_id_and_playlist() {
        let mut queue = DownloadQueue::new();
        queue.push(track("a"));
        assert!(queue.contains("a", &Membership::NoPlaylist));
        assert!(!queue.contains("a", &Membership::named("Mix")));
        assert!(!queue.contains("b", &Membership::NoPlaylist));
    }

    #[test]
    fn test_transfer_progress_fraction() {
        let progress = TransferProgress::default();
        assert_eq!(progress.fraction(), None);
        progress.set_total(200);
        progress.add(50);
        assert_eq!(progress.fraction(), Some(0.25));
        progress.add(500);
        assert_eq!(progress.fraction(), Some(1.0));
    }
}
