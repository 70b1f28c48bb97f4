//! Download manager: owns the queue and the catalog, runs one worker at a time

use futures::StreamExt;
use serde::Serialize;
use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::error::DownloadError;
use super::events::{DownloadEvent, SkipReason};
use super::queue::{DownloadQueue, EntryState};
use super::resolver::{NowPlaying, TrackResolver};
use super::worker::{Worker, WorkerConfig};
use crate::catalog::{CatalogDocument, CatalogStore, Membership, MembershipChange, PersistedTrack, TrackDescriptor};
use crate::provider::MediaProvider;

const COMMAND_BUFFER: usize = 64;

/// Settings for [`spawn`]
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub worker: WorkerConfig,
    /// Capacity of the event channel; slow subscribers lag past this
    pub event_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            event_buffer: 256,
        }
    }
}

/// What happened to an enqueue request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended to the queue at this position (0 = head)
    Queued { position: usize },
    /// Already downloaded; filed under the new playlist without a transfer
    MembershipAdded,
    Skipped(SkipReason),
}

/// The entry currently downloading
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDownload {
    pub id: String,
    pub title: String,
    pub author: String,
    pub fraction: Option<f64>,
}

/// Snapshot of the queue and its counters since startup
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Entries waiting behind the active one
    pub queued: usize,
    pub active: Option<ActiveDownload>,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Result of [`DownloadHandle::download_playlist`]
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub title: String,
    pub queued: usize,
    pub merged: usize,
    pub skipped: usize,
    /// Entries whose metadata could not be resolved
    pub failed: usize,
}

enum Command {
    Enqueue {
        track: TrackDescriptor,
        reply: oneshot::Sender<Result<EnqueueOutcome, DownloadError>>,
    },
    EnsurePlaylist {
        membership: Membership,
        reply: oneshot::Sender<Result<(), DownloadError>>,
    },
    Status {
        reply: oneshot::Sender<QueueStatus>,
    },
    KnownIds {
        reply: oneshot::Sender<HashSet<String>>,
    },
    WaitIdle {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable entry point to the download manager task
#[derive(Clone)]
pub struct DownloadHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<DownloadEvent>,
}

impl DownloadHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DownloadError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| DownloadError::Stopped)?;
        response.await.map_err(|_| DownloadError::Stopped)
    }

    /// Request a download
    ///
    /// Tracks already in the catalog are never fetched again; a new playlist
    /// membership is merged into the existing record instead.
    pub async fn enqueue(&self, track: TrackDescriptor) -> Result<EnqueueOutcome, DownloadError> {
        self.request(|reply| Command::Enqueue { track, reply }).await?
    }

    /// Create an empty bucket for a playlist so it shows up before its first track lands
    pub async fn ensure_playlist(&self, membership: Membership) -> Result<(), DownloadError> {
        self.request(|reply| Command::EnsurePlaylist { membership, reply })
            .await?
    }

    pub async fn status(&self) -> Result<QueueStatus, DownloadError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Ids of every track in the catalog
    pub async fn known_ids(&self) -> Result<HashSet<String>, DownloadError> {
        self.request(|reply| Command::KnownIds { reply }).await
    }

    /// Resolve once the queue is empty
    pub async fn wait_idle(&self) -> Result<(), DownloadError> {
        self.request(|reply| Command::WaitIdle { reply }).await
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Sender side of the event channel, for components that subscribe lazily
    pub fn events(&self) -> broadcast::Sender<DownloadEvent> {
        self.events.clone()
    }

    /// Resolve a playlist and enqueue its entries as they resolve
    ///
    /// An entry that fails to resolve is counted and skipped; the rest still run.
    /// Tracks the catalog already holds are merged without a metadata lookup.
    pub async fn download_playlist(
        &self,
        resolver: &TrackResolver,
        url: &str,
    ) -> Result<PlaylistSummary, DownloadError> {
        let listing = resolver.list_playlist(url).await?;
        info!(
            "Downloading playlist '{}' ({} tracks)",
            listing.title,
            listing.items.len()
        );
        self.ensure_playlist(listing.membership.clone()).await?;

        let mut summary = PlaylistSummary {
            title: listing.title.clone(),
            ..Default::default()
        };

        let known = self.known_ids().await?;
        let mut resolved = pin!(resolver.resolve_playlist(&listing, &known));
        while let Some(result) = resolved.next().await {
            let track = match result {
                Ok(track) => track,
                Err(e) => {
                    warn!("Skipping playlist entry: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };
            match self.enqueue(track).await? {
                EnqueueOutcome::Queued { .. } => summary.queued += 1,
                EnqueueOutcome::MembershipAdded => summary.merged += 1,
                EnqueueOutcome::Skipped(_) => summary.skipped += 1,
            }
        }

        Ok(summary)
    }

    /// Enqueue the track playing in the main view, outside any playlist
    pub async fn download_current(
        &self,
        resolver: &TrackResolver,
        info: NowPlaying,
    ) -> Result<EnqueueOutcome, DownloadError> {
        let track = resolver.resolve_current(info)?;
        self.enqueue(track).await
    }
}

/// Load the catalog and start the manager task
///
/// The task runs until every handle is dropped and the queue has drained.
pub async fn spawn(
    store: CatalogStore,
    provider: Arc<dyn MediaProvider>,
    config: ManagerConfig,
) -> Result<DownloadHandle, DownloadError> {
    let document = store.load().await?;
    info!(
        "Library at {} holds {} tracks",
        store.root().display(),
        document.all.len()
    );

    let (events, _) = broadcast::channel(config.event_buffer.max(1));
    let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
    let worker = Worker::new(
        provider,
        store.root().to_path_buf(),
        config.worker,
        events.clone(),
    );

    let manager = Manager {
        store,
        document,
        queue: DownloadQueue::new(),
        worker: Arc::new(worker),
        workers: JoinSet::new(),
        events: events.clone(),
        idle_waiters: Vec::new(),
        completed: 0,
        failed: 0,
        skipped: 0,
    };
    tokio::spawn(manager.run(rx));

    Ok(DownloadHandle { commands, events })
}

/// Output of one worker run
struct Finished {
    track: TrackDescriptor,
    result: Result<PersistedTrack, DownloadError>,
}

struct Manager {
    store: CatalogStore,
    document: CatalogDocument,
    queue: DownloadQueue,
    worker: Arc<Worker>,
    workers: JoinSet<Finished>,
    events: broadcast::Sender<DownloadEvent>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    completed: usize,
    failed: usize,
    skipped: usize,
}

impl Manager {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut open = true;
        loop {
            if !open && self.queue.is_empty() {
                break;
            }
            tokio::select! {
                command = commands.recv(), if open => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("All handles dropped, draining {} queued downloads", self.queue.len());
                        open = false;
                    }
                },
                Some(joined) = self.workers.join_next() => {
                    let finished = match joined {
                        Ok(finished) => finished,
                        Err(e) => {
                            let Some(active) = self.queue.active() else { continue };
                            Finished {
                                track: active.track.clone(),
                                result: Err(DownloadError::Transfer(format!("worker aborted: {}", e))),
                            }
                        }
                    };
                    self.finish(finished).await;
                    self.pump().await;
                }
                else => break,
            }
        }
        debug!("Download manager stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue { track, reply } => {
                let outcome = self.enqueue(track).await;
                let _ = reply.send(outcome);
                self.pump().await;
            }
            Command::EnsurePlaylist { membership, reply } => {
                let _ = reply.send(self.ensure_playlist(&membership).await);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::KnownIds { reply } => {
                let ids = self.document.all.iter().map(|t| t.id.clone()).collect();
                let _ = reply.send(ids);
            }
            Command::WaitIdle { reply } => {
                if self.queue.is_empty() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
        }
    }

    async fn enqueue(&mut self, track: TrackDescriptor) -> Result<EnqueueOutcome, DownloadError> {
        if track.id.trim().is_empty() || track.title.trim().is_empty() {
            warn!("Ignoring download request without id or title: {:?}", track);
            return Ok(self.skip(&track.id, SkipReason::Incomplete));
        }

        if self.document.is_covered(&track.id, &track.playlist) {
            debug!("{} already downloaded under '{}'", track.id, track.playlist);
            return Ok(self.skip(&track.id, SkipReason::AlreadyDownloaded));
        }

        if self.document.find(&track.id).is_some() {
            self.merge_membership(&track.id, &track.playlist).await?;
            return Ok(EnqueueOutcome::MembershipAdded);
        }

        if self.queue.contains(&track.id, &track.playlist) {
            debug!("{} already queued for '{}'", track.id, track.playlist);
            return Ok(self.skip(&track.id, SkipReason::AlreadyQueued));
        }

        let position = self.queue.push(track.clone());
        info!("Queued {} - {} (position {})", track.author, track.title, position);
        self.emit(DownloadEvent::Queued {
            id: track.id,
            title: track.title,
            position,
        });
        Ok(EnqueueOutcome::Queued { position })
    }

    async fn ensure_playlist(&mut self, membership: &Membership) -> Result<(), DownloadError> {
        let Membership::Named(name) = membership else {
            return Ok(());
        };
        if self.document.playlists.contains_key(name) {
            return Ok(());
        }

        let mut next = self.document.clone();
        next.ensure_playlist(membership);
        self.store.save(&next).await?;
        self.document = next;
        Ok(())
    }

    /// File a known track under another bucket and persist it
    async fn merge_membership(&mut self, id: &str, membership: &Membership) -> Result<(), DownloadError> {
        let mut next = self.document.clone();
        if next.add_membership(id, membership) != MembershipChange::Added {
            return Ok(());
        }
        self.store.save(&next).await?;
        self.document = next;

        info!("Added {} to '{}' without downloading", id, membership);
        self.emit(DownloadEvent::MembershipAdded {
            id: id.to_string(),
            playlist: membership.clone(),
        });
        Ok(())
    }

    fn skip(&mut self, id: &str, reason: SkipReason) -> EnqueueOutcome {
        self.skipped += 1;
        self.emit(DownloadEvent::Skipped {
            id: id.to_string(),
            reason,
        });
        EnqueueOutcome::Skipped(reason)
    }

    /// Start the head of the queue unless a worker is already running
    async fn pump(&mut self) {
        while !self.queue.is_busy() {
            let Some(entry) = self.queue.start_next() else {
                break;
            };
            let track = entry.track.clone();
            let progress = entry.progress.clone();

            // The catalog may have changed since this entry was queued
            if self.document.is_covered(&track.id, &track.playlist) {
                self.queue.finish(EntryState::Completed);
                self.skip(&track.id, SkipReason::AlreadyDownloaded);
                continue;
            }
            if self.document.find(&track.id).is_some() {
                let outcome = match self.merge_membership(&track.id, &track.playlist).await {
                    Ok(()) => EntryState::Completed,
                    Err(e) => {
                        self.fail(&track, &e);
                        EntryState::Failed
                    }
                };
                self.queue.finish(outcome);
                continue;
            }

            info!("Downloading {} - {}", track.author, track.title);
            self.emit(DownloadEvent::Started {
                id: track.id.clone(),
                title: track.title.clone(),
                author: track.author.clone(),
            });

            let worker = self.worker.clone();
            self.workers.spawn(async move {
                let result = worker.download(track.clone(), progress).await;
                Finished { track, result }
            });
        }

        if self.queue.is_empty() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    /// Record the worker's outcome and drop the head of the queue
    async fn finish(&mut self, finished: Finished) {
        let Finished { track, result } = finished;
        let outcome = match result {
            Ok(persisted) => match self.commit(persisted).await {
                Ok(()) => EntryState::Completed,
                Err(e) => {
                    self.fail(&track, &e);
                    EntryState::Failed
                }
            },
            Err(e) => {
                self.fail(&track, &e);
                EntryState::Failed
            }
        };
        self.queue.finish(outcome);
    }

    async fn commit(&mut self, persisted: PersistedTrack) -> Result<(), DownloadError> {
        let id = persisted.id.clone();
        let mut next = self.document.clone();
        next.insert(persisted);
        self.store.save(&next).await?;
        self.document = next;

        if let Some(track) = self.document.find(&id).cloned() {
            info!("Downloaded {} - {}", track.author, track.title);
            self.emit(DownloadEvent::NewDownload { track });
        }
        self.completed += 1;
        Ok(())
    }

    fn fail(&mut self, track: &TrackDescriptor, e: &DownloadError) {
        error!("Download of {} - {} failed: {}", track.author, track.title, e);
        self.failed += 1;
        self.emit(DownloadEvent::Failed {
            id: track.id.clone(),
            title: track.title.clone(),
            error: e.to_string(),
        });
    }

    fn status(&self) -> QueueStatus {
        let active = self.queue.active().map(|entry| ActiveDownload {
            id: entry.track.id.clone(),
            title: entry.track.title.clone(),
            author: entry.track.author.clone(),
            fraction: entry.progress.fraction(),
        });
        QueueStatus {
            queued: self.queue.count(EntryState::Queued),
            active,
            completed: self.completed,
            failed: self.failed,
            skipped: self.skipped,
        }
    }

    fn emit(&self, event: DownloadEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}
