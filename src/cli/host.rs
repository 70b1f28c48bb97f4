//! Host bridge: newline-delimited JSON requests on stdin, events on stdout
//!
//! Every line in either direction is one object tagged by its `event` field.
//! Logs go to stderr so stdout carries nothing but messages.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::commands::Session;
use crate::catalog::{CatalogDocument, PersistedTrack};
use crate::download::{DownloadEvent, NowPlaying, PlaylistSummary, QueueStatus};
use crate::library::{NewDownloads, OfflineLibrary, PauseSignals, PlaybackCoordinator, Surface};

const OUTBOUND_BUFFER: usize = 256;

/// Requests from the host application
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HostRequest {
    DownloadPlaylist { url: String },
    DownloadCurrent { track: NowPlaying },
    LoadDownloaded,
    /// The offline player window is up and wants library updates and pause signals
    OfflinePlayerReady,
    MediaStarted { surface: Surface },
    Status,
}

/// Messages written back to the host
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HostMessage {
    NewDownload { track: PersistedTrack },
    DownloadProgress { id: String, percent: u8 },
    DownloadFailed { id: String, title: String, error: String },
    /// `surface` should stop playing
    Pause { surface: Surface },
    Library { data: CatalogDocument, path: PathBuf },
    PlaylistQueued(PlaylistSummary),
    Status(QueueStatus),
    Error { message: String },
}

/// Serve requests from `input` until it closes
///
/// Pending downloads are finished before returning. Returns `output` once
/// every message has been written to it.
pub async fn serve<R, W>(session: Session, input: R, output: W) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(write_messages(rx, output));

    let coordinator = PlaybackCoordinator::new();
    let mut forwarders = JoinSet::new();
    forwarders.spawn(forward_downloads(session.handle.subscribe(), tx.clone()));
    forwarders.spawn(forward_new_downloads(session.library.subscribe(), tx.clone()));
    forwarders.spawn(forward_pauses(coordinator.subscribe(Surface::MainView), tx.clone()));

    let mut pending = JoinSet::new();
    let mut offline_ready = false;
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read host request")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: HostRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Ignoring malformed host request: {}", e);
                send(&tx, HostMessage::Error {
                    message: format!("malformed request: {}", e),
                })
                .await;
                continue;
            }
        };
        debug!("Host request: {:?}", request);

        match request {
            HostRequest::DownloadPlaylist { url } => {
                let handle = session.handle.clone();
                let resolver = session.resolver.clone();
                let tx = tx.clone();
                pending.spawn(async move {
                    let message = match handle.download_playlist(&resolver, &url).await {
                        Ok(summary) => HostMessage::PlaylistQueued(summary),
                        Err(e) => HostMessage::Error {
                            message: format!("playlist {}: {}", url, e),
                        },
                    };
                    send(&tx, message).await;
                });
            }
            HostRequest::DownloadCurrent { track } => {
                let handle = session.handle.clone();
                let resolver = session.resolver.clone();
                let tx = tx.clone();
                pending.spawn(async move {
                    if let Err(e) = handle.download_current(&resolver, track).await {
                        send(&tx, HostMessage::Error {
                            message: format!("current track: {}", e),
                        })
                        .await;
                    }
                });
            }
            HostRequest::LoadDownloaded => send_library(&session.library, &tx).await,
            HostRequest::OfflinePlayerReady => {
                if !offline_ready {
                    offline_ready = true;
                    forwarders.spawn(forward_pauses(
                        coordinator.subscribe(Surface::OfflinePlayer),
                        tx.clone(),
                    ));
                }
                send_library(&session.library, &tx).await;
            }
            HostRequest::MediaStarted { surface } => coordinator.started(surface),
            HostRequest::Status => {
                let message = match session.handle.status().await {
                    Ok(status) => HostMessage::Status(status),
                    Err(e) => HostMessage::Error {
                        message: e.to_string(),
                    },
                };
                send(&tx, message).await;
            }
        }
    }

    debug!("Host input closed, finishing pending downloads");
    while pending.join_next().await.is_some() {}
    session.handle.wait_idle().await?;

    // Closing every sender lets the forwarders and the writer run dry
    drop(session);
    drop(coordinator);
    drop(tx);
    while forwarders.join_next().await.is_some() {}

    writer.await?
}

async fn send(tx: &mpsc::Sender<HostMessage>, message: HostMessage) {
    if tx.send(message).await.is_err() {
        debug!("Host output closed, dropping message");
    }
}

async fn send_library(library: &OfflineLibrary, tx: &mpsc::Sender<HostMessage>) {
    let message = match library.get_library().await {
        Ok(snapshot) => HostMessage::Library {
            data: snapshot.document,
            path: snapshot.root,
        },
        Err(e) => HostMessage::Error {
            message: e.to_string(),
        },
    };
    send(tx, message).await;
}

async fn forward_downloads(
    mut events: broadcast::Receiver<DownloadEvent>,
    tx: mpsc::Sender<HostMessage>,
) {
    loop {
        let message = match events.recv().await {
            Ok(DownloadEvent::Progress { id, fraction }) => HostMessage::DownloadProgress {
                id,
                percent: (fraction.clamp(0.0, 1.0) * 100.0).round() as u8,
            },
            Ok(DownloadEvent::Failed { id, title, error }) => {
                HostMessage::DownloadFailed { id, title, error }
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(missed)) => {
                warn!("Host bridge fell behind by {} events", missed);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        send(&tx, message).await;
    }
}

async fn forward_new_downloads(mut downloads: NewDownloads, tx: mpsc::Sender<HostMessage>) {
    while let Some(track) = downloads.next().await {
        send(&tx, HostMessage::NewDownload { track }).await;
    }
}

async fn forward_pauses(mut signals: PauseSignals, tx: mpsc::Sender<HostMessage>) {
    let surface = signals.surface();
    while let Some(started) = signals.next().await {
        debug!("{} started, pausing {}", started, surface);
        send(&tx, HostMessage::Pause { surface }).await;
    }
}

async fn write_messages<W>(mut rx: mpsc::Receiver<HostMessage>, mut output: W) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_string(&message).context("Failed to encode host message")?;
        line.push('\n');
        output
            .write_all(line.as_bytes())
            .await
            .context("Failed to write host message")?;
        output.flush().await.context("Failed to flush host output")?;
    }
    Ok(output)
}
