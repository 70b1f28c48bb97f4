//! Keeps at most one playback surface playing

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// A place audio can play from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Surface {
    /// The embedded streaming view
    MainView,
    /// The offline library player
    OfflinePlayer,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Surface::MainView => write!(f, "main view"),
            Surface::OfflinePlayer => write!(f, "offline player"),
        }
    }
}

/// Broadcasts "started playing" so every other surface pauses
#[derive(Clone)]
pub struct PlaybackCoordinator {
    started: broadcast::Sender<Surface>,
}

impl Default for PlaybackCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackCoordinator {
    pub fn new() -> Self {
        let (started, _) = broadcast::channel(16);
        Self { started }
    }

    /// Announce that `surface` began playing
    pub fn started(&self, surface: Surface) {
        debug!("Playback started on {}", surface);
        let _ = self.started.send(surface);
    }

    /// Pause requests addressed to `surface`
    pub fn subscribe(&self, surface: Surface) -> PauseSignals {
        PauseSignals {
            surface,
            started: self.started.subscribe(),
        }
    }
}

pub struct PauseSignals {
    surface: Surface,
    started: broadcast::Receiver<Surface>,
}

impl PauseSignals {
    /// The surface these signals pause
    pub fn surface(&self) -> Surface {
        self.surface
    }

    /// Wait until another surface starts; returns that surface
    pub async fn next(&mut self) -> Option<Surface> {
        loop {
            match self.started.recv().await {
                Ok(other) if other != self.surface => return Some(other),
                Ok(_) => continue,
                // Only the latest start matters
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
