//! Download queue, worker and manager task

pub mod error;
pub mod events;
pub mod manager;
pub mod queue;
pub mod resolver;
pub mod worker;

pub use error::DownloadError;
pub use events::{DownloadEvent, SkipReason};
pub use manager::{spawn, DownloadHandle, EnqueueOutcome, ManagerConfig, PlaylistSummary, QueueStatus};
pub use resolver::{NowPlaying, TrackResolver};
pub use worker::WorkerConfig;
