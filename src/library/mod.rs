//! Offline library: reading the catalog back and coordinating playback

mod playback;
mod reader;

pub use playback::{PauseSignals, PlaybackCoordinator, Surface};
pub use reader::{is_file, LibraryEntry, LibrarySnapshot, NewDownloads, OfflineLibrary};
