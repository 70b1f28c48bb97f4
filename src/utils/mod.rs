//! Utility functions

pub mod cover_art;
mod duration;
mod m3u;
mod sanitize;

pub use duration::{format_duration, parse_duration};
pub use m3u::generate_m3u;
pub use sanitize::{sanitize_filename, sanitize_filename_with_suffix};
