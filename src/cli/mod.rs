//! CLI module for ytmusic-offline

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;
pub mod host;

use crate::config::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "ytmusic-offline",
    about = "Download YouTube Music tracks and playlists for offline playback"
)]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file (defaults to ~/.config/ytmusic-offline/config.json)
    #[arg(long, global = true, env = "YTMUSIC_OFFLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory the YTMusic library folder lives in
    #[arg(long, global = true, env = "YTMUSIC_OFFLINE_MUSIC_ROOT")]
    pub music_root: Option<PathBuf>,

    /// Invidious-compatible instance to fetch from
    #[arg(long, global = true, env = "YTMUSIC_OFFLINE_PROVIDER")]
    pub provider_url: Option<String>,
}

impl Cli {
    /// Settings file merged with command-line overrides
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load()?,
        };
        if let Some(root) = &self.music_root {
            settings.music_root = Some(root.clone());
        }
        if let Some(url) = &self.provider_url {
            settings.provider_url = url.clone();
        }
        Ok(settings)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every track of a playlist
    Playlist {
        /// Playlist link or id
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Download a single track outside any playlist
    Current {
        /// Track id (derived from --url if omitted)
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        title: String,

        #[arg(long)]
        author: String,

        /// Remote cover URL
        #[arg(long)]
        cover: Option<String>,

        /// Duration as m:ss
        #[arg(long)]
        duration: Option<String>,

        /// Track page link
        #[arg(long)]
        url: Option<String>,
    },

    /// Show the downloaded library
    Library {
        /// Print the raw catalog with its root path as JSON
        #[arg(long, conflicts_with = "m3u")]
        json: bool,

        /// Only show this playlist ("default" for single tracks)
        #[arg(short, long)]
        playlist: Option<String>,

        /// Print the playlist as an M3U file
        #[arg(long, requires = "playlist")]
        m3u: bool,
    },

    /// Show where the library lives and what it holds
    Status {
        /// Also report whether this track id is downloaded
        #[arg(long)]
        id: Option<String>,
    },

    /// Serve newline-delimited JSON requests on stdin, events on stdout
    Host,

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
