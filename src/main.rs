//! ytmusic-offline - Download YouTube Music tracks and playlists for offline playback

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog;
mod cli;
mod config;
mod download;
mod library;
mod provider;
mod utils;

use cli::{Cli, Commands};
use download::NowPlaying;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stderr keeps stdout free for the host bridge
    let filter = if cli.verbose {
        "ytmusic_offline=debug,reqwest=debug"
    } else {
        "ytmusic_offline=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Commands::Completion { shell } = cli.command {
        cli::commands::completion(shell);
        return Ok(());
    }

    let settings = cli.settings()?;

    match cli.command {
        Commands::Playlist { url } => {
            cli::commands::playlist(settings, url).await?;
        }
        Commands::Current {
            id,
            title,
            author,
            cover,
            duration,
            url,
        } => {
            let info = NowPlaying {
                id: id.unwrap_or_default(),
                title,
                author,
                cover: cover.unwrap_or_default(),
                duration_human: duration.unwrap_or_default(),
                url: url.unwrap_or_default(),
            };
            cli::commands::current(settings, info).await?;
        }
        Commands::Library { json, playlist, m3u } => {
            cli::commands::library(settings, json, playlist, m3u).await?;
        }
        Commands::Status { id } => {
            cli::commands::status(settings, id).await?;
        }
        Commands::Host => {
            cli::commands::host(settings).await?;
        }
        Commands::Completion { .. } => {}
    }

    Ok(())
}
