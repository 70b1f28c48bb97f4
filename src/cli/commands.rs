//! CLI command handlers

use anyhow::{Context, Result};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::catalog::{CatalogStore, Membership};
use crate::config::Settings;
use crate::download::{
    self, DownloadEvent, DownloadHandle, EnqueueOutcome, ManagerConfig, NowPlaying, QueueStatus,
    SkipReason, TrackResolver,
};
use crate::library::{is_file, LibrarySnapshot, OfflineLibrary};
use crate::provider::{InvidiousClient, MediaProvider};

/// A running download manager with its collaborators
pub struct Session {
    pub handle: DownloadHandle,
    pub resolver: TrackResolver,
    pub library: OfflineLibrary,
}

impl Session {
    pub async fn start(
        store: CatalogStore,
        provider: Arc<dyn MediaProvider>,
        config: ManagerConfig,
    ) -> Result<Self> {
        let handle = download::spawn(store.clone(), provider.clone(), config)
            .await
            .with_context(|| format!("Failed to open library at {}", store.root().display()))?;
        let library = OfflineLibrary::new(store, handle.events());

        Ok(Self {
            handle,
            resolver: TrackResolver::new(provider),
            library,
        })
    }

    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let root = settings.library_root()?;
        let provider = InvidiousClient::new(
            &settings.provider_url,
            settings.connect_timeout(),
            settings.request_timeout(),
        )?;
        Self::start(
            CatalogStore::new(root),
            Arc::new(provider),
            settings.manager_config(),
        )
        .await
    }

    /// Wait for the queue to drain, then stop the manager
    pub async fn finish(self) -> Result<QueueStatus> {
        self.handle.wait_idle().await?;
        Ok(self.handle.status().await?)
    }
}

/// Draw the active download and log each finished track above it
fn render_progress(mut events: broadcast::Receiver<DownloadEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        loop {
            match events.recv().await {
                Ok(DownloadEvent::Started { title, author, .. }) => {
                    bar.reset();
                    bar.set_message(format!("{} - {}", author, title));
                }
                Ok(DownloadEvent::Progress { fraction, .. }) => {
                    bar.set_position((fraction * 100.0).round() as u64);
                }
                Ok(DownloadEvent::NewDownload { track }) => {
                    bar.println(format!("  {} {} - {}", "✓".green(), track.author, track.title));
                }
                Ok(DownloadEvent::MembershipAdded { id, playlist }) => {
                    bar.println(format!("  {} {} added to '{}'", "+".cyan(), id, playlist));
                }
                Ok(DownloadEvent::Failed { title, error, .. }) => {
                    bar.println(format!("  {} {}: {}", "✗".red(), title, error));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }

        bar.finish_and_clear();
    })
}

/// Handle the `playlist` command
pub async fn playlist(settings: Settings, url: String) -> Result<()> {
    println!("{}", "Resolving playlist...".cyan());

    let session = Session::from_settings(&settings).await?;
    let renderer = render_progress(session.handle.subscribe());

    let summary = session
        .handle
        .download_playlist(&session.resolver, &url)
        .await?;
    let status = session.finish().await?;
    renderer.await?;

    println!();
    println!("{} {}", "Playlist:".green().bold(), summary.title);
    println!("  Downloaded:  {}", status.completed);
    println!("  Added:       {}", summary.merged);
    println!("  Up to date:  {}", summary.skipped);
    if summary.failed > 0 {
        println!(
            "  {}",
            format!("Unresolved:  {}", summary.failed).yellow()
        );
    }
    if status.failed > 0 {
        println!("  {}", format!("Failed:      {}", status.failed).red());
    }

    Ok(())
}

/// Handle the `current` command
pub async fn current(settings: Settings, info: NowPlaying) -> Result<()> {
    let session = Session::from_settings(&settings).await?;
    let renderer = render_progress(session.handle.subscribe());

    let outcome = session
        .handle
        .download_current(&session.resolver, info)
        .await?;
    session.finish().await?;
    renderer.await?;

    match outcome {
        EnqueueOutcome::Queued { .. } => {}
        EnqueueOutcome::MembershipAdded => println!("{}", "Added to the library.".green()),
        EnqueueOutcome::Skipped(SkipReason::AlreadyDownloaded) => {
            println!("{}", "Already downloaded.".yellow())
        }
        EnqueueOutcome::Skipped(reason) => {
            println!("{}", format!("Skipped ({:?}).", reason).yellow())
        }
    }

    Ok(())
}

/// Handle the `library` command
pub async fn library(
    settings: Settings,
    json: bool,
    playlist: Option<String>,
    m3u: bool,
) -> Result<()> {
    let store = CatalogStore::new(settings.library_root()?);
    let snapshot = LibrarySnapshot {
        document: store.read().await?,
        root: store.root().to_path_buf(),
    };
    let membership = playlist.map(Membership::from);

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if m3u {
        if let Some(membership) = &membership {
            print!("{}", snapshot.playlist_m3u(membership).await);
        }
        return Ok(());
    }

    match &membership {
        Some(membership) => print_bucket(&snapshot, membership).await,
        None => {
            if snapshot.document.all.is_empty() {
                println!("{}", "No downloads yet.".yellow());
                return Ok(());
            }
            print_bucket(&snapshot, &Membership::NoPlaylist).await;
            for name in snapshot.playlist_names() {
                print_bucket(&snapshot, &Membership::named(name)).await;
            }
        }
    }

    Ok(())
}

async fn print_bucket(snapshot: &LibrarySnapshot, membership: &Membership) {
    let entries = snapshot.entries(Some(membership)).await;
    let heading = match membership {
        Membership::NoPlaylist => "Single tracks".to_string(),
        Membership::Named(name) => name.clone(),
    };
    println!("{} ({} tracks)", heading.green().bold(), entries.len());
    for entry in entries {
        let missing = if is_file(&entry.audio_path).await {
            String::new()
        } else {
            format!(" {}", "(file missing)".red())
        };
        println!(
            "  {} - {} [{}]{}",
            entry.author, entry.title, entry.duration_human, missing
        );
    }
    println!();
}

/// Handle the `status` command
pub async fn status(settings: Settings, id: Option<String>) -> Result<()> {
    let root = settings.library_root()?;
    let store = CatalogStore::new(&root);

    println!("{}", "Library".green().bold());
    println!("  Location: {}", root.display());
    println!("  Catalog:  {}", store.path().display());
    println!("  Provider: {}", settings.provider_url);

    match store.read().await {
        Ok(doc) => {
            println!("  Tracks:    {}", doc.all.len());
            println!("  Singles:   {}", doc.default.len());
            println!("  Playlists: {}", doc.playlists.len());
            for (name, tracks) in &doc.playlists {
                println!("    - {} ({} tracks)", name, tracks.len());
            }
        }
        Err(e) => println!("  {}", format!("Catalog unreadable: {}", e).red()),
    }

    if let Some(id) = id {
        println!();
        match store.exists(&id).await? {
            Some(track) => {
                let buckets: Vec<_> = track.playlists.iter().map(|m| m.as_str()).collect();
                println!(
                    "{} {} - {} ({})",
                    "Downloaded:".green(),
                    track.author,
                    track.title,
                    buckets.join(", ")
                );
            }
            None => println!("{} {}", "Not downloaded:".yellow(), id),
        }
    }

    Ok(())
}

/// Handle the `host` command
pub async fn host(settings: Settings) -> Result<()> {
    let session = Session::from_settings(&settings).await?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    super::host::serve(session, stdin, tokio::io::stdout()).await?;
    Ok(())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = <super::Cli as clap::CommandFactory>::command();
    generate(shell, &mut cmd, "ytmusic-offline", &mut io::stdout());
}
