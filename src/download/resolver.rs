//! Turns playlist links and now-playing info into track descriptors

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::error::DownloadError;
use crate::catalog::{Membership, TrackDescriptor};
use crate::provider::{links, MediaProvider, PlaylistItem};

/// Metadata of the track currently playing in the main view
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub duration_human: String,
    #[serde(default)]
    pub url: String,
}

/// Entries of a playlist, ready to be resolved one by one
#[derive(Debug, Clone)]
pub struct PlaylistListing {
    pub title: String,
    pub membership: Membership,
    pub items: Vec<PlaylistItem>,
}

/// Resolves tracks through a [`MediaProvider`]
#[derive(Clone)]
pub struct TrackResolver {
    provider: Arc<dyn MediaProvider>,
}

impl TrackResolver {
    pub fn new(provider: Arc<dyn MediaProvider>) -> Self {
        Self { provider }
    }

    /// Fetch the playlist's title and entries
    pub async fn list_playlist(&self, url: &str) -> Result<PlaylistListing, DownloadError> {
        let playlist = self
            .provider
            .playlist(url)
            .await
            .map_err(|e| DownloadError::resolution(format!("playlist {}", url), e))?;

        debug!("Playlist '{}': {} items", playlist.title, playlist.items.len());
        Ok(PlaylistListing {
            membership: Membership::named(playlist.title.clone()),
            title: playlist.title,
            items: playlist.items,
        })
    }

    /// Fetch one entry's metadata and build its descriptor
    pub async fn resolve_item(
        &self,
        item: &PlaylistItem,
        membership: &Membership,
    ) -> Result<TrackDescriptor, DownloadError> {
        let remote = self
            .provider
            .track(&item.url)
            .await
            .map_err(|e| DownloadError::resolution(format!("track {}", item.id), e))?;

        let pick = |primary: String, fallback: &str| {
            if primary.trim().is_empty() {
                fallback.to_string()
            } else {
                primary
            }
        };

        Ok(TrackDescriptor {
            id: item.id.clone(),
            title: pick(remote.title, &item.title),
            author: pick(remote.author, &item.author),
            cover: remote.cover.unwrap_or_default(),
            duration_human: pick(item.duration_human.clone(), &remote.duration_human),
            source_url: item.url.clone(),
            playlist: membership.clone(),
        })
    }

    /// Descriptor built from the listing alone, for tracks the library already holds
    pub fn describe_listed(&self, item: &PlaylistItem, membership: &Membership) -> TrackDescriptor {
        TrackDescriptor {
            id: item.id.clone(),
            title: item.title.clone(),
            author: item.author.clone(),
            cover: String::new(),
            duration_human: item.duration_human.clone(),
            source_url: item.url.clone(),
            playlist: membership.clone(),
        }
    }

    /// Resolve every entry of a playlist, in order, one at a time
    ///
    /// Ids in `known` skip the metadata lookup. A failed entry yields its error
    /// and the stream moves on to the next one.
    pub fn resolve_playlist<'a>(
        &'a self,
        listing: &'a PlaylistListing,
        known: &'a HashSet<String>,
    ) -> impl Stream<Item = Result<TrackDescriptor, DownloadError>> + 'a {
        futures::stream::iter(&listing.items).then(move |item| async move {
            if known.contains(&item.id) {
                Ok(self.describe_listed(item, &listing.membership))
            } else {
                self.resolve_item(item, &listing.membership).await
            }
        })
    }

    /// Wrap the now-playing track as a download outside any playlist
    pub fn resolve_current(&self, info: NowPlaying) -> Result<TrackDescriptor, DownloadError> {
        let id = if info.id.is_empty() {
            links::video_id(&info.url).unwrap_or_default()
        } else {
            info.id
        };

        if id.is_empty() || info.title.trim().is_empty() {
            return Err(DownloadError::Resolution {
                what: "current track".to_string(),
                reason: "no id or title reported by the player".to_string(),
            });
        }

        let source_url = if info.url.is_empty() {
            format!("https://music.youtube.com/watch?v={}", id)
        } else {
            info.url
        };

        Ok(TrackDescriptor {
            id,
            title: info.title,
            author: info.author,
            cover: info.cover,
            duration_human: info.duration_human,
            source_url,
            playlist: Membership::NoPlaylist,
        })
    }
}
