//! Catalog document and track records

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Key used on disk for tracks that don't belong to a playlist
pub const DEFAULT_BUCKET: &str = "default";

/// Earlier releases wrote a track's memberships under this key
const LEGACY_MEMBERSHIP_KEY: &str = "playlist";

/// Which bucket of the catalog a track is filed under
///
/// Stored on disk as a plain string, with [`Membership::NoPlaylist`] written as
/// `"default"` so catalogs written by earlier releases keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Membership {
    /// Downloaded on its own, outside any playlist
    NoPlaylist,
    /// Downloaded as part of the named playlist
    Named(String),
}

impl Membership {
    pub fn named(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Membership::NoPlaylist => DEFAULT_BUCKET,
            Membership::Named(name) => name,
        }
    }
}

impl From<String> for Membership {
    fn from(name: String) -> Self {
        if name == DEFAULT_BUCKET {
            Membership::NoPlaylist
        } else {
            Membership::Named(name)
        }
    }
}

impl From<Membership> for String {
    fn from(membership: Membership) -> Self {
        match membership {
            Membership::NoPlaylist => DEFAULT_BUCKET.to_string(),
            Membership::Named(name) => name,
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A track as handed from the resolver to the download queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    /// Provider-assigned id, unique across the catalog
    pub id: String,
    pub title: String,
    pub author: String,
    /// Remote cover URL
    pub cover: String,
    #[serde(default)]
    pub duration_human: String,
    /// Page URL the provider resolves streams from
    #[serde(rename = "url", alias = "sourceURL")]
    pub source_url: String,
    /// Bucket this download was requested for
    pub playlist: Membership,
}

/// A downloaded track as recorded in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTrack {
    pub id: String,
    pub title: String,
    pub author: String,
    pub cover: String,
    #[serde(default)]
    pub duration_human: String,
    #[serde(rename = "url", alias = "sourceURL", default)]
    pub source_url: String,
    #[serde(default)]
    pub playlists: Vec<Membership>,
    /// Sanitized title; audio and cover live at `<author>/<filename>.{opus,jpg}`
    pub filename: String,
    /// Fields this version doesn't know about, kept so saves don't drop them
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PersistedTrack {
    /// Finalize a downloaded descriptor into a catalog record
    pub fn from_descriptor(track: TrackDescriptor, filename: String) -> Self {
        Self {
            id: track.id,
            title: track.title,
            author: track.author,
            cover: track.cover,
            duration_human: track.duration_human,
            source_url: track.source_url,
            playlists: vec![track.playlist],
            filename,
            extra: serde_json::Map::new(),
        }
    }

    pub fn has_membership(&self, membership: &Membership) -> bool {
        self.playlists.contains(membership)
    }

    /// Fold a `playlist` array written by earlier releases into `playlists`
    fn adopt_legacy_memberships(&mut self) {
        let names: Vec<String> = match self.extra.remove(LEGACY_MEMBERSHIP_KEY) {
            None => return,
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(name)) => vec![name],
            Some(other) => {
                self.extra.insert(LEGACY_MEMBERSHIP_KEY.to_string(), other);
                return;
            }
        };
        for name in names {
            let membership = Membership::from(name);
            if !self.has_membership(&membership) {
                self.playlists.push(membership);
            }
        }
    }
}

/// Result of recording a playlist membership for a known track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    /// Track was already filed under that bucket
    AlreadyPresent,
    /// Membership appended, document needs saving
    Added,
    /// Track id is not in `all`
    UnknownTrack,
}

/// The persisted offline library
///
/// `all` is authoritative; `default` and `playlists` hold copies that
/// [`CatalogDocument::sync_views`] refreshes before every save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub playlists: BTreeMap<String, Vec<PersistedTrack>>,
    #[serde(default)]
    pub default: Vec<PersistedTrack>,
    #[serde(default)]
    pub all: Vec<PersistedTrack>,
}

impl CatalogDocument {
    /// Look a track up by id
    pub fn find(&self, id: &str) -> Option<&PersistedTrack> {
        self.all.iter().find(|t| t.id == id)
    }

    /// Whether `id` is downloaded and already filed under `membership`
    pub fn is_covered(&self, id: &str, membership: &Membership) -> bool {
        self.find(id).is_some_and(|t| t.has_membership(membership))
    }

    /// Make sure an (possibly empty) bucket exists for a named playlist
    pub fn ensure_playlist(&mut self, membership: &Membership) {
        if let Membership::Named(name) = membership {
            self.playlists.entry(name.clone()).or_default();
        }
    }

    fn bucket_mut(&mut self, membership: &Membership) -> &mut Vec<PersistedTrack> {
        match membership {
            Membership::NoPlaylist => &mut self.default,
            Membership::Named(name) => self.playlists.entry(name.clone()).or_default(),
        }
    }

    /// File an already-downloaded track under another bucket
    pub fn add_membership(&mut self, id: &str, membership: &Membership) -> MembershipChange {
        let Some(track) = self.all.iter_mut().find(|t| t.id == id) else {
            return MembershipChange::UnknownTrack;
        };
        if track.has_membership(membership) {
            return MembershipChange::AlreadyPresent;
        }
        track.playlists.push(membership.clone());
        let copy = track.clone();
        self.bucket_mut(membership).push(copy);
        self.sync_views();
        MembershipChange::Added
    }

    /// Add a freshly downloaded track to `all` and to each of its buckets
    ///
    /// If the id is already known only the memberships are merged.
    pub fn insert(&mut self, track: PersistedTrack) {
        if self.find(&track.id).is_some() {
            for membership in &track.playlists {
                self.add_membership(&track.id, membership);
            }
            return;
        }
        for membership in &track.playlists {
            self.bucket_mut(membership).push(track.clone());
        }
        self.all.push(track);
    }

    /// Bring records written by earlier releases up to the current shape
    pub fn upgrade_legacy(&mut self) {
        self.all
            .iter_mut()
            .chain(self.default.iter_mut())
            .chain(self.playlists.values_mut().flatten())
            .for_each(PersistedTrack::adopt_legacy_memberships);
    }

    /// Refresh every bucket copy from its `all` record
    pub fn sync_views(&mut self) {
        let by_id: HashMap<&str, &PersistedTrack> =
            self.all.iter().map(|t| (t.id.as_str(), t)).collect();

        let refresh = |bucket: &mut Vec<PersistedTrack>| {
            for entry in bucket.iter_mut() {
                if let Some(source) = by_id.get(entry.id.as_str()) {
                    if *entry != **source {
                        *entry = (*source).clone();
                    }
                }
            }
        };

        refresh(&mut self.default);
        for bucket in self.playlists.values_mut() {
            refresh(bucket);
        }
    }

    /// Tracks of one bucket, in insertion order
    pub fn bucket(&self, membership: &Membership) -> &[PersistedTrack] {
        match membership {
            Membership::NoPlaylist => &self.default,
            Membership::Named(name) => self.playlists.get(name).map(Vec::as_slice).unwrap_or(&[]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, membership: Membership) -> PersistedTrack {
        PersistedTrack::from_descriptor(
            TrackDescriptor {
                id: id.to_string(),
                title: format!("Title {id}"),
                author: "Artist".to_string(),
                cover: format!("https://img.example/{id}.jpg"),
                duration_human: "3:20".to_string(),
                source_url: format!("https://music.example/watch?v={id}"),
                playlist: membership,
            },
            format!("Title {id}"),
        )
    }

    #[test]
    fn test_membership_serializes_as_plain_string() {
        let json = serde_json::to_string(&vec![
            Membership::NoPlaylist,
            Membership::named("Road Trip"),
        ])
        .unwrap();
        assert_eq!(json, r#"["default","Road Trip"]"#);

        let back: Vec<Membership> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[0], Membership::NoPlaylist);
        assert_eq!(back[1], Membership::Named("Road Trip".into()));
    }

    #[test]
    fn test_insert_files_under_default() {
        let mut doc = CatalogDocument::default();
        doc.insert(track("abc", Membership::NoPlaylist));

        assert_eq!(doc.all.len(), 1);
        assert_eq!(doc.default.len(), 1);
        assert!(doc.playlists.is_empty());
    }

    #[test]
    fn test_add_membership_keeps_all_unique() {
        let mut doc = CatalogDocument::default();
        doc.insert(track("abc", Membership::NoPlaylist));

        let mix = Membership::named("Mix");
        assert_eq!(doc.add_membership("abc", &mix), MembershipChange::Added);
        assert_eq!(doc.add_membership("abc", &mix), MembershipChange::AlreadyPresent);
        assert_eq!(doc.add_membership("zzz", &mix), MembershipChange::UnknownTrack);

        assert_eq!(doc.all.len(), 1);
        assert_eq!(doc.bucket(&mix).len(), 1);
        // The default copy sees the new membership too
        assert_eq!(doc.default[0].playlists.len(), 2);
    }

    #[test]
    fn test_insert_existing_merges_membership() {
        let mut doc = CatalogDocument::default();
        doc.insert(track("abc", Membership::NoPlaylist));
        doc.insert(track("abc", Membership::named("Mix")));

        assert_eq!(doc.all.len(), 1);
        assert!(doc.is_covered("abc", &Membership::named("Mix")));
        assert!(doc.is_covered("abc", &Membership::NoPlaylist));
    }

    #[test]
    fn test_ensure_playlist_creates_empty_bucket() {
        let mut doc = CatalogDocument::default();
        doc.ensure_playlist(&Membership::named("Empty"));
        doc.ensure_playlist(&Membership::NoPlaylist);
        assert_eq!(doc.playlists.len(), 1);
        assert!(doc.playlists["Empty"].is_empty());
    }

    #[test]
    fn test_unknown_fields_survive() {
        let json = r#"{"id":"x","title":"T","author":"A","cover":"c","durationHuman":"1:00","url":"u","playlists":["default"],"filename":"T","album":"LP"}"#;
        let parsed: PersistedTrack = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.extra["album"], "LP");

        let out = serde_json::to_value(&parsed).unwrap();
        assert_eq!(out["album"], "LP");
        assert_eq!(out["durationHuman"], "1:00");
    }

    #[test]
    fn test_legacy_playlist_key_counts_as_membership() {
        let json = r#"{"playlists":{},"default":[],"all":[{"id":"x","title":"T","author":"A","cover":"c","url":"u","filename":"T","playlist":["default","Mix"],"statePercent":null}]}"#;
        let mut doc: CatalogDocument = serde_json::from_str(json).unwrap();
        doc.upgrade_legacy();

        let record = &doc.all[0];
        assert_eq!(record.playlists, vec![Membership::NoPlaylist, Membership::named("Mix")]);
        assert!(!record.extra.contains_key("playlist"));
        assert!(record.extra.contains_key("statePercent"));
        assert!(doc.is_covered("x", &Membership::named("Mix")));
    }
}
