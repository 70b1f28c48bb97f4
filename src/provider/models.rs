//! Invidious API response models

use serde::{Deserialize, Deserializer};

/// Playlist response (`/api/v1/playlists/{id}`)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistResponse {
    pub title: String,
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub videos: Vec<PlaylistVideo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistVideo {
    pub title: String,
    pub video_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub length_seconds: u64,
}

/// Video response (`/api/v1/videos/{id}`)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
    pub title: String,
    pub video_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub length_seconds: u64,
    #[serde(default)]
    pub video_thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    pub adaptive_formats: Vec<AdaptiveFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// One entry of `adaptiveFormats`
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveFormat {
    pub url: String,
    #[serde(deserialize_with = "number_or_string")]
    pub itag: u32,
    /// MIME type, e.g. `audio/webm; codecs="opus"`
    #[serde(rename = "type", default)]
    pub mime_type: String,
    pub encoding: Option<String>,
    /// Content length, sent as a string
    pub clen: Option<String>,
}

impl AdaptiveFormat {
    /// Codec name from `encoding`, or from the `codecs=` MIME parameter
    pub fn codec(&self) -> Option<String> {
        if let Some(encoding) = &self.encoding {
            return Some(encoding.clone());
        }
        let (_, params) = self.mime_type.split_once("codecs=")?;
        let codec = params.trim_matches(|c| c == '"' || c == ' ' || c == ';');
        codec.split(',').next().map(|c| c.trim().to_string())
    }

    pub fn is_audio_only(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

fn number_or_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
