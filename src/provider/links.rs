//! Extract playlist and video ids from user-supplied links

use url::Url;

/// Playlist id from a `...?list=<id>` URL or a bare id
pub fn playlist_id(input: &str) -> Option<String> {
    let input = input.trim();
    if let Ok(url) = Url::parse(input) {
        return query_param(&url, "list");
    }
    is_bare_id(input).then(|| input.to_string())
}

/// Video id from a watch URL, a `youtu.be` short link or a bare id
pub fn video_id(input: &str) -> Option<String> {
    let input = input.trim();
    let Ok(url) = Url::parse(input) else {
        return is_bare_id(input).then(|| input.to_string());
    };

    if url.host_str() == Some("youtu.be") {
        return url
            .path_segments()
            .and_then(|mut s| s.next())
            .filter(|id| is_bare_id(id))
            .map(str::to_string);
    }
    query_param(&url, "v")
}

fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| is_bare_id(v))
}

fn is_bare_id(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_id_from_url() {
        assert_eq!(
            playlist_id("https://music.youtube.com/playlist?list=PLabc_123-x").as_deref(),
            Some("PLabc_123-x")
        );
        assert_eq!(playlist_id("PLxyz").as_deref(), Some("PLxyz"));
        assert_eq!(playlist_id("https://music.youtube.com/watch?v=abc"), None);
    }

    #[test]
    fn test_video_id_variants() {
        assert_eq!(
            video_id("https://music.youtube.com/watch?v=dQw4w9WgXcQ&list=RD").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(video_id("https://youtu.be/dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(video_id("dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(video_id("not an id"), None);
    }
}
