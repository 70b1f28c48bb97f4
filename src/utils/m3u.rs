//! M3U playlist generation

/// Generate an extended M3U playlist
///
/// Each entry is `(duration_seconds, "Author - Title", path)`; unknown
/// durations are written as `-1`.
pub fn generate_m3u(tracks: &[(Option<u64>, String, String)]) -> String {
    let mut content = String::from("#EXTM3U\n");
    for (duration, label, path) in tracks {
        let seconds = duration.map(|d| d as i64).unwrap_or(-1);
        content.push_str(&format!("#EXTINF:{},{}\n", seconds, label));
        content.push_str(path);
        content.push('\n');
    }
    content
}
