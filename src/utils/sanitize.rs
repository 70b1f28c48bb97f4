//! Filename sanitization utilities

/// Names Windows refuses as a path component regardless of extension
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Longest component we produce, in bytes, leaving room for `.opus.part`
const MAX_COMPONENT_BYTES: usize = 200;

/// Used when nothing usable is left of the input
const FALLBACK_NAME: &str = "untitled";

/// Sanitize a track title or artist name into a single path component
///
/// Replaces filesystem-unsafe characters with visually similar Unicode alternatives
/// that are safe to use in filenames across all major operating systems. Control
/// characters are dropped, trailing dots are removed, reserved device names are
/// prefixed and the result is truncated on a char boundary.
///
/// ```ignore
/// assert_eq!(sanitize_filename("BOTHERED / UNBOTHERED"), "BOTHERED ⧸ UNBOTHERED");
/// assert_eq!(sanitize_filename("My:Song*?"), "My꞉Song⁎？");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter_map(|c| match c {
            '/' => Some('⧸'),  // U+29F8 - Big Solidus
            '\\' => Some('⧹'), // U+29F9 - Big Reverse Solidus
            ':' => Some('꞉'),  // U+A789 - Modifier Letter Colon
            '*' => Some('⁎'),  // U+204E - Low Asterisk
            '?' => Some('？'), // U+FF1F - Fullwidth Question Mark
            '"' => Some('″'),  // U+2033 - Double Prime
            '<' => Some('‹'),  // U+2039 - Single Left Angle Quote
            '>' => Some('›'),  // U+203A - Single Right Angle Quote
            '|' => Some('｜'), // U+FF5C - Fullwidth Vertical Line
            c if c.is_control() => None,
            _ => Some(c),
        })
        .collect();

    let mut name = truncate_to_boundary(replaced.trim(), MAX_COMPONENT_BYTES)
        .trim_end_matches(['.', ' '])
        .trim()
        .to_string();

    if name.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    let stem = name.split('.').next().unwrap_or_default();
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
        name.insert(0, '_');
    }

    name
}

/// Sanitize `name` and append `suffix`, shortening the name so the suffix always fits
///
/// `suffix` must already be safe in a filename.
pub fn sanitize_filename_with_suffix(name: &str, suffix: &str) -> String {
    let suffix = truncate_to_boundary(suffix, MAX_COMPONENT_BYTES / 2);
    let base = sanitize_filename(name);
    let stem = truncate_to_boundary(&base, MAX_COMPONENT_BYTES - suffix.len()).trim_end();
    format!("{}{}", stem, suffix)
}

fn truncate_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_slashes() {
        assert_eq!(
            sanitize_filename("BOTHERED / UNBOTHERED"),
            "BOTHERED ⧸ UNBOTHERED"
        );
        assert_eq!(sanitize_filename("AC/DC"), "AC⧸DC");
    }

    #[test]
    fn test_sanitize_strips_every_unsafe_char() {
        let name = sanitize_filename("My:Song*?");
        for c in [':', '*', '?', '"', '<', '>', '|', '/', '\\'] {
            assert!(!name.contains(c), "{name:?} still contains {c:?}");
        }
        assert_eq!(name, "My꞉Song⁎？");

        let worst = sanitize_filename("a:b*c?d\"e<f>g|h/i\\j");
        for c in [':', '*', '?', '"', '<', '>', '|', '/', '\\'] {
            assert!(!worst.contains(c));
        }
    }

    #[test]
    fn test_sanitize_control_chars() {
        assert_eq!(sanitize_filename("Line\nBreak\0"), "LineBreak");
    }

    #[test]
    fn test_dot_names_are_not_special() {
        assert_eq!(sanitize_filename(".."), FALLBACK_NAME);
        assert_eq!(sanitize_filename("."), FALLBACK_NAME);
        assert_eq!(sanitize_filename("Song..."), "Song");
    }

    #[test]
    fn test_empty_falls_back() {
        assert_eq!(sanitize_filename(""), FALLBACK_NAME);
        assert_eq!(sanitize_filename("   "), FALLBACK_NAME);
    }

    #[test]
    fn test_reserved_device_names() {
        assert_eq!(sanitize_filename("CON"), "_CON");
        assert_eq!(sanitize_filename("nul.txt"), "_nul.txt");
        assert_eq!(sanitize_filename("Console"), "Console");
    }

    #[test]
    fn test_long_names_truncate_on_char_boundary() {
        let long = "é".repeat(300);
        let name = sanitize_filename(&long);
        assert!(name.len() <= MAX_COMPONENT_BYTES);
        assert!(name.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_trim_whitespace() {
        assert_eq!(sanitize_filename("  Song Name  "), "Song Name");
    }

    #[test]
    fn test_suffix_survives_truncation() {
        let long = "曲".repeat(100);
        let name = sanitize_filename_with_suffix(&long, " [two]");
        assert!(name.len() <= MAX_COMPONENT_BYTES);
        assert!(name.ends_with(" [two]"));
        assert_ne!(name, sanitize_filename(&long));

        assert_eq!(sanitize_filename_with_suffix("Intro", " [two]"), "Intro [two]");
    }
}
