//! Channel and video identifier normalization
//!
//! Equivalent spellings of the same channel or video must map to one cache
//! and dedup key.

use regex::Regex;
use std::sync::LazyLock;

const YOUTUBE: &str = "https://www.youtube.com";

static CHANNEL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|youtube\.com/channel/)(UC[A-Za-z0-9_-]+)").expect("Invalid regex"));
static HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|youtube\.com/)@([A-Za-z0-9_.-]+)").expect("Invalid regex"));
static CUSTOM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youtube\.com/(c|user)/([A-Za-z0-9_.-]+)").expect("Invalid regex"));
static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[?&]v=|youtu\.be/|/shorts/|/embed/|/live/)([A-Za-z0-9_-]{11})").expect("Invalid regex")
});
static BARE_VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("Invalid regex"));

/// Canonical channel URL for a channel URL, `@handle` or `UC…` id
///
/// Unrecognized input is passed through trimmed, so the provider gets to
/// decide whether it is valid.
pub fn normalize_channel(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');

    if let Some(caps) = CHANNEL_ID.captures(trimmed) {
        return format!("{}/channel/{}", YOUTUBE, &caps[1]);
    }
    if let Some(caps) = HANDLE.captures(trimmed) {
        return format!("{}/@{}", YOUTUBE, &caps[1]);
    }
    if let Some(caps) = CUSTOM.captures(trimmed) {
        return format!("{}/{}/{}", YOUTUBE, &caps[1], &caps[2]);
    }

    trimmed.to_string()
}

/// Extract the 11 character video id from a watch URL, short link or bare id
pub fn video_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if BARE_VIDEO_ID.is_match(trimmed) {
        return Some(trimmed.to_string());
    }
    VIDEO_ID.captures(trimmed).map(|caps| caps[1].to_string())
}

/// Build YouTube watch URL from video ID
pub fn build_video_url(video_id: &str) -> String {
    format!("{}/watch?v={}", YOUTUBE, video_id)
}

/// Canonical watch URL for any video input
pub fn normalize_video(input: &str) -> String {
    match video_id(input) {
        Some(id) => build_video_url(&id),
        None => input.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_spellings_collapse() {
        let canonical = "https://www.youtube.com/@DhammaTalks";
        assert_eq!(normalize_channel("@DhammaTalks"), canonical);
        assert_eq!(normalize_channel("https://www.youtube.com/@DhammaTalks/videos"), canonical);
        assert_eq!(normalize_channel("  youtube.com/@DhammaTalks/  "), canonical);
    }

    #[test]
    fn channel_ids_use_channel_path() {
        let id = "UCx2dWk8dQqzoDdXz0yWwTKA";
        let expected = format!("https://www.youtube.com/channel/{}", id);
        assert_eq!(normalize_channel(id), expected);
        assert_eq!(
            normalize_channel(&format!("https://www.youtube.com/channel/{}/featured", id)),
            expected
        );
    }

    #[test]
    fn custom_and_user_paths_are_kept() {
        assert_eq!(
            normalize_channel("https://youtube.com/c/AjahnBrahm"),
            "https://www.youtube.com/c/AjahnBrahm"
        );
        assert_eq!(
            normalize_channel("https://www.youtube.com/user/BuddhistSocietyWA"),
            "https://www.youtube.com/user/BuddhistSocietyWA"
        );
    }

    #[test]
    fn unknown_channel_input_passes_through() {
        assert_eq!(normalize_channel("some-browse-id"), "some-browse-id");
    }

    #[test]
    fn video_inputs_normalize_to_watch_url() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        assert_eq!(normalize_video("dQw4w9WgXcQ"), url);
        assert_eq!(normalize_video("https://youtu.be/dQw4w9WgXcQ?t=42"), url);
        assert_eq!(normalize_video("https://www.youtube.com/watch?list=PL1&v=dQw4w9WgXcQ"), url);
        assert_eq!(normalize_video("https://www.youtube.com/shorts/dQw4w9WgXcQ"), url);
    }

    #[test]
    fn video_id_rejects_garbage() {
        assert_eq!(video_id("not a video"), None);
    }
}
