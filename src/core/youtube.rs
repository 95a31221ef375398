//! YouTube extraction through the yt-dlp executable
//!
//! Every call shells out to yt-dlp with JSON output and walks the result
//! with `serde_json::Value`. Calls block; the executor runs them on the
//! blocking pool.

use crate::core::provider::ExtractionProvider;
use crate::error::{DhammaError, Result};
use crate::types::{ChannelInfo, StreamCandidate, VideoSummary};
use serde_json::Value;
use std::io::ErrorKind;
use std::process::{Command, Stdio};
use tracing::debug;

/// stderr fragments yt-dlp prints for content that does not exist
const NOT_FOUND_MARKERS: &[&str] = &[
    "Video unavailable",
    "does not exist",
    "This channel is not available",
    "Private video",
    "HTTP Error 404",
    "has been terminated",
];

/// Extraction provider backed by yt-dlp
#[derive(Debug, Clone)]
pub struct YtDlpProvider {
    program: String,
}

impl YtDlpProvider {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run yt-dlp and parse its single JSON document
    fn run(&self, args: &[&str]) -> Result<Value> {
        debug!(program = %self.program, ?args, "running extractor");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DhammaError::MissingDependency(self.program.clone()),
                _ => DhammaError::Spawn(format!("Failed to start {}: {}", self.program, e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DhammaError::Provider(format!("Failed to parse yt-dlp output: {}", e)))
    }

    fn flat_playlist(&self, url: &str, limit: usize) -> Result<Value> {
        let end = limit.to_string();
        self.run(&[
            "--flat-playlist",
            "--dump-single-json",
            "--no-warnings",
            "--playlist-end",
            &end,
            url,
        ])
    }
}

impl ExtractionProvider for YtDlpProvider {
    fn resolve_channel_info(&self, channel_url: &str) -> Result<ChannelInfo> {
        let data = self.flat_playlist(channel_url, 1)?;
        parse_channel_info(&data)
    }

    fn resolve_channel_videos(&self, channel_url: &str, limit: usize) -> Result<Vec<VideoSummary>> {
        let url = format!("{}/videos", channel_url.trim_end_matches('/'));
        let data = self.flat_playlist(&url, limit)?;
        Ok(parse_entries(&data, limit))
    }

    fn resolve_video_stream(&self, video_url: &str) -> Result<Vec<StreamCandidate>> {
        let data = self.run(&["--dump-json", "--no-playlist", "--no-warnings", video_url])?;
        let candidates = parse_formats(&data);
        if candidates.is_empty() {
            return Err(DhammaError::NotFound(format!("no streams for {}", video_url)));
        }
        Ok(candidates)
    }

    fn search(&self, query: &str, scope: Option<&str>, limit: usize) -> Result<Vec<VideoSummary>> {
        let data = match scope {
            Some(channel_url) => {
                let url = build_channel_search_url(channel_url, query);
                self.flat_playlist(&url, limit)?
            }
            None => self.flat_playlist(&format!("ytsearch{}:{}", limit, query), limit)?,
        };
        Ok(parse_entries(&data, limit))
    }
}

/// Build the in-channel search URL
fn build_channel_search_url(channel_url: &str, query: &str) -> String {
    format!(
        "{}/search?query={}",
        channel_url.trim_end_matches('/'),
        urlencoding::encode(query)
    )
}

fn classify_failure(stderr: &str) -> DhammaError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .unwrap_or_else(|| stderr.trim())
        .trim()
        .to_string();

    if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
        DhammaError::NotFound(message)
    } else {
        DhammaError::Provider(message)
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|s| s.as_str()).map(|s| s.to_string())
}

/// Last (largest) thumbnail, or the flat `thumbnail` field
fn thumbnail(v: &Value) -> String {
    v.get("thumbnails")
        .and_then(|t| t.as_array())
        .and_then(|t| t.last())
        .and_then(|t| t.get("url"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
        .or_else(|| str_field(v, "thumbnail"))
        .unwrap_or_default()
}

fn parse_channel_info(data: &Value) -> Result<ChannelInfo> {
    let id = str_field(data, "channel_id")
        .or_else(|| str_field(data, "uploader_id"))
        .or_else(|| str_field(data, "id"))
        .ok_or_else(|| DhammaError::Provider("channel response has no id".into()))?;

    let name = str_field(data, "channel")
        .or_else(|| str_field(data, "uploader"))
        .or_else(|| str_field(data, "title"))
        .unwrap_or_default();

    Ok(ChannelInfo {
        id,
        name,
        avatar_url: thumbnail(data),
        subscriber_count: data.get("channel_follower_count").and_then(|c| c.as_u64()),
        description: str_field(data, "description").unwrap_or_default(),
    })
}

/// Video entries of a flat playlist, falling back to the playlist's own
/// channel for entries that don't carry one
fn parse_entries(data: &Value, limit: usize) -> Vec<VideoSummary> {
    let Some(entries) = data.get("entries").and_then(|e| e.as_array()) else {
        return Vec::new();
    };

    let parent_channel_id = str_field(data, "channel_id").unwrap_or_default();
    let parent_channel = str_field(data, "channel")
        .or_else(|| str_field(data, "uploader"))
        .unwrap_or_default();

    entries
        .iter()
        .filter_map(|entry| {
            let id = str_field(entry, "id")?;
            // Shelves and nested playlists show up as entries too
            if entry.get("ie_key").and_then(|k| k.as_str()).is_some_and(|k| k != "Youtube") {
                return None;
            }

            Some(VideoSummary {
                id,
                title: str_field(entry, "title").unwrap_or_default(),
                channel_id: str_field(entry, "channel_id").unwrap_or_else(|| parent_channel_id.clone()),
                channel_name: str_field(entry, "channel")
                    .or_else(|| str_field(entry, "uploader"))
                    .unwrap_or_else(|| parent_channel.clone()),
                duration: entry.get("duration").and_then(|d| d.as_f64()).map(|d| d as u64),
                thumbnail_url: thumbnail(entry),
                view_count: entry.get("view_count").and_then(|c| c.as_u64()),
            })
        })
        .take(limit)
        .collect()
}

/// Streamable formats, best first. yt-dlp lists formats worst to best.
fn parse_formats(data: &Value) -> Vec<StreamCandidate> {
    let Some(formats) = data.get("formats").and_then(|f| f.as_array()) else {
        return Vec::new();
    };

    formats
        .iter()
        .rev()
        .filter_map(|f| {
            let url = str_field(f, "url")?;
            let protocol = f.get("protocol").and_then(|p| p.as_str()).unwrap_or("https");
            if protocol.starts_with("mhtml") {
                return None;
            }

            let vcodec = f.get("vcodec").and_then(|c| c.as_str()).unwrap_or("none");
            let acodec = f.get("acodec").and_then(|c| c.as_str()).unwrap_or("none");
            if acodec == "none" {
                return None;
            }

            let audio_only = vcodec == "none";
            let ext = f.get("ext").and_then(|e| e.as_str()).unwrap_or("mp4");
            let bitrate = f
                .get("abr")
                .and_then(|b| b.as_f64())
                .or_else(|| f.get("tbr").and_then(|b| b.as_f64()))
                .map(|b| b.round() as u32);

            Some(StreamCandidate {
                url,
                bitrate_kbps: bitrate,
                mime_type: format!("{}/{}", if audio_only { "audio" } else { "video" }, ext),
                audio_only,
            })
        })
        .collect()
}
