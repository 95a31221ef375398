//! Type definitions for dhamma-stream
//!
//! Source of truth for all data structures.

use crate::error::DhammaError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Catalog Types
// ============================================

/// A channel resolved from a channel URL or handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub avatar_url: String,
    pub subscriber_count: Option<u64>,
    pub description: String,
}

/// A video entry from a channel listing or a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
    /// Duration in seconds, if known
    pub duration: Option<u64>,
    pub thumbnail_url: String,
    pub view_count: Option<u64>,
}

/// One playable stream offered by the provider, in provider rank order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCandidate {
    pub url: String,
    /// Average bitrate in kbps
    pub bitrate_kbps: Option<u32>,
    /// e.g. "audio/webm; codecs=\"opus\""
    pub mime_type: String,
    pub audio_only: bool,
}

/// The stream picked for playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub url: String,
    pub bitrate_kbps: Option<u32>,
    pub mime_type: String,
    /// When the upstream URL stops working, if the provider told us
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================
// Resolution Types
// ============================================

/// What a resolution request asks the provider for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionKind {
    ChannelInfo,
    ChannelVideos,
    VideoStream,
    SearchInChannel,
}

impl ResolutionKind {
    /// Stream URLs expire upstream; everything else is metadata
    pub fn is_stream(self) -> bool {
        matches!(self, Self::VideoStream)
    }
}

/// Identity of a resolution, shared by the cache and the executor's dedup map
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub kind: ResolutionKind,
    /// Channel URL, video URL or search query
    pub identifier: String,
    /// Channel URL a search is limited to
    pub scope: Option<String>,
}

impl RequestKey {
    pub fn new(kind: ResolutionKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            scope: None,
        }
    }

    pub fn search(query: impl Into<String>, scope: Option<String>) -> Self {
        Self {
            kind: ResolutionKind::SearchInChannel,
            identifier: query.into(),
            scope,
        }
    }
}

/// A submitted resolution. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    pub key: RequestKey,
    pub seq: u64,
    /// Play requests are never evicted from the admission queue
    pub is_play: bool,
}

/// Successful resolution payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ResolutionPayload {
    Channel(ChannelInfo),
    Videos(Vec<VideoSummary>),
    Stream(StreamDescriptor),
}

pub type ResolutionResult = std::result::Result<ResolutionPayload, DhammaError>;

// ============================================
// Playback Types
// ============================================

/// Playback session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Resolving,
    Ready,
    Playing,
    Paused,
    Ended,
    Failed,
}

impl PlaybackState {
    /// A stream is loaded in the engine
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }
}

/// The video currently intended to play
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackTarget {
    pub video_id: String,
    pub seq: u64,
}

/// Everything the UI needs to render the player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub target: Option<PlaybackTarget>,
    pub stream: Option<StreamDescriptor>,
    /// Message of the failure that put the session in `Failed`
    pub error: Option<String>,
}

/// Outcome of handing a resolution to the playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Applied to the current target
    Applied,
    /// Superseded by a newer play request and discarded
    Stale,
}

// ============================================
// Engine Types
// ============================================

/// Events reported by the media engine, tagged with the load they belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub seq: u64,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    Started,
    Ended,
    Error(String),
}

// ============================================
// Config Types
// ============================================

/// Stream selection policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamPolicy {
    /// Bandwidth cap in kbps (None = no cap)
    pub max_bitrate_kbps: Option<u32>,
    /// Ignore muxed video streams when an audio-only one exists
    pub prefer_audio_only: bool,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            max_bitrate_kbps: None,
            prefer_audio_only: true,
        }
    }
}

/// User configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Resolution worker count (default: 4)
    pub workers: usize,
    /// Admission queue bound (default: 64)
    pub max_queue: usize,
    /// Per provider call deadline in seconds (default: 15)
    pub request_timeout_secs: u64,
    /// TTL for channel info, listings and searches (default: 10 min)
    pub metadata_ttl_secs: u64,
    /// TTL for stream URLs (default: 2 min)
    pub stream_ttl_secs: u64,
    /// Hard cap on cache entries (default: unbounded)
    pub cache_capacity: Option<usize>,
    /// Interval between cache sweeps, 0 disables (default: 5 min)
    pub sweep_interval_secs: u64,
    /// Videos fetched per channel listing or search (default: 30)
    pub video_limit: usize,
    pub stream: StreamPolicy,
    /// yt-dlp executable
    pub ytdlp_path: String,
    /// mpv executable
    pub player_path: String,
    /// Editor command (default: "nvim")
    pub editor: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 4,
            max_queue: 64,
            request_timeout_secs: 15,
            metadata_ttl_secs: 600,
            stream_ttl_secs: 120,
            cache_capacity: None,
            sweep_interval_secs: 300,
            video_limit: 30,
            stream: StreamPolicy::default(),
            ytdlp_path: "yt-dlp".into(),
            player_path: "mpv".into(),
            editor: "nvim".into(),
        }
    }
}

// ============================================
// Selector Types
// ============================================

/// Item displayed in selector menu
#[derive(Debug, Clone)]
pub struct MenuItem<T> {
    /// Display text
    pub label: String,
    /// Underlying value
    pub value: T,
}

// ============================================
// Cache Types
// ============================================

/// Cached data with TTL
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: DateTime<Utc>,
    pub ttl: std::time::Duration,
}
