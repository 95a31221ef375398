//! Extraction provider seam
//!
//! Providers are synchronous and must tolerate calls from several worker
//! threads at once; the executor runs them on the blocking pool.

use crate::error::Result;
use crate::types::{ChannelInfo, StreamCandidate, VideoSummary};

pub trait ExtractionProvider: Send + Sync + 'static {
    /// Channel metadata for a canonical channel URL
    fn resolve_channel_info(&self, channel_url: &str) -> Result<ChannelInfo>;

    /// Most recent uploads of a channel, newest first
    fn resolve_channel_videos(&self, channel_url: &str, limit: usize) -> Result<Vec<VideoSummary>>;

    /// Playable streams for a watch URL, best ranked first
    fn resolve_video_stream(&self, video_url: &str) -> Result<Vec<StreamCandidate>>;

    /// Search videos, optionally limited to one channel
    fn search(&self, query: &str, scope: Option<&str>, limit: usize) -> Result<Vec<VideoSummary>>;
}
