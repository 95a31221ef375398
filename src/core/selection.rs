//! Stream selection policy

use crate::error::{DhammaError, Result};
use crate::types::{StreamCandidate, StreamDescriptor, StreamPolicy};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static EXPIRE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&/]expire[=/](\d+)").expect("Invalid regex"));

/// Pick the stream to play from the provider's ranked candidates.
///
/// Audio-only candidates win when preferred and present. Among candidates at
/// or under the bitrate cap the highest bitrate wins, earlier rank breaking
/// ties; when nothing fits under the cap the lowest bitrate above it is used.
/// Candidates without a bitrate count as 0 kbps.
pub fn select_stream(candidates: &[StreamCandidate], policy: &StreamPolicy) -> Result<StreamDescriptor> {
    let pool: Vec<&StreamCandidate> = if policy.prefer_audio_only && candidates.iter().any(|c| c.audio_only) {
        candidates.iter().filter(|c| c.audio_only).collect()
    } else {
        candidates.iter().collect()
    };

    let cap = policy.max_bitrate_kbps.unwrap_or(u32::MAX);

    let under_cap = pool
        .iter()
        .enumerate()
        .filter(|(_, c)| bitrate(c) <= cap)
        .max_by_key(|(rank, c)| (bitrate(c), std::cmp::Reverse(*rank)))
        .map(|(_, c)| *c);

    let chosen = under_cap
        .or_else(|| pool.iter().min_by_key(|c| bitrate(c)).copied())
        .ok_or_else(|| DhammaError::NotFound("no playable stream".into()))?;

    Ok(StreamDescriptor {
        url: chosen.url.clone(),
        bitrate_kbps: chosen.bitrate_kbps,
        mime_type: chosen.mime_type.clone(),
        expires_at: parse_expiry(&chosen.url),
    })
}

fn bitrate(candidate: &StreamCandidate) -> u32 {
    candidate.bitrate_kbps.unwrap_or(0)
}

/// Expiry encoded in a signed stream URL (`expire=<unix seconds>`)
pub fn parse_expiry(url: &str) -> Option<DateTime<Utc>> {
    let caps = EXPIRE_PARAM.captures(url)?;
    let secs: i64 = caps[1].parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}
