//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use dhamma_stream::core::engine::MediaEngine;
use dhamma_stream::core::provider::ExtractionProvider;
use dhamma_stream::types::{
    ChannelInfo, Config, EngineEvent, EngineEventKind, StreamCandidate, VideoSummary,
};
use dhamma_stream::{Coordinator, DhammaError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// Provider with per-identifier latency, call counting and a failure switch
#[derive(Default)]
pub struct ScriptedProvider {
    latency: Mutex<HashMap<String, Duration>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay calls whose identifier contains `fragment`
    pub fn delay(&self, fragment: &str, by: Duration) {
        self.latency.lock().insert(fragment.to_string(), by);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls_for(&self, fragment: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(id, _)| id.contains(fragment))
            .map(|(_, n)| n)
            .sum()
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn enter(&self, id: &str) -> Result<()> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().entry(id.to_string()).or_default() += 1;

        let delay = self
            .latency
            .lock()
            .iter()
            .find(|(fragment, _)| id.contains(fragment.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(DhammaError::Provider(format!("upstream refused {}", id)));
        }
        Ok(())
    }
}

impl ExtractionProvider for ScriptedProvider {
    fn resolve_channel_info(&self, channel_url: &str) -> Result<ChannelInfo> {
        self.enter(channel_url)?;
        Ok(ChannelInfo {
            id: "UCdhamma".into(),
            name: "Dhamma Talks".into(),
            avatar_url: String::new(),
            subscriber_count: Some(1000),
            description: String::new(),
        })
    }

    fn resolve_channel_videos(&self, channel_url: &str, limit: usize) -> Result<Vec<VideoSummary>> {
        self.enter(channel_url)?;
        Ok((0..limit.min(3))
            .map(|i| VideoSummary {
                id: format!("video{:06}", i),
                title: format!("Talk {}", i),
                channel_id: "UCdhamma".into(),
                channel_name: "Dhamma Talks".into(),
                duration: Some(1800),
                thumbnail_url: String::new(),
                view_count: None,
            })
            .collect())
    }

    fn resolve_video_stream(&self, video_url: &str) -> Result<Vec<StreamCandidate>> {
        self.enter(video_url)?;
        Ok(vec![StreamCandidate {
            url: format!("{}&stream=audio", video_url),
            bitrate_kbps: Some(128),
            mime_type: "audio/webm".into(),
            audio_only: true,
        }])
    }

    fn search(&self, query: &str, _scope: Option<&str>, _limit: usize) -> Result<Vec<VideoSummary>> {
        self.enter(query)?;
        Ok(Vec::new())
    }
}

/// Engine that records every call and lets tests emit events
pub struct RecordingEngine {
    calls: Mutex<Vec<String>>,
    events: broadcast::Sender<EngineEvent>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with("load")).collect()
    }

    pub fn emit(&self, seq: u64, kind: EngineEventKind) {
        let _ = self.events.send(EngineEvent { seq, kind });
    }
}

impl MediaEngine for RecordingEngine {
    fn load(&self, seq: u64, url: &str) -> Result<()> {
        self.calls.lock().push(format!("load {} {}", seq, url));
        Ok(())
    }

    fn play(&self) -> Result<()> {
        self.calls.lock().push("play".into());
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.calls.lock().push("pause".into());
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.calls.lock().push("stop".into());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

pub fn test_config() -> Config {
    Config {
        workers: 4,
        request_timeout_secs: 2,
        sweep_interval_secs: 0,
        ..Config::default()
    }
}

pub fn coordinator(provider: &Arc<ScriptedProvider>, engine: &Arc<RecordingEngine>) -> Coordinator {
    Coordinator::new(test_config(), provider.clone(), engine.clone()).expect("valid config")
}

/// Watch URL for an 11 character test id
pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}
