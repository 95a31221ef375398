//! Playback session state machine
//!
//! Owns what is loaded in the media engine. Every resolution and engine
//! event is checked against the current target's sequence number before it
//! is applied, so a superseded request can never load or fail the session.

use crate::core::engine::MediaEngine;
use crate::error::{DhammaError, Result};
use crate::types::{
    Delivery, EngineEvent, EngineEventKind, PlaybackSnapshot, PlaybackState, PlaybackTarget,
    ResolutionPayload, ResolutionResult, StreamDescriptor,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// System playback controls (lock screen, notification)
pub trait NotificationSurface: Send + Sync {
    /// Called on every transition into `Playing`, `Paused` or `Ended`
    fn update(&self, snapshot: &PlaybackSnapshot);
}

pub struct PlaybackSession {
    engine: Arc<dyn MediaEngine>,
    state: PlaybackState,
    target: Option<PlaybackTarget>,
    stream: Option<StreamDescriptor>,
    error: Option<DhammaError>,
    /// Highest target sequence ever issued
    highest_seq: u64,
    feed: watch::Sender<PlaybackSnapshot>,
    notifier: Option<Arc<dyn NotificationSurface>>,
}

impl PlaybackSession {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        let (feed, _) = watch::channel(PlaybackSnapshot::default());
        Self {
            engine,
            state: PlaybackState::Idle,
            target: None,
            stream: None,
            error: None,
            highest_seq: 0,
            feed,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSurface>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn target(&self) -> Option<&PlaybackTarget> {
        self.target.as_ref()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state,
            target: self.target.clone(),
            stream: self.stream.clone(),
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.feed.subscribe()
    }

    /// A new play request takes over, from any state
    pub fn play_requested(&mut self, video_id: String, seq: u64) {
        if seq <= self.highest_seq {
            warn!(seq, highest = self.highest_seq, "ignoring out-of-order play request");
            return;
        }
        self.highest_seq = seq;

        if self.state.is_loaded() {
            if let Err(e) = self.engine.stop() {
                warn!(error = %e, "engine failed to stop previous stream");
            }
        }

        self.target = Some(PlaybackTarget { video_id, seq });
        self.stream = None;
        self.error = None;
        self.transition(PlaybackState::Resolving);
    }

    /// Apply a finished resolution if it still belongs to the current target
    pub fn resolution_arrived(&mut self, seq: u64, result: ResolutionResult) -> Delivery {
        let current = self.target.as_ref().map(|t| t.seq);
        if self.state != PlaybackState::Resolving || current != Some(seq) {
            debug!(seq, current = ?current, state = ?self.state, ok = result.is_ok(), "discarding stale resolution");
            return Delivery::Stale;
        }

        let stream = match result {
            Ok(ResolutionPayload::Stream(stream)) => stream,
            Ok(other) => {
                self.fail(DhammaError::Provider(format!("expected a stream, got {:?}", other)));
                return Delivery::Applied;
            }
            Err(e) => {
                self.fail(e);
                return Delivery::Applied;
            }
        };

        let url = stream.url.clone();
        self.stream = Some(stream);
        self.transition(PlaybackState::Ready);

        match self.engine.load(seq, &url).and_then(|_| self.engine.play()) {
            Ok(()) => self.transition(PlaybackState::Playing),
            Err(e) => self.fail(engine_error(e)),
        }
        Delivery::Applied
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Ready | PlaybackState::Playing => {
                self.engine.pause().map_err(engine_error)?;
                self.transition(PlaybackState::Paused);
                Ok(())
            }
            PlaybackState::Paused => Ok(()),
            _ => Err(DhammaError::NotLoaded),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Ready | PlaybackState::Paused => {
                self.engine.play().map_err(engine_error)?;
                self.transition(PlaybackState::Playing);
                Ok(())
            }
            PlaybackState::Playing => Ok(()),
            _ => Err(DhammaError::NotLoaded),
        }
    }

    /// Unload and go back to `Idle`. Also abandons a resolution in progress.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            state if state.is_loaded() => {
                self.engine.stop().map_err(engine_error)?;
            }
            PlaybackState::Resolving => {}
            _ => return Err(DhammaError::NotLoaded),
        }
        self.target = None;
        self.stream = None;
        self.error = None;
        self.transition(PlaybackState::Idle);
        Ok(())
    }

    /// Engine callbacks; events from an earlier load are ignored
    pub fn engine_event(&mut self, event: EngineEvent) {
        if self.target.as_ref().map(|t| t.seq) != Some(event.seq) {
            debug!(seq = event.seq, kind = ?event.kind, "ignoring engine event for old load");
            return;
        }

        match event.kind {
            EngineEventKind::Started if self.state == PlaybackState::Ready => {
                self.transition(PlaybackState::Playing);
            }
            EngineEventKind::Ended if matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) => {
                self.transition(PlaybackState::Ended);
            }
            EngineEventKind::Error(message) if self.state.is_loaded() => {
                self.fail(DhammaError::Engine(message));
            }
            _ => {}
        }
    }

    fn fail(&mut self, error: DhammaError) {
        warn!(target_seq = ?self.target.as_ref().map(|t| t.seq), error = %error, "playback failed");
        self.error = Some(error);
        self.transition(PlaybackState::Failed);
    }

    fn transition(&mut self, to: PlaybackState) {
        let from = self.state;
        self.state = to;
        info!(
            from = ?from,
            to = ?to,
            video = self.target.as_ref().map(|t| t.video_id.as_str()).unwrap_or("-"),
            "playback transition"
        );

        let snapshot = self.snapshot();
        if let Some(notifier) = &self.notifier {
            if matches!(to, PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Ended) {
                notifier.update(&snapshot);
            }
        }
        self.feed.send_replace(snapshot);
    }
}

fn engine_error(err: DhammaError) -> DhammaError {
    match err {
        DhammaError::Engine(_) | DhammaError::NotLoaded => err,
        other => DhammaError::Engine(other.to_string()),
    }
}
