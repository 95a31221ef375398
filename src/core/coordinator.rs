//! Coordinator - the façade over cache, executor and playback session
//!
//! Queries check the cache, fall through to the executor and store
//! successful results. Play requests are numbered under the session lock
//! and their results are always routed back through
//! [`PlaybackSession::resolution_arrived`], so the newest request wins no
//! matter which provider call finishes first.

use crate::core::engine::MediaEngine;
use crate::core::executor::{ExecutorSettings, ResolutionExecutor};
use crate::core::provider::ExtractionProvider;
use crate::core::session::{NotificationSurface, PlaybackSession};
use crate::error::{DhammaError, Result};
use crate::storage::cache::{Clock, ResolutionCache, SystemClock};
use crate::types::{
    ChannelInfo, Config, Delivery, EngineEvent, PlaybackSnapshot, RequestKey, ResolutionKind,
    ResolutionPayload, ResolutionRequest, ResolutionResult, VideoSummary,
};
use crate::utils::ids;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builds a [`Coordinator`] with optional collaborators
pub struct CoordinatorBuilder {
    config: Config,
    provider: Arc<dyn ExtractionProvider>,
    engine: Arc<dyn MediaEngine>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn NotificationSurface>>,
}

impl CoordinatorBuilder {
    /// Clock used for cache TTLs
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSurface>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Start workers and background tasks. Must be called within a Tokio runtime.
    pub fn build(self) -> Result<Coordinator> {
        crate::storage::config::validate(&self.config)?;

        let engine_events = self.engine.subscribe();
        let mut session = PlaybackSession::new(self.engine);
        if let Some(notifier) = self.notifier {
            session = session.with_notifier(notifier);
        }

        let inner = Arc::new(Inner {
            cache: Arc::new(ResolutionCache::with_clock(self.config.cache_capacity, self.clock)),
            executor: ResolutionExecutor::new(self.provider, ExecutorSettings::from(&self.config)),
            session: Mutex::new(session),
            next_seq: AtomicU64::new(0),
            background: Mutex::new(Vec::new()),
            config: self.config,
        });

        let mut background = vec![tokio::spawn(pump_engine_events(Arc::downgrade(&inner), engine_events))];
        if inner.config.sweep_interval_secs > 0 {
            background.push(
                inner
                    .cache
                    .spawn_sweeper(Duration::from_secs(inner.config.sweep_interval_secs)),
            );
        }
        *inner.background.lock() = background;

        info!(
            workers = inner.config.workers,
            max_queue = inner.config.max_queue,
            timeout_secs = inner.config.request_timeout_secs,
            "coordinator started"
        );
        Ok(Coordinator { inner })
    }
}

struct Inner {
    config: Config,
    cache: Arc<ResolutionCache>,
    executor: ResolutionExecutor,
    /// The single logical lock for playback state
    session: Mutex<PlaybackSession>,
    next_seq: AtomicU64,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn store(&self, key: &RequestKey, payload: &ResolutionPayload) {
        let ttl = self.ttl_for(key.kind, payload);
        if ttl.is_zero() {
            debug!(kind = ?key.kind, id = %key.identifier, "stream already expired, not caching");
            return;
        }
        self.cache.put(key.clone(), payload.clone(), ttl);
    }

    /// Stream entries never outlive the signed URL they hold
    fn ttl_for(&self, kind: ResolutionKind, payload: &ResolutionPayload) -> Duration {
        if !kind.is_stream() {
            return Duration::from_secs(self.config.metadata_ttl_secs);
        }
        let ttl = Duration::from_secs(self.config.stream_ttl_secs);
        match payload {
            ResolutionPayload::Stream(stream) => match stream.expires_at {
                Some(expires_at) => {
                    let left = expires_at
                        .signed_duration_since(self.cache.now())
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    ttl.min(left)
                }
                None => ttl,
            },
            _ => ttl,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.background.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn pump_engine_events(inner: Weak<Inner>, mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.session.lock().engine_event(event);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "engine events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Pending play request
pub struct PlayTicket {
    seq: u64,
    pending: Option<JoinHandle<Delivery>>,
    settled: Delivery,
}

impl PlayTicket {
    /// Sequence number assigned to this request
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Wait until the resolution has been handed to the session
    pub async fn delivered(self) -> Delivery {
        match self.pending {
            Some(handle) => handle.await.unwrap_or(Delivery::Stale),
            None => self.settled,
        }
    }
}

/// Entry point for resolution queries and playback control
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn builder(
        config: Config,
        provider: Arc<dyn ExtractionProvider>,
        engine: Arc<dyn MediaEngine>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            provider,
            engine,
            clock: Arc::new(SystemClock),
            notifier: None,
        }
    }

    pub fn new(
        config: Config,
        provider: Arc<dyn ExtractionProvider>,
        engine: Arc<dyn MediaEngine>,
    ) -> Result<Self> {
        Self::builder(config, provider, engine).build()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // ============================================
    // Queries
    // ============================================

    pub async fn get_channel_info(&self, channel: &str) -> Result<ChannelInfo> {
        let key = RequestKey::new(ResolutionKind::ChannelInfo, ids::normalize_channel(channel));
        match self.resolve(key).await? {
            ResolutionPayload::Channel(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_channel_videos(&self, channel: &str) -> Result<Vec<VideoSummary>> {
        let key = RequestKey::new(ResolutionKind::ChannelVideos, ids::normalize_channel(channel));
        expect_videos(self.resolve(key).await?)
    }

    pub async fn search_in_channel(&self, channel: &str, query: &str) -> Result<Vec<VideoSummary>> {
        let key = RequestKey::search(query.trim(), Some(ids::normalize_channel(channel)));
        expect_videos(self.resolve(key).await?)
    }

    /// Search the whole platform
    pub async fn search(&self, query: &str) -> Result<Vec<VideoSummary>> {
        let key = RequestKey::search(query.trim(), None);
        expect_videos(self.resolve(key).await?)
    }

    /// Cache first, then the executor. Dropping the returned future cancels
    /// this caller's interest in the request.
    pub async fn resolve(&self, key: RequestKey) -> ResolutionResult {
        if let Some(hit) = self.inner.cache.get(&key) {
            debug!(kind = ?key.kind, id = %key.identifier, "cache hit");
            return Ok(hit);
        }
        debug!(kind = ?key.kind, id = %key.identifier, "cache miss");

        let request = ResolutionRequest {
            key: key.clone(),
            seq: self.inner.next_seq(),
            is_play: false,
        };
        let result = self.inner.executor.submit(request).wait().await;
        if let Ok(payload) = &result {
            self.inner.store(&key, payload);
        }
        result
    }

    /// Drop a cached entry so the next lookup goes upstream
    pub fn invalidate(&self, key: &RequestKey) -> bool {
        self.inner.cache.invalidate(key)
    }

    /// Re-resolve a query, ignoring any cached value
    pub async fn refresh(&self, key: RequestKey) -> ResolutionResult {
        self.inner.cache.invalidate(&key);
        self.resolve(key).await
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.inner.cache
    }

    // ============================================
    // Playback
    // ============================================

    /// Make `video` the playback target and start resolving its stream.
    ///
    /// Returns immediately; the stream is loaded once resolved unless a newer
    /// play request has taken over by then.
    pub fn play_video(&self, video: &str) -> PlayTicket {
        let url = ids::normalize_video(video);
        let video_id = ids::video_id(video).unwrap_or_else(|| url.clone());
        let key = RequestKey::new(ResolutionKind::VideoStream, url);

        let mut session = self.inner.session.lock();
        let seq = self.inner.next_seq();
        session.play_requested(video_id, seq);

        if let Some(hit) = self.inner.cache.get(&key) {
            debug!(seq, id = %key.identifier, "stream cache hit");
            let settled = session.resolution_arrived(seq, Ok(hit));
            return PlayTicket {
                seq,
                pending: None,
                settled,
            };
        }
        drop(session);

        let ticket = self.inner.executor.submit(ResolutionRequest {
            key: key.clone(),
            seq,
            is_play: true,
        });

        let inner = self.inner.clone();
        let pending = tokio::spawn(async move {
            let result = ticket.wait().await;
            if let Ok(payload) = &result {
                inner.store(&key, payload);
            }
            inner.session.lock().resolution_arrived(seq, result)
        });

        PlayTicket {
            seq,
            pending: Some(pending),
            settled: Delivery::Stale,
        }
    }

    pub fn pause(&self) -> Result<()> {
        self.inner.session.lock().pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.inner.session.lock().resume()
    }

    pub fn stop(&self) -> Result<()> {
        self.inner.session.lock().stop()
    }

    /// Feed an engine callback to the session directly
    pub fn handle_engine_event(&self, event: EngineEvent) {
        self.inner.session.lock().engine_event(event);
    }

    pub fn playback_state(&self) -> PlaybackSnapshot {
        self.inner.session.lock().snapshot()
    }

    /// Playback feed for the UI; always holds the latest snapshot
    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.inner.session.lock().subscribe()
    }

    /// Stop workers and fail pending resolutions with `Cancelled`
    pub fn shutdown(&self) {
        self.inner.executor.shutdown();
        for task in self.inner.background.lock().drain(..) {
            task.abort();
        }
    }
}

fn expect_videos(payload: ResolutionPayload) -> Result<Vec<VideoSummary>> {
    match payload {
        ResolutionPayload::Videos(videos) => Ok(videos),
        other => Err(unexpected(other)),
    }
}

fn unexpected(payload: ResolutionPayload) -> DhammaError {
    DhammaError::Provider(format!("unexpected payload: {:?}", payload))
}
