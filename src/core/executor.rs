//! Resolution executor - bounded worker pool with request dedup
//!
//! Requests enter a FIFO admission queue and are picked up by a fixed number
//! of worker tasks. Each worker runs the synchronous provider call on the
//! blocking pool under a deadline. Identical requests (same [`RequestKey`])
//! share one in-flight provider call; every waiter receives a clone of the
//! outcome.

use crate::core::provider::ExtractionProvider;
use crate::core::selection::select_stream;
use crate::error::DhammaError;
use crate::types::{Config, RequestKey, ResolutionKind, ResolutionPayload, ResolutionRequest, ResolutionResult, StreamPolicy};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Executor tuning
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub workers: usize,
    /// Queued (not yet started) requests allowed before eviction
    pub max_queue: usize,
    /// Deadline for a single provider call
    pub timeout: Duration,
    /// Videos per listing or search
    pub video_limit: usize,
    pub stream_policy: StreamPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_queue: 64,
            timeout: Duration::from_secs(15),
            video_limit: 30,
            stream_policy: StreamPolicy::default(),
        }
    }
}

impl From<&Config> for ExecutorSettings {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.workers,
            max_queue: config.max_queue,
            timeout: Duration::from_secs(config.request_timeout_secs),
            video_limit: config.video_limit,
            stream_policy: config.stream.clone(),
        }
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<ResolutionResult>,
}

struct InFlight {
    waiters: Vec<Waiter>,
    started: bool,
    is_play: bool,
    /// Deadline passed while the provider call is still running
    expired: bool,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<RequestKey>,
    in_flight: HashMap<RequestKey, InFlight>,
    next_waiter: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    work: Notify,
    provider: Arc<dyn ExtractionProvider>,
    settings: ExecutorSettings,
}

/// Bounded pool running provider calls off the caller's task
pub struct ResolutionExecutor {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ResolutionExecutor {
    /// Start the worker pool. Must be called within a Tokio runtime.
    pub fn new(provider: Arc<dyn ExtractionProvider>, settings: ExecutorSettings) -> Self {
        let worker_count = settings.workers.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work: Notify::new(),
            provider,
            settings,
        });

        let workers = (0..worker_count)
            .map(|index| tokio::spawn(worker_loop(shared.clone(), index)))
            .collect();

        Self { shared, workers }
    }

    /// Queue a request, or attach to an identical one already queued or running
    pub fn submit(&self, request: ResolutionRequest) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let mut state = self.shared.state.lock();
        let waiter_id = state.next_waiter;
        state.next_waiter += 1;

        let ticket = Ticket {
            key: request.key.clone(),
            seq: request.seq,
            waiter_id,
            rx,
            shared: self.shared.clone(),
            settled: false,
        };

        if state.closed {
            let _ = tx.send(Err(DhammaError::Cancelled));
            return ticket;
        }

        if let Some(entry) = state.in_flight.get_mut(&request.key) {
            entry.waiters.push(Waiter { id: waiter_id, tx });
            entry.is_play |= request.is_play;
            debug!(
                seq = request.seq,
                kind = ?request.key.kind,
                id = %request.key.identifier,
                waiters = entry.waiters.len(),
                after_timeout = entry.expired,
                "attached to in-flight resolution"
            );
            return ticket;
        }

        state.in_flight.insert(
            request.key.clone(),
            InFlight {
                waiters: vec![Waiter { id: waiter_id, tx }],
                started: false,
                is_play: request.is_play,
                expired: false,
            },
        );
        state.queue.push_back(request.key.clone());
        debug!(
            seq = request.seq,
            kind = ?request.key.kind,
            id = %request.key.identifier,
            queued = state.queue.len(),
            "resolution queued"
        );

        if state.queue.len() > self.shared.settings.max_queue {
            evict_oldest_query(&mut state);
        }
        drop(state);

        self.shared.work.notify_one();
        ticket
    }

    /// Requests waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Distinct keys queued or running
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Stop accepting work and fail everything still pending with `Cancelled`
    pub fn shutdown(&self) {
        let pending = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.queue.clear();
            std::mem::take(&mut state.in_flight)
        };
        for (_, entry) in pending {
            for waiter in entry.waiters {
                let _ = waiter.tx.send(Err(DhammaError::Cancelled));
            }
        }
        self.shared.work.notify_waiters();
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl Drop for ResolutionExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Backpressure: drop the oldest queued request that no play request waits on
fn evict_oldest_query(state: &mut QueueState) {
    let position = state
        .queue
        .iter()
        .position(|key| state.in_flight.get(key).is_some_and(|e| !e.is_play));

    let Some(position) = position else {
        return;
    };
    let Some(key) = state.queue.remove(position) else {
        return;
    };
    if let Some(entry) = state.in_flight.remove(&key) {
        warn!(
            kind = ?key.kind,
            id = %key.identifier,
            waiters = entry.waiters.len(),
            "admission queue full, dropping oldest request"
        );
        for waiter in entry.waiters {
            let _ = waiter.tx.send(Err(DhammaError::Cancelled));
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, index: usize) {
    loop {
        // Register before looking at the queue so a submit in between
        // wakes this worker instead of leaving a single stored permit.
        let notified = shared.work.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = {
            let mut state = shared.state.lock();
            if state.closed {
                return;
            }
            next_job(&mut state)
        };

        let Some(key) = next else {
            notified.await;
            continue;
        };

        debug!(worker = index, kind = ?key.kind, id = %key.identifier, "resolving");
        run_with_deadline(&shared, &key, index).await;
    }
}

fn next_job(state: &mut QueueState) -> Option<RequestKey> {
    while let Some(key) = state.queue.pop_front() {
        if let Some(entry) = state.in_flight.get_mut(&key) {
            entry.started = true;
            return Some(key);
        }
    }
    None
}

/// Run one provider call and settle its waiters.
///
/// On deadline the waiters get `Timeout` right away, but the worker stays
/// occupied until the blocking call returns, so the pool never runs more
/// than `workers` provider calls at once and the key stays deduplicated.
async fn run_with_deadline(shared: &Arc<Shared>, key: &RequestKey, index: usize) {
    let provider = shared.provider.clone();
    let settings = shared.settings.clone();
    let job_key = key.clone();
    let mut call = tokio::task::spawn_blocking(move || dispatch(provider.as_ref(), &job_key, &settings));

    let result = match tokio::time::timeout(shared.settings.timeout, &mut call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(DhammaError::Provider(format!("extraction task failed: {}", join_err))),
        Err(_) => {
            warn!(worker = index, kind = ?key.kind, id = %key.identifier, "resolution timed out");
            expire(shared, key);
            let _ = call.await;
            finish_expired(shared, key);
            return;
        }
    };

    if let Err(e) = &result {
        warn!(worker = index, kind = ?key.kind, id = %key.identifier, error = %e, "resolution failed");
    }
    complete(shared, key, result);
}

/// Fail current waiters with `Timeout`; the entry stays in flight
fn expire(shared: &Shared, key: &RequestKey) {
    let waiters = {
        let mut state = shared.state.lock();
        let Some(entry) = state.in_flight.get_mut(key) else {
            return;
        };
        entry.expired = true;
        std::mem::take(&mut entry.waiters)
    };
    for waiter in waiters {
        let _ = waiter.tx.send(Err(DhammaError::Timeout(shared.settings.timeout)));
    }
}

/// The late result is dropped. Waiters that attached after the deadline
/// get a fresh call.
fn finish_expired(shared: &Shared, key: &RequestKey) {
    let mut state = shared.state.lock();
    let Some(entry) = state.in_flight.get_mut(key) else {
        return;
    };
    if entry.waiters.is_empty() {
        state.in_flight.remove(key);
        return;
    }

    entry.started = false;
    entry.expired = false;
    debug!(kind = ?key.kind, id = %key.identifier, waiters = entry.waiters.len(), "re-queueing after timeout");
    state.queue.push_back(key.clone());
    drop(state);
    shared.work.notify_one();
}

fn dispatch(provider: &dyn ExtractionProvider, key: &RequestKey, settings: &ExecutorSettings) -> ResolutionResult {
    let id = key.identifier.as_str();
    match key.kind {
        ResolutionKind::ChannelInfo => provider.resolve_channel_info(id).map(ResolutionPayload::Channel),
        ResolutionKind::ChannelVideos => provider
            .resolve_channel_videos(id, settings.video_limit)
            .map(ResolutionPayload::Videos),
        ResolutionKind::SearchInChannel => provider
            .search(id, key.scope.as_deref(), settings.video_limit)
            .map(ResolutionPayload::Videos),
        ResolutionKind::VideoStream => {
            let candidates = provider.resolve_video_stream(id)?;
            select_stream(&candidates, &settings.stream_policy).map(ResolutionPayload::Stream)
        }
    }
}

fn complete(shared: &Shared, key: &RequestKey, result: ResolutionResult) {
    let entry = shared.state.lock().in_flight.remove(key);
    let Some(entry) = entry else {
        return;
    };
    for waiter in entry.waiters {
        let _ = waiter.tx.send(result.clone());
    }
}

/// Handle to one submitted request
///
/// Dropping an unsettled ticket detaches it: if nobody else waits on the
/// same key and no worker has picked it up, the request leaves the queue;
/// otherwise the shared call runs on and this waiter's copy is discarded.
pub struct Ticket {
    key: RequestKey,
    seq: u64,
    waiter_id: u64,
    rx: oneshot::Receiver<ResolutionResult>,
    shared: Arc<Shared>,
    settled: bool,
}

impl Ticket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Wait for the outcome
    pub async fn wait(mut self) -> ResolutionResult {
        let result = (&mut self.rx).await.unwrap_or(Err(DhammaError::Cancelled));
        self.settled = true;
        result
    }

    /// Give up on this request
    pub fn cancel(self) {
        drop(self);
    }

    fn detach(&mut self) {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.in_flight.get_mut(&self.key) else {
            return;
        };
        entry.waiters.retain(|w| w.id != self.waiter_id);
        if entry.waiters.is_empty() && !entry.started {
            state.in_flight.remove(&self.key);
            state.queue.retain(|k| k != &self.key);
            debug!(seq = self.seq, kind = ?self.key.kind, id = %self.key.identifier, "cancelled before start");
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.settled {
            self.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::types::{ChannelInfo, StreamCandidate, VideoSummary};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that sleeps, counts calls and optionally fails
    #[derive(Default)]
    struct SlowProvider {
        latency: Duration,
        calls: AtomicUsize,
        /// Calls running right now, and the most seen at once
        active: AtomicUsize,
        peak: AtomicUsize,
        fail: bool,
    }

    impl SlowProvider {
        fn new(latency_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                latency: Duration::from_millis(latency_ms),
                ..Self::default()
            })
        }

        fn work(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(self.latency);
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(DhammaError::Provider("upstream 500".into()));
            }
            Ok(())
        }
    }

    impl ExtractionProvider for SlowProvider {
        fn resolve_channel_info(&self, url: &str) -> Result<ChannelInfo> {
            self.work()?;
            Ok(ChannelInfo {
                id: url.into(),
                name: "Channel".into(),
                avatar_url: String::new(),
                subscriber_count: None,
                description: String::new(),
            })
        }

        fn resolve_channel_videos(&self, _url: &str, _limit: usize) -> Result<Vec<VideoSummary>> {
            self.work()?;
            Ok(vec![])
        }

        fn resolve_video_stream(&self, url: &str) -> Result<Vec<StreamCandidate>> {
            self.work()?;
            Ok(vec![StreamCandidate {
                url: format!("{}#stream", url),
                bitrate_kbps: Some(128),
                mime_type: "audio/webm".into(),
                audio_only: true,
            }])
        }

        fn search(&self, _query: &str, _scope: Option<&str>, _limit: usize) -> Result<Vec<VideoSummary>> {
            self.work()?;
            Ok(vec![])
        }
    }

    fn request(kind: ResolutionKind, id: &str, seq: u64, is_play: bool) -> ResolutionRequest {
        ResolutionRequest {
            key: RequestKey::new(kind, id),
            seq,
            is_play,
        }
    }

    fn settings(workers: usize, max_queue: usize) -> ExecutorSettings {
        ExecutorSettings {
            workers,
            max_queue,
            ..ExecutorSettings::default()
        }
    }

    #[tokio::test]
    async fn identical_requests_share_one_call() {
        let provider = SlowProvider::new(30);
        let executor = ResolutionExecutor::new(provider.clone(), settings(4, 8));

        let a = executor.submit(request(ResolutionKind::ChannelInfo, "@c", 1, false));
        let b = executor.submit(request(ResolutionKind::ChannelInfo, "@c", 2, false));
        let (a, b) = tokio::join!(a.wait(), b.wait());

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_kinds_are_not_deduplicated() {
        let provider = SlowProvider::new(5);
        let executor = ResolutionExecutor::new(provider.clone(), settings(4, 8));

        let a = executor.submit(request(ResolutionKind::ChannelInfo, "@c", 1, false));
        let b = executor.submit(request(ResolutionKind::ChannelVideos, "@c", 2, false));
        let _ = tokio::join!(a.wait(), b.wait());

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_reach_every_waiter() {
        let provider = Arc::new(SlowProvider {
            latency: Duration::from_millis(20),
            fail: true,
            ..SlowProvider::default()
        });
        let executor = ResolutionExecutor::new(provider.clone(), settings(2, 8));

        let a = executor.submit(request(ResolutionKind::ChannelInfo, "@c", 1, false));
        let b = executor.submit(request(ResolutionKind::ChannelInfo, "@c", 2, false));
        let (a, b) = tokio::join!(a.wait(), b.wait());

        assert_eq!(a, Err(DhammaError::Provider("upstream 500".into())));
        assert_eq!(b, a);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let provider = SlowProvider::new(300);
        let executor = ResolutionExecutor::new(
            provider,
            ExecutorSettings {
                timeout: Duration::from_millis(30),
                ..settings(1, 8)
            },
        );

        let result = executor
            .submit(request(ResolutionKind::VideoStream, "v1", 1, true))
            .wait()
            .await;
        assert_eq!(result, Err(DhammaError::Timeout(Duration::from_millis(30))));
    }

    #[tokio::test]
    async fn timed_out_calls_keep_their_worker() {
        let provider = SlowProvider::new(150);
        let executor = ResolutionExecutor::new(
            provider.clone(),
            ExecutorSettings {
                timeout: Duration::from_millis(50),
                ..settings(1, 8)
            },
        );

        let tickets: Vec<_> = ["@a", "@b", "@c", "@d"]
            .iter()
            .enumerate()
            .map(|(i, id)| executor.submit(request(ResolutionKind::ChannelInfo, id, i as u64 + 1, false)))
            .collect();
        let mut tickets = tickets.into_iter();

        let first = tickets.next().unwrap().wait().await;
        assert_eq!(first, Err(DhammaError::Timeout(Duration::from_millis(50))));

        // "@a" is still running upstream; the retry attaches instead of calling again
        let retry = executor.submit(request(ResolutionKind::ChannelInfo, "@a", 5, false));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        for ticket in tickets {
            assert!(matches!(ticket.wait().await, Err(DhammaError::Timeout(_))));
        }
        assert!(matches!(retry.wait().await, Err(DhammaError::Timeout(_))));

        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn late_result_after_timeout_is_dropped() {
        let provider = SlowProvider::new(100);
        let executor = ResolutionExecutor::new(
            provider.clone(),
            ExecutorSettings {
                timeout: Duration::from_millis(30),
                ..settings(1, 8)
            },
        );

        let ticket = executor.submit(request(ResolutionKind::ChannelInfo, "@a", 1, false));
        assert!(matches!(ticket.wait().await, Err(DhammaError::Timeout(_))));
        assert_eq!(executor.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(executor.in_flight(), 0);
        assert_eq!(executor.queued(), 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_workers_all_wake_for_a_burst() {
        let provider = SlowProvider::new(150);
        let executor = ResolutionExecutor::new(provider.clone(), settings(3, 8));
        // Let every worker park
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        let tickets: Vec<_> = ["@a", "@b", "@c"]
            .iter()
            .enumerate()
            .map(|(i, id)| executor.submit(request(ResolutionKind::ChannelInfo, id, i as u64 + 1, false)))
            .collect();
        for ticket in tickets {
            ticket.wait().await.unwrap();
        }

        assert_eq!(provider.peak.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_query_not_play() {
        let provider = SlowProvider::new(60);
        let executor = ResolutionExecutor::new(provider.clone(), settings(1, 2));

        // Occupies the only worker.
        let busy = executor.submit(request(ResolutionKind::ChannelInfo, "@busy", 1, false));
        tokio::time::sleep(Duration::from_millis(15)).await;

        let play = executor.submit(request(ResolutionKind::VideoStream, "v1", 2, true));
        let oldest_query = executor.submit(request(ResolutionKind::ChannelInfo, "@old", 3, false));
        let newest_query = executor.submit(request(ResolutionKind::ChannelInfo, "@new", 4, false));

        assert_eq!(oldest_query.wait().await, Err(DhammaError::Cancelled));
        assert!(play.wait().await.is_ok());
        assert!(newest_query.wait().await.is_ok());
        assert!(busy.wait().await.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancel_before_start_skips_the_call() {
        let provider = SlowProvider::new(50);
        let executor = ResolutionExecutor::new(provider.clone(), settings(1, 8));

        let busy = executor.submit(request(ResolutionKind::ChannelInfo, "@busy", 1, false));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let queued = executor.submit(request(ResolutionKind::ChannelVideos, "@c", 2, false));
        assert_eq!(executor.queued(), 1);

        queued.cancel();
        assert_eq!(executor.queued(), 0);

        busy.wait().await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelling_one_shared_waiter_keeps_the_other() {
        let provider = SlowProvider::new(40);
        let executor = ResolutionExecutor::new(provider.clone(), settings(1, 8));

        let a = executor.submit(request(ResolutionKind::ChannelInfo, "@c", 1, false));
        let b = executor.submit(request(ResolutionKind::ChannelInfo, "@c", 2, false));
        a.cancel();

        assert!(b.wait().await.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_requests_apply_selection() {
        let provider = SlowProvider::new(1);
        let executor = ResolutionExecutor::new(provider, settings(1, 8));

        let result = executor
            .submit(request(ResolutionKind::VideoStream, "https://v", 1, true))
            .wait()
            .await
            .unwrap();
        let ResolutionPayload::Stream(stream) = result else {
            panic!("expected a stream payload");
        };
        assert_eq!(stream.url, "https://v#stream");
    }

    #[tokio::test]
    async fn shutdown_cancels_pending() {
        let provider = SlowProvider::new(50);
        let executor = ResolutionExecutor::new(provider, settings(1, 8));

        let _busy = executor.submit(request(ResolutionKind::ChannelInfo, "@busy", 1, false));
        let queued = executor.submit(request(ResolutionKind::ChannelInfo, "@q", 2, false));
        executor.shutdown();

        assert_eq!(queued.wait().await, Err(DhammaError::Cancelled));
    }
}
