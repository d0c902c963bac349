//! Event pipeline: stream -> matcher -> sink.
//!
//! Events are sharded onto a fixed set of workers by a hash of their channel id.
//! Each worker drains its own bounded queue in order, which keeps inserts for
//! one channel in receive order while unrelated channels proceed in parallel.
//! The reader never waits on a single full queue: overflow is parked in a
//! per-shard backlog and handed over as the worker frees space. Reading from
//! the stream pauses only once the combined backlog reaches its limit.
//!
//! Lifecycle is `Idle -> Running -> Stopped`. The pipeline stops when the stream
//! ends, when the stream reports a disconnect, or when the shutdown token fires;
//! in every case queued events are drained before the sink is shut down.

use std::{
    collections::{hash_map::DefaultHasher, HashSet, VecDeque},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Notify,
    },
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    domain::InboundMessageEvent,
    errors::Error,
    matcher::LinkMatcher,
    ports::{EventStream, LinkSink},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopped,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    StreamEnded,
    Disconnected(String),
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineReport {
    pub events: u64,
    pub skipped: u64,
    pub links_stored: u64,
    pub insert_failures: u64,
    pub stop: StopReason,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Total tries per link, including the first.
    pub insert_attempts: u32,
    pub insert_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            insert_attempts: 2,
            insert_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            workers: cfg.workers.max(1),
            queue_capacity: cfg.queue_capacity.max(1),
            insert_attempts: cfg.insert_attempts.max(1),
            insert_backoff: cfg.insert_backoff,
        }
    }
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    skipped: AtomicU64,
    stored: AtomicU64,
    failures: AtomicU64,
}

struct Worker {
    matcher: LinkMatcher,
    space: Arc<Notify>,
    sink: Arc<dyn LinkSink>,
    attempts: u32,
    backoff: Duration,
    counters: Arc<Counters>,
}

pub struct EventPipeline {
    matcher: LinkMatcher,
    sink: Arc<dyn LinkSink>,
    cfg: PipelineConfig,
    allowlist: Option<HashSet<String>>,
    state: AtomicU8,
    counters: Arc<Counters>,
}

impl EventPipeline {
    pub fn new(sink: Arc<dyn LinkSink>, cfg: PipelineConfig) -> Self {
        Self {
            matcher: LinkMatcher::new(),
            sink,
            cfg,
            allowlist: None,
            state: AtomicU8::new(PipelineState::Idle as u8),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Only process events whose channel id is in `channel_ids`.
    pub fn with_allowlist(mut self, channel_ids: impl IntoIterator<Item = String>) -> Self {
        self.allowlist = Some(channel_ids.into_iter().collect());
        self
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Consume `stream` until it ends, disconnects, or `shutdown` fires.
    ///
    /// Can be called once; later calls fail with `Error::Pipeline`.
    pub async fn run<S>(&self, stream: &mut S, shutdown: CancellationToken) -> Result<PipelineReport>
    where
        S: EventStream + ?Sized,
    {
        self.state
            .compare_exchange(
                PipelineState::Idle as u8,
                PipelineState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|s| {
                Error::Pipeline(format!(
                    "cannot start pipeline in state {:?}",
                    PipelineState::from_u8(s)
                ))
            })?;

        let workers = self.cfg.workers.max(1);
        info!(workers, queue_capacity = self.cfg.queue_capacity, "pipeline running");

        let space = Arc::new(Notify::new());
        let (senders, handles) = self.spawn_workers(workers, &space);
        let mut shards = Shards::new(senders, self.cfg.queue_capacity.max(1) * workers);
        let stop = self.pump(stream, &mut shards, &space, &shutdown).await;

        // Hand over what is parked, then close the queues so each worker
        // finishes what it already has.
        shards.drain(&self.counters).await;
        drop(shards);
        for (idx, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker = idx, error = %e, "pipeline worker crashed");
            }
        }

        if let Err(e) = self.sink.shutdown().await {
            warn!(error = %e, "link sink shutdown failed");
        }

        self.state
            .store(PipelineState::Stopped as u8, Ordering::SeqCst);

        let report = PipelineReport {
            events: self.counters.events.load(Ordering::SeqCst),
            skipped: self.counters.skipped.load(Ordering::SeqCst),
            links_stored: self.counters.stored.load(Ordering::SeqCst),
            insert_failures: self.counters.failures.load(Ordering::SeqCst),
            stop,
        };
        info!(
            events = report.events,
            skipped = report.skipped,
            links_stored = report.links_stored,
            insert_failures = report.insert_failures,
            stop = ?report.stop,
            "pipeline stopped"
        );
        Ok(report)
    }

    fn spawn_workers(
        &self,
        workers: usize,
        space: &Arc<Notify>,
    ) -> (Vec<mpsc::Sender<InboundMessageEvent>>, Vec<JoinHandle<()>>) {
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let (tx, rx) = mpsc::channel(self.cfg.queue_capacity.max(1));
            let worker = Worker {
                matcher: self.matcher.clone(),
                space: space.clone(),
                sink: self.sink.clone(),
                attempts: self.cfg.insert_attempts.max(1),
                backoff: self.cfg.insert_backoff,
                counters: self.counters.clone(),
            };
            senders.push(tx);
            handles.push(tokio::spawn(worker.run(idx, rx)));
        }
        (senders, handles)
    }

    async fn pump<S>(
        &self,
        stream: &mut S,
        shards: &mut Shards,
        space: &Notify,
        shutdown: &CancellationToken,
    ) -> StopReason
    where
        S: EventStream + ?Sized,
    {
        loop {
            shards.flush(&self.counters);
            let parked = shards.parked > 0;
            let saturated = shards.parked >= shards.backlog_limit;

            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return StopReason::Shutdown,
                next = stream.next_event(), if !saturated => next,
                _ = space.notified(), if parked => continue,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => return StopReason::StreamEnded,
                Err(e) => {
                    error!(error = %e, "event stream disconnected");
                    return StopReason::Disconnected(e.to_string());
                }
            };

            self.counters.events.fetch_add(1, Ordering::Relaxed);
            if !self.is_monitored(&event.channel_id) {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(channel_id = %event.channel_id, "event from unmonitored channel");
                continue;
            }

            shards.dispatch(event, &self.counters);
        }
    }

    fn is_monitored(&self, channel_id: &str) -> bool {
        self.allowlist
            .as_ref()
            .map_or(true, |ids| ids.contains(channel_id))
    }
}

impl Worker {
    async fn run(self, idx: usize, mut rx: mpsc::Receiver<InboundMessageEvent>) {
        while let Some(event) = rx.recv().await {
            self.space.notify_one();
            self.process(&event).await;
        }
        debug!(worker = idx, "pipeline worker drained");
    }

    async fn process(&self, event: &InboundMessageEvent) {
        let mut links = self.matcher.extract_from_text(&event.text);
        links.extend(
            event
                .button_urls()
                .filter_map(|url| self.matcher.extract_from_button_url(url)),
        );

        for link in links {
            info!(
                channel_id = %event.channel_id,
                message_id = event.message_id,
                %link,
                "link found"
            );
            match self.append(event, &link).await {
                Ok(_) => {
                    self.counters.stored.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        channel_id = %event.channel_id,
                        message_id = event.message_id,
                        %link,
                        error = %e,
                        "failed to store link"
                    );
                }
            }
        }
    }

    async fn append(&self, event: &InboundMessageEvent, link: &str) -> Result<i64> {
        let mut attempt = 1u32;
        loop {
            match self
                .sink
                .append(&event.channel_id, event.message_id, link)
                .await
            {
                Ok(id) => return Ok(id),
                Err(Error::Closed) => return Err(Error::Closed),
                Err(e) if attempt < self.attempts => {
                    warn!(attempt, error = %e, "insert failed, retrying");
                    sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Worker queues plus the per-shard overflow waiting for queue space.
struct Shards {
    senders: Vec<mpsc::Sender<InboundMessageEvent>>,
    backlog: Vec<VecDeque<InboundMessageEvent>>,
    parked: usize,
    backlog_limit: usize,
}

impl Shards {
    fn new(senders: Vec<mpsc::Sender<InboundMessageEvent>>, backlog_limit: usize) -> Self {
        let backlog = senders.iter().map(|_| VecDeque::new()).collect();
        Self {
            senders,
            backlog,
            parked: 0,
            backlog_limit: backlog_limit.max(1),
        }
    }

    fn dispatch(&mut self, event: InboundMessageEvent, counters: &Counters) {
        let shard = shard_for(&event.channel_id, self.senders.len());
        // Anything already parked for this shard must go first.
        if !self.backlog[shard].is_empty() {
            self.park(shard, event);
            return;
        }
        match self.senders[shard].try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => self.park(shard, event),
            Err(TrySendError::Closed(event)) => worker_gone(shard, &event, counters),
        }
    }

    fn park(&mut self, shard: usize, event: InboundMessageEvent) {
        debug!(worker = shard, channel_id = %event.channel_id, "worker queue full, parking event");
        self.backlog[shard].push_back(event);
        self.parked += 1;
    }

    /// Move parked events into worker queues that have room.
    fn flush(&mut self, counters: &Counters) {
        if self.parked == 0 {
            return;
        }
        for (shard, queue) in self.backlog.iter_mut().enumerate() {
            while let Some(event) = queue.pop_front() {
                match self.senders[shard].try_send(event) {
                    Ok(()) => self.parked -= 1,
                    Err(TrySendError::Full(event)) => {
                        queue.push_front(event);
                        break;
                    }
                    Err(TrySendError::Closed(event)) => {
                        self.parked -= 1;
                        worker_gone(shard, &event, counters);
                    }
                }
            }
        }
    }

    async fn drain(&mut self, counters: &Counters) {
        for (shard, queue) in self.backlog.iter_mut().enumerate() {
            while let Some(event) = queue.pop_front() {
                self.parked -= 1;
                if let Err(mpsc::error::SendError(event)) = self.senders[shard].send(event).await {
                    worker_gone(shard, &event, counters);
                }
            }
        }
    }
}

fn worker_gone(shard: usize, event: &InboundMessageEvent, counters: &Counters) {
    counters.failures.fetch_add(1, Ordering::Relaxed);
    error!(
        worker = shard,
        channel_id = %event.channel_id,
        message_id = event.message_id,
        "worker gone, event dropped"
    );
}

fn shard_for(channel_id: &str, shards: usize) -> usize {
    let mut h = DefaultHasher::new();
    channel_id.hash(&mut h);
    (h.finish() % shards.max(1) as u64) as usize
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::{domain::Button, matcher::LINK_PREFIX, store::LinkStore};

    #[derive(Default)]
    struct RecordingSink {
        rows: Mutex<Vec<(String, i64, String)>>,
        fail_links: Vec<String>,
        calls: AtomicU64,
        shutdowns: AtomicU64,
    }

    impl RecordingSink {
        fn failing_on(link: &str) -> Self {
            Self {
                fail_links: vec![link.to_string()],
                ..Default::default()
            }
        }

        fn rows(&self) -> Vec<(String, i64, String)> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LinkSink for RecordingSink {
        async fn append(&self, channel_id: &str, message_id: i64, link: &str) -> Result<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_links.iter().any(|l| l == link) {
                return Err(Error::Insert("disk full".to_string()));
            }
            // Uneven latency so that cross-channel work interleaves.
            if message_id % 3 == 0 {
                sleep(Duration::from_millis(2)).await;
            } else {
                tokio::task::yield_now().await;
            }
            let mut rows = self.rows.lock().unwrap();
            rows.push((channel_id.to_string(), message_id, link.to_string()));
            Ok(rows.len() as i64)
        }

        async fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Yields the queued events, then a disconnect error.
    struct FlakyStream {
        events: Vec<InboundMessageEvent>,
    }

    #[async_trait]
    impl EventStream for FlakyStream {
        async fn next_event(&mut self) -> Result<Option<InboundMessageEvent>> {
            if self.events.is_empty() {
                return Err(Error::External("connection reset by peer".to_string()));
            }
            Ok(Some(self.events.remove(0)))
        }
    }

    fn fast_cfg() -> PipelineConfig {
        PipelineConfig {
            workers: 4,
            queue_capacity: 8,
            insert_attempts: 2,
            insert_backoff: Duration::from_millis(1),
        }
    }

    fn link(token: &str) -> String {
        format!("{LINK_PREFIX}{token}")
    }

    fn tmp_db(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!("/tmp/{prefix}-{}-{ts}/links.db", std::process::id()))
    }

    #[tokio::test]
    async fn end_to_end_text_links_reach_the_store() {
        let path = tmp_db("linkmon-e2e");
        let store = LinkStore::open(&path).unwrap();
        let pipeline = EventPipeline::new(Arc::new(store), fast_cfg());

        let (tx, mut rx) = mpsc::channel(4);
        tx.send(InboundMessageEvent::new(
            "-1001",
            42,
            "see https://t.me/xrocket/app?startapp=abc and also https://t.me/xrocket/app?startapp=",
        ))
        .await
        .unwrap();
        drop(tx);

        let report = pipeline
            .run(&mut rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.stop, StopReason::StreamEnded);
        assert_eq!(report.links_stored, 2);
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        // The pipeline closed its handle; reopen to inspect.
        let store = LinkStore::open(&path).unwrap();
        let rows = store.links_for_message("-1001", 42).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.link.clone()).collect::<Vec<_>>(),
            vec![link("abc"), link("")]
        );
        assert!(rows[0].id < rows[1].id);
        store.close().unwrap();
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn button_targets_use_anchored_matching() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = EventPipeline::new(sink.clone(), fast_cfg());

        let event = InboundMessageEvent::new("c", 1, "no links in text").with_buttons(vec![
            vec![
                Button::url("Claim", link("gift_1")),
                Button::plain("Refresh"),
            ],
            vec![
                Button::url("Site", "https://example.com"),
                Button::url("Wrapped", format!("https://x.io/?next={}", link("no"))),
            ],
        ]);
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(event).await.unwrap();
        drop(tx);

        let report = pipeline
            .run(&mut rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.links_stored, 1);
        assert_eq!(sink.rows(), vec![("c".to_string(), 1, link("gift_1"))]);
        assert_eq!(sink.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inserts_keep_per_channel_order() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = EventPipeline::new(sink.clone(), fast_cfg());

        let (tx, mut rx) = mpsc::channel(16);
        let producer = tokio::spawn(async move {
            for id in 0..40 {
                for channel in ["alpha", "beta", "gamma"] {
                    let text = format!("{} #{id}", link(&format!("{channel}{id}")));
                    tx.send(InboundMessageEvent::new(channel, id, text))
                        .await
                        .unwrap();
                }
            }
        });

        let report = pipeline
            .run(&mut rx, CancellationToken::new())
            .await
            .unwrap();
        producer.await.unwrap();
        assert_eq!(report.links_stored, 120);

        let rows = sink.rows();
        for channel in ["alpha", "beta", "gamma"] {
            let ids: Vec<i64> = rows
                .iter()
                .filter(|(c, _, _)| c == channel)
                .map(|(_, id, _)| *id)
                .collect();
            assert_eq!(ids, (0..40).collect::<Vec<_>>(), "order broken for {channel}");
        }
    }

    #[tokio::test]
    async fn insert_failures_do_not_stop_the_pipeline() {
        let bad = link("bad");
        let sink = Arc::new(RecordingSink::failing_on(&bad));
        let pipeline = EventPipeline::new(sink.clone(), fast_cfg());

        let (tx, mut rx) = mpsc::channel(4);
        tx.send(InboundMessageEvent::new("c", 1, format!("{bad} {}", link("ok1"))))
            .await
            .unwrap();
        tx.send(InboundMessageEvent::new("c", 2, link("ok2")))
            .await
            .unwrap();
        drop(tx);

        let report = pipeline
            .run(&mut rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(report.links_stored, 2);
        assert_eq!(report.insert_failures, 1);
        // One retry for the failing link.
        assert_eq!(sink.calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            sink.rows()
                .into_iter()
                .map(|(_, _, l)| l)
                .collect::<Vec<_>>(),
            vec![link("ok1"), link("ok2")]
        );
    }

    #[tokio::test]
    async fn disconnect_stops_the_pipeline_once() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = EventPipeline::new(sink.clone(), fast_cfg());
        let mut stream = FlakyStream {
            events: vec![InboundMessageEvent::new("c", 1, link("x"))],
        };

        assert_eq!(pipeline.state(), PipelineState::Idle);
        let report = pipeline
            .run(&mut stream, CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(report.stop, StopReason::Disconnected(ref m) if m.contains("reset")));
        assert_eq!(report.links_stored, 1);
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        let (_tx, mut rx) = mpsc::channel::<InboundMessageEvent>(1);
        let again = pipeline.run(&mut rx, CancellationToken::new()).await;
        assert!(matches!(again, Err(Error::Pipeline(_))));
        assert_eq!(sink.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_token_drains_and_stops() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = EventPipeline::new(sink.clone(), fast_cfg());
        let shutdown = CancellationToken::new();

        let (tx, mut rx) = mpsc::channel(4);
        tx.send(InboundMessageEvent::new("c", 1, link("a")))
            .await
            .unwrap();

        let trigger = shutdown.clone();
        let watched = sink.clone();
        tokio::spawn(async move {
            while watched.rows().is_empty() {
                sleep(Duration::from_millis(1)).await;
            }
            trigger.cancel();
        });

        let report = pipeline.run(&mut rx, shutdown).await.unwrap();
        assert_eq!(report.stop, StopReason::Shutdown);
        assert_eq!(report.links_stored, 1);
        drop(tx);
    }

    #[tokio::test]
    async fn allowlist_skips_unmonitored_channels() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline =
            EventPipeline::new(sink.clone(), fast_cfg()).with_allowlist(["-100".to_string()]);

        let (tx, mut rx) = mpsc::channel(4);
        tx.send(InboundMessageEvent::new("-100", 1, link("in")))
            .await
            .unwrap();
        tx.send(InboundMessageEvent::new("-200", 1, link("out")))
            .await
            .unwrap();
        drop(tx);

        let report = pipeline
            .run(&mut rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(sink.rows(), vec![("-100".to_string(), 1, link("in"))]);
    }

    /// Stalls every insert for `slow_channel`; records when each insert lands.
    struct StallingSink {
        slow_channel: String,
        started: std::time::Instant,
        landed: Mutex<Vec<(String, Duration)>>,
    }

    #[async_trait]
    impl LinkSink for StallingSink {
        async fn append(&self, channel_id: &str, _message_id: i64, _link: &str) -> Result<i64> {
            if channel_id == self.slow_channel {
                sleep(Duration::from_millis(100)).await;
            }
            let mut landed = self.landed.lock().unwrap();
            landed.push((channel_id.to_string(), self.started.elapsed()));
            Ok(landed.len() as i64)
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn backlog_on_one_channel_does_not_hold_up_others() {
        let cfg = PipelineConfig {
            workers: 64,
            queue_capacity: 1,
            ..fast_cfg()
        };
        let slow = "slow".to_string();
        let fast = (0..)
            .map(|i| format!("fast-{i}"))
            .find(|c| shard_for(c, cfg.workers) != shard_for(&slow, cfg.workers))
            .unwrap();

        let sink = Arc::new(StallingSink {
            slow_channel: slow.clone(),
            started: std::time::Instant::now(),
            landed: Mutex::new(Vec::new()),
        });
        let pipeline = EventPipeline::new(sink.clone(), cfg);

        let (tx, mut rx) = mpsc::channel(16);
        for id in 0..6 {
            tx.send(InboundMessageEvent::new(slow.as_str(), id, link("s")))
                .await
                .unwrap();
        }
        tx.send(InboundMessageEvent::new(fast.as_str(), 1, link("f")))
            .await
            .unwrap();
        drop(tx);

        let report = pipeline
            .run(&mut rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.links_stored, 7);

        let landed = sink.landed.lock().unwrap().clone();
        let fast_at = landed
            .iter()
            .find(|(c, _)| *c == fast)
            .map(|(_, at)| *at)
            .unwrap();
        assert!(fast_at < Duration::from_millis(100), "fast channel waited {fast_at:?}");
        // The slow channel still lands all six, in order, after the fast one.
        assert_eq!(landed.iter().filter(|(c, _)| *c == slow).count(), 6);
        assert_eq!(landed[0].0, fast);
    }

    #[tokio::test]
    async fn shutdown_is_seen_while_a_queue_is_full() {
        let cfg = PipelineConfig {
            workers: 1,
            queue_capacity: 1,
            ..fast_cfg()
        };
        let sink = Arc::new(StallingSink {
            slow_channel: "c".to_string(),
            started: std::time::Instant::now(),
            landed: Mutex::new(Vec::new()),
        });
        let pipeline = EventPipeline::new(sink.clone(), cfg);
        let shutdown = CancellationToken::new();

        let (tx, mut rx) = mpsc::channel(8);
        for id in 0..4 {
            tx.send(InboundMessageEvent::new("c", id, link("x")))
                .await
                .unwrap();
        }
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let report = pipeline.run(&mut rx, shutdown).await.unwrap();
        assert_eq!(report.stop, StopReason::Shutdown);
        // Everything read before the stop is drained, not dropped.
        assert_eq!(report.links_stored, report.events);
        drop(tx);
    }

    #[test]
    fn sharding_is_stable_and_in_range() {
        for n in 1..8 {
            let a = shard_for("-1001234", n);
            assert_eq!(a, shard_for("-1001234", n));
            assert!(a < n);
        }
    }
}
