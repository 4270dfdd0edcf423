// ── Live stream fan-out relay ──
//
// One upstream reader, many subscribers. The reader is established
// lazily on the first subscriber and torn down when the last one leaves.
// Each subscriber owns a small bounded queue with a drop-oldest policy:
// the producer never blocks, and a stalled browser only loses its own
// oldest frames. Relay health is published on a watch channel so
// consumers surface an explicit error instead of hanging.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::mjpeg::FrameSplitter;
use crate::model::StreamFrame;

/// An open upstream media feed: content type plus the raw byte flow.
pub struct MediaFeed {
    pub content_type: String,
    pub bytes: BoxStream<'static, Result<Bytes, CoreError>>,
}

/// Source of the upstream media connection. Production is the pinned
/// `GatewayClient`; tests script it.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open(&self) -> Result<MediaFeed, CoreError>;
}

/// Relay tuning. Defaults match the live-control use case: tiny queues
/// that prefer recency over completeness.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Per-subscriber queue capacity in frames.
    pub queue_capacity: usize,
    /// Upstream (re)connection attempts before surfacing Unreachable.
    pub connect_attempts: u32,
    /// Base reconnect backoff, doubling per attempt.
    pub connect_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            connect_attempts: 3,
            connect_backoff: Duration::from_millis(250),
        }
    }
}

/// Observable relay health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    /// No subscribers, no upstream connection.
    Idle,
    Connecting,
    Streaming,
    /// Reconnect budget exhausted; subscribers should be failed out.
    Unreachable { reason: String },
}

/// The fan-out hub. Cheaply cloneable.
#[derive(Clone)]
pub struct StreamRelay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    source: Arc<dyn MediaSource>,
    config: RelayConfig,
    subscribers: DashMap<Uuid, Arc<FrameQueue>>,
    seq: AtomicU64,
    status: watch::Sender<RelayStatus>,
    reader: StdMutex<Option<ReaderHandle>>,
}

struct ReaderHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamRelay {
    pub fn new(source: Arc<dyn MediaSource>, config: RelayConfig) -> Self {
        let (status, _) = watch::channel(RelayStatus::Idle);
        Self {
            inner: Arc::new(RelayInner {
                source,
                config,
                subscribers: DashMap::new(),
                seq: AtomicU64::new(0),
                status,
                reader: StdMutex::new(None),
            }),
        }
    }

    /// Register a new stream subscriber, starting the upstream reader if
    /// this is the first one. Dropping the returned subscription
    /// deregisters it.
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let queue = Arc::new(FrameQueue::new(self.inner.config.queue_capacity));
        self.inner.subscribers.insert(id, Arc::clone(&queue));
        debug!(subscriber = %id, total = self.inner.subscribers.len(), "stream subscriber registered");

        self.ensure_reader();
        Subscription {
            id,
            queue,
            relay: self.clone(),
        }
    }

    /// Subscribe to relay health changes.
    pub fn status(&self) -> watch::Receiver<RelayStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Tear down the upstream reader and fail out all subscribers.
    /// Used on server shutdown.
    pub fn shutdown(&self) {
        for entry in self.inner.subscribers.iter() {
            entry.value().close();
        }
        self.inner.subscribers.clear();
        self.stop_reader();
    }

    fn ensure_reader(&self) {
        let mut guard = lock(&self.inner.reader);
        if let Some(handle) = guard.as_ref() {
            if !handle.task.is_finished() {
                return;
            }
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(reader_task(Arc::clone(&self.inner), cancel.clone()));
        *guard = Some(ReaderHandle { cancel, task });
    }

    fn stop_reader(&self) {
        if let Some(handle) = lock(&self.inner.reader).take() {
            handle.cancel.cancel();
        }
        self.inner.status.send_replace(RelayStatus::Idle);
    }

    fn unsubscribe(&self, id: Uuid) {
        if let Some((_, queue)) = self.inner.subscribers.remove(&id) {
            queue.close();
            debug!(subscriber = %id, remaining = self.inner.subscribers.len(), "stream subscriber removed");
        }
        if self.inner.subscribers.is_empty() {
            info!("last stream subscriber left, closing upstream");
            self.stop_reader();
        }
    }
}

/// A registered stream subscriber. Deregisters itself on drop without
/// affecting other subscribers (or the upstream connection, unless it
/// was the last one).
pub struct Subscription {
    id: Uuid,
    queue: Arc<FrameQueue>,
    relay: StreamRelay,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Await the next frame in relay order. Returns `None` once the
    /// subscription is closed.
    pub async fn next_frame(&self) -> Option<StreamFrame> {
        self.queue.pop().await
    }

    /// Frames this subscriber lost to the drop-oldest policy.
    pub fn dropped_frames(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.relay.unsubscribe(self.id);
    }
}

// ── Upstream reader ─────────────────────────────────────────────────

async fn reader_task(inner: Arc<RelayInner>, cancel: CancellationToken) {
    let mut attempt = 0u32;
    let mut last_reason = String::from("never connected");

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if attempt >= inner.config.connect_attempts {
            warn!(reason = %last_reason, "media reconnect budget exhausted");
            inner.status.send_replace(RelayStatus::Unreachable {
                reason: last_reason,
            });
            return;
        }
        if attempt > 0 {
            let backoff = inner.config.connect_backoff * 2u32.saturating_pow(attempt - 1);
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(backoff) => {}
            }
        }

        inner.status.send_replace(RelayStatus::Connecting);
        let feed = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            feed = inner.source.open() => feed,
        };

        let mut feed = match feed {
            Ok(feed) => feed,
            Err(e) => {
                warn!(attempt, error = %e, "failed to open media stream");
                last_reason = e.to_string();
                attempt += 1;
                continue;
            }
        };

        inner.status.send_replace(RelayStatus::Streaming);
        let mut splitter = FrameSplitter::for_content_type(&feed.content_type);
        let mut delivered_any = false;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                chunk = feed.bytes.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for payload in splitter.feed(&bytes) {
                        // The reconnect budget resets only once real
                        // frames flow, so a flapping endpoint cannot
                        // reset it by merely accepting connections.
                        if !delivered_any {
                            delivered_any = true;
                            attempt = 0;
                        }
                        inner.publish(payload);
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "media stream error, reconnecting");
                    last_reason = e.to_string();
                    attempt += 1;
                    break;
                }
                None => {
                    warn!("media stream closed upstream, reconnecting");
                    last_reason = "stream closed upstream".into();
                    attempt += 1;
                    break;
                }
            }
        }
    }

    inner.status.send_replace(RelayStatus::Idle);
}

impl RelayInner {
    fn publish(&self, payload: Bytes) {
        let frame = StreamFrame {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            payload,
            captured_at: Instant::now(),
        };
        for entry in self.subscribers.iter() {
            entry.value().push(frame.clone());
        }
    }
}

// ── Per-subscriber bounded queue ────────────────────────────────────

/// Bounded frame queue with a drop-oldest overflow policy. One producer
/// (the relay reader), one consumer (the subscriber's connection task).
struct FrameQueue {
    frames: StdMutex<VecDeque<StreamFrame>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl FrameQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: StdMutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, frame: StreamFrame) {
        {
            let mut frames = lock(&self.frames);
            if frames.len() == self.capacity {
                frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<StreamFrame> {
        loop {
            if let Some(frame) = lock(&self.frames).pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicU32;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn part(payload: &[u8]) -> Bytes {
        let mut out = Vec::new();
        out.extend_from_slice(b"--frame\r\n");
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n");
        out.into()
    }

    fn feed_from(
        rx: mpsc::UnboundedReceiver<Result<Bytes, CoreError>>,
    ) -> MediaFeed {
        MediaFeed {
            content_type: "multipart/x-mixed-replace; boundary=frame".into(),
            bytes: tokio_stream_from(rx),
        }
    }

    fn tokio_stream_from(
        rx: mpsc::UnboundedReceiver<Result<Bytes, CoreError>>,
    ) -> BoxStream<'static, Result<Bytes, CoreError>> {
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }

    /// Source backed by a channel: the test pushes chunks, the relay
    /// streams them. Only the first open succeeds.
    struct ChannelSource {
        feed: StdMutex<Option<mpsc::UnboundedReceiver<Result<Bytes, CoreError>>>>,
        opens: AtomicU32,
    }

    impl ChannelSource {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<Bytes, CoreError>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let source = Arc::new(Self {
                feed: StdMutex::new(Some(rx)),
                opens: AtomicU32::new(0),
            });
            (source, tx)
        }
    }

    #[async_trait]
    impl MediaSource for ChannelSource {
        async fn open(&self) -> Result<MediaFeed, CoreError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.feed.lock().unwrap().take() {
                Some(rx) => Ok(feed_from(rx)),
                None => Err(CoreError::GatewayUnreachable {
                    reason: "refused".into(),
                }),
            }
        }
    }

    /// Source that replays scripted chunk batches, one batch per open,
    /// then fails every subsequent open.
    struct ScriptedSource {
        batches: StdMutex<VecDeque<Vec<Bytes>>>,
        opens: AtomicU32,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<Bytes>>) -> Arc<Self> {
            Arc::new(Self {
                batches: StdMutex::new(batches.into()),
                opens: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl MediaSource for ScriptedSource {
        async fn open(&self) -> Result<MediaFeed, CoreError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.batches.lock().unwrap().pop_front() {
                Some(chunks) => Ok(MediaFeed {
                    content_type: "multipart/x-mixed-replace; boundary=frame".into(),
                    bytes: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
                }),
                None => Err(CoreError::GatewayUnreachable {
                    reason: "no more batches".into(),
                }),
            }
        }
    }

    async fn wait_for_status(
        rx: &mut watch::Receiver<RelayStatus>,
        pred: impl Fn(&RelayStatus) -> bool,
    ) -> RelayStatus {
        timeout(WAIT, async {
            loop {
                {
                    let current = rx.borrow().clone();
                    if pred(&current) {
                        return current;
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("status not reached in time")
    }

    #[tokio::test]
    async fn fan_out_delivers_in_order_to_every_subscriber() {
        let (source, tx) = ChannelSource::new();
        let relay = StreamRelay::new(source, RelayConfig::default());

        let subs: Vec<_> = (0..5).map(|_| relay.subscribe()).collect();
        let mut status = relay.status();
        wait_for_status(&mut status, |s| *s == RelayStatus::Streaming).await;

        for i in 0..3u8 {
            tx.send(Ok(part(&[i; 16]))).unwrap();
        }

        for sub in &subs {
            let mut seqs = Vec::new();
            for _ in 0..3 {
                let frame = timeout(WAIT, sub.next_frame()).await.unwrap().unwrap();
                seqs.push(frame.seq);
            }
            assert_eq!(seqs, vec![0, 1, 2]);
        }

        // One subscriber leaving must not disturb the rest.
        let mut subs = subs;
        drop(subs.remove(0));
        tx.send(Ok(part(b"after-departure"))).unwrap();

        for sub in &subs {
            let frame = timeout(WAIT, sub.next_frame()).await.unwrap().unwrap();
            assert_eq!(frame.seq, 3);
        }
    }

    #[tokio::test]
    async fn stalled_subscriber_loses_oldest_frames_without_blocking() {
        let (source, tx) = ChannelSource::new();
        let relay = StreamRelay::new(source, RelayConfig::default());

        let slow = relay.subscribe();
        let mut status = relay.status();
        wait_for_status(&mut status, |s| *s == RelayStatus::Streaming).await;

        // Six frames into a capacity-4 queue with nobody consuming. The
        // producer must absorb all of them without blocking.
        for i in 0..6u8 {
            tx.send(Ok(part(&[i; 8]))).unwrap();
        }

        // Give the reader task a chance to drain the channel.
        tokio::task::yield_now().await;
        let first = timeout(WAIT, slow.next_frame()).await.unwrap().unwrap();
        assert_eq!(first.seq, 2, "oldest frames should have been dropped");

        let mut seqs = vec![first.seq];
        for _ in 0..3 {
            seqs.push(timeout(WAIT, slow.next_frame()).await.unwrap().unwrap().seq);
        }
        assert_eq!(seqs, vec![2, 3, 4, 5]);
        assert_eq!(slow.dropped_frames(), 2);
    }

    #[tokio::test]
    async fn upstream_opens_lazily_and_closes_with_last_subscriber() {
        let (source, _tx) = ChannelSource::new();
        let relay = StreamRelay::new(Arc::clone(&source) as Arc<dyn MediaSource>, RelayConfig::default());

        assert_eq!(source.opens.load(Ordering::SeqCst), 0);

        let first = relay.subscribe();
        let second = relay.subscribe();
        let mut status = relay.status();
        wait_for_status(&mut status, |s| *s == RelayStatus::Streaming).await;
        assert_eq!(source.opens.load(Ordering::SeqCst), 1);

        drop(first);
        assert_eq!(relay.subscriber_count(), 1);

        drop(second);
        assert_eq!(relay.subscriber_count(), 0);
        wait_for_status(&mut status, |s| *s == RelayStatus::Idle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_drop_then_surfaces_unreachable() {
        // First open streams two frames then ends; the relay reconnects
        // and gets two more; every open after that fails.
        let source = ScriptedSource::new(vec![
            vec![part(b"f0"), part(b"f1")],
            vec![part(b"f2"), part(b"f3")],
        ]);
        let relay = StreamRelay::new(
            Arc::clone(&source) as Arc<dyn MediaSource>,
            RelayConfig {
                queue_capacity: 8,
                connect_attempts: 2,
                connect_backoff: Duration::from_millis(10),
            },
        );

        let sub = relay.subscribe();
        let mut seqs = Vec::new();
        for _ in 0..4 {
            let frame = timeout(WAIT, sub.next_frame()).await.unwrap().unwrap();
            seqs.push(frame.seq);
        }
        assert_eq!(seqs, vec![0, 1, 2, 3]);

        let mut status = relay.status();
        let unreachable =
            wait_for_status(&mut status, |s| matches!(s, RelayStatus::Unreachable { .. })).await;
        assert!(matches!(unreachable, RelayStatus::Unreachable { .. }));
        assert_eq!(source.opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failures_exhaust_budget_and_surface_unreachable() {
        let source = ScriptedSource::new(Vec::new());
        let relay = StreamRelay::new(
            Arc::clone(&source) as Arc<dyn MediaSource>,
            RelayConfig {
                connect_attempts: 3,
                connect_backoff: Duration::from_millis(10),
                ..RelayConfig::default()
            },
        );

        let _sub = relay.subscribe();
        let mut status = relay.status();
        let result =
            wait_for_status(&mut status, |s| matches!(s, RelayStatus::Unreachable { .. })).await;

        assert!(matches!(result, RelayStatus::Unreachable { .. }));
        assert_eq!(source.opens.load(Ordering::SeqCst), 3);
    }
}
