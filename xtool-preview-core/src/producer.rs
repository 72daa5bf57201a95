//! Frame producer: single capture task, many subscribers.
//!
//! One background task captures, transcodes and publishes the most
//! recent frame into a single latest-wins slot. Subscribers are
//! reference-counted: the first subscription spawns the capture task,
//! the last release cancels it, so capture pauses while nobody is
//! watching.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capture::CaptureBackend;
use crate::error::PreviewError;
use crate::jpeg::{self, ImageMime};

/// Back-off applied after a failed capture before trying again.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(500);

// ── Frame ────────────────────────────────────────────────────────

/// One published frame. Shared by reference between the producer's
/// latest slot and every client currently transmitting it.
#[derive(Debug)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub mime: ImageMime,
    /// Strictly increasing within one producer, starting at 1.
    pub sequence: u64,
    /// Monotonic capture timestamp.
    pub captured_at: Instant,
}

// ── FrameProducer ────────────────────────────────────────────────

struct CaptureTask {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Mutable cross-task state, serialised through one lock: the latest
/// slot, the sequence counter, the subscriber refcount and the capture
/// task handle.
struct ProducerState {
    latest: Option<Arc<Frame>>,
    sequence: u64,
    subscribers: u32,
    task: Option<CaptureTask>,
}

/// Single-producer / multi-subscriber frame pump.
pub struct FrameProducer {
    backend: tokio::sync::Mutex<Box<dyn CaptureBackend>>,
    state: Mutex<ProducerState>,
    interval: Duration,
    quality: u8,
    /// Total successful captures; test hook for lifecycle assertions.
    captures: AtomicU64,
    /// Self-reference handed to the capture task on spawn.
    weak: Weak<FrameProducer>,
}

impl FrameProducer {
    /// Create a producer over the given backend. `fps` is clamped to
    /// at least 1.
    pub fn new(backend: Box<dyn CaptureBackend>, fps: u32, quality: u8) -> Arc<Self> {
        let fps = fps.max(1);
        Arc::new_cyclic(|weak| Self {
            backend: tokio::sync::Mutex::new(backend),
            state: Mutex::new(ProducerState {
                latest: None,
                sequence: 0,
                subscribers: 0,
                task: None,
            }),
            interval: Duration::from_secs_f64(1.0 / f64::from(fps)),
            quality,
            captures: AtomicU64::new(0),
            weak: weak.clone(),
        })
    }

    /// Prepare the capture backend. Called once before serving.
    pub async fn start(&self) -> Result<(), PreviewError> {
        self.backend.lock().await.start().await
    }

    /// Cancel the capture task and release the backend.
    pub async fn stop(&self) {
        let task = {
            let mut state = self.state.lock().expect("producer lock poisoned");
            state.task.take()
        };
        if let Some(task) = task {
            task.token.cancel();
        }
        if let Err(e) = self.backend.lock().await.stop().await {
            warn!(error = %e, "capture backend stop failed");
        }
    }

    /// Register one subscriber; the 0 → 1 transition spawns the
    /// capture task.
    pub fn subscribe(&self) {
        let mut state = self.state.lock().expect("producer lock poisoned");
        state.subscribers += 1;
        if state.subscribers == 1 && state.task.is_none() {
            let Some(producer) = self.weak.upgrade() else {
                return;
            };
            let token = CancellationToken::new();
            let child = token.child_token();
            let handle = tokio::spawn(async move {
                producer.capture_loop(child).await;
            });
            state.task = Some(CaptureTask {
                token,
                _handle: handle,
            });
            debug!("capture task started");
        }
    }

    /// Release one subscriber; the transition to 0 cancels the capture
    /// task. The count never goes below zero.
    pub fn unsubscribe(&self) {
        let mut state = self.state.lock().expect("producer lock poisoned");
        if state.subscribers == 0 {
            return;
        }
        state.subscribers -= 1;
        if state.subscribers == 0 {
            if let Some(task) = state.task.take() {
                task.token.cancel();
                debug!("capture task cancelled, no subscribers left");
            }
        }
    }

    /// Cheap snapshot of the latest published frame.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.state
            .lock()
            .expect("producer lock poisoned")
            .latest
            .clone()
    }

    /// Current subscriber refcount.
    pub fn subscriber_count(&self) -> u32 {
        self.state.lock().expect("producer lock poisoned").subscribers
    }

    /// Total successful captures over the producer's lifetime.
    pub fn capture_count(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }

    /// The capture task body. Runs until cancelled; capture errors are
    /// logged and retried after a short back-off so a transient tool
    /// hiccup never tears down connected clients.
    async fn capture_loop(&self, token: CancellationToken) {
        loop {
            let captured = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = self.capture_once() => result,
            };

            let delay = match captured {
                Ok(bytes) => {
                    self.publish(bytes);
                    self.interval
                }
                Err(e) => {
                    warn!(error = %e, "frame capture failed");
                    CAPTURE_RETRY_DELAY
                }
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("capture task exited");
    }

    async fn capture_once(&self) -> Result<Vec<u8>, PreviewError> {
        self.backend.lock().await.capture_frame().await
    }

    /// Transcode and install a captured blob as the latest frame,
    /// overwriting the previous one.
    fn publish(&self, bytes: Vec<u8>) {
        let compressed = jpeg::compress(bytes, self.quality);
        let mut state = self.state.lock().expect("producer lock poisoned");
        state.sequence += 1;
        state.latest = Some(Arc::new(Frame {
            bytes: compressed.data,
            mime: compressed.mime,
            sequence: state.sequence,
            captured_at: Instant::now(),
        }));
        self.captures.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureBackend;

    /// Backend producing a tiny JPEG-tagged blob per call.
    struct StubBackend {
        counter: u64,
    }

    #[async_trait::async_trait]
    impl CaptureBackend for StubBackend {
        async fn start(&mut self) -> Result<(), PreviewError> {
            Ok(())
        }

        async fn capture_frame(&mut self) -> Result<Vec<u8>, PreviewError> {
            self.counter += 1;
            Ok(vec![0xFF, 0xD8, 0xFF, (self.counter & 0xFF) as u8])
        }

        async fn stop(&mut self) -> Result<(), PreviewError> {
            Ok(())
        }
    }

    fn producer(fps: u32) -> Arc<FrameProducer> {
        FrameProducer::new(Box::new(StubBackend { counter: 0 }), fps, 80)
    }

    #[tokio::test]
    async fn subscribe_starts_capture_and_sequences_grow() {
        let p = producer(30);
        p.start().await.unwrap();
        assert!(p.latest_frame().is_none());

        p.subscribe();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let first = p.latest_frame().expect("frame after subscribing");
        assert!(first.sequence >= 1);
        assert_eq!(first.mime, ImageMime::Jpeg);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let later = p.latest_frame().unwrap();
        assert!(later.sequence > first.sequence);

        p.unsubscribe();
        p.stop().await;
    }

    #[tokio::test]
    async fn unsubscribe_to_zero_stops_capture() {
        let p = producer(30);
        p.start().await.unwrap();

        p.subscribe();
        p.subscribe();
        assert_eq!(p.subscriber_count(), 2);

        p.unsubscribe();
        assert_eq!(p.subscriber_count(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(p.capture_count() > 0, "one subscriber keeps capture alive");

        p.unsubscribe();
        assert_eq!(p.subscriber_count(), 0);

        // Let any in-flight iteration drain, then verify the counter
        // stops advancing.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let settled = p.capture_count();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(p.capture_count(), settled);

        p.stop().await;
    }

    #[tokio::test]
    async fn unsubscribe_is_floored_at_zero() {
        let p = producer(5);
        p.unsubscribe();
        assert_eq!(p.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn sequence_survives_task_restarts() {
        let p = producer(30);
        p.start().await.unwrap();

        p.subscribe();
        tokio::time::sleep(Duration::from_millis(120)).await;
        p.unsubscribe();
        let before = p.latest_frame().unwrap().sequence;

        p.subscribe();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let after = p.latest_frame().unwrap().sequence;
        assert!(after > before, "restarted task must not reuse sequences");

        p.unsubscribe();
        p.stop().await;
    }

    #[tokio::test]
    async fn fps_zero_is_clamped() {
        let p = producer(0);
        assert_eq!(p.interval, Duration::from_secs(1));
    }
}
