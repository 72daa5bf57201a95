//! HTTP / WebSocket preview server.
//!
//! One TCP listener serves every transport: the HTML viewer, the
//! MJPEG stream, a single-frame endpoint, device info JSON, the SSE
//! build-status channel and the WebSocket upgrade. Each connection is
//! handled by its own task; streaming routes subscribe to the frame
//! producer and release exactly once on teardown.

mod http;
mod mjpeg;
mod sse;
mod ws;

pub use http::{read_request, write_response, Request};
pub use mjpeg::BOUNDARY;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PreviewConfig;
use crate::device::{self, DeviceDisplayInfo};
use crate::error::PreviewError;
use crate::producer::FrameProducer;
use crate::status::BuildStatusBroadcaster;
use crate::viewer;

/// Listener backlog. Preview serves a handful of browser tabs; 256 is
/// far beyond what will ever queue.
const BACKLOG: u32 = 256;

/// How long `/frame` waits for a first frame before giving up.
const SINGLE_FRAME_WAIT: Duration = Duration::from_secs(2);

/// Poll step while `/frame` waits.
const SINGLE_FRAME_POLL: Duration = Duration::from_millis(100);

// ── Subscription guard ───────────────────────────────────────────

/// Producer subscription released exactly once.
///
/// Streaming handlers can exit through several paths (client close,
/// write failure, task cancellation); the `released` flag guarantees
/// the refcount is decremented a single time regardless.
struct Subscription {
    producer: Arc<FrameProducer>,
    released: bool,
}

impl Subscription {
    fn new(producer: &Arc<FrameProducer>) -> Self {
        producer.subscribe();
        Self {
            producer: Arc::clone(producer),
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.producer.unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

// ── PreviewServer ────────────────────────────────────────────────

/// Shared state cloned into every connection task.
struct Shared {
    config: PreviewConfig,
    display: DeviceDisplayInfo,
    producer: Arc<FrameProducer>,
    status: Arc<BuildStatusBroadcaster>,
}

/// The preview server. Owns the producer and broadcaster handles and
/// the listener lifecycle.
pub struct PreviewServer {
    shared: Arc<Shared>,
    token: CancellationToken,
}

impl PreviewServer {
    pub fn new(
        config: PreviewConfig,
        producer: Arc<FrameProducer>,
        status: Arc<BuildStatusBroadcaster>,
    ) -> Self {
        let display = device::display_info(&config.device.product_type);
        Self {
            shared: Arc::new(Shared {
                config,
                display,
                producer,
                status,
            }),
            token: CancellationToken::new(),
        }
    }

    /// Token that stops the accept loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Bind the listener with address reuse and the configured backlog.
    pub fn bind(&self) -> Result<TcpListener, PreviewError> {
        let addr = self.shared.config.addr;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(BACKLOG)?;
        info!(addr = %listener.local_addr()?, "preview server listening");
        Ok(listener)
    }

    /// Accept connections until the shutdown token fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), PreviewError> {
        loop {
            let accepted = tokio::select! {
                _ = self.token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(shared, stream).await {
                    debug!(%peer, error = %e, "connection ended with error");
                }
            });
        }
        info!("preview server stopped");
        Ok(())
    }

    /// Bind and serve in one call.
    pub async fn run(&self) -> Result<(), PreviewError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }
}

// ── Connection handling ──────────────────────────────────────────

async fn handle_connection(
    shared: Arc<Shared>,
    mut stream: TcpStream,
) -> Result<(), PreviewError> {
    stream.set_nodelay(true).ok();
    let request = http::read_request(&mut stream).await?;
    debug!(method = %request.method, target = %request.target, "request");

    if request.method != "GET" {
        return not_found(&mut stream).await;
    }

    match request.path() {
        "/" => {
            let page = viewer::render_page(&shared.config.device.name, &shared.display);
            http::write_response(
                &mut stream,
                200,
                "OK",
                "text/html; charset=utf-8",
                page.as_bytes(),
            )
            .await?;
            Ok(())
        }
        "/stream" => {
            let mut subscription = Subscription::new(&shared.producer);
            let result =
                mjpeg::serve(Arc::clone(&shared.producer), &mut stream, shared.config.fps).await;
            subscription.release();
            // Streams have committed a 200 long before any failure;
            // the connection just closes.
            result.map_err(PreviewError::from)
        }
        "/frame" => single_frame(&shared, &mut stream).await,
        "/api/info" => {
            let body = serde_json::json!({
                "deviceName": shared.config.device.name,
                "udid": shared.config.device.udid,
                "fps": shared.config.fps,
                "display": shared.display,
            });
            http::write_response(
                &mut stream,
                200,
                "OK",
                "application/json",
                body.to_string().as_bytes(),
            )
            .await?;
            Ok(())
        }
        "/api/events" => {
            let result = sse::serve(Arc::clone(&shared.status), &mut stream).await;
            result.map_err(PreviewError::from)
        }
        "/ws" if request.is_websocket_upgrade() => {
            let mut subscription = Subscription::new(&shared.producer);
            let result = ws::serve(
                Arc::clone(&shared.producer),
                stream,
                &request,
                shared.config.fps,
            )
            .await;
            subscription.release();
            result.map_err(PreviewError::from)
        }
        _ => not_found(&mut stream).await,
    }
}

async fn not_found(stream: &mut TcpStream) -> Result<(), PreviewError> {
    http::write_response(stream, 404, "Not Found", "text/plain", b"Not Found").await?;
    Ok(())
}

/// `/frame`: subscribe, wait briefly for any frame, send it once.
async fn single_frame(shared: &Shared, stream: &mut TcpStream) -> Result<(), PreviewError> {
    let mut subscription = Subscription::new(&shared.producer);

    let deadline = tokio::time::Instant::now() + SINGLE_FRAME_WAIT;
    let frame = loop {
        if let Some(frame) = shared.producer.latest_frame() {
            break Some(frame);
        }
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(SINGLE_FRAME_POLL).await;
    };

    let result = match frame {
        Some(frame) => {
            http::write_response(stream, 200, "OK", frame.mime.as_str(), &frame.bytes).await
        }
        None => {
            http::write_response(
                stream,
                500,
                "Internal Server Error",
                "text/plain",
                b"No frame available",
            )
            .await
        }
    };

    subscription.release();
    result.map_err(PreviewError::from)
}

// ── Tests ────────────────────────────────────────────────────────
