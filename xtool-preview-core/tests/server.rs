//! End-to-end tests: the full server stack over real localhost
//! sockets, driven by a stub capture backend that returns a fixed
//! 2×2 RGB TIFF per call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use xtool_preview_core::capture::CaptureBackend;
use xtool_preview_core::error::PreviewError;
use xtool_preview_core::{
    BuildStatus, BuildStatusBroadcaster, DeviceIdentity, FrameProducer, PreviewConfig,
    PreviewServer,
};

// ── Fixtures ─────────────────────────────────────────────────────

/// Minimal 2×2 RGB little-endian TIFF with a solid colour.
fn tiny_tiff(rgb: [u8; 3]) -> Vec<u8> {
    let mut pixels = Vec::new();
    for _ in 0..4 {
        pixels.extend_from_slice(&rgb);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&(8 + pixels.len() as u32).to_le_bytes());
    out.extend_from_slice(&pixels);

    let entries: [(u16, u16, u32, u32); 6] = [
        (256, 3, 1, 2),
        (257, 3, 1, 2),
        (259, 3, 1, 1),
        (273, 4, 1, 8),
        (277, 3, 1, 3),
        (279, 4, 1, pixels.len() as u32),
    ];
    out.extend_from_slice(&6u16.to_le_bytes());
    for (tag, field_type, count, value) in entries {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&field_type.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        if field_type == 3 {
            out.extend_from_slice(&(value as u16).to_le_bytes());
            out.extend_from_slice(&[0, 0]);
        } else {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

/// Backend yielding a fixed TIFF per capture, with the green channel
/// varied so consecutive frames differ.
struct StubBackend {
    red: u8,
    counter: u8,
}

#[async_trait::async_trait]
impl CaptureBackend for StubBackend {
    async fn start(&mut self) -> Result<(), PreviewError> {
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Vec<u8>, PreviewError> {
        self.counter = self.counter.wrapping_add(16);
        Ok(tiny_tiff([self.red, self.counter, 0]))
    }

    async fn stop(&mut self) -> Result<(), PreviewError> {
        Ok(())
    }
}

struct TestServer {
    addr: std::net::SocketAddr,
    producer: Arc<FrameProducer>,
    status: Arc<BuildStatusBroadcaster>,
}

/// Boot a server on an ephemeral loopback port.
async fn start_server(fps: u32) -> TestServer {
    let config = PreviewConfig {
        addr: ([127, 0, 0, 1], 0).into(),
        fps,
        quality: 80,
        device: DeviceIdentity {
            name: "Stub".into(),
            udid: "00008110-000000000000000E".into(),
            product_type: String::new(),
        },
    };

    let producer = FrameProducer::new(
        Box::new(StubBackend {
            red: 255,
            counter: 0,
        }),
        fps,
        80,
    );
    producer.start().await.unwrap();

    let status = Arc::new(BuildStatusBroadcaster::new());
    let server = PreviewServer::new(config, Arc::clone(&producer), Arc::clone(&status));
    let listener = server.bind().unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    TestServer {
        addr,
        producer,
        status,
    }
}

// ── HTTP client helpers ──────────────────────────────────────────

async fn http_get(
    addr: std::net::SocketAddr,
    path: &str,
) -> (u16, HashMap<String, String>, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    timeout(Duration::from_secs(10), stream.read_to_end(&mut raw))
        .await
        .expect("response timed out")
        .unwrap();

    parse_response(&raw)
}

fn parse_response(raw: &[u8]) -> (u16, HashMap<String, String>, Vec<u8>) {
    let head_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator");
    let head = std::str::from_utf8(&raw[..head_end]).unwrap();
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap();
    let status: u16 = status_line.split_whitespace().nth(1).unwrap().parse().unwrap();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    (status, headers, raw[head_end + 4..].to_vec())
}

/// Open a streaming GET and collect whatever arrives within `window`.
async fn collect_stream(addr: std::net::SocketAddr, path: &str, window: Duration) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    let mut chunk = [0u8; 4096];
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => collected.extend_from_slice(&chunk[..n]),
            Ok(Err(_)) | Err(_) => break,
        }
    }
    collected
}

/// Parsed MJPEG part: headers plus body.
struct Part {
    content_type: String,
    content_length: usize,
    body: Vec<u8>,
}

/// Split a multipart buffer into its complete parts.
fn parse_mjpeg_parts(buf: &[u8], boundary: &str) -> Vec<Part> {
    let marker = format!("--{boundary}\r\n");
    let marker = marker.as_bytes();
    let mut parts = Vec::new();
    let mut at = 0;

    while let Some(found) = find(&buf[at..], marker) {
        let head_start = at + found + marker.len();
        let Some(head_len) = find(&buf[head_start..], b"\r\n\r\n") else {
            break;
        };
        let head = std::str::from_utf8(&buf[head_start..head_start + head_len]).unwrap();

        let mut content_type = String::new();
        let mut content_length = 0usize;
        for line in head.split("\r\n") {
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_ascii_lowercase().as_str() {
                    "content-type" => content_type = value.trim().to_string(),
                    "content-length" => content_length = value.trim().parse().unwrap(),
                    _ => {}
                }
            }
        }

        let body_start = head_start + head_len + 4;
        let body_end = body_start + content_length;
        if body_end + 2 > buf.len() {
            break; // truncated final part
        }
        // Content-Length must line up exactly with the part terminator.
        assert_eq!(&buf[body_end..body_end + 2], b"\r\n");
        parts.push(Part {
            content_type,
            content_length,
            body: buf[body_start..body_end].to_vec(),
        });
        at = body_end;
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ── Scenarios ────────────────────────────────────────────────────

#[tokio::test]
async fn viewer_bootstrap() {
    let server = start_server(5).await;

    let (status, headers, body) = http_get(server.addr, "/").await;
    assert_eq!(status, 200);
    assert!(headers["content-type"].starts_with("text/html"));
    let page = String::from_utf8(body).unwrap();
    assert!(page.contains("xtool-preview"));
    assert!(page.contains("/ws"));

    let (status, headers, body) = http_get(server.addr, "/api/info").await;
    assert_eq!(status, 200);
    assert_eq!(headers["content-type"], "application/json");

    let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let expected: serde_json::Value = serde_json::json!({
        "deviceName": "Stub",
        "udid": "00008110-000000000000000E",
        "fps": 5,
        "display": {
            "name": "iPhone",
            "screenWidth": 1179,
            "screenHeight": 2556,
            "displayStyle": "dynamicIsland",
            "cornerRadius": 55
        }
    });
    assert_eq!(info, expected);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let server = start_server(5).await;
    let (status, headers, body) = http_get(server.addr, "/definitely-not-a-route").await;
    assert_eq!(status, 404);
    assert_eq!(headers["content-type"], "text/plain");
    assert_eq!(body, b"Not Found");
}

#[tokio::test]
async fn single_frame_returns_jpeg() {
    let server = start_server(10).await;

    let (status, headers, body) =
        timeout(Duration::from_secs(3), http_get(server.addr, "/frame"))
            .await
            .expect("/frame did not answer in time");
    assert_eq!(status, 200);
    assert_eq!(headers["content-type"], "image/jpeg");
    assert_eq!(&body[0..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn mjpeg_stream_is_continuous() {
    let server = start_server(10).await;

    let raw = collect_stream(server.addr, "/stream", Duration::from_secs(3)).await;
    let head_end = find(&raw, b"\r\n\r\n").expect("no response head");
    let head = std::str::from_utf8(&raw[..head_end]).unwrap();
    assert!(head.starts_with("HTTP/1.1 200"));
    assert!(head.contains("multipart/x-mixed-replace; boundary=xtool-preview-frame"));

    let parts = parse_mjpeg_parts(&raw[head_end + 4..], "xtool-preview-frame");
    assert!(
        parts.len() >= 15,
        "expected ≥15 parts in 3 s at 10 fps, got {}",
        parts.len()
    );
    for part in &parts {
        assert_eq!(part.content_type, "image/jpeg");
        assert_eq!(part.body.len(), part.content_length);
        assert_eq!(&part.body[0..2], &[0xFF, 0xD8]);
    }
}

#[tokio::test]
async fn websocket_and_mjpeg_run_concurrently() {
    let server = start_server(10).await;

    let tcp = TcpStream::connect(server.addr).await.unwrap();
    let (mut ws, response) =
        tokio_tungstenite::client_async(format!("ws://{}/ws", server.addr), tcp)
            .await
            .expect("websocket handshake failed");
    assert_eq!(response.status().as_u16(), 101);

    let mjpeg_task = tokio::spawn({
        let addr = server.addr;
        async move { collect_stream(addr, "/stream", Duration::from_secs(2)).await }
    });

    let mut ws_frames = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(4);
    while ws_frames < 5 {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        assert!(!remaining.is_zero(), "websocket delivered too few frames");
        match timeout(remaining, ws.next()).await {
            Ok(Some(Ok(tokio_tungstenite::tungstenite::Message::Binary(data)))) => {
                assert_eq!(&data[0..2], &[0xFF, 0xD8]);
                ws_frames += 1;
            }
            Ok(Some(Ok(_))) => {}
            other => panic!("websocket stream ended early: {other:?}"),
        }
    }

    let raw = mjpeg_task.await.unwrap();
    let head_end = find(&raw, b"\r\n\r\n").unwrap();
    let parts = parse_mjpeg_parts(&raw[head_end + 4..], "xtool-preview-frame");
    assert!(parts.len() >= 5, "mjpeg received {} parts", parts.len());

    ws.close(None).await.ok();
}

#[tokio::test]
async fn websocket_ping_is_echoed_as_pong() {
    let server = start_server(5).await;

    let tcp = TcpStream::connect(server.addr).await.unwrap();
    let (mut ws, _) = tokio_tungstenite::client_async(format!("ws://{}/ws", server.addr), tcp)
        .await
        .unwrap();

    ws.send(tokio_tungstenite::tungstenite::Message::Ping(b"hello".to_vec()))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        assert!(!remaining.is_zero(), "no pong before deadline");
        if let Ok(Some(Ok(message))) = timeout(remaining, ws.next()).await {
            if let tokio_tungstenite::tungstenite::Message::Pong(payload) = message {
                assert_eq!(payload, b"hello");
                break;
            }
        } else {
            panic!("websocket closed before pong");
        }
    }

    ws.close(None).await.ok();
}

#[tokio::test]
async fn subscriber_count_returns_to_zero() {
    let server = start_server(10).await;

    for _ in 0..10 {
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream
            .write_all(b"GET /stream HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        // Wait for at least the response head, then hang up.
        let mut chunk = [0u8; 1024];
        let _ = timeout(Duration::from_secs(2), stream.read(&mut chunk)).await;
        drop(stream);

        // The server notices the closed socket on its next write.
        timeout(Duration::from_secs(2), async {
            while server.producer.subscriber_count() != 0 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("subscriber count did not return to zero");
    }

    // With no subscribers the capture task stops within ~1 s.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = server.producer.capture_count();
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(
        server.producer.capture_count(),
        settled,
        "capture kept running after the last unsubscribe"
    );
}

#[tokio::test]
async fn sse_delivers_build_status_events_in_order() {
    let server = start_server(5).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /api/events HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    // Consume the response head first.
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while find(&buf, b"\r\n\r\n").is_none() {
        let n = timeout(Duration::from_secs(2), stream.read(&mut chunk))
            .await
            .expect("no SSE head")
            .unwrap();
        assert!(n > 0, "connection closed before head");
        buf.extend_from_slice(&chunk[..n]);
    }
    let head_end = find(&buf, b"\r\n\r\n").unwrap();
    assert!(std::str::from_utf8(&buf[..head_end])
        .unwrap()
        .contains("text/event-stream"));
    buf.drain(..head_end + 4);

    // The broadcaster holds only the latest event, so space the two
    // updates beyond the SSE poll interval to observe both.
    server.status.update(BuildStatus::Building, "compiling");
    tokio::time::sleep(Duration::from_millis(600)).await;
    server.status.update(BuildStatus::Ready, "");

    // Both events arrive as separate `data:` lines, in order.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut events = Vec::new();
    while events.len() < 2 {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        assert!(!remaining.is_zero(), "SSE events missing: got {events:?}");
        if let Ok(Ok(n)) = timeout(remaining, stream.read(&mut chunk)).await {
            assert!(n > 0);
            buf.extend_from_slice(&chunk[..n]);
            while let Some(end) = find(&buf, b"\n\n") {
                let line = String::from_utf8(buf[..end].to_vec()).unwrap();
                buf.drain(..end + 2);
                if let Some(json) = line.strip_prefix("data: ") {
                    events.push(serde_json::from_str::<serde_json::Value>(json).unwrap());
                }
            }
        }
    }

    assert_eq!(
        events[0],
        serde_json::json!({"status": "building", "message": "compiling"})
    );
    assert_eq!(events[1], serde_json::json!({"status": "ready", "message": ""}));
}

#[tokio::test]
async fn fps_boundaries_produce_running_streams() {
    for fps in [1u32, 30] {
        let server = start_server(fps).await;
        let (status, _, body) =
            timeout(Duration::from_secs(4), http_get(server.addr, "/frame"))
                .await
                .expect("/frame timed out");
        assert_eq!(status, 200, "fps={fps}");
        assert_eq!(&body[0..2], &[0xFF, 0xD8], "fps={fps}");
    }
}
