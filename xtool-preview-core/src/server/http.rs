//! Minimal HTTP/1.1 request parsing and response writing.
//!
//! The preview server speaks exactly the handful of GET routes it
//! exposes, so the request head is parsed by hand: read up to the
//! blank line, split the request line, collect headers. Responses are
//! written the same way.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::PreviewError;

/// Upper bound on the request head; anything bigger is not a browser
/// asking for a preview.
const MAX_HEAD: usize = 16 * 1024;

// ── Request ──────────────────────────────────────────────────────

/// A parsed request head.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    /// Raw request target, query string included.
    pub target: String,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Path portion of the target, before any query string.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.target)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether this request carries the standard WebSocket upgrade
    /// headers.
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        let connection = self
            .header("connection")
            .map(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false);
        upgrade && connection && self.header("sec-websocket-key").is_some()
    }
}

/// Read and parse one request head from the stream.
pub async fn read_request<S>(stream: &mut S) -> Result<Request, PreviewError>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(PreviewError::BadRequest("connection closed mid-request"));
        }
        head.extend_from_slice(&chunk[..n]);
        if let Some(at) = find_head_end(&head) {
            break at;
        }
        if head.len() > MAX_HEAD {
            return Err(PreviewError::BadRequest("request head too large"));
        }
    };

    parse_head(&head[..header_end])
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(head: &[u8]) -> Result<Request, PreviewError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| PreviewError::BadRequest("request head is not UTF-8"))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or(PreviewError::BadRequest("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or(PreviewError::BadRequest("missing method"))?;
    let target = parts
        .next()
        .ok_or(PreviewError::BadRequest("missing request target"))?;
    let version = parts
        .next()
        .ok_or(PreviewError::BadRequest("missing HTTP version"))?;
    if !version.starts_with("HTTP/1.") {
        return Err(PreviewError::BadRequest("unsupported HTTP version"));
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(PreviewError::BadRequest("malformed header line"))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(Request {
        method: method.to_string(),
        target: target.to_string(),
        headers,
    })
}

// ── Responses ────────────────────────────────────────────────────

/// Write a complete response with a body and `Connection: close`.
pub async fn write_response<S>(
    stream: &mut S,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

/// Write a streaming response head (no `Content-Length`); the caller
/// owns the connection from here on.
pub async fn write_stream_head<S>(
    stream: &mut S,
    content_type: &str,
    extra_headers: &[(&str, &str)],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut head = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {content_type}\r\n\
         Cache-Control: no-cache, no-store, must-revalidate\r\n\
         Pragma: no-cache\r\n\
         Connection: close\r\n"
    );
    for (name, value) in extra_headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await?;
    stream.flush().await
}

// ── Tests ────────────────────────────────────────────────────────
