//! Domain-specific error types for the preview pipeline.
//!
//! All fallible operations return `Result<T, PreviewError>`.
//! No panics on invalid input — every error is typed and recoverable.

use thiserror::Error;

/// The canonical error type for the preview pipeline.
#[derive(Debug, Error)]
pub enum PreviewError {
    // ── Image Errors ─────────────────────────────────────────────
    /// The TIFF byte-order marker or magic number is wrong.
    #[error("invalid TIFF header")]
    InvalidTiffHeader,

    /// The image uses a feature the decoder does not handle.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A required TIFF IFD tag is absent.
    #[error("missing required TIFF tag {0}")]
    MissingTag(u16),

    /// An IFD entry or strip points outside the input buffer.
    #[error("TIFF data out of bounds")]
    TiffOutOfBounds,

    // ── Capture Errors ───────────────────────────────────────────
    /// The capture tool binary could not be located on disk.
    #[error("capture tool not found: {0}")]
    ToolMissing(String),

    /// Every configured capture tool failed.
    #[error(
        "all capture tools failed; check the device is connected and the \
         developer tunnel is running (`pymobiledevice3 remote tunneld`)"
    )]
    AllToolsFailed,

    /// A capture tool exited non-zero; stderr is captured verbatim.
    #[error("{tool} exited with status {status}: {stderr}")]
    Subprocess {
        tool: String,
        status: i32,
        stderr: String,
    },

    /// The device rejected a handshake or service start.
    #[error("device protocol error: {0}")]
    Protocol(String),

    /// A single frame capture failed; the capture loop retries.
    #[error("capture failed: {0}")]
    Capture(String),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent something that is not parseable HTTP/1.1.
    #[error("malformed HTTP request: {0}")]
    BadRequest(&'static str),
}
