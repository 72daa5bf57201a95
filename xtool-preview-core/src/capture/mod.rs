//! Capture backends.
//!
//! A backend is an abstract source yielding one image blob per call.
//! The portable default shells out to the device CLI tools
//! ([`subprocess::SubprocessCapture`]); where a device mux daemon is
//! available an in-process variant ([`direct::DirectCapture`]) speaks
//! the device RPC protocol itself.

pub mod ddi;
pub mod direct;
pub mod subprocess;

use async_trait::async_trait;

use crate::error::PreviewError;

// ── CaptureTool ──────────────────────────────────────────────────

/// The external screenshot tools the subprocess backend can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTool {
    /// `idevicescreenshot` from libimobiledevice; writes TIFF. Fast,
    /// no interpreter start-up, so it is tried first.
    Idevicescreenshot,
    /// `pymobiledevice3 developer dvt screenshot`; writes PNG.
    Pymobiledevice3,
}

impl CaptureTool {
    /// Binary name searched for on disk.
    pub const fn binary(self) -> &'static str {
        match self {
            CaptureTool::Idevicescreenshot => "idevicescreenshot",
            CaptureTool::Pymobiledevice3 => "pymobiledevice3",
        }
    }

    /// File extension of the tool's output.
    pub const fn extension(self) -> &'static str {
        match self {
            CaptureTool::Idevicescreenshot => "tiff",
            CaptureTool::Pymobiledevice3 => "png",
        }
    }
}

/// Which tool the subprocess backend should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePreference {
    /// Try each tool in order; the first one that succeeds is used for
    /// the lifetime of the backend.
    #[default]
    Auto,
    Fixed(CaptureTool),
}

// ── CaptureBackend ───────────────────────────────────────────────

/// Abstract frame source.
///
/// `start` acquires resources (temp directories, device sessions),
/// `capture_frame` yields one encoded image blob, `stop` releases
/// everything. Backends are driven from a single task and need not be
/// re-startable.
#[async_trait]
pub trait CaptureBackend: Send {
    async fn start(&mut self) -> Result<(), PreviewError>;
    async fn capture_frame(&mut self) -> Result<Vec<u8>, PreviewError>;
    async fn stop(&mut self) -> Result<(), PreviewError>;
}
