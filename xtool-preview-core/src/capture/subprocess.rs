//! Subprocess-based capture backend.
//!
//! Spawns an external screenshot tool per frame, writing into a
//! per-process temp directory. Two tools are supported; under
//! [`CapturePreference::Auto`] the first tool that produces a frame
//! becomes sticky for the lifetime of the backend.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::capture::{CaptureBackend, CapturePreference, CaptureTool};
use crate::error::PreviewError;

/// Environment variable naming a directory of vendored tool binaries,
/// searched before anything else.
pub const BUNDLE_DIR_ENV: &str = "XTOOL_BUNDLE_DIR";

// ── Tool discovery ───────────────────────────────────────────────

/// Directories searched for tool binaries, in priority order: the
/// bundle override, the running executable's directory, the usual
/// system locations, then every `PATH` entry.
fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(bundle) = std::env::var_os(BUNDLE_DIR_ENV) {
        dirs.push(PathBuf::from(bundle));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs.push(PathBuf::from("/usr/bin"));
    dirs.push(PathBuf::from("/usr/local/bin"));
    dirs.push(PathBuf::from("/usr/sbin"));
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    dirs
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Locate a tool binary; the first executable match wins.
pub fn find_tool(binary: &str) -> Option<PathBuf> {
    search_dirs()
        .into_iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

/// Command-line arguments for one capture invocation.
fn tool_args(tool: CaptureTool, udid: Option<&str>, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    match tool {
        CaptureTool::Idevicescreenshot => {
            if let Some(udid) = udid {
                args.push("-u".into());
                args.push(udid.into());
            }
            args.push(output.into());
        }
        CaptureTool::Pymobiledevice3 => {
            args.push("developer".into());
            args.push("dvt".into());
            args.push("screenshot".into());
            args.push(output.into());
            if let Some(udid) = udid {
                args.push("--udid".into());
                args.push(udid.into());
            }
        }
    }
    args
}

// ── SubprocessCapture ────────────────────────────────────────────

/// Capture backend that shells out to a screenshot tool per frame.
pub struct SubprocessCapture {
    preference: CapturePreference,
    udid: Option<String>,
    temp_dir: PathBuf,
    /// Per-instance frame counter used for unique output filenames.
    /// Never reset: over very long runs the names simply keep growing.
    frame_counter: u64,
    /// Resolved (tool, path) that produced the last successful frame.
    /// Under `Auto` this sticks after the first success.
    active: Option<(CaptureTool, PathBuf)>,
}

impl SubprocessCapture {
    pub fn new(preference: CapturePreference, udid: Option<String>) -> Self {
        let temp_dir =
            std::env::temp_dir().join(format!("xtool-preview-{}", std::process::id()));
        Self {
            preference,
            udid,
            temp_dir,
            frame_counter: 0,
            active: None,
        }
    }

    /// Tools to try, in order, for the configured preference.
    fn candidates(&self) -> Vec<CaptureTool> {
        match self.preference {
            CapturePreference::Auto => {
                vec![CaptureTool::Idevicescreenshot, CaptureTool::Pymobiledevice3]
            }
            CapturePreference::Fixed(tool) => vec![tool],
        }
    }

    fn output_path(&mut self, tool: CaptureTool) -> PathBuf {
        self.frame_counter += 1;
        self.temp_dir
            .join(format!("frame-{}.{}", self.frame_counter, tool.extension()))
    }

    /// Run one tool invocation and read back the frame it wrote.
    async fn run_tool(
        &self,
        tool: CaptureTool,
        path: &Path,
        output: &Path,
    ) -> Result<Vec<u8>, PreviewError> {
        let result = Command::new(path)
            .args(tool_args(tool, self.udid.as_deref(), output))
            .output()
            .await?;

        if !result.status.success() {
            let _ = tokio::fs::remove_file(output).await;
            return Err(PreviewError::Subprocess {
                tool: tool.binary().to_string(),
                status: result.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let bytes = tokio::fs::read(output).await?;
        let _ = tokio::fs::remove_file(output).await;
        if bytes.is_empty() {
            return Err(PreviewError::Capture(format!(
                "{} wrote an empty screenshot",
                tool.binary()
            )));
        }
        Ok(bytes)
    }
}

#[async_trait::async_trait]
impl CaptureBackend for SubprocessCapture {
    async fn start(&mut self) -> Result<(), PreviewError> {
        // At least one candidate must exist on disk before we commit
        // to the capture loop.
        let available = self
            .candidates()
            .iter()
            .any(|tool| find_tool(tool.binary()).is_some());
        if !available {
            let names: Vec<&str> = self.candidates().iter().map(|t| t.binary()).collect();
            return Err(PreviewError::ToolMissing(names.join(", ")));
        }

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        debug!(dir = %self.temp_dir.display(), "capture temp directory ready");
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Vec<u8>, PreviewError> {
        // Sticky tool from an earlier success.
        if let Some((tool, path)) = self.active.clone() {
            let output = self.output_path(tool);
            return self.run_tool(tool, &path, &output).await;
        }

        for tool in self.candidates() {
            let Some(path) = find_tool(tool.binary()) else {
                debug!(tool = tool.binary(), "not on disk, skipping");
                continue;
            };
            let output = self.output_path(tool);
            match self.run_tool(tool, &path, &output).await {
                Ok(bytes) => {
                    debug!(tool = tool.binary(), "capture tool selected");
                    self.active = Some((tool, path));
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(tool = tool.binary(), error = %e, "capture attempt failed");
                }
            }
        }
        Err(PreviewError::AllToolsFailed)
    }

    async fn stop(&mut self) -> Result<(), PreviewError> {
        let _ = tokio::fs::remove_dir_all(&self.temp_dir).await;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
