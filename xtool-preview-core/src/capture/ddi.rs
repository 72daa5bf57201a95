//! Developer disk image cache and mount helper.
//!
//! Developer services (screenshot capture included) only exist once a
//! developer disk image is mounted on the device. Downloaded images
//! are cached under `~/.xtool/ddi/`; mounting is delegated to the
//! external mounter tool and treated as best-effort, so the service
//! start surfaces the clearer error when mounting was the problem.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::capture::subprocess::find_tool;

/// File names of a cached developer disk image.
pub const MANIFEST: &str = "BuildManifest.plist";
pub const IMAGE: &str = "Image.dmg";
pub const TRUSTCACHE: &str = "Image.dmg.trustcache";

/// `~/.xtool/ddi/`, or `None` when no home directory is set.
pub fn cache_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".xtool").join("ddi"))
}

/// Paths of a complete cached image, if all three files are present.
pub fn cached_image() -> Option<(PathBuf, PathBuf, PathBuf)> {
    let dir = cache_dir()?;
    let manifest = dir.join(MANIFEST);
    let image = dir.join(IMAGE);
    let trustcache = dir.join(TRUSTCACHE);
    if manifest.is_file() && image.is_file() && trustcache.is_file() {
        Some((manifest, image, trustcache))
    } else {
        None
    }
}

/// Write a downloaded artefact into the cache atomically: the bytes
/// land in a temporary sibling first and are renamed into place, so a
/// failed download never leaves a partial file behind.
pub fn stage_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let partial = path.with_extension("part");
    if let Err(e) = std::fs::write(&partial, bytes) {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }
    std::fs::rename(&partial, path)
}

/// Best-effort developer disk image mount via the external mounter.
///
/// Failures are swallowed deliberately: when the image is already
/// mounted the tool exits non-zero, and when mounting genuinely fails
/// the subsequent service start produces the actionable error.
pub async fn mount_if_needed(udid: Option<&str>) {
    let Some(mounter) = find_tool("pymobiledevice3") else {
        debug!("no mounter tool on disk, skipping developer disk image mount");
        return;
    };

    if let Some(dir) = cache_dir() {
        let _ = std::fs::create_dir_all(&dir);
    }

    let mut cmd = Command::new(&mounter);
    cmd.args(["mounter", "auto-mount"]);
    if let Some(udid) = udid {
        cmd.args(["--udid", udid]);
    }

    match cmd.output().await {
        Ok(output) if output.status.success() => {
            debug!("developer disk image mounted");
        }
        Ok(output) => {
            debug!(
                status = output.status.code().unwrap_or(-1),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "mounter exited non-zero (image may already be mounted)"
            );
        }
        Err(e) => {
            warn!(error = %e, "failed to run developer disk image mounter");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
