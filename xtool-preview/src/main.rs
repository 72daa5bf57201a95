//! xtool-preview — mirror a tethered device screen to a web browser.
//!
//! ```text
//! xtool-preview                          Serve on 0.0.0.0:8034
//! xtool-preview --fps 10 --port 9000     Tune rate and port
//! xtool-preview --capture-tool pymobiledevice3
//! xtool-preview --watch Sources --on-change "xtool dev --install"
//! ```

use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use xtool_preview_core::capture::direct::DirectCapture;
use xtool_preview_core::capture::subprocess::SubprocessCapture;
use xtool_preview_core::capture::{CaptureBackend, CapturePreference, CaptureTool};
use xtool_preview_core::watcher::{FileWatcher, WatcherConfig};
use xtool_preview_core::{
    BuildStatus, BuildStatusBroadcaster, DeviceIdentity, FrameProducer, PreviewConfig,
    PreviewServer,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CaptureToolArg {
    Auto,
    Idevicescreenshot,
    Pymobiledevice3,
}

impl From<CaptureToolArg> for CapturePreference {
    fn from(arg: CaptureToolArg) -> Self {
        match arg {
            CaptureToolArg::Auto => CapturePreference::Auto,
            CaptureToolArg::Idevicescreenshot => {
                CapturePreference::Fixed(CaptureTool::Idevicescreenshot)
            }
            CaptureToolArg::Pymobiledevice3 => {
                CapturePreference::Fixed(CaptureTool::Pymobiledevice3)
            }
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "xtool-preview", about = "Live device screen preview in the browser")]
struct Cli {
    /// Port for the preview server.
    #[arg(long, default_value_t = 8034, value_parser = clap::value_parser!(u16).range(1024..=65535))]
    port: u16,

    /// Target frames per second.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=30))]
    fps: u32,

    /// JPEG quality for transcoded frames.
    #[arg(long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Screenshot tool to use for subprocess capture.
    #[arg(long, value_enum, default_value_t = CaptureToolArg::Auto)]
    capture_tool: CaptureToolArg,

    /// Force subprocess capture even where the in-process backend is
    /// available.
    #[arg(long)]
    use_process_capture: bool,

    /// Do not open the viewer in a browser.
    #[arg(long)]
    no_browser: bool,

    /// UDID of the device to mirror (first attached device otherwise).
    #[arg(long)]
    udid: Option<String>,

    /// Device name shown in the viewer.
    #[arg(long, default_value = "Device")]
    device_name: String,

    /// Product identifier selecting the device frame (e.g. iPhone15,2).
    #[arg(long, default_value = "")]
    product_type: String,

    /// Watch a source directory and trigger `--on-change` on edits.
    #[arg(long, requires = "on_change")]
    watch: Option<std::path::PathBuf>,

    /// Shell command run after each debounced source change.
    #[arg(long)]
    on_change: Option<String>,

    /// Source extension the watcher reacts to.
    #[arg(long, default_value = "swift")]
    watch_ext: String,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("xtool-preview v{}", env!("CARGO_PKG_VERSION"));

    let config = PreviewConfig {
        addr: ([0, 0, 0, 0], cli.port).into(),
        fps: cli.fps,
        quality: cli.quality,
        device: DeviceIdentity {
            name: cli.device_name.clone(),
            udid: cli.udid.clone().unwrap_or_default(),
            product_type: cli.product_type.clone(),
        },
    };

    let producer = start_producer(&cli, &config).await?;
    let status = Arc::new(BuildStatusBroadcaster::new());

    let server = PreviewServer::new(config, Arc::clone(&producer), Arc::clone(&status));
    let listener = server.bind().context("failed to bind preview server")?;
    let local_addr = listener.local_addr()?;

    // Ctrl-C stops the accept loop.
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutting down");
        shutdown.cancel();
    });

    let watcher = cli.watch.as_ref().map(|dir| {
        spawn_rebuild_watcher(
            dir.clone(),
            cli.watch_ext.clone(),
            cli.on_change.clone().expect("clap enforces --on-change"),
            Arc::clone(&status),
        )
    });

    if !cli.no_browser {
        open_browser(&format!("http://127.0.0.1:{}/", local_addr.port()));
    }

    let result = server.serve(listener).await;

    if let Some(watcher) = watcher {
        watcher.shutdown().await;
    }
    producer.stop().await;

    result.context("preview server failed")
}

/// Build and start the frame producer.
///
/// The in-process backend is preferred where available; a start
/// failure there falls back to subprocess capture, which is the
/// portable path.
async fn start_producer(cli: &Cli, config: &PreviewConfig) -> anyhow::Result<Arc<FrameProducer>> {
    if !cli.use_process_capture {
        let direct = Box::new(DirectCapture::new(cli.udid.clone()));
        let producer = FrameProducer::new(direct, config.fps, config.quality);
        match producer.start().await {
            Ok(()) => {
                info!("using in-process capture");
                return Ok(producer);
            }
            Err(e) => {
                warn!(error = %e, "in-process capture unavailable, falling back to capture tools");
            }
        }
    }

    let subprocess: Box<dyn CaptureBackend> = Box::new(SubprocessCapture::new(
        cli.capture_tool.into(),
        cli.udid.clone(),
    ));
    let producer = FrameProducer::new(subprocess, config.fps, config.quality);
    producer
        .start()
        .await
        .context("failed to start capture backend")?;
    Ok(producer)
}

/// Wire the file watcher to the rebuild command, publishing build
/// status around each run.
fn spawn_rebuild_watcher(
    dir: std::path::PathBuf,
    extension: String,
    command: String,
    status: Arc<BuildStatusBroadcaster>,
) -> FileWatcher {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            status.update(BuildStatus::Building, "source change detected");
            info!(command = %command, "running rebuild");

            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .stdin(Stdio::null())
                .output()
                .await;

            match output {
                Ok(output) if output.status.success() => {
                    status.update(BuildStatus::Ready, "");
                    info!("rebuild finished");
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    error!(
                        status = output.status.code().unwrap_or(-1),
                        %stderr,
                        "rebuild failed"
                    );
                    status.update(BuildStatus::Error, stderr);
                }
                Err(e) => {
                    error!(error = %e, "failed to run rebuild command");
                    status.update(BuildStatus::Error, e.to_string());
                }
            }
        }
    });

    let mut config = WatcherConfig::new(dir);
    config.extension = extension;
    FileWatcher::spawn(config, move || {
        let _ = tx.send(());
    })
}

/// Best-effort browser launch; failure only costs the user a click.
fn open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(not(target_os = "macos"))]
    let opener = "xdg-open";

    match std::process::Command::new(opener)
        .arg(url)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(_) => info!(%url, "opened viewer in browser"),
        Err(e) => warn!(error = %e, %url, "could not open browser"),
    }
}
