//! Server-Sent Events loop for build-status updates.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::server::http;
use crate::status::BuildStatusBroadcaster;

/// How often the broadcaster is polled. Build events arrive at human
/// cadence, so a fixed 250 ms poll is plenty.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Serve one `/api/events` connection, emitting one `data:` line per
/// build-status update observed after the client connected.
pub(super) async fn serve(
    status: Arc<BuildStatusBroadcaster>,
    stream: &mut TcpStream,
) -> std::io::Result<()> {
    // Snapshot before committing the head so anything published after
    // the client saw the 200 is guaranteed to be delivered.
    let mut last_sequence = status.current().sequence;
    http::write_stream_head(stream, "text/event-stream", &[]).await?;

    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let event = status.current();
        if event.sequence > last_sequence {
            last_sequence = event.sequence;
            let payload = serde_json::json!({
                "status": event.status,
                "message": event.message,
            });
            let line = format!("data: {payload}\n\n");
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await?;
        }
    }
}
