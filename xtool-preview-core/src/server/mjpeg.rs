//! MJPEG multipart stream loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::producer::FrameProducer;
use crate::server::http;

/// Multipart boundary; chosen so it can never collide with JPEG data.
pub const BOUNDARY: &str = "xtool-preview-frame";

/// Serve one `/stream` connection.
///
/// Pull-latest-by-sequence: a part is written only when the producer's
/// latest frame is newer than the last one sent, so a slow client
/// skips frames instead of accumulating them. Writes are awaited,
/// which is what paces the loop under backpressure. Any write failure
/// ends the connection; the caller releases the subscription.
pub(super) async fn serve(
    producer: Arc<FrameProducer>,
    stream: &mut TcpStream,
    fps: u32,
) -> std::io::Result<()> {
    http::write_stream_head(
        stream,
        &format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        &[],
    )
    .await?;

    let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut last_sent = 0u64;

    loop {
        if let Some(frame) = producer.latest_frame() {
            if frame.sequence > last_sent {
                let part_head = format!(
                    "--{BOUNDARY}\r\n\
                     Content-Type: {}\r\n\
                     Content-Length: {}\r\n\
                     \r\n",
                    frame.mime.as_str(),
                    frame.bytes.len()
                );
                stream.write_all(part_head.as_bytes()).await?;
                stream.write_all(&frame.bytes).await?;
                stream.write_all(b"\r\n").await?;
                stream.flush().await?;
                last_sent = frame.sequence;
            }
        }
        tokio::time::sleep(interval).await;
    }
}
