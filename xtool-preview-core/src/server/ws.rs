//! WebSocket upgrade and frame loop.
//!
//! The HTTP head is already parsed by the time this module sees the
//! connection, so the upgrade is answered by hand and the raw socket
//! is handed to tungstenite for RFC 6455 framing.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::producer::FrameProducer;
use crate::server::http::Request;

/// Serve one `/ws` connection: answer the upgrade, then push each new
/// frame as a single binary message while answering control frames.
pub(super) async fn serve(
    producer: Arc<FrameProducer>,
    mut stream: TcpStream,
    request: &Request,
    fps: u32,
) -> std::io::Result<()> {
    let Some(key) = request.header("sec-websocket-key") else {
        // Upgrade detection guarantees the key; be defensive anyway.
        return Ok(());
    };
    let accept = derive_accept_key(key.as_bytes());

    // The upgrade response carries only the standard headers.
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    let (mut sender, mut receiver) = ws.split();

    let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut last_sent = 0u64;

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Ping(payload))) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let _ = sender.send(Message::Close(frame)).await;
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text and pong frames carry nothing for us.
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket receive error");
                        break;
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep(interval) => {
                if let Some(frame) = producer.latest_frame() {
                    if frame.sequence > last_sent {
                        let message = Message::Binary(frame.bytes.clone());
                        if sender.send(message).await.is_err() {
                            break;
                        }
                        last_sent = frame.sequence;
                    }
                }
            }
        }
    }

    Ok(())
}
