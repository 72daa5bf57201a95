//! In-process capture backend speaking the device mux protocol.
//!
//! Instead of shelling out per frame, this backend opens a session
//! through the device mux daemon, starts the screenshot service via
//! lockdown and asks it for a frame on every call:
//!
//! 1. `ListDevices` on the mux socket to resolve the device id.
//! 2. `Connect` to the lockdown port and `StartService` for
//!    `com.apple.mobile.screenshotr`.
//! 3. `Connect` to the returned service port, run the DeviceLink
//!    version exchange, then issue one `ScreenShotRequest` per frame.
//!
//! # Platform
//!
//! The mux daemon listens on a Unix socket, so this module is
//! **unix-only**. On other platforms the type is still defined but
//! construction fails at runtime. Devices that insist on a paired TLS
//! lockdown session reject the plaintext `StartService` and surface a
//! protocol error; the subprocess backend remains the portable
//! default.

use crate::error::PreviewError;

/// Environment variable overriding the mux socket path.
pub const MUX_SOCKET_ENV: &str = "USBMUXD_SOCKET_ADDRESS";

/// Default mux daemon socket.
pub const MUX_SOCKET_DEFAULT: &str = "/var/run/usbmuxd";

/// Lockdown daemon port on the device.
const LOCKDOWN_PORT: u16 = 62078;

/// The screenshot service started through lockdown.
const SCREENSHOT_SERVICE: &str = "com.apple.mobile.screenshotr";

// ── Mux framing ──────────────────────────────────────────────────

/// 16-byte mux packet header (all fields little-endian).
///
/// ```text
/// length:       u32  (4)  total packet size including this header
/// version:      u32  (4)  protocol version, 1 for plist packets
/// message_type: u32  (4)  8 = plist payload
/// tag:          u32  (4)  request/response correlation tag
/// ```
#[derive(Debug, Clone, Copy)]
struct MuxHeader {
    length: u32,
    version: u32,
    message_type: u32,
    tag: u32,
}

impl MuxHeader {
    const SIZE: usize = 16;
    const VERSION_PLIST: u32 = 1;
    const TYPE_PLIST: u32 = 8;

    fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.message_type.to_le_bytes());
        buf[12..16].copy_from_slice(&self.tag.to_le_bytes());
        buf
    }

    fn decode(data: &[u8]) -> Result<Self, PreviewError> {
        if data.len() < Self::SIZE {
            return Err(PreviewError::Protocol("short mux header".into()));
        }
        Ok(Self {
            length: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            version: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            message_type: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            tag: u32::from_le_bytes(data[12..16].try_into().unwrap()),
        })
    }
}

// ── XML plist helpers ────────────────────────────────────────────
//
// The mux and lockdown daemons accept XML property lists; replies are
// scanned with tolerant key lookups rather than a full parser, which
// is all these fixed-shape exchanges need.

fn xml_doc(inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \
         \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
         <plist version=\"1.0\">{inner}</plist>\n"
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Value of `<key>name</key><string>…</string>`, if present.
fn extract_string(xml: &str, key: &str) -> Option<String> {
    let after = &xml[xml.find(&format!("<key>{key}</key>"))?..];
    let start = after.find("<string>")? + "<string>".len();
    let end = after.find("</string>")?;
    (start <= end).then(|| after[start..end].to_string())
}

/// Value of `<key>name</key><integer>…</integer>`, if present.
fn extract_int(xml: &str, key: &str) -> Option<i64> {
    let after = &xml[xml.find(&format!("<key>{key}</key>"))?..];
    let start = after.find("<integer>")? + "<integer>".len();
    let end = after.find("</integer>")?;
    after.get(start..end)?.trim().parse().ok()
}

/// Largest data object in a binary plist.
///
/// DeviceLink replies are binary plists; the screenshot bytes are by
/// far the largest `data` object in the reply, so a marker scan that
/// keeps the longest in-bounds candidate recovers them without a full
/// bplist parser.
fn extract_bplist_data(buf: &[u8]) -> Option<Vec<u8>> {
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < buf.len() {
        let marker = buf[i];
        if marker & 0xF0 == 0x40 {
            let small = (marker & 0x0F) as usize;
            let (len, data_at) = if small == 0x0F {
                // Length follows as an int object: 0x10 | byte-width exponent.
                let Some(&int_marker) = buf.get(i + 1) else {
                    i += 1;
                    continue;
                };
                if int_marker & 0xF0 != 0x10 {
                    i += 1;
                    continue;
                }
                let width = 1usize << (int_marker & 0x0F);
                let Some(raw) = buf.get(i + 2..i + 2 + width) else {
                    i += 1;
                    continue;
                };
                let mut len = 0usize;
                for &b in raw {
                    len = (len << 8) | b as usize;
                }
                (len, i + 2 + width)
            } else {
                (small, i + 1)
            };

            if data_at + len <= buf.len() {
                let better = best.map(|(_, l)| len > l).unwrap_or(true);
                if better {
                    best = Some((data_at, len));
                }
            }
        }
        i += 1;
    }
    best.map(|(at, len)| buf[at..at + len].to_vec())
}

/// Lockdown/service port numbers travel byte-swapped in mux `Connect`.
const fn swap_port(port: u16) -> u16 {
    port.swap_bytes()
}

// ── Unix implementation ──────────────────────────────────────────

#[cfg(unix)]
mod platform {
    use std::path::PathBuf;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;
    use tracing::debug;

    use super::*;
    use crate::capture::{ddi, CaptureBackend};

    /// Upper bound on frame payloads: a raw screenshot of the largest
    /// current display is ~15 MB, so 64 MB is comfortably paranoid.
    const MAX_FRAME: u32 = 64 * 1024 * 1024;

    /// In-process capture backend over the device mux.
    pub struct DirectCapture {
        udid: Option<String>,
        tag: u32,
        /// Open DeviceLink session to the screenshot service.
        session: Option<UnixStream>,
    }

    impl DirectCapture {
        pub fn new(udid: Option<String>) -> Self {
            Self {
                udid,
                tag: 0,
                session: None,
            }
        }

        fn socket_path() -> PathBuf {
            std::env::var_os(MUX_SOCKET_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(MUX_SOCKET_DEFAULT))
        }

        async fn connect_mux() -> Result<UnixStream, PreviewError> {
            let path = Self::socket_path();
            UnixStream::connect(&path).await.map_err(|e| {
                PreviewError::Protocol(format!(
                    "cannot reach mux daemon at {}: {e}",
                    path.display()
                ))
            })
        }

        /// One plist request/response round-trip on the mux socket.
        async fn mux_request(
            &mut self,
            stream: &mut UnixStream,
            payload: &str,
        ) -> Result<String, PreviewError> {
            self.tag += 1;
            let header = MuxHeader {
                length: (MuxHeader::SIZE + payload.len()) as u32,
                version: MuxHeader::VERSION_PLIST,
                message_type: MuxHeader::TYPE_PLIST,
                tag: self.tag,
            };
            stream.write_all(&header.encode()).await?;
            stream.write_all(payload.as_bytes()).await?;

            let mut head = [0u8; MuxHeader::SIZE];
            stream.read_exact(&mut head).await?;
            let header = MuxHeader::decode(&head)?;
            if header.length < MuxHeader::SIZE as u32 || header.length > MAX_FRAME {
                return Err(PreviewError::Protocol(format!(
                    "implausible mux reply length {}",
                    header.length
                )));
            }

            let mut body = vec![0u8; header.length as usize - MuxHeader::SIZE];
            stream.read_exact(&mut body).await?;
            Ok(String::from_utf8_lossy(&body).into_owned())
        }

        /// Resolve the mux device id, honouring the configured UDID.
        async fn resolve_device(&mut self) -> Result<i64, PreviewError> {
            let mut stream = Self::connect_mux().await?;
            let request = xml_doc(
                "<dict>\
                 <key>MessageType</key><string>ListDevices</string>\
                 <key>ProgName</key><string>xtool-preview</string>\
                 <key>ClientVersionString</key><string>xtool-preview</string>\
                 </dict>",
            );
            let reply = self.mux_request(&mut stream, &request).await?;

            // Each attached device appears as a dict carrying both its
            // DeviceID and SerialNumber.
            for chunk in reply.split("<dict>") {
                let Some(serial) = extract_string(chunk, "SerialNumber") else {
                    continue;
                };
                let Some(id) = extract_int(chunk, "DeviceID") else {
                    continue;
                };
                match &self.udid {
                    Some(udid) if *udid != serial => continue,
                    _ => return Ok(id),
                }
            }
            Err(PreviewError::Protocol(match &self.udid {
                Some(udid) => format!("device {udid} not attached to the mux"),
                None => "no device attached to the mux".into(),
            }))
        }

        /// Open a tunnelled connection to a TCP port on the device.
        async fn connect_device_port(
            &mut self,
            device_id: i64,
            port: u16,
        ) -> Result<UnixStream, PreviewError> {
            let mut stream = Self::connect_mux().await?;
            let request = xml_doc(&format!(
                "<dict>\
                 <key>MessageType</key><string>Connect</string>\
                 <key>DeviceID</key><integer>{device_id}</integer>\
                 <key>PortNumber</key><integer>{}</integer>\
                 <key>ProgName</key><string>xtool-preview</string>\
                 </dict>",
                swap_port(port)
            ));
            let reply = self.mux_request(&mut stream, &request).await?;
            match extract_int(&reply, "Number") {
                Some(0) => Ok(stream),
                Some(code) => Err(PreviewError::Protocol(format!(
                    "mux refused connection to port {port} (result {code})"
                ))),
                None => Err(PreviewError::Protocol(
                    "mux Connect reply carried no result".into(),
                )),
            }
        }

        /// One length-prefixed plist round-trip on a device connection
        /// (lockdown and DeviceLink both use u32-BE framing).
        async fn device_request(
            stream: &mut UnixStream,
            payload: &str,
        ) -> Result<Vec<u8>, PreviewError> {
            stream
                .write_all(&(payload.len() as u32).to_be_bytes())
                .await?;
            stream.write_all(payload.as_bytes()).await?;
            Self::read_device_frame(stream).await
        }

        async fn read_device_frame(stream: &mut UnixStream) -> Result<Vec<u8>, PreviewError> {
            let mut len = [0u8; 4];
            stream.read_exact(&mut len).await?;
            let len = u32::from_be_bytes(len);
            if len == 0 || len > MAX_FRAME {
                return Err(PreviewError::Protocol(format!(
                    "implausible device frame length {len}"
                )));
            }
            let mut body = vec![0u8; len as usize];
            stream.read_exact(&mut body).await?;
            Ok(body)
        }

        /// Lockdown handshake: query the daemon, then start the
        /// screenshot service and return its port.
        async fn start_screenshot_service(
            &mut self,
            device_id: i64,
        ) -> Result<u16, PreviewError> {
            let mut lockdown = self.connect_device_port(device_id, LOCKDOWN_PORT).await?;

            let query = xml_doc(
                "<dict><key>Request</key><string>QueryType</string></dict>",
            );
            let reply = Self::device_request(&mut lockdown, &query).await?;
            debug!(bytes = reply.len(), "lockdown answered QueryType");

            let start = xml_doc(&format!(
                "<dict>\
                 <key>Request</key><string>StartService</string>\
                 <key>Service</key><string>{}</string>\
                 </dict>",
                xml_escape(SCREENSHOT_SERVICE)
            ));
            let reply = Self::device_request(&mut lockdown, &start).await?;
            let reply = String::from_utf8_lossy(&reply).into_owned();

            if let Some(error) = extract_string(&reply, "Error") {
                return Err(PreviewError::Protocol(format!(
                    "device refused {SCREENSHOT_SERVICE}: {error}"
                )));
            }
            let port = extract_int(&reply, "Port").ok_or_else(|| {
                PreviewError::Protocol("StartService reply carried no port".into())
            })?;
            u16::try_from(port)
                .map_err(|_| PreviewError::Protocol(format!("implausible service port {port}")))
        }

        /// DeviceLink banner exchange on a fresh service connection.
        async fn devicelink_handshake(stream: &mut UnixStream) -> Result<(), PreviewError> {
            // Service speaks first with DLMessageVersionExchange.
            let banner = Self::read_device_frame(stream).await?;
            debug!(bytes = banner.len(), "screenshot service banner");

            let ok = xml_doc(
                "<array>\
                 <string>DLMessageVersionExchange</string>\
                 <string>DLVersionsOk</string>\
                 <integer>400</integer>\
                 </array>",
            );
            let ready = Self::device_request(stream, &ok).await?;
            let ready = String::from_utf8_lossy(&ready);
            if !ready.contains("DeviceReady") {
                return Err(PreviewError::Protocol(
                    "screenshot service did not report DeviceReady".into(),
                ));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl CaptureBackend for DirectCapture {
        async fn start(&mut self) -> Result<(), PreviewError> {
            // Mount is best-effort; a missing image shows up as a far
            // less readable StartService failure otherwise.
            ddi::mount_if_needed(self.udid.as_deref()).await;

            let device_id = self.resolve_device().await?;
            let port = self.start_screenshot_service(device_id).await?;
            debug!(device_id, port, "screenshot service started");

            let mut session = self.connect_device_port(device_id, port).await?;
            Self::devicelink_handshake(&mut session).await?;
            self.session = Some(session);
            Ok(())
        }

        async fn capture_frame(&mut self) -> Result<Vec<u8>, PreviewError> {
            let stream = self.session.as_mut().ok_or_else(|| {
                PreviewError::Protocol("screenshot session not started".into())
            })?;

            let request = xml_doc(
                "<array>\
                 <string>DLMessageProcessMessage</string>\
                 <dict><key>MessageType</key><string>ScreenShotRequest</string></dict>\
                 </array>",
            );
            let reply = Self::device_request(stream, &request).await?;

            extract_bplist_data(&reply).ok_or_else(|| {
                PreviewError::Capture("screenshot reply carried no image data".into())
            })
        }

        async fn stop(&mut self) -> Result<(), PreviewError> {
            self.session = None;
            Ok(())
        }
    }
}

#[cfg(unix)]
pub use platform::DirectCapture;

// ── Non-unix stub ────────────────────────────────────────────────

#[cfg(not(unix))]
pub struct DirectCapture {
    _udid: Option<String>,
}

#[cfg(not(unix))]
impl DirectCapture {
    pub fn new(udid: Option<String>) -> Self {
        Self { _udid: udid }
    }
}

#[cfg(not(unix))]
#[async_trait::async_trait]
impl super::CaptureBackend for DirectCapture {
    async fn start(&mut self) -> Result<(), PreviewError> {
        Err(PreviewError::Protocol(
            "direct capture requires a unix mux socket".into(),
        ))
    }

    async fn capture_frame(&mut self) -> Result<Vec<u8>, PreviewError> {
        Err(PreviewError::Protocol(
            "direct capture requires a unix mux socket".into(),
        ))
    }

    async fn stop(&mut self) -> Result<(), PreviewError> {
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
