//! Configuration for the preview server.

use std::net::SocketAddr;

/// Identity of the mirrored device, as reported by device enumeration.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// Human-readable device name shown in the viewer.
    pub name: String,
    /// Unique device identifier, passed through to the capture tools.
    pub udid: String,
    /// Product identifier (e.g. `iPhone15,2`) used to select the
    /// device frame drawn around the preview.
    pub product_type: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            name: "Device".into(),
            udid: String::new(),
            product_type: String::new(),
        }
    }
}

/// Top-level configuration for [`crate::server::PreviewServer`].
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Address the HTTP listener binds.
    pub addr: SocketAddr,
    /// Target frames per second for capture and per-client send loops.
    pub fps: u32,
    /// JPEG quality (1–100) handed to the encoder facade.
    pub quality: u8,
    /// Identity of the mirrored device.
    pub device: DeviceIdentity,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 8034).into(),
            fps: 5,
            quality: 80,
            device: DeviceIdentity::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_preview_port() {
        let cfg = PreviewConfig::default();
        assert_eq!(cfg.addr.port(), 8034);
        assert_eq!(cfg.fps, 5);
    }
}
