//! Viewer page generator.
//!
//! Emits a single self-contained HTML document: a CSS device frame
//! scaled to a 320 px preview, an `<img>` the stream lands in, and an
//! inline script that prefers WebSocket and falls back to MJPEG. No
//! external assets are fetched.

use crate::device::DeviceDisplayInfo;

/// Preview width in CSS pixels; height follows the device aspect.
const PREVIEW_WIDTH: u32 = 320;

/// Escape text for interpolation into HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render the viewer document for a device.
pub fn render_page(device_name: &str, display: &DeviceDisplayInfo) -> String {
    let scale = f64::from(PREVIEW_WIDTH) / f64::from(display.screen_width);
    let height = (f64::from(display.screen_height) * scale).round() as u32;
    let radius = (f64::from(display.corner_radius) * scale).round() as u32;

    TEMPLATE
        .replace("__DEVICE_NAME__", &escape_html(device_name))
        .replace("__STYLE_CLASS__", display.display_style.css_class())
        .replace("__WIDTH__", &PREVIEW_WIDTH.to_string())
        .replace("__HEIGHT__", &height.to_string())
        .replace("__RADIUS__", &radius.to_string())
}

const TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>__DEVICE_NAME__ — xtool preview</title>
<style>
  html, body {
    margin: 0;
    height: 100%;
    background: #101014;
    color: #d0d0d8;
    font: 13px/1.4 -apple-system, "Segoe UI", sans-serif;
  }
  .xtool-preview {
    min-height: 100%;
    display: flex;
    flex-direction: column;
    align-items: center;
    justify-content: center;
    gap: 14px;
  }
  .device {
    position: relative;
    width: __WIDTH__px;
    height: __HEIGHT__px;
    padding: 14px;
    background: #1b1b1f;
    border-radius: calc(__RADIUS__px + 14px);
    box-shadow: 0 12px 40px rgba(0, 0, 0, 0.6);
  }
  .device.home-button {
    padding-top: 40px;
    padding-bottom: 64px;
    border-radius: 36px;
  }
  .device.home-button::after {
    content: "";
    position: absolute;
    left: 50%;
    bottom: 14px;
    width: 38px;
    height: 38px;
    transform: translateX(-50%);
    border: 2px solid #34343a;
    border-radius: 50%;
  }
  .device.notch::before {
    content: "";
    position: absolute;
    top: 14px;
    left: 50%;
    transform: translateX(-50%);
    width: 42%;
    height: 18px;
    background: #1b1b1f;
    border-radius: 0 0 12px 12px;
    z-index: 2;
  }
  .device.dynamic-island::before {
    content: "";
    position: absolute;
    top: 22px;
    left: 50%;
    transform: translateX(-50%);
    width: 28%;
    height: 16px;
    background: #000;
    border-radius: 10px;
    z-index: 2;
  }
  .screen {
    position: relative;
    width: 100%;
    height: 100%;
    overflow: hidden;
    background: #000;
    border-radius: __RADIUS__px;
  }
  .screen img {
    width: 100%;
    height: 100%;
    object-fit: cover;
    display: block;
  }
  .spinner {
    position: absolute;
    top: 50%;
    left: 50%;
    width: 28px;
    height: 28px;
    margin: -14px 0 0 -14px;
    border: 3px solid #2c2c32;
    border-top-color: #7a7af0;
    border-radius: 50%;
    animation: spin 0.9s linear infinite;
  }
  @keyframes spin {
    to { transform: rotate(360deg); }
  }
  .overlay {
    position: absolute;
    inset: 0;
    display: none;
    flex-direction: column;
    align-items: center;
    justify-content: center;
    gap: 10px;
    background: rgba(0, 0, 0, 0.82);
    z-index: 3;
  }
  .overlay.visible { display: flex; }
  .overlay button {
    padding: 6px 18px;
    border: 1px solid #55556a;
    border-radius: 6px;
    background: #26262e;
    color: #d0d0d8;
    cursor: pointer;
  }
  .statusbar {
    display: flex;
    align-items: center;
    gap: 10px;
  }
  .dot {
    width: 9px;
    height: 9px;
    border-radius: 50%;
    background: #c43c3c;
  }
  .dot.connected { background: #3cc46a; }
  .meters { color: #8a8a96; }
</style>
</head>
<body>
<div class="xtool-preview">
  <div class="device __STYLE_CLASS__">
    <div class="screen">
      <img id="frame" alt="__DEVICE_NAME__ screen">
      <div id="spinner" class="spinner"></div>
      <div id="overlay" class="overlay">
        <div id="overlay-message">Disconnected</div>
        <button id="reconnect">Reconnect</button>
      </div>
    </div>
  </div>
  <div class="statusbar">
    <span id="dot" class="dot"></span>
    <span>__DEVICE_NAME__</span>
    <span id="meters" class="meters">— fps · — KB/s</span>
  </div>
</div>
<script>
(function () {
  "use strict";

  var img = document.getElementById("frame");
  var spinner = document.getElementById("spinner");
  var overlay = document.getElementById("overlay");
  var overlayMessage = document.getElementById("overlay-message");
  var dot = document.getElementById("dot");
  var meters = document.getElementById("meters");

  var ws = null;
  var blobUrl = null;
  var frames = 0;
  var bytes = 0;
  var mode = "ws";

  function setConnected(connected) {
    dot.className = connected ? "dot connected" : "dot";
  }

  function showOverlay(message) {
    overlayMessage.textContent = message;
    overlay.className = "overlay visible";
  }

  function hideOverlay() {
    overlay.className = "overlay";
  }

  function install(blob) {
    var next = URL.createObjectURL(blob);
    img.onload = function () {
      // Revoke the previous frame's blob URL once the new one is
      // installed, so long sessions do not leak object URLs.
      if (blobUrl && blobUrl !== next) {
        URL.revokeObjectURL(blobUrl);
      }
      blobUrl = next;
      spinner.style.display = "none";
    };
    img.src = next;
    frames += 1;
    bytes += blob.size;
  }

  function connectWebSocket() {
    var scheme = location.protocol === "https:" ? "wss://" : "ws://";
    try {
      ws = new WebSocket(scheme + location.host + "/ws");
    } catch (e) {
      fallbackToMjpeg();
      return;
    }
    ws.binaryType = "blob";
    ws.onopen = function () {
      setConnected(true);
      hideOverlay();
    };
    ws.onmessage = function (event) {
      install(event.data);
    };
    ws.onerror = function () {
      if (mode === "ws" && frames === 0) {
        fallbackToMjpeg();
      }
    };
    ws.onclose = function () {
      setConnected(false);
      if (mode === "ws" && frames === 0) {
        fallbackToMjpeg();
      } else if (mode === "ws") {
        showOverlay("Connection lost");
      }
    };
  }

  function fallbackToMjpeg() {
    mode = "mjpeg";
    if (ws) {
      ws.onclose = null;
      ws.close();
      ws = null;
    }
    img.onload = function () {
      spinner.style.display = "none";
      setConnected(true);
      hideOverlay();
    };
    img.onerror = function () {
      setConnected(false);
      showOverlay("Stream unavailable");
    };
    img.src = "/stream?" + Date.now();
  }

  function reconnect() {
    hideOverlay();
    spinner.style.display = "";
    frames = 0;
    mode = "ws";
    if (ws) {
      ws.onclose = null;
      ws.close();
      ws = null;
    }
    connectWebSocket();
  }

  document.getElementById("reconnect").addEventListener("click", reconnect);
  document.addEventListener("keydown", function (event) {
    if (event.key === "r" || event.key === "R") {
      reconnect();
    }
  });

  setInterval(function () {
    meters.textContent = frames + " fps · " + (bytes / 1024).toFixed(1) + " KB/s";
    frames = 0;
    bytes = 0;
  }, 1000);

  connectWebSocket();
})();
</script>
</body>
</html>
"##;

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::display_info;

    #[test]
    fn page_contains_required_markers() {
        let page = render_page("Stub", &display_info(""));
        assert!(page.contains("xtool-preview"));
        assert!(page.contains("/ws"));
        assert!(page.contains("/stream"));
        assert!(page.contains("Stub"));
        assert!(!page.contains("__DEVICE_NAME__"));
        assert!(!page.contains("__STYLE_CLASS__"));
    }

    #[test]
    fn frame_is_scaled_preserving_aspect() {
        // 1179×2556 scaled to 320 wide is 694 tall.
        let page = render_page("Stub", &display_info("iPhone15,2"));
        assert!(page.contains("width: 320px"));
        assert!(page.contains("height: 694px"));
    }

    #[test]
    fn style_class_matches_device() {
        let page = render_page("Stub", &display_info("iPad13,1"));
        assert!(page.contains("device home-button"));

        let page = render_page("Stub", &display_info("iPhone15,2"));
        assert!(page.contains("device dynamic-island"));
    }

    #[test]
    fn device_name_is_escaped() {
        let page = render_page("Dev's <iPhone> & \"Co\"", &display_info(""));
        assert!(page.contains("Dev's &lt;iPhone&gt; &amp; &quot;Co&quot;"));
        assert!(!page.contains("<iPhone>"));
    }

    #[test]
    fn escape_html_table() {
        assert_eq!(escape_html("a&b"), "a&amp;b");
        assert_eq!(escape_html("<x>"), "&lt;x&gt;");
        assert_eq!(escape_html("\"q\""), "&quot;q&quot;");
        assert_eq!(escape_html("plain"), "plain");
    }
}
