//! Build-status broadcaster.
//!
//! Holds the most recent build phase for SSE fan-out. There is no
//! queue: readers poll [`BuildStatusBroadcaster::current`] and compare
//! sequence numbers to detect new events, so a slow reader simply
//! skips intermediate states.

use std::sync::Mutex;

use serde::Serialize;

// ── BuildStatus ──────────────────────────────────────────────────

/// Phase of the enclosing rebuild-reinstall cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Idle,
    Building,
    Installing,
    Ready,
    Error,
}

impl BuildStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Idle => "idle",
            BuildStatus::Building => "building",
            BuildStatus::Installing => "installing",
            BuildStatus::Ready => "ready",
            BuildStatus::Error => "error",
        }
    }
}

// ── BuildStatusEvent ─────────────────────────────────────────────

/// One observed build-status update.
#[derive(Debug, Clone)]
pub struct BuildStatusEvent {
    pub status: BuildStatus,
    pub message: String,
    /// Strictly increasing per broadcaster, starting at 0 for the
    /// initial idle state.
    pub sequence: u64,
}

// ── BuildStatusBroadcaster ───────────────────────────────────────

/// Single-slot holder of the latest build-status event.
pub struct BuildStatusBroadcaster {
    inner: Mutex<BuildStatusEvent>,
}

impl BuildStatusBroadcaster {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BuildStatusEvent {
                status: BuildStatus::Idle,
                message: String::new(),
                sequence: 0,
            }),
        }
    }

    /// Replace the current event, bumping the sequence atomically.
    pub fn update(&self, status: BuildStatus, message: impl Into<String>) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.status = status;
        inner.message = message.into();
        inner.sequence += 1;
    }

    /// Snapshot of the latest event.
    pub fn current(&self) -> BuildStatusEvent {
        self.inner.lock().expect("status lock poisoned").clone()
    }
}

impl Default for BuildStatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_at_zero() {
        let b = BuildStatusBroadcaster::new();
        let ev = b.current();
        assert_eq!(ev.status, BuildStatus::Idle);
        assert_eq!(ev.message, "");
        assert_eq!(ev.sequence, 0);
    }

    #[test]
    fn update_bumps_sequence() {
        let b = BuildStatusBroadcaster::new();
        b.update(BuildStatus::Building, "compiling");
        b.update(BuildStatus::Ready, "");

        let ev = b.current();
        assert_eq!(ev.status, BuildStatus::Ready);
        assert_eq!(ev.sequence, 2);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&BuildStatus::Building).unwrap();
        assert_eq!(json, "\"building\"");
    }
}
