//! Engine status types broadcast to front ends.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a `DuplexEngine`.
///
/// ```text
/// Idle ──start()──► Starting ──stream up──► Running ──stop()──► Stopping ──► Idle
///                      │
///                      └── creation / device / stream failure ──► Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// No stream, no transform. Initial and terminal state.
    Idle,
    /// Transform being created, devices validated, stream opening.
    Starting,
    /// Stream live; every block goes through the transform.
    Running,
    /// Stream being stopped, then the transform destroyed.
    Stopping,
}

impl EngineStatus {
    pub fn is_running(self) -> bool {
        self == EngineStatus::Running
    }
}

/// Emitted on every state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. the error that aborted a start).
    pub detail: Option<String>,
}
