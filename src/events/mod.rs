//! Lifecycle notifications published to the rest of the application.
//!
//! Provides the [`NotificationSink`] trait and the event record. Delivery
//! is fire-and-forget: a failing sink is logged and never aborts the
//! caller. [`JsonlEventLog`] appends events to daily-rotating files.

pub mod sinks;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Named lifecycle events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleEventKind {
    /// A permission request session began.
    SessionStarted,
    /// Permission statuses were probed.
    StatusChecked,
    /// A restart was handed to the supervisor.
    RestartPending,
    /// The acquisition cycle finished.
    SessionCompleted,
    /// The cycle could not finish (restart failed or was refused).
    SessionFailed,
}

impl LifecycleEventKind {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session-started",
            Self::StatusChecked => "status-checked",
            Self::RestartPending => "restart-pending",
            Self::SessionCompleted => "session-completed",
            Self::SessionFailed => "session-failed",
        }
    }
}

/// A published lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    /// Publication time.
    pub timestamp: DateTime<Utc>,
    /// Session the event belongs to.
    pub session_id: String,
    /// Event name.
    pub kind: LifecycleEventKind,
    /// Event-specific payload.
    pub payload: serde_json::Value,
}

impl LifecycleEvent {
    /// Construct an event with an empty object payload.
    #[must_use]
    pub fn new(kind: LifecycleEventKind, session_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            kind,
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Replace the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Receives lifecycle events.
///
/// Implementations must be [`Send`] and [`Sync`] so one sink can be
/// shared across tasks via [`std::sync::Arc`].
pub trait NotificationSink: Send + Sync {
    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notify` if delivery fails.
    fn publish(&self, event: &LifecycleEvent) -> crate::Result<()>;
}

/// Publish `event`, logging and swallowing any failure.
pub fn publish_quietly(sink: &dyn NotificationSink, event: &LifecycleEvent) {
    if let Err(err) = sink.publish(event) {
        warn!(
            event = event.kind.as_str(),
            session_id = event.session_id,
            %err,
            "failed to publish lifecycle event"
        );
    }
}

pub use sinks::{ChannelSink, FanoutSink, TracingSink};
pub use writer::JsonlEventLog;
