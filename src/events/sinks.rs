//! In-process notification sinks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use super::{publish_quietly, LifecycleEvent, NotificationSink};
use crate::{AppError, Result};

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        info!(
            event = event.kind.as_str(),
            session_id = event.session_id,
            payload = %event.payload,
            "lifecycle event"
        );
        Ok(())
    }
}

/// Forwards events into a bounded channel without waiting.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl ChannelSink {
    /// Wrap an existing sender.
    #[must_use]
    pub fn new(tx: mpsc::Sender<LifecycleEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and its receiving end.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        self.tx
            .try_send(event.clone())
            .map_err(|err| AppError::Notify(format!("channel send failed: {err}")))
    }
}

/// Delivers to several sinks; one failing sink does not stop the others.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    /// Empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of attached sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sink is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NotificationSink for FanoutSink {
    fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        for sink in &self.sinks {
            publish_quietly(sink.as_ref(), event);
        }
        Ok(())
    }
}
