//! Event types for streaming execution progress
//!
//! Events are sent from the executor to any consumer (progress display,
//! provenance log, tests) as nodes start, finish, fail or are skipped.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Trait for sending execution events
///
/// This abstracts over the transport mechanism (channel, log, collector).
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

/// Events emitted while a plan executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionEvent {
    /// Plan execution started
    #[serde(rename_all = "camelCase")]
    PlanStarted { graph: String, node_count: usize },

    /// A node started executing
    #[serde(rename_all = "camelCase")]
    NodeStarted { node: String },

    /// A node completed successfully
    #[serde(rename_all = "camelCase")]
    NodeCompleted { node: String },

    /// A node failed
    #[serde(rename_all = "camelCase")]
    NodeFailed { node: String, error: String },

    /// A node did not run because an upstream node failed
    #[serde(rename_all = "camelCase")]
    NodeSkipped { node: String, cause: String },

    /// Every branch of an expansion reported and the join ran
    #[serde(rename_all = "camelCase")]
    JoinReleased {
        node: String,
        expansion: String,
        branches: usize,
    },

    /// Plan execution finished
    #[serde(rename_all = "camelCase")]
    PlanCompleted {
        graph: String,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ExecutionEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ExecutionEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError> {
        self.lock().push(event);
        Ok(())
    }
}
