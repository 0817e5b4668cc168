//! Best-effort notification boundary.
//!
//! An external collaborator is informed after state-changing operations.
//! Delivery is fire-and-forget: a failing notifier is logged and ignored, and
//! never affects the scheduler's return value or persisted state.

use tracing::{debug, warn};

/// A state change worth announcing to an external collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    QueueCreated {
        queue_id: String,
    },
    ItemClaimed {
        queue_id: String,
        item_id: String,
        issue_id: String,
    },
    ItemCompleted {
        queue_id: String,
        item_id: String,
    },
    ItemFailed {
        queue_id: String,
        item_id: String,
        error_type: String,
    },
    ItemsRetried {
        queue_id: String,
        item_ids: Vec<String>,
    },
}

/// Notification sink for scheduler events.
pub trait Notifier: Send {
    /// Deliver one event. Errors are swallowed by the caller.
    fn notify(&self, event: &SchedulerEvent) -> Result<(), String>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: &SchedulerEvent) -> Result<(), String> {
        Ok(())
    }
}

/// Logs every event at debug level. Useful default when no external
/// collaborator is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &SchedulerEvent) -> Result<(), String> {
        debug!(?event, "scheduler event");
        Ok(())
    }
}

/// Deliver best-effort: failures are logged, never propagated.
pub(crate) fn deliver(notifier: &dyn Notifier, event: SchedulerEvent) {
    if let Err(err) = notifier.notify(&event) {
        warn!(error = %err, ?event, "notification dropped");
    }
}
