use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Status of an issue through the plan→bind→queue→execute lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Registered,
    Planning,
    Planned,
    Queued,
    Executing,
    Completed,
    Failed,
    Paused,
}

impl IssueStatus {
    /// Whether the status is terminal for the active collection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueStatus::Completed | IssueStatus::Failed)
    }

    /// Whether a transition to `next` is allowed.
    ///
    /// `Failed → Queued` exists for the retry path; any non-terminal status
    /// may move to `Paused` and back to its natural successor.
    pub fn can_transition_to(&self, next: IssueStatus) -> bool {
        use IssueStatus::*;
        if *self == next {
            return false;
        }
        match (*self, next) {
            (Registered, Planning) => true,
            (Planning, Planned) => true,
            (Planned, Queued) => true,
            (Queued, Executing) => true,
            (Executing, Completed) | (Executing, Failed) => true,
            // Retry resets a failed issue back into the queue.
            (Failed, Queued) => true,
            (current, Paused) => !current.is_terminal(),
            (Paused, to) => !matches!(to, Completed),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Registered => "registered",
            IssueStatus::Planning => "planning",
            IssueStatus::Planned => "planned",
            IssueStatus::Queued => "queued",
            IssueStatus::Executing => "executing",
            IssueStatus::Completed => "completed",
            IssueStatus::Failed => "failed",
            IssueStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feedback entry carried on an issue, used to feed execution failures back
/// into the next planning round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Feedback category (e.g. "failure", "review").
    #[serde(rename = "type")]
    pub kind: String,
    /// Lifecycle stage that produced the feedback (e.g. "execution").
    pub stage: String,
    /// Free-text content.
    pub content: String,
    /// Timestamp when the entry was appended.
    pub created_at: DateTime<Utc>,
}

impl FeedbackEntry {
    pub fn new(
        kind: impl Into<String>,
        stage: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            stage: stage.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A unit of work to be solved, with zero or one bound solution at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Unique identifier, `ISS-YYYYMMDD-NNN` with a daily sequence.
    pub id: String,
    pub title: String,
    pub status: IssueStatus,
    /// Lower value means more urgent.
    #[serde(default)]
    pub priority: i32,
    /// Free-text problem statement, opaque to scheduling.
    #[serde(default)]
    pub context: String,
    /// Reference to the single bound solution, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_solution_id: Option<String>,
    /// Append-only execution feedback.
    #[serde(default)]
    pub feedback: Vec<FeedbackEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Create a new issue in the `registered` state.
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            status: IssueStatus::Registered,
            priority,
            context: String::new(),
            bound_solution_id: None,
            feedback: Vec::new(),
            created_at: now,
            updated_at: now,
            planned_at: None,
            queued_at: None,
            completed_at: None,
        }
    }

    /// Apply a validated status transition, stamping phase timestamps.
    pub fn transition(&mut self, next: IssueStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::invalid_state(
                &self.id,
                format!("cannot transition issue from {} to {}", self.status, next),
            ));
        }
        let now = Utc::now();
        match next {
            IssueStatus::Planned => self.planned_at = Some(now),
            IssueStatus::Queued => self.queued_at = Some(now),
            IssueStatus::Completed => self.completed_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Append a feedback entry. Feedback is never removed or rewritten.
    pub fn append_feedback(&mut self, entry: FeedbackEntry) {
        self.updated_at = Utc::now();
        self.feedback.push(entry);
    }
}
