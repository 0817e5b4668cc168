//! Entity model: issues, solutions, queues, and their status machines.

pub mod issue;
pub mod queue;
pub mod solution;

pub use issue::{FeedbackEntry, Issue, IssueStatus};
pub use queue::{
    ExecutionGroup, FailureRecord, GroupMode, ItemStatus, Queue, QueueConflict, QueueIndex,
    QueueIndexEntry, QueueItem, QueueMetadata, QueueStatus,
};
pub use solution::{ModificationPoint, Solution, SolutionTask};
