//! Deckhand coordinates work items ("issues") through a
//! plan→bind→queue→execute lifecycle for autonomous task runners.
//!
//! The core is the issue/solution/queue scheduling engine: a file-backed
//! store, the entity status machines, a queue manager, a dependency-aware
//! conflict-avoiding parallel planner, and the four-operation execution
//! protocol (`next`, `detail`, `done`, `retry`) that external executors call
//! once per unit of work.
//!
//! There is no background scheduler loop: every decision is computed freshly
//! from persisted state, so the engine is stateless between calls and
//! stateful on disk. Concurrent callers are defended by a per-document
//! revision compare-and-swap.
//!
//! # Example
//!
//! ```no_run
//! use deckhand::{NextRequest, Scheduler, StoreConfig};
//!
//! # fn main() -> deckhand::Result<()> {
//! let scheduler = Scheduler::open(&StoreConfig::from_env())?;
//! if let Some(work) = scheduler.next(&NextRequest::default())? {
//!     println!("run {} ({} tasks)", work.item.item_id, work.solution.tasks.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod notify;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod store;

pub use config::{resolve_repo_root, StoreConfig};
pub use error::{Result, SchedulerError};
pub use model::{
    ExecutionGroup, FailureRecord, FeedbackEntry, GroupMode, Issue, IssueStatus, ItemStatus,
    Queue, QueueConflict, QueueIndex, QueueItem, QueueMetadata, QueueStatus, Solution,
    SolutionTask,
};
pub use notify::{LogNotifier, NoopNotifier, Notifier, SchedulerEvent};
pub use protocol::{
    DoneReport, DoneRequest, ItemDetail, NextRequest, RetryReport, RetryRequest, Scheduler,
    WorkAssignment,
};
pub use queue::{ConflictResolution, EnqueueOutcome, MergeReport, QueueManager};
pub use registry::{IssueRegistry, NewIssue};
pub use store::Store;
