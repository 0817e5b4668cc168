//! Queue management and scheduling.

pub mod manager;
pub mod planner;

pub use manager::{ConflictResolution, EnqueueOutcome, MergeReport, QueueManager};
pub use planner::{dependency_edges, parallel_batches, plan_items, readiness_set, ItemPlan};
