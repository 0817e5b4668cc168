use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Status of a queue item through its execution lifecycle.
///
/// `ready` is deliberately absent: readiness is a computed view over
/// `pending` (see the planner), never a stored value. `blocked` is never set
/// by any operation here; it only arrives in upstream-authored documents and
/// is treated as terminal, so a blocked item is skipped by selection and does
/// not hold its queue open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Blocked,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Blocked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Executing => "executing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Active,
    Completed,
    Archived,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueueStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Active => "active",
            QueueStatus::Completed => "completed",
            QueueStatus::Archived => "archived",
            QueueStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured record of one execution failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Task inside the solution that failed, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Wrap a plain-text reason as an unstructured failure.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            error_type: "execution_error".to_string(),
            message: message.into(),
            stack_trace: None,
            timestamp: Utc::now(),
        }
    }
}

/// The schedulable unit: one bound solution inside one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// `S-{n}`, sequence scoped to the owning queue.
    pub item_id: String,
    pub issue_id: String,
    pub solution_id: String,
    pub status: ItemStatus,
    /// FIFO tie-break within the queue.
    pub execution_order: u32,
    /// Upstream-assigned parallel/sequential group label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_group: Option<String>,
    /// Other item ids that must complete before this one is ready.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Float tie-break assigned by upstream planning.
    #[serde(default)]
    pub semantic_priority: f64,
    #[serde(default)]
    pub task_count: usize,
    /// Flattened file set from the bound solution's tasks.
    #[serde(default)]
    pub files_touched: Vec<String>,
    /// Most recent failure; moved into `failure_history` only at retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<FailureRecord>,
    /// Accumulated past failures, never discarded.
    #[serde(default)]
    pub failure_history: Vec<FailureRecord>,
    /// Opaque result payload recorded at completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(
        item_id: impl Into<String>,
        issue_id: impl Into<String>,
        solution_id: impl Into<String>,
        execution_order: u32,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            issue_id: issue_id.into(),
            solution_id: solution_id.into(),
            status: ItemStatus::Pending,
            execution_order,
            execution_group: None,
            depends_on: Vec::new(),
            semantic_priority: 0.0,
            task_count: 0,
            files_touched: Vec::new(),
            failure_details: None,
            failure_history: Vec::new(),
            result: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Execution mode of an upstream-declared group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    Parallel,
    Sequential,
}

/// An upstream-declared batch of item ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGroup {
    pub name: String,
    pub mode: GroupMode,
    /// Member item ids, in declared order.
    pub items: Vec<String>,
}

/// A detected file-overlap conflict between two items in the same queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConflict {
    pub item_a: String,
    pub item_b: String,
    /// Overlapping file paths.
    pub files: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// Derived per-queue counters, recomputed from the item list on every write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetadata {
    pub total: usize,
    pub pending: usize,
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueMetadata {
    pub fn from_items(items: &[QueueItem]) -> Self {
        let mut metadata = QueueMetadata {
            total: items.len(),
            ..Default::default()
        };
        for item in items {
            match item.status {
                ItemStatus::Pending => metadata.pending += 1,
                ItemStatus::Executing => metadata.executing += 1,
                ItemStatus::Completed => metadata.completed += 1,
                ItemStatus::Failed => metadata.failed += 1,
                ItemStatus::Blocked => {}
            }
        }
        metadata
    }
}

/// A named, file-persisted collection of queue items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    /// `QUE-{YYYYMMDDHHMMSS}` at creation instant.
    pub id: String,
    pub status: QueueStatus,
    /// Lower value first; ties broken by queue id.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub issue_ids: Vec<String>,
    /// The item list. `tasks` is the legacy name for the same role and is
    /// folded in by [`normalize`](Queue::normalize).
    #[serde(default)]
    pub solutions: Vec<QueueItem>,
    #[serde(default, rename = "tasks", skip_serializing_if = "Vec::is_empty")]
    pub legacy_tasks: Vec<QueueItem>,
    #[serde(default)]
    pub conflicts: Vec<QueueConflict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_groups: Option<Vec<ExecutionGroup>>,
    /// Monotonic write counter used for compare-and-swap persistence.
    #[serde(default)]
    pub revision: u64,
    /// Queue this one was merged into, when archived by a merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived counters, recomputed on every write.
    #[serde(default, rename = "_metadata")]
    pub metadata: QueueMetadata,
}

impl Queue {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: QueueStatus::Active,
            priority: 0,
            issue_ids: Vec::new(),
            solutions: Vec::new(),
            legacy_tasks: Vec::new(),
            conflicts: Vec::new(),
            execution_groups: None,
            revision: 0,
            merged_into: None,
            merged_at: None,
            created_at: Utc::now(),
            completed_at: None,
            metadata: QueueMetadata::default(),
        }
    }

    /// Fold the legacy `tasks` item list into the canonical `solutions` list.
    ///
    /// The two names must not coexist semantically; when both carry items the
    /// modern field wins and the legacy one is dropped with a warning.
    pub fn normalize(&mut self) {
        if self.legacy_tasks.is_empty() {
            return;
        }
        if self.solutions.is_empty() {
            self.solutions = std::mem::take(&mut self.legacy_tasks);
        } else {
            warn!(
                queue_id = %self.id,
                dropped = self.legacy_tasks.len(),
                "queue document carries both 'solutions' and legacy 'tasks'; ignoring legacy list"
            );
            self.legacy_tasks.clear();
        }
    }

    pub fn item(&self, item_id: &str) -> Option<&QueueItem> {
        self.solutions.iter().find(|i| i.item_id == item_id)
    }

    pub fn item_mut(&mut self, item_id: &str) -> Option<&mut QueueItem> {
        self.solutions.iter_mut().find(|i| i.item_id == item_id)
    }

    /// Whether any item is still pending or executing.
    pub fn has_incomplete_items(&self) -> bool {
        self.solutions
            .iter()
            .any(|i| matches!(i.status, ItemStatus::Pending | ItemStatus::Executing))
    }

    /// Recompute the derived counters from the item list.
    pub fn recompute_metadata(&mut self) {
        self.metadata = QueueMetadata::from_items(&self.solutions);
    }

    /// Derive the queue status from its items.
    ///
    /// A queue completes when every item completed; it fails once every item
    /// is terminal and at least one failed. `archived` is only ever set
    /// explicitly, and retry is the only path out of `failed`.
    pub fn recompute_status(&mut self) {
        if matches!(self.status, QueueStatus::Archived) {
            return;
        }
        if self.solutions.is_empty() {
            return;
        }
        let all_terminal = self.solutions.iter().all(|i| i.status.is_terminal());
        let any_failed = self
            .solutions
            .iter()
            .any(|i| i.status == ItemStatus::Failed);
        let all_completed = self
            .solutions
            .iter()
            .all(|i| i.status == ItemStatus::Completed);

        if all_completed {
            self.status = QueueStatus::Completed;
            if self.completed_at.is_none() {
                self.completed_at = Some(Utc::now());
            }
        } else if all_terminal && any_failed {
            self.status = QueueStatus::Failed;
        } else if self.has_incomplete_items() && self.status == QueueStatus::Failed {
            // Retry reset items back to pending.
            self.status = QueueStatus::Active;
            self.completed_at = None;
        }
    }

    /// Detect pairwise file overlaps between non-terminal items and record
    /// them as conflicts.
    pub fn detect_conflicts(&mut self) {
        use std::collections::HashSet;
        self.conflicts.clear();
        for i in 0..self.solutions.len() {
            for j in (i + 1)..self.solutions.len() {
                let (a, b) = (&self.solutions[i], &self.solutions[j]);
                if a.status.is_terminal() || b.status.is_terminal() {
                    continue;
                }
                let files_a: HashSet<&String> = a.files_touched.iter().collect();
                let overlap: Vec<String> = b
                    .files_touched
                    .iter()
                    .filter(|f| files_a.contains(*f))
                    .cloned()
                    .collect();
                if !overlap.is_empty() {
                    self.conflicts.push(QueueConflict {
                        item_a: a.item_id.clone(),
                        item_b: b.item_id.clone(),
                        files: overlap,
                        detected_at: Utc::now(),
                    });
                }
            }
        }
    }
}

/// Per-queue summary entry in the queue index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueIndexEntry {
    pub id: String,
    pub status: QueueStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub issue_ids: Vec<String>,
    #[serde(default, rename = "totals")]
    pub totals: QueueMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueIndexEntry {
    pub fn from_queue(queue: &Queue) -> Self {
        Self {
            id: queue.id.clone(),
            status: queue.status,
            priority: queue.priority,
            issue_ids: queue.issue_ids.clone(),
            totals: queue.metadata,
            created_at: queue.created_at,
            completed_at: queue.completed_at,
        }
    }
}

/// The directory of all queues.
///
/// The legacy single `active_queue_id` pointer is derived from the ordered
/// `active_queue_ids` list on write; it is never independently mutable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueIndex {
    /// Legacy single-active pointer, kept in sync with the list head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_queue_id: Option<String>,
    /// Active queues in priority order; supersedes the single pointer.
    #[serde(default)]
    pub active_queue_ids: Vec<String>,
    #[serde(default)]
    pub queues: Vec<QueueIndexEntry>,
    /// Monotonic write counter used for compare-and-swap persistence.
    #[serde(default)]
    pub revision: u64,
}

impl QueueIndex {
    /// Reconcile the legacy pointer with the canonical list after read.
    pub fn normalize(&mut self) {
        if self.active_queue_ids.is_empty() {
            if let Some(id) = self.active_queue_id.clone() {
                self.active_queue_ids.push(id);
            }
        }
        self.active_queue_id = self.active_queue_ids.first().cloned();
    }

    /// The single-active accessor derived from the list head.
    pub fn active_queue(&self) -> Option<&str> {
        self.active_queue_ids.first().map(String::as_str)
    }

    pub fn entry(&self, queue_id: &str) -> Option<&QueueIndexEntry> {
        self.queues.iter().find(|e| e.id == queue_id)
    }

    /// Insert or refresh the summary entry for a queue, and drop the queue
    /// from the active list when it reached a terminal status. Activation is
    /// a separate, explicit step ([`ensure_active`](QueueIndex::ensure_active)).
    pub fn upsert(&mut self, queue: &Queue) {
        let entry = QueueIndexEntry::from_queue(queue);
        match self.queues.iter_mut().find(|e| e.id == queue.id) {
            Some(existing) => *existing = entry,
            None => self.queues.push(entry),
        }
        if queue.status.is_terminal() {
            self.active_queue_ids.retain(|id| id != &queue.id);
        }
        self.active_queue_id = self.active_queue_ids.first().cloned();
    }

    /// Append a queue to the active list if not already present.
    pub fn ensure_active(&mut self, queue_id: &str) {
        if !self.active_queue_ids.iter().any(|id| id == queue_id) {
            self.active_queue_ids.push(queue_id.to_string());
        }
        self.active_queue_id = self.active_queue_ids.first().cloned();
    }

    /// Replace the ordered active list.
    pub fn set_active(&mut self, queue_ids: Vec<String>) {
        self.active_queue_ids = queue_ids;
        self.active_queue_id = self.active_queue_ids.first().cloned();
    }

    pub fn remove(&mut self, queue_id: &str) {
        self.queues.retain(|e| e.id != queue_id);
        self.active_queue_ids.retain(|id| id != queue_id);
        self.active_queue_id = self.active_queue_ids.first().cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, status: ItemStatus) -> QueueItem {
        let mut item = QueueItem::new(id, "ISS-20250101-001", "SOL-ISS-20250101-001-1", 0);
        item.status = status;
        item
    }

    #[test]
    fn test_metadata_counts_by_status() {
        let items = vec![
            item("S-1", ItemStatus::Pending),
            item("S-2", ItemStatus::Executing),
            item("S-3", ItemStatus::Completed),
            item("S-4", ItemStatus::Failed),
        ];
        let metadata = QueueMetadata::from_items(&items);
        assert_eq!(metadata.total, 4);
        assert_eq!(metadata.pending, 1);
        assert_eq!(metadata.executing, 1);
        assert_eq!(metadata.completed, 1);
        assert_eq!(metadata.failed, 1);
    }

    #[test]
    fn test_queue_completes_when_all_items_complete() {
        let mut queue = Queue::new("QUE-20250101000000");
        queue.solutions = vec![item("S-1", ItemStatus::Completed)];
        queue.recompute_status();
        assert_eq!(queue.status, QueueStatus::Completed);
        assert!(queue.completed_at.is_some());
    }

    #[test]
    fn test_queue_fails_only_when_all_terminal() {
        let mut queue = Queue::new("QUE-20250101000000");
        queue.solutions = vec![
            item("S-1", ItemStatus::Failed),
            item("S-2", ItemStatus::Pending),
        ];
        queue.recompute_status();
        assert_eq!(queue.status, QueueStatus::Active);

        queue.solutions[1].status = ItemStatus::Completed;
        queue.recompute_status();
        assert_eq!(queue.status, QueueStatus::Failed);
    }

    #[test]
    fn test_failed_queue_reactivates_after_retry_reset() {
        let mut queue = Queue::new("QUE-20250101000000");
        queue.solutions = vec![item("S-1", ItemStatus::Failed)];
        queue.recompute_status();
        assert_eq!(queue.status, QueueStatus::Failed);

        queue.solutions[0].status = ItemStatus::Pending;
        queue.recompute_status();
        assert_eq!(queue.status, QueueStatus::Active);
    }

    #[test]
    fn test_blocked_items_do_not_hold_a_queue_open() {
        let mut queue = Queue::new("QUE-20250101000000");
        queue.solutions = vec![
            item("S-1", ItemStatus::Completed),
            item("S-2", ItemStatus::Blocked),
        ];
        assert!(!queue.has_incomplete_items());
        assert!(ItemStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_legacy_tasks_fold_into_solutions() {
        let mut queue = Queue::new("QUE-20250101000000");
        queue.legacy_tasks = vec![item("S-1", ItemStatus::Pending)];
        queue.normalize();
        assert_eq!(queue.solutions.len(), 1);
        assert!(queue.legacy_tasks.is_empty());
    }

    #[test]
    fn test_legacy_tasks_ignored_when_both_present() {
        let mut queue = Queue::new("QUE-20250101000000");
        queue.solutions = vec![item("S-1", ItemStatus::Pending)];
        queue.legacy_tasks = vec![item("S-9", ItemStatus::Pending)];
        queue.normalize();
        assert_eq!(queue.solutions.len(), 1);
        assert_eq!(queue.solutions[0].item_id, "S-1");
    }

    #[test]
    fn test_conflict_detection_skips_terminal_items() {
        let mut queue = Queue::new("QUE-20250101000000");
        let mut a = item("S-1", ItemStatus::Pending);
        a.files_touched = vec!["a.ts".to_string(), "shared.ts".to_string()];
        let mut b = item("S-2", ItemStatus::Pending);
        b.files_touched = vec!["shared.ts".to_string()];
        let mut c = item("S-3", ItemStatus::Completed);
        c.files_touched = vec!["a.ts".to_string()];
        queue.solutions = vec![a, b, c];

        queue.detect_conflicts();
        assert_eq!(queue.conflicts.len(), 1);
        assert_eq!(queue.conflicts[0].files, vec!["shared.ts"]);
    }

    #[test]
    fn test_index_legacy_pointer_promoted_and_derived() {
        let mut index = QueueIndex {
            active_queue_id: Some("QUE-1".to_string()),
            ..Default::default()
        };
        index.normalize();
        assert_eq!(index.active_queue_ids, vec!["QUE-1"]);
        assert_eq!(index.active_queue(), Some("QUE-1"));

        index.set_active(vec!["QUE-2".to_string(), "QUE-1".to_string()]);
        assert_eq!(index.active_queue_id.as_deref(), Some("QUE-2"));
    }

    #[test]
    fn test_index_upsert_drops_terminal_queue_from_active_list() {
        let mut index = QueueIndex::default();
        let mut queue = Queue::new("QUE-1");
        index.upsert(&queue);
        index.ensure_active("QUE-1");
        assert_eq!(index.active_queue_ids, vec!["QUE-1"]);

        queue.status = QueueStatus::Failed;
        index.upsert(&queue);
        assert!(index.active_queue_ids.is_empty());
        assert_eq!(index.entry("QUE-1").expect("entry").status, QueueStatus::Failed);
    }
}
