//! Queue manager: bind→enqueue, merge/replace/abort resolution, activation,
//! priority, archive, and split.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};
use crate::model::{
    IssueStatus, Queue, QueueItem, QueueStatus, Solution,
};
use crate::store::{ids, Store};

/// Caller's choice when enqueueing collides with an active queue that still
/// has incomplete items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Merge the new item into the existing active queue.
    Merge,
    /// Make the new queue active; the old one stays in history.
    Replace,
    /// Discard the new queue.
    Abort,
}

/// Outcome of an enqueue request.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// A fresh queue was created (and activated when none was active).
    Created { queue_id: String, item_id: String },
    /// The item was merged into the existing active queue.
    Merged {
        queue_id: String,
        item_id: Option<String>,
        duplicates_skipped: usize,
    },
    /// The new queue replaced the previous active set.
    Replaced {
        queue_id: String,
        item_id: String,
        previous: Vec<String>,
    },
    /// An active queue has incomplete items and no resolution was supplied;
    /// nothing was persisted.
    Conflict {
        active_queue_id: String,
        incomplete_items: usize,
    },
    /// The caller chose to abort; nothing was persisted.
    Aborted,
}

/// Report from merging one queue into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: usize,
    pub duplicates_skipped: usize,
}

/// Queue lifecycle and index maintenance.
#[derive(Debug, Clone)]
pub struct QueueManager {
    store: Store,
}

impl QueueManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Enqueue the bound solution of an issue.
    ///
    /// Creates a queue holding one solution-level item whose `files_touched`
    /// aggregates the solution's task file targets. When an active queue
    /// still has incomplete items the collision is surfaced as
    /// [`EnqueueOutcome::Conflict`] unless `on_conflict` names a resolution.
    pub fn enqueue_bound_solution(
        &self,
        issue_id: &str,
        on_conflict: Option<ConflictResolution>,
    ) -> Result<EnqueueOutcome> {
        let mut issues = self.store.load_issues()?;
        let issue = issues
            .iter_mut()
            .find(|i| i.id == issue_id)
            .ok_or_else(|| SchedulerError::not_found("issue", issue_id))?;
        let solution_id = issue.bound_solution_id.clone().ok_or_else(|| {
            SchedulerError::invalid_state(issue_id, "issue has no bound solution")
        })?;
        let solution = self.store.load_solution(issue_id, &solution_id)?;

        let mut index = self.store.load_index()?;
        let blocking = index
            .active_queue_ids
            .clone()
            .into_iter()
            .filter_map(|id| self.store.load_queue(&id).transpose())
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .find(|q| q.has_incomplete_items());

        if let Some(active) = blocking {
            match on_conflict {
                None => {
                    return Ok(EnqueueOutcome::Conflict {
                        incomplete_items: active.metadata.pending + active.metadata.executing,
                        active_queue_id: active.id,
                    });
                }
                Some(ConflictResolution::Abort) => {
                    debug!(issue_id, "enqueue aborted by caller");
                    return Ok(EnqueueOutcome::Aborted);
                }
                Some(ConflictResolution::Merge) => {
                    let mut target = active;
                    let item_id =
                        match self.push_item(&mut target, issue, &solution) {
                            Some(id) => id,
                            None => {
                                // Same (issue, solution) already queued.
                                return Ok(EnqueueOutcome::Merged {
                                    queue_id: target.id,
                                    item_id: None,
                                    duplicates_skipped: 1,
                                });
                            }
                        };
                    target.detect_conflicts();
                    self.store.write_queue(&mut target)?;
                    index.upsert(&target);
                    self.store.write_index(&mut index)?;
                    self.mark_queued(issue)?;
                    self.store.save_issues(&issues)?;
                    info!(issue_id, queue_id = %target.id, %item_id, "merged into active queue");
                    return Ok(EnqueueOutcome::Merged {
                        queue_id: target.id,
                        item_id: Some(item_id),
                        duplicates_skipped: 0,
                    });
                }
                Some(ConflictResolution::Replace) => {
                    let previous = index.active_queue_ids.clone();
                    let (mut queue, item_id) = self.build_queue(issue, &solution)?;
                    self.store.write_queue(&mut queue)?;
                    index.upsert(&queue);
                    index.set_active(vec![queue.id.clone()]);
                    self.store.write_index(&mut index)?;
                    self.mark_queued(issue)?;
                    self.store.save_issues(&issues)?;
                    info!(issue_id, queue_id = %queue.id, "replaced active queue set");
                    return Ok(EnqueueOutcome::Replaced {
                        queue_id: queue.id,
                        item_id,
                        previous,
                    });
                }
            }
        }

        let (mut queue, item_id) = self.build_queue(issue, &solution)?;
        self.store.write_queue(&mut queue)?;
        index.upsert(&queue);
        // No active queue is blocking, so the new queue becomes active
        // immediately.
        index.ensure_active(&queue.id);
        self.store.write_index(&mut index)?;
        self.mark_queued(issue)?;
        self.store.save_issues(&issues)?;
        info!(issue_id, queue_id = %queue.id, %item_id, "created queue");
        Ok(EnqueueOutcome::Created {
            queue_id: queue.id,
            item_id,
        })
    }

    fn build_queue(
        &self,
        issue: &crate::model::Issue,
        solution: &Solution,
    ) -> Result<(Queue, String)> {
        let mut queue = Queue::new(self.fresh_queue_id()?);
        queue.priority = issue.priority;
        let item_id = self.append_item(&mut queue, issue, solution);
        Ok((queue, item_id))
    }

    /// Queue ids carry second resolution; step forward until the id is not
    /// taken so rapid successive creations cannot collide.
    fn fresh_queue_id(&self) -> Result<String> {
        let mut instant = Utc::now();
        loop {
            let id = ids::queue_id(instant);
            if self.store.load_queue(&id)?.is_none() {
                return Ok(id);
            }
            instant += chrono::Duration::seconds(1);
        }
    }

    /// Append one solution-level item, skipping `(issue_id, solution_id)`
    /// duplicates. Returns the new item id, or `None` for a duplicate.
    fn push_item(
        &self,
        queue: &mut Queue,
        issue: &crate::model::Issue,
        solution: &Solution,
    ) -> Option<String> {
        let duplicate = queue
            .solutions
            .iter()
            .any(|i| i.issue_id == issue.id && i.solution_id == solution.id);
        if duplicate {
            return None;
        }
        Some(self.append_item(queue, issue, solution))
    }

    /// Append one solution-level item unconditionally.
    fn append_item(
        &self,
        queue: &mut Queue,
        issue: &crate::model::Issue,
        solution: &Solution,
    ) -> String {
        let item_id = ids::next_item_id(queue);
        let order = queue
            .solutions
            .iter()
            .map(|i| i.execution_order + 1)
            .max()
            .unwrap_or(0);
        let mut item = QueueItem::new(&item_id, &issue.id, &solution.id, order);
        item.files_touched = solution.files_touched();
        item.task_count = solution.tasks.len();
        item.semantic_priority = issue.priority as f64;
        queue.solutions.push(item);
        if !queue.issue_ids.contains(&issue.id) {
            queue.issue_ids.push(issue.id.clone());
        }
        item_id
    }

    fn mark_queued(&self, issue: &mut crate::model::Issue) -> Result<()> {
        if issue.status != IssueStatus::Queued {
            issue.transition(IssueStatus::Queued)?;
        }
        Ok(())
    }

    /// Merge every item of `source_id` into `target_id`.
    ///
    /// Items are matched by `(issue_id, solution_id)`: duplicates are skipped
    /// and counted, the rest are renumbered with fresh item ids and appended
    /// at the end of the execution order. Dependencies on renumbered items
    /// are rewritten; dependencies on skipped duplicates are pointed at the
    /// target's existing item. The source queue is deleted or archived with
    /// merge metadata, per `delete_source`.
    pub fn merge_queues(
        &self,
        source_id: &str,
        target_id: &str,
        delete_source: bool,
    ) -> Result<MergeReport> {
        if source_id == target_id {
            return Err(SchedulerError::Validation(
                "cannot merge a queue into itself".to_string(),
            ));
        }
        let mut source = self.store.require_queue(source_id)?;
        let mut target = self.store.require_queue(target_id)?;

        let mut merged = 0;
        let mut skipped = 0;
        let mut renames: Vec<(String, String)> = Vec::new();

        for mut item in std::mem::take(&mut source.solutions) {
            let existing = target
                .solutions
                .iter()
                .find(|t| t.issue_id == item.issue_id && t.solution_id == item.solution_id);
            if let Some(existing) = existing {
                renames.push((item.item_id.clone(), existing.item_id.clone()));
                skipped += 1;
                continue;
            }

            let new_id = ids::next_item_id(&target);
            renames.push((item.item_id.clone(), new_id.clone()));
            item.item_id = new_id;
            item.execution_order = target
                .solutions
                .iter()
                .map(|t| t.execution_order + 1)
                .max()
                .unwrap_or(0);
            if !target.issue_ids.contains(&item.issue_id) {
                target.issue_ids.push(item.issue_id.clone());
            }
            target.solutions.push(item);
            merged += 1;
        }

        // Rewrite cross-item dependencies carried over from the source.
        for (old, new) in &renames {
            for item in &mut target.solutions {
                for dep in &mut item.depends_on {
                    if dep == old {
                        *dep = new.clone();
                    }
                }
            }
        }

        target.detect_conflicts();
        self.store.write_queue(&mut target)?;

        let mut index = self.store.load_index()?;
        index.upsert(&target);
        if delete_source {
            self.store.delete_queue(source_id)?;
            index.remove(source_id);
        } else {
            source.status = QueueStatus::Archived;
            source.merged_into = Some(target_id.to_string());
            source.merged_at = Some(Utc::now());
            self.store.write_queue(&mut source)?;
            index.upsert(&source);
        }
        self.store.write_index(&mut index)?;

        info!(source_id, target_id, merged, skipped, "merged queues");
        Ok(MergeReport {
            merged,
            duplicates_skipped: skipped,
        })
    }

    /// Replace the ordered active queue list.
    ///
    /// Every referenced queue must exist with `active` status; the stored
    /// order is priority order (the planner re-sorts by priority at read
    /// time, so a later `set_priority` does not require re-activation).
    pub fn activate(&self, queue_ids: Vec<String>) -> Result<()> {
        for id in &queue_ids {
            let queue = self.store.require_queue(id)?;
            if queue.status != QueueStatus::Active {
                return Err(SchedulerError::invalid_state(
                    id,
                    format!("cannot activate queue with status {}", queue.status),
                ));
            }
        }
        let mut index = self.store.load_index()?;
        index.set_active(queue_ids);
        self.store.write_index(&mut index)
    }

    /// Set one queue's priority without reordering the active list.
    pub fn set_priority(&self, queue_id: &str, priority: i32) -> Result<()> {
        let mut queue = self.store.require_queue(queue_id)?;
        queue.priority = priority;
        self.store.write_queue(&mut queue)?;
        let mut index = self.store.load_index()?;
        index.upsert(&queue);
        self.store.write_index(&mut index)
    }

    /// Explicitly archive a queue.
    pub fn archive(&self, queue_id: &str) -> Result<()> {
        let mut queue = self.store.require_queue(queue_id)?;
        if queue.status == QueueStatus::Archived {
            return Ok(());
        }
        if queue.has_incomplete_items() {
            warn!(queue_id, "archiving queue with incomplete items");
        }
        queue.status = QueueStatus::Archived;
        self.store.write_queue(&mut queue)?;
        let mut index = self.store.load_index()?;
        index.upsert(&queue);
        self.store.write_index(&mut index)
    }

    /// Split the items of the named issues out of a queue into a fresh one.
    ///
    /// The new queue inherits the source's priority and is registered in the
    /// index but not activated.
    pub fn split_queue(&self, queue_id: &str, issue_ids: &[String]) -> Result<String> {
        let mut source = self.store.require_queue(queue_id)?;
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut source.solutions)
            .into_iter()
            .partition(|i| issue_ids.contains(&i.issue_id));
        if moved.is_empty() {
            source.solutions = kept;
            return Err(SchedulerError::Validation(format!(
                "no items in {queue_id} match the requested issues"
            )));
        }
        source.solutions = kept;
        source.issue_ids.retain(|id| !issue_ids.contains(id));

        // Cross-queue dependencies cannot be satisfied after the split; the
        // source side drops references to moved items, and the split side
        // drops references to items left behind.
        let moved_old_ids: Vec<String> = moved.iter().map(|i| i.item_id.clone()).collect();
        for item in &mut source.solutions {
            item.depends_on.retain(|dep| !moved_old_ids.contains(dep));
        }

        let mut split = Queue::new(self.fresh_queue_id()?);
        split.priority = source.priority;
        let mut renames: Vec<(String, String)> = Vec::new();
        for (order, mut item) in moved.into_iter().enumerate() {
            let new_id = ids::next_item_id(&split);
            renames.push((item.item_id.clone(), new_id.clone()));
            item.item_id = new_id;
            item.execution_order = order as u32;
            if !split.issue_ids.contains(&item.issue_id) {
                split.issue_ids.push(item.issue_id.clone());
            }
            split.solutions.push(item);
        }
        let moved_new_ids: Vec<String> = renames.iter().map(|(_, new)| new.clone()).collect();
        for item in &mut split.solutions {
            for dep in &mut item.depends_on {
                if let Some((_, new)) = renames.iter().find(|(old, _)| old == dep) {
                    *dep = new.clone();
                }
            }
            item.depends_on.retain(|dep| moved_new_ids.contains(dep));
        }
        split.detect_conflicts();
        source.detect_conflicts();

        self.store.write_queue(&mut split)?;
        self.store.write_queue(&mut source)?;
        let mut index = self.store.load_index()?;
        // Register the split queue without activating it.
        index.upsert(&split);
        index.upsert(&source);
        self.store.write_index(&mut index)?;

        info!(queue_id, split_id = %split.id, "split queue");
        Ok(split.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::model::{Issue, ItemStatus, SolutionTask};
    use tempfile::TempDir;

    fn setup() -> (TempDir, QueueManager) {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = Store::open(&StoreConfig::at(temp_dir.path())).expect("store");
        (temp_dir, QueueManager::new(store))
    }

    fn task(files: &[&str]) -> SolutionTask {
        SolutionTask {
            id: "T1".to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            modification_points: Vec::new(),
            depends_on: Vec::new(),
            estimated_minutes: None,
            extra: serde_json::Map::new(),
        }
    }

    fn seed_bound_issue(manager: &QueueManager, issue_id: &str, files: &[&str]) {
        let store = manager.store();
        let mut issues = store.load_issues().expect("issues");
        let mut issue = Issue::new(issue_id, "seeded", 1);
        issue
            .transition(crate::model::IssueStatus::Planning)
            .expect("planning");
        issue
            .transition(crate::model::IssueStatus::Planned)
            .expect("planned");
        let solution_id = format!("SOL-{issue_id}-1");
        issue.bound_solution_id = Some(solution_id.clone());
        issues.push(issue);
        store.save_issues(&issues).expect("save issues");

        let mut solution = Solution::new(&solution_id, issue_id, vec![task(files)]);
        solution.bind();
        store
            .save_solutions(issue_id, &[solution])
            .expect("save solutions");
    }

    #[test]
    fn test_enqueue_creates_and_activates_queue() {
        let (_guard, manager) = setup();
        seed_bound_issue(&manager, "ISS-20250101-001", &["a.ts", "b.ts"]);

        let outcome = manager
            .enqueue_bound_solution("ISS-20250101-001", None)
            .expect("enqueue");
        let EnqueueOutcome::Created { queue_id, item_id } = outcome else {
            panic!("expected Created, got {outcome:?}");
        };
        assert_eq!(item_id, "S-1");

        let queue = manager.store().require_queue(&queue_id).expect("queue");
        assert_eq!(queue.solutions[0].files_touched, vec!["a.ts", "b.ts"]);
        let index = manager.store().load_index().expect("index");
        assert_eq!(index.active_queue(), Some(queue_id.as_str()));

        let issues = manager.store().load_issues().expect("issues");
        assert_eq!(issues[0].status, IssueStatus::Queued);
    }

    #[test]
    fn test_enqueue_without_bound_solution_is_invalid_state() {
        let (_guard, manager) = setup();
        let store = manager.store();
        store
            .save_issues(&[Issue::new("ISS-20250101-001", "unbound", 1)])
            .expect("save");

        assert!(matches!(
            manager
                .enqueue_bound_solution("ISS-20250101-001", None)
                .unwrap_err(),
            SchedulerError::InvalidState { .. }
        ));
    }

    #[test]
    fn test_enqueue_conflict_requires_resolution() {
        let (_guard, manager) = setup();
        seed_bound_issue(&manager, "ISS-20250101-001", &["a.ts"]);
        seed_bound_issue(&manager, "ISS-20250101-002", &["b.ts"]);

        manager
            .enqueue_bound_solution("ISS-20250101-001", None)
            .expect("first enqueue");
        let outcome = manager
            .enqueue_bound_solution("ISS-20250101-002", None)
            .expect("second enqueue");
        assert!(matches!(outcome, EnqueueOutcome::Conflict { .. }));

        // Nothing was persisted for the second issue.
        let issues = manager.store().load_issues().expect("issues");
        let second = issues.iter().find(|i| i.id == "ISS-20250101-002").unwrap();
        assert_ne!(second.status, IssueStatus::Queued);
    }

    #[test]
    fn test_enqueue_merge_resolution_appends_item() {
        let (_guard, manager) = setup();
        seed_bound_issue(&manager, "ISS-20250101-001", &["a.ts"]);
        seed_bound_issue(&manager, "ISS-20250101-002", &["b.ts"]);

        manager
            .enqueue_bound_solution("ISS-20250101-001", None)
            .expect("first enqueue");
        let outcome = manager
            .enqueue_bound_solution("ISS-20250101-002", Some(ConflictResolution::Merge))
            .expect("merge enqueue");
        let EnqueueOutcome::Merged { queue_id, item_id, .. } = outcome else {
            panic!("expected Merged, got {outcome:?}");
        };
        assert_eq!(item_id.as_deref(), Some("S-2"));

        let queue = manager.store().require_queue(&queue_id).expect("queue");
        assert_eq!(queue.solutions.len(), 2);
        assert!(queue.solutions[1].execution_order > queue.solutions[0].execution_order);
    }

    #[test]
    fn test_enqueue_replace_resolution_switches_active() {
        let (_guard, manager) = setup();
        seed_bound_issue(&manager, "ISS-20250101-001", &["a.ts"]);
        seed_bound_issue(&manager, "ISS-20250101-002", &["b.ts"]);

        let EnqueueOutcome::Created { queue_id: old, .. } = manager
            .enqueue_bound_solution("ISS-20250101-001", None)
            .expect("first enqueue")
        else {
            panic!("expected Created");
        };
        let outcome = manager
            .enqueue_bound_solution("ISS-20250101-002", Some(ConflictResolution::Replace))
            .expect("replace enqueue");
        let EnqueueOutcome::Replaced { queue_id, previous, .. } = outcome else {
            panic!("expected Replaced, got {outcome:?}");
        };

        assert_eq!(previous, vec![old.clone()]);
        let index = manager.store().load_index().expect("index");
        assert_eq!(index.active_queue_ids, vec![queue_id]);
        // Old queue remains on disk.
        assert!(manager.store().load_queue(&old).expect("load").is_some());
    }

    #[test]
    fn test_enqueue_abort_discards_new_queue() {
        let (_guard, manager) = setup();
        seed_bound_issue(&manager, "ISS-20250101-001", &["a.ts"]);
        seed_bound_issue(&manager, "ISS-20250101-002", &["b.ts"]);

        manager
            .enqueue_bound_solution("ISS-20250101-001", None)
            .expect("first enqueue");
        let outcome = manager
            .enqueue_bound_solution("ISS-20250101-002", Some(ConflictResolution::Abort))
            .expect("abort enqueue");
        assert_eq!(outcome, EnqueueOutcome::Aborted);

        let index = manager.store().load_index().expect("index");
        assert_eq!(index.queues.len(), 1);
    }

    #[test]
    fn test_merge_queues_skips_duplicates_and_renumbers() {
        let (_guard, manager) = setup();
        let store = manager.store();

        let mut target = Queue::new("QUE-20250101000001");
        target
            .solutions
            .push(QueueItem::new("S-1", "ISS-A", "SOL-A-1", 0));
        store.write_queue(&mut target).expect("target");

        let mut source = Queue::new("QUE-20250101000002");
        source
            .solutions
            .push(QueueItem::new("S-1", "ISS-A", "SOL-A-1", 0));
        let mut dependent = QueueItem::new("S-2", "ISS-B", "SOL-B-1", 1);
        dependent.depends_on = vec!["S-1".to_string()];
        source.solutions.push(dependent);
        store.write_queue(&mut source).expect("source");

        let report = manager
            .merge_queues("QUE-20250101000002", "QUE-20250101000001", false)
            .expect("merge");
        assert_eq!(report.merged, 1);
        assert_eq!(report.duplicates_skipped, 1);

        let target = store.require_queue("QUE-20250101000001").expect("target");
        assert_eq!(target.solutions.len(), 2);
        assert_eq!(target.solutions[1].item_id, "S-2");
        // The dependency now points at the target's copy of the duplicate.
        assert_eq!(target.solutions[1].depends_on, vec!["S-1"]);

        let source = store.require_queue("QUE-20250101000002").expect("source");
        assert_eq!(source.status, QueueStatus::Archived);
        assert_eq!(source.merged_into.as_deref(), Some("QUE-20250101000001"));
        assert!(source.merged_at.is_some());
    }

    #[test]
    fn test_merge_can_delete_source() {
        let (_guard, manager) = setup();
        let store = manager.store();
        let mut target = Queue::new("QUE-1");
        store.write_queue(&mut target).expect("target");
        let mut source = Queue::new("QUE-2");
        source
            .solutions
            .push(QueueItem::new("S-1", "ISS-A", "SOL-A-1", 0));
        store.write_queue(&mut source).expect("source");

        manager.merge_queues("QUE-2", "QUE-1", true).expect("merge");
        assert!(store.load_queue("QUE-2").expect("load").is_none());
        assert!(store.load_index().expect("index").entry("QUE-2").is_none());
    }

    #[test]
    fn test_activate_rejects_non_active_queue() {
        let (_guard, manager) = setup();
        let store = manager.store();
        let mut queue = Queue::new("QUE-1");
        queue.status = QueueStatus::Archived;
        store.write_queue(&mut queue).expect("write");

        assert!(matches!(
            manager.activate(vec!["QUE-1".to_string()]).unwrap_err(),
            SchedulerError::InvalidState { .. }
        ));
    }

    #[test]
    fn test_set_priority_does_not_reorder_active_list() {
        let (_guard, manager) = setup();
        let store = manager.store();
        for id in ["QUE-1", "QUE-2"] {
            let mut queue = Queue::new(id);
            store.write_queue(&mut queue).expect("write");
        }
        manager
            .activate(vec!["QUE-1".to_string(), "QUE-2".to_string()])
            .expect("activate");
        manager.set_priority("QUE-2", -5).expect("priority");

        let index = store.load_index().expect("index");
        assert_eq!(index.active_queue_ids, vec!["QUE-1", "QUE-2"]);
        assert_eq!(index.entry("QUE-2").expect("entry").priority, -5);
    }

    #[test]
    fn test_split_moves_issue_items_to_new_queue() {
        let (_guard, manager) = setup();
        let store = manager.store();
        let mut queue = Queue::new("QUE-1");
        queue.issue_ids = vec!["ISS-A".to_string(), "ISS-B".to_string()];
        queue
            .solutions
            .push(QueueItem::new("S-1", "ISS-A", "SOL-A-1", 0));
        let mut second = QueueItem::new("S-2", "ISS-B", "SOL-B-1", 1);
        second.status = ItemStatus::Pending;
        queue.solutions.push(second);
        store.write_queue(&mut queue).expect("write");

        let split_id = manager
            .split_queue("QUE-1", &["ISS-B".to_string()])
            .expect("split");

        let source = store.require_queue("QUE-1").expect("source");
        assert_eq!(source.solutions.len(), 1);
        assert_eq!(source.issue_ids, vec!["ISS-A"]);

        let split = store.require_queue(&split_id).expect("split");
        assert_eq!(split.solutions.len(), 1);
        assert_eq!(split.solutions[0].item_id, "S-1");
        assert_eq!(split.issue_ids, vec!["ISS-B"]);
    }

    #[test]
    fn test_split_drops_source_dependencies_on_moved_items() {
        let (_guard, manager) = setup();
        let store = manager.store();
        let mut queue = Queue::new("QUE-1");
        queue.issue_ids = vec!["ISS-A".to_string(), "ISS-B".to_string()];
        queue
            .solutions
            .push(QueueItem::new("S-1", "ISS-A", "SOL-A-1", 0));
        let mut dependent = QueueItem::new("S-2", "ISS-B", "SOL-B-1", 1);
        dependent.depends_on = vec!["S-1".to_string()];
        queue.solutions.push(dependent);
        store.write_queue(&mut queue).expect("write");

        manager
            .split_queue("QUE-1", &["ISS-A".to_string()])
            .expect("split");

        // The kept item no longer waits on the moved one, so it can still
        // become ready.
        let source = store.require_queue("QUE-1").expect("source");
        assert_eq!(source.solutions.len(), 1);
        assert!(source.solutions[0].depends_on.is_empty());
        let plans = crate::queue::planner::plan_items(&source);
        assert!(plans[0].ready);
    }
}
