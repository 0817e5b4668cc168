//! The execution protocol: `next`, `detail`, `done`, and `retry`.
//!
//! External executors call these once per unit of work. Every operation is a
//! fresh read-plan-write cycle over persisted state; there is no in-process
//! scheduler loop. Concurrent callers are serialized by the store's revision
//! compare-and-swap, retried here a bounded number of times.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{Result, SchedulerError};
use crate::model::{
    FailureRecord, FeedbackEntry, IssueStatus, ItemStatus, Queue, QueueItem, QueueMetadata,
    QueueStatus, Solution,
};
use crate::notify::{deliver, LogNotifier, Notifier, SchedulerEvent};
use crate::queue::{planner, QueueManager};
use crate::store::Store;

/// Attempts before a revision conflict escapes to the caller.
const MAX_WRITE_RETRIES: usize = 3;

/// Request for [`Scheduler::next`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NextRequest {
    /// Fetch this specific item instead of selecting from the readiness set.
    pub item_id: Option<String>,
    /// Restrict selection to one queue instead of the active set.
    pub queue_id: Option<String>,
}

/// A claimed (or resumed) unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct WorkAssignment {
    pub queue_id: String,
    pub item: QueueItem,
    /// The full bound solution, all tasks included.
    pub solution: Solution,
    /// Queue progress counters at claim time.
    pub progress: QueueMetadata,
    /// True when the item was already executing and no state changed.
    pub resumed: bool,
}

/// Pure-read payload for one item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemDetail {
    pub queue_id: String,
    pub item: QueueItem,
    pub solution: Solution,
    /// Derived readiness (never stored).
    pub ready: bool,
    pub blocked_by: Vec<String>,
    pub progress: QueueMetadata,
}

/// Request for [`Scheduler::done`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoneRequest {
    #[serde(default)]
    pub fail: bool,
    /// Failure reason; parsed as a structured record when it looks like a
    /// JSON object, else wrapped as a plain message.
    pub reason: Option<String>,
    /// Opaque result payload recorded on the item.
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoneReport {
    pub item_id: String,
    pub item_status: ItemStatus,
    pub issue_status: IssueStatus,
    pub queue_status: QueueStatus,
}

/// Request for [`Scheduler::retry`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryRequest {
    /// Only retry failed items belonging to this issue.
    pub issue_id: Option<String>,
    /// Only retry within this queue instead of every known queue.
    pub queue_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryReport {
    /// Item ids reset to pending, per queue.
    pub items_reset: Vec<String>,
    pub queues_reactivated: Vec<String>,
    pub issues_requeued: Vec<String>,
}

/// Facade composing the store, queue manager, and planner into the
/// request/response contract external executors consume.
pub struct Scheduler {
    store: Store,
    manager: QueueManager,
    notifier: Box<dyn Notifier>,
}

impl Scheduler {
    /// Open a scheduler over the configured data directory.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let store = Store::open(config)?;
        Ok(Self {
            manager: QueueManager::new(store.clone()),
            store,
            notifier: Box::new(LogNotifier),
        })
    }

    /// Replace the notification sink.
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn manager(&self) -> &QueueManager {
        &self.manager
    }

    /// Intake boundary for upstream planning.
    pub fn registry(&self) -> crate::registry::IssueRegistry {
        crate::registry::IssueRegistry::new(self.store.clone())
    }

    // ------------------------------------------------------------------
    // next
    // ------------------------------------------------------------------

    /// Hand out the next unit of work, or `None` when nothing is ready.
    ///
    /// With an explicit `item_id` the item is fetched directly (error when
    /// unknown or terminal). Otherwise selection walks the active queues in
    /// priority order and never surfaces a later queue's items while an
    /// earlier queue still has pending or executing work. An already
    /// executing item is preferred (resume, side-effect free); else the
    /// lowest `execution_order` ready item is claimed: status → executing,
    /// `started_at` stamped, owning issue → executing.
    pub fn next(&self, request: &NextRequest) -> Result<Option<WorkAssignment>> {
        let queue = match self.locate_target_queue(request)? {
            Some(queue) => queue,
            None => return Ok(None),
        };

        let chosen = match &request.item_id {
            Some(item_id) => {
                let item = queue
                    .item(item_id)
                    .ok_or_else(|| SchedulerError::not_found("queue item", item_id.clone()))?;
                match item.status {
                    ItemStatus::Executing => item.item_id.clone(),
                    ItemStatus::Pending => {
                        let plan = planner::plan_items(&queue)
                            .into_iter()
                            .find(|p| &p.item_id == item_id)
                            .ok_or_else(|| {
                                SchedulerError::not_found("queue item", item_id.clone())
                            })?;
                        if !plan.ready {
                            return Err(SchedulerError::invalid_state(
                                item_id,
                                format!("dependencies not satisfied: {:?}", plan.blocked_by),
                            ));
                        }
                        item.item_id.clone()
                    }
                    status => {
                        return Err(SchedulerError::invalid_state(
                            item_id,
                            format!("item is {status}"),
                        ));
                    }
                }
            }
            None => {
                let ready = planner::readiness_set(&queue);
                let resume = ready.iter().find(|i| i.status == ItemStatus::Executing);
                match resume.copied().or_else(|| ready.first().copied()) {
                    Some(item) => item.item_id.clone(),
                    None => return Ok(None),
                }
            }
        };

        let already_executing =
            queue.item(&chosen).map(|i| i.status) == Some(ItemStatus::Executing);
        if already_executing {
            // Resume is side-effect free.
            let item = queue
                .item(&chosen)
                .ok_or_else(|| SchedulerError::not_found("queue item", chosen.clone()))?
                .clone();
            let solution = self.store.load_solution(&item.issue_id, &item.solution_id)?;
            debug!(queue_id = %queue.id, item_id = %chosen, "resumed executing item");
            return Ok(Some(WorkAssignment {
                queue_id: queue.id.clone(),
                progress: QueueMetadata::from_items(&queue.solutions),
                item,
                solution,
                resumed: true,
            }));
        }

        let queue_id = queue.id.clone();
        let (claimed, queue) = self.mutate_queue(&queue_id, |queue| {
            let item = queue
                .item_mut(&chosen)
                .ok_or_else(|| SchedulerError::not_found("queue item", chosen.clone()))?;
            if item.status != ItemStatus::Pending {
                return Err(SchedulerError::invalid_state(
                    &chosen,
                    format!("item was claimed concurrently (now {})", item.status),
                ));
            }
            item.status = ItemStatus::Executing;
            item.started_at = Some(Utc::now());
            Ok(item.clone())
        })?;

        self.transition_issue(&claimed.issue_id, IssueStatus::Executing)?;
        let solution = self
            .store
            .load_solution(&claimed.issue_id, &claimed.solution_id)?;
        deliver(
            self.notifier.as_ref(),
            SchedulerEvent::ItemClaimed {
                queue_id: queue.id.clone(),
                item_id: claimed.item_id.clone(),
                issue_id: claimed.issue_id.clone(),
            },
        );
        info!(queue_id = %queue.id, item_id = %claimed.item_id, "claimed item");

        Ok(Some(WorkAssignment {
            queue_id: queue.id,
            progress: QueueMetadata::from_items(&queue.solutions),
            item: claimed,
            solution,
            resumed: false,
        }))
    }

    // ------------------------------------------------------------------
    // detail
    // ------------------------------------------------------------------

    /// Pure read of one item: full solution content, derived readiness, and
    /// progress counters. Never mutates status ("claim" semantics belong to
    /// `next`).
    pub fn detail(&self, item_id: &str, queue_id: Option<&str>) -> Result<ItemDetail> {
        let queue = self.find_item_queue(item_id, queue_id)?;
        let item = queue
            .item(item_id)
            .ok_or_else(|| SchedulerError::not_found("queue item", item_id))?
            .clone();
        let solution = self.store.load_solution(&item.issue_id, &item.solution_id)?;
        let plan = planner::plan_items(&queue)
            .into_iter()
            .find(|p| p.item_id == item_id)
            .ok_or_else(|| SchedulerError::not_found("queue item", item_id))?;
        Ok(ItemDetail {
            queue_id: queue.id.clone(),
            progress: QueueMetadata::from_items(&queue.solutions),
            item,
            solution,
            ready: plan.ready,
            blocked_by: plan.blocked_by,
        })
    }

    // ------------------------------------------------------------------
    // done
    // ------------------------------------------------------------------

    /// Record an execution outcome.
    ///
    /// On failure the reason is parsed as structured JSON when it looks like
    /// an object, else wrapped as a plain-message record, and stored as
    /// `failure_details` (moved into `failure_history` only at retry). The
    /// outcome propagates to the owning issue and the queue status; a
    /// completed issue is relocated to the append-only history log.
    pub fn done(
        &self,
        item_id: &str,
        request: &DoneRequest,
        queue_id: Option<&str>,
    ) -> Result<DoneReport> {
        let queue = self.find_item_queue(item_id, queue_id)?;
        let queue_id = queue.id.clone();
        let chosen = item_id.to_string();
        let fail = request.fail;
        let failure = fail.then(|| parse_failure_reason(request.reason.as_deref()));
        let result = request.result.clone();

        let (item, queue) = self.mutate_queue(&queue_id, |queue| {
            let item = queue
                .item_mut(&chosen)
                .ok_or_else(|| SchedulerError::not_found("queue item", chosen.clone()))?;
            if item.status.is_terminal() {
                return Err(SchedulerError::invalid_state(
                    &chosen,
                    format!("item already {}", item.status),
                ));
            }
            item.completed_at = Some(Utc::now());
            if fail {
                item.status = ItemStatus::Failed;
                item.failure_details = failure.clone();
            } else {
                item.status = ItemStatus::Completed;
                item.result = result.clone();
            }
            let item = item.clone();
            queue.recompute_status();
            Ok(item)
        })?;

        let issue_status = if fail {
            self.transition_issue(&item.issue_id, IssueStatus::Failed)?
        } else {
            self.complete_issue(&item.issue_id)?
        };

        self.update_index(|index| index.upsert(&queue))?;

        let event = if fail {
            SchedulerEvent::ItemFailed {
                queue_id: queue.id.clone(),
                item_id: item.item_id.clone(),
                error_type: item
                    .failure_details
                    .as_ref()
                    .map(|f| f.error_type.clone())
                    .unwrap_or_default(),
            }
        } else {
            SchedulerEvent::ItemCompleted {
                queue_id: queue.id.clone(),
                item_id: item.item_id.clone(),
            }
        };
        deliver(self.notifier.as_ref(), event);
        info!(
            queue_id = %queue.id,
            item_id = %item.item_id,
            status = %item.status,
            "recorded outcome"
        );

        Ok(DoneReport {
            item_id: item.item_id,
            item_status: item.status,
            issue_status,
            queue_status: queue.status,
        })
    }

    // ------------------------------------------------------------------
    // retry
    // ------------------------------------------------------------------

    /// Reset failed items back to pending.
    ///
    /// For every failed item matching the optional filters: its
    /// `failure_details` is pushed onto `failure_history` (never discarded),
    /// execution timestamps are cleared, and the status returns to pending.
    /// The owning issue gains a `failure` feedback entry and goes back to
    /// `queued`; a failed queue returns to `active`.
    pub fn retry(&self, request: &RetryRequest) -> Result<RetryReport> {
        let queue_ids: Vec<String> = match &request.queue_id {
            Some(id) => vec![id.clone()],
            None => {
                let index = self.store.load_index()?;
                index
                    .queues
                    .iter()
                    .filter(|e| matches!(e.status, QueueStatus::Active | QueueStatus::Failed))
                    .map(|e| e.id.clone())
                    .collect()
            }
        };

        let mut report = RetryReport::default();
        let issue_filter = request.issue_id.clone();

        for queue_id in queue_ids {
            let was_failed = self.store.require_queue(&queue_id)?.status == QueueStatus::Failed;
            let (resets, queue) = self.mutate_queue(&queue_id, |queue| {
                let mut resets: Vec<(String, String, FailureRecord)> = Vec::new();
                for item in &mut queue.solutions {
                    if item.status != ItemStatus::Failed {
                        continue;
                    }
                    if let Some(filter) = &issue_filter {
                        if &item.issue_id != filter {
                            continue;
                        }
                    }
                    let details = item
                        .failure_details
                        .take()
                        .unwrap_or_else(|| FailureRecord::from_message("unknown failure"));
                    item.failure_history.push(details.clone());
                    item.started_at = None;
                    item.completed_at = None;
                    item.status = ItemStatus::Pending;
                    resets.push((item.item_id.clone(), item.issue_id.clone(), details));
                }
                queue.recompute_status();
                Ok(resets)
            })?;

            if resets.is_empty() {
                continue;
            }

            for (_, issue_id, details) in &resets {
                self.requeue_failed_issue(issue_id, details)?;
                if !report.issues_requeued.contains(issue_id) {
                    report.issues_requeued.push(issue_id.clone());
                }
            }

            if was_failed && queue.status == QueueStatus::Active {
                report.queues_reactivated.push(queue.id.clone());
            }
            self.update_index(|index| {
                index.upsert(&queue);
                if queue.status == QueueStatus::Active {
                    index.ensure_active(&queue.id);
                }
            })?;

            let item_ids: Vec<String> = resets.iter().map(|(id, _, _)| id.clone()).collect();
            deliver(
                self.notifier.as_ref(),
                SchedulerEvent::ItemsRetried {
                    queue_id: queue.id.clone(),
                    item_ids: item_ids.clone(),
                },
            );
            info!(queue_id = %queue.id, count = item_ids.len(), "reset failed items");
            report.items_reset.extend(item_ids);
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// Active queues in priority order (explicit priority, ties broken by
    /// queue id, which is creation-time ordered).
    fn ordered_active_queues(&self) -> Result<Vec<Queue>> {
        let index = self.store.load_index()?;
        let mut queues = Vec::new();
        for id in &index.active_queue_ids {
            if let Some(queue) = self.store.load_queue(id)? {
                queues.push(queue);
            }
        }
        queues.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(queues)
    }

    /// Resolve which queue `next` may draw from.
    ///
    /// With an explicit queue the answer is that queue. Otherwise the active
    /// queues are strictly serialized: the first (by priority) queue with any
    /// pending or executing item is the only eligible source.
    fn locate_target_queue(&self, request: &NextRequest) -> Result<Option<Queue>> {
        if let Some(queue_id) = &request.queue_id {
            return Ok(Some(self.store.require_queue(queue_id)?));
        }
        if let Some(item_id) = &request.item_id {
            // Direct fetch: active queues first, then anything in the index.
            return self.find_item_queue(item_id, None).map(Some);
        }
        let queues = self.ordered_active_queues()?;
        Ok(queues.into_iter().find(Queue::has_incomplete_items))
    }

    /// Find the queue containing an item: the explicit queue, else active
    /// queues in priority order, else any queue known to the index.
    fn find_item_queue(&self, item_id: &str, queue_id: Option<&str>) -> Result<Queue> {
        if let Some(queue_id) = queue_id {
            return self.store.require_queue(queue_id);
        }
        for queue in self.ordered_active_queues()? {
            if queue.item(item_id).is_some() {
                return Ok(queue);
            }
        }
        let index = self.store.load_index()?;
        for entry in &index.queues {
            if let Some(queue) = self.store.load_queue(&entry.id)? {
                if queue.item(item_id).is_some() {
                    return Ok(queue);
                }
            }
        }
        Err(SchedulerError::not_found("queue item", item_id))
    }

    /// Apply a mutation to a queue under the revision compare-and-swap,
    /// re-reading and re-applying on conflict up to the retry budget.
    fn mutate_queue<T>(
        &self,
        queue_id: &str,
        mutate: impl Fn(&mut Queue) -> Result<T>,
    ) -> Result<(T, Queue)> {
        let mut attempt = 0;
        loop {
            let mut queue = self.store.require_queue(queue_id)?;
            let value = mutate(&mut queue)?;
            match self.store.write_queue(&mut queue) {
                Ok(()) => return Ok((value, queue)),
                Err(SchedulerError::RevisionConflict { .. }) if attempt + 1 < MAX_WRITE_RETRIES => {
                    attempt += 1;
                    debug!(queue_id, attempt, "queue write conflicted; retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Apply a mutation to the index under the same compare-and-swap.
    fn update_index(&self, mutate: impl Fn(&mut crate::model::QueueIndex)) -> Result<()> {
        let mut attempt = 0;
        loop {
            let mut index = self.store.load_index()?;
            mutate(&mut index);
            match self.store.write_index(&mut index) {
                Ok(()) => return Ok(()),
                Err(SchedulerError::RevisionConflict { .. }) if attempt + 1 < MAX_WRITE_RETRIES => {
                    attempt += 1;
                    debug!(attempt, "index write conflicted; retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Move an issue to `status`, bridging through `executing` when the
    /// outcome arrives before a `next` claim was observed.
    fn transition_issue(&self, issue_id: &str, status: IssueStatus) -> Result<IssueStatus> {
        let mut issues = self.store.load_issues()?;
        let issue = issues
            .iter_mut()
            .find(|i| i.id == issue_id)
            .ok_or_else(|| SchedulerError::not_found("issue", issue_id))?;
        if issue.status == status {
            return Ok(status);
        }
        if !issue.status.can_transition_to(status)
            && issue.status == IssueStatus::Queued
            && issue.status.can_transition_to(IssueStatus::Executing)
        {
            issue.transition(IssueStatus::Executing)?;
        }
        issue.transition(status)?;
        let new_status = issue.status;
        self.store.save_issues(&issues)?;
        Ok(new_status)
    }

    /// Complete an issue and relocate it from the active collection to the
    /// append-only history log. Completed issues are never queried from the
    /// active collection again.
    fn complete_issue(&self, issue_id: &str) -> Result<IssueStatus> {
        let mut issues = self.store.load_issues()?;
        let position = issues
            .iter()
            .position(|i| i.id == issue_id)
            .ok_or_else(|| SchedulerError::not_found("issue", issue_id))?;
        let issue = &mut issues[position];
        if issue.status == IssueStatus::Queued {
            issue.transition(IssueStatus::Executing)?;
        }
        issue.transition(IssueStatus::Completed)?;
        let completed = issues.remove(position);
        self.store.append_history(&completed)?;
        self.store.save_issues(&issues)?;
        info!(issue_id, "issue completed and relocated to history");
        Ok(IssueStatus::Completed)
    }

    /// Append failure feedback to an issue and reset it to `queued` so the
    /// next planning pass sees why it failed.
    fn requeue_failed_issue(&self, issue_id: &str, details: &FailureRecord) -> Result<()> {
        let mut issues = self.store.load_issues()?;
        let issue = issues
            .iter_mut()
            .find(|i| i.id == issue_id)
            .ok_or_else(|| SchedulerError::not_found("issue", issue_id))?;
        issue.append_feedback(FeedbackEntry::new(
            "failure",
            "execution",
            format!("{}: {}", details.error_type, details.message),
        ));
        if issue.status != IssueStatus::Queued {
            issue.transition(IssueStatus::Queued)?;
        }
        self.store.save_issues(&issues)?;
        Ok(())
    }
}

/// Parse a failure reason: a string that looks like a JSON object becomes a
/// structured record; anything else degrades to a plain-message record
/// rather than being rejected.
fn parse_failure_reason(reason: Option<&str>) -> FailureRecord {
    let Some(reason) = reason else {
        return FailureRecord::from_message("unspecified failure");
    };
    let trimmed = reason.trim();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            let get = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
            return FailureRecord {
                task_id: get("task_id"),
                error_type: get("error_type").unwrap_or_else(|| "execution_error".to_string()),
                message: get("message").unwrap_or_else(|| trimmed.to_string()),
                stack_trace: get("stack_trace"),
                timestamp: Utc::now(),
            };
        }
    }
    FailureRecord::from_message(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_reason_wraps_as_message() {
        let record = parse_failure_reason(Some("timeout"));
        assert_eq!(record.error_type, "execution_error");
        assert_eq!(record.message, "timeout");
        assert!(record.task_id.is_none());
    }

    #[test]
    fn test_structured_reason_parses_fields() {
        let record = parse_failure_reason(Some(
            r#"{"task_id":"T2","error_type":"test_failure","message":"3 assertions failed","stack_trace":"at spec.ts:10"}"#,
        ));
        assert_eq!(record.task_id.as_deref(), Some("T2"));
        assert_eq!(record.error_type, "test_failure");
        assert_eq!(record.message, "3 assertions failed");
        assert_eq!(record.stack_trace.as_deref(), Some("at spec.ts:10"));
    }

    #[test]
    fn test_malformed_json_degrades_to_message() {
        let record = parse_failure_reason(Some("{not valid json"));
        assert_eq!(record.error_type, "execution_error");
        assert_eq!(record.message, "{not valid json");
    }

    #[test]
    fn test_missing_reason_still_produces_record() {
        let record = parse_failure_reason(None);
        assert_eq!(record.message, "unspecified failure");
    }
}
