//! Scheduling planner: readiness, dependency edges, and parallel batches.
//!
//! Everything here is a pure function over a queue's item list; no I/O.
//! Readiness is always derived from `depends_on` and dependency statuses,
//! never stored, so it cannot drift when completions change underneath an
//! item.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::model::{GroupMode, ItemStatus, Queue, QueueItem};

/// Computed plan for one queue item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPlan {
    pub item_id: String,
    /// `pending` with every dependency completed.
    pub ready: bool,
    /// Dependencies not yet completed and not failed.
    pub blocked_by: Vec<String>,
}

/// Compute readiness and blockers for every item in the queue.
pub fn plan_items(queue: &Queue) -> Vec<ItemPlan> {
    let statuses: HashMap<&str, ItemStatus> = queue
        .solutions
        .iter()
        .map(|i| (i.item_id.as_str(), i.status))
        .collect();

    queue
        .solutions
        .iter()
        .map(|item| {
            let mut all_completed = true;
            let mut blocked_by = Vec::new();
            for dep in &item.depends_on {
                match statuses.get(dep.as_str()) {
                    Some(ItemStatus::Completed) => {}
                    Some(ItemStatus::Failed) => {
                        // A failed dependency can never complete; the item is
                        // not ready but also not merely waiting.
                        all_completed = false;
                    }
                    Some(_) => {
                        all_completed = false;
                        blocked_by.push(dep.clone());
                    }
                    // Unknown dependency ids block forever until resolved.
                    None => {
                        all_completed = false;
                        blocked_by.push(dep.clone());
                    }
                }
            }
            ItemPlan {
                item_id: item.item_id.clone(),
                ready: item.status == ItemStatus::Pending && all_completed,
                blocked_by,
            }
        })
        .collect()
}

/// Directed `depends_on → item` edges, for visualization and debugging only.
pub fn dependency_edges(queue: &Queue) -> Vec<(String, String)> {
    let mut edges = Vec::new();
    for item in &queue.solutions {
        for dep in &item.depends_on {
            edges.push((dep.clone(), item.item_id.clone()));
        }
    }
    edges
}

/// Items eligible for `next`: already-claimed executing items (so an
/// in-flight caller can re-discover its work) plus ready pending items, in
/// stable `execution_order`.
pub fn readiness_set(queue: &Queue) -> Vec<&QueueItem> {
    let ready: HashSet<String> = plan_items(queue)
        .into_iter()
        .filter(|p| p.ready)
        .map(|p| p.item_id)
        .collect();

    let mut items: Vec<&QueueItem> = queue
        .solutions
        .iter()
        .filter(|i| i.status == ItemStatus::Executing || ready.contains(&i.item_id))
        .collect();
    items.sort_by(|a, b| {
        a.execution_order
            .cmp(&b.execution_order)
            .then_with(|| {
                a.semantic_priority
                    .partial_cmp(&b.semantic_priority)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    items
}

/// Partition the readiness set into ordered batches whose members never
/// touch overlapping files.
///
/// Upstream-declared execution groups are honored verbatim: a parallel
/// group's members (filtered to the readiness set) form one batch, a
/// sequential group's members each form a singleton batch in listed order.
/// Items not covered by any group, or every item when no groups exist, go
/// through a greedy single left-to-right file-conflict packer. When a batch
/// would otherwise be empty, exactly one item is forced through to guarantee
/// forward progress.
///
/// `fallback_files` supplies recomputed file sets for items whose stored
/// `files_touched` is empty.
pub fn parallel_batches(
    queue: &Queue,
    fallback_files: &HashMap<String, Vec<String>>,
) -> Vec<Vec<String>> {
    let ready = readiness_set(queue);
    if ready.is_empty() {
        return Vec::new();
    }
    let ready_ids: HashSet<&str> = ready.iter().map(|i| i.item_id.as_str()).collect();

    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut grouped: HashSet<String> = HashSet::new();

    if let Some(groups) = &queue.execution_groups {
        for group in groups {
            let members: Vec<&String> = group
                .items
                .iter()
                .filter(|id| ready_ids.contains(id.as_str()))
                .collect();
            if members.is_empty() {
                continue;
            }
            match group.mode {
                GroupMode::Parallel => {
                    batches.push(members.iter().map(|id| (*id).clone()).collect());
                }
                GroupMode::Sequential => {
                    for id in &members {
                        batches.push(vec![(*id).clone()]);
                    }
                }
            }
            for id in members {
                grouped.insert(id.clone());
            }
        }
    }

    let remaining: Vec<&QueueItem> = ready
        .iter()
        .copied()
        .filter(|i| !grouped.contains(&i.item_id))
        .collect();
    batches.extend(pack_by_file_conflict(&remaining, fallback_files));

    debug!(
        queue_id = %queue.id,
        batches = batches.len(),
        ready = ready.len(),
        "computed parallel batches"
    );
    batches
}

/// Greedy single-pass file-conflict packer.
///
/// Deliberately not a bin-packing optimizer: batches gate advisory
/// parallelism for callers, not correctness of item execution.
fn pack_by_file_conflict(
    items: &[&QueueItem],
    fallback_files: &HashMap<String, Vec<String>>,
) -> Vec<Vec<String>> {
    let files_of = |item: &QueueItem| -> Vec<String> {
        if item.files_touched.is_empty() {
            fallback_files
                .get(&item.item_id)
                .cloned()
                .unwrap_or_default()
        } else {
            item.files_touched.clone()
        }
    };

    let mut pending: Vec<&QueueItem> = items.to_vec();
    let mut batches = Vec::new();

    while !pending.is_empty() {
        let mut batch: Vec<String> = Vec::new();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut deferred: Vec<&QueueItem> = Vec::new();

        for item in pending {
            let files = files_of(item);
            let conflicts = files.iter().any(|f| claimed.contains(f));
            if !conflicts || batch.is_empty() {
                // The batch.is_empty() arm forces one item through when every
                // candidate conflicts, guaranteeing forward progress.
                claimed.extend(files);
                batch.push(item.item_id.clone());
            } else {
                deferred.push(item);
            }
        }

        batches.push(batch);
        pending = deferred;
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionGroup, Queue, QueueItem};

    fn item(id: &str, order: u32, files: &[&str]) -> QueueItem {
        let mut item = QueueItem::new(id, "ISS-20250101-001", format!("SOL-{id}"), order);
        item.files_touched = files.iter().map(|f| f.to_string()).collect();
        item
    }

    fn queue_with(items: Vec<QueueItem>) -> Queue {
        let mut queue = Queue::new("QUE-20250101120000");
        queue.solutions = items;
        queue
    }

    #[test]
    fn test_ready_requires_completed_dependencies() {
        let mut a = item("S-1", 0, &[]);
        a.status = ItemStatus::Pending;
        let mut b = item("S-2", 1, &[]);
        b.depends_on = vec!["S-1".to_string()];
        let queue = queue_with(vec![a, b]);

        let plans = plan_items(&queue);
        assert!(plans[0].ready);
        assert!(!plans[1].ready);
        assert_eq!(plans[1].blocked_by, vec!["S-1"]);
    }

    #[test]
    fn test_failed_dependency_blocks_but_is_not_listed() {
        let mut a = item("S-1", 0, &[]);
        a.status = ItemStatus::Failed;
        let mut b = item("S-2", 1, &[]);
        b.depends_on = vec!["S-1".to_string()];
        let queue = queue_with(vec![a, b]);

        let plans = plan_items(&queue);
        assert!(!plans[1].ready);
        assert!(plans[1].blocked_by.is_empty());
    }

    #[test]
    fn test_unknown_dependency_blocks() {
        let mut a = item("S-1", 0, &[]);
        a.depends_on = vec!["S-99".to_string()];
        let queue = queue_with(vec![a]);

        let plans = plan_items(&queue);
        assert!(!plans[0].ready);
        assert_eq!(plans[0].blocked_by, vec!["S-99"]);
    }

    #[test]
    fn test_readiness_set_includes_executing_items() {
        let mut a = item("S-1", 0, &[]);
        a.status = ItemStatus::Executing;
        let b = item("S-2", 1, &[]);
        let mut c = item("S-3", 2, &[]);
        c.status = ItemStatus::Completed;
        let queue = queue_with(vec![a, b, c]);

        let ids: Vec<&str> = readiness_set(&queue)
            .iter()
            .map(|i| i.item_id.as_str())
            .collect();
        assert_eq!(ids, vec!["S-1", "S-2"]);
    }

    #[test]
    fn test_blocked_items_never_enter_the_readiness_set() {
        let mut a = item("S-1", 0, &[]);
        a.status = ItemStatus::Blocked;
        let b = item("S-2", 1, &[]);
        let queue = queue_with(vec![a, b]);

        let ids: Vec<&str> = readiness_set(&queue)
            .iter()
            .map(|i| i.item_id.as_str())
            .collect();
        assert_eq!(ids, vec!["S-2"]);
    }

    #[test]
    fn test_batches_never_share_files() {
        let queue = queue_with(vec![
            item("S-1", 0, &["a.ts", "shared.ts"]),
            item("S-2", 1, &["b.ts"]),
            item("S-3", 2, &["shared.ts"]),
        ]);

        let batches = parallel_batches(&queue, &HashMap::new());
        assert_eq!(batches, vec![vec!["S-1", "S-2"], vec!["S-3"]]);
    }

    #[test]
    fn test_all_conflicting_items_force_singleton_batches() {
        let queue = queue_with(vec![
            item("S-1", 0, &["x.ts"]),
            item("S-2", 1, &["x.ts"]),
            item("S-3", 2, &["x.ts"]),
        ]);

        let batches = parallel_batches(&queue, &HashMap::new());
        assert_eq!(batches.len(), 3);
        for batch in batches {
            assert_eq!(batch.len(), 1);
        }
    }

    #[test]
    fn test_fallback_files_used_when_stored_set_empty() {
        let queue = queue_with(vec![item("S-1", 0, &[]), item("S-2", 1, &["x.ts"])]);
        let fallback: HashMap<String, Vec<String>> =
            [("S-1".to_string(), vec!["x.ts".to_string()])].into();

        let batches = parallel_batches(&queue, &fallback);
        assert_eq!(batches, vec![vec!["S-1"], vec!["S-2"]]);
    }

    #[test]
    fn test_execution_groups_honored_verbatim() {
        let mut queue = queue_with(vec![
            item("S-1", 0, &["x.ts"]),
            item("S-2", 1, &["x.ts"]),
            item("S-3", 2, &["y.ts"]),
            item("S-4", 3, &["z.ts"]),
        ]);
        queue.execution_groups = Some(vec![
            ExecutionGroup {
                name: "G1".to_string(),
                mode: GroupMode::Parallel,
                // Upstream says these may run together even though files
                // overlap; groups are honored verbatim.
                items: vec!["S-1".to_string(), "S-2".to_string()],
            },
            ExecutionGroup {
                name: "G2".to_string(),
                mode: GroupMode::Sequential,
                items: vec!["S-3".to_string(), "S-4".to_string()],
            },
        ]);

        let batches = parallel_batches(&queue, &HashMap::new());
        assert_eq!(
            batches,
            vec![vec!["S-1", "S-2"], vec!["S-3"], vec!["S-4"]]
        );
    }

    #[test]
    fn test_group_members_filtered_to_readiness_set() {
        let mut a = item("S-1", 0, &[]);
        a.status = ItemStatus::Completed;
        let b = item("S-2", 1, &[]);
        let mut queue = queue_with(vec![a, b]);
        queue.execution_groups = Some(vec![ExecutionGroup {
            name: "G1".to_string(),
            mode: GroupMode::Parallel,
            items: vec!["S-1".to_string(), "S-2".to_string()],
        }]);

        let batches = parallel_batches(&queue, &HashMap::new());
        assert_eq!(batches, vec![vec!["S-2"]]);
    }

    #[test]
    fn test_dependency_edges() {
        let mut b = item("S-2", 1, &[]);
        b.depends_on = vec!["S-1".to_string()];
        let queue = queue_with(vec![item("S-1", 0, &[]), b]);

        assert_eq!(
            dependency_edges(&queue),
            vec![("S-1".to_string(), "S-2".to_string())]
        );
    }
}
