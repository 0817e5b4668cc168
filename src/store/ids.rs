//! ID generation for issues, solutions, queues, and queue items.
//!
//! Every sequence is derived by scanning the current in-memory collection at
//! write time, so generation must happen after the revision-checked read in
//! any racy path (see the store's compare-and-swap writes).

use chrono::{DateTime, Utc};

use crate::model::{Issue, Queue, Solution};

/// Next issue id, `ISS-{YYYYMMDD}-{seq:03}` with the sequence scoped per
/// calendar day.
pub fn next_issue_id(existing: &[Issue], now: DateTime<Utc>) -> String {
    let prefix = format!("ISS-{}-", now.format("%Y%m%d"));
    let next = max_numeric_suffix(existing.iter().map(|i| i.id.as_str()), &prefix) + 1;
    format!("{prefix}{next:03}")
}

/// Next solution id, `SOL-{issue_id}-{seq}` with the sequence scoped per
/// issue.
pub fn next_solution_id(issue_id: &str, existing: &[Solution]) -> String {
    let prefix = format!("SOL-{issue_id}-");
    let next = max_numeric_suffix(existing.iter().map(|s| s.id.as_str()), &prefix) + 1;
    format!("{prefix}{next}")
}

/// Queue id from the creation instant.
pub fn queue_id(now: DateTime<Utc>) -> String {
    format!("QUE-{}", now.format("%Y%m%d%H%M%S"))
}

/// Next solution-level item id, `S-{n}` scoped to the owning queue.
pub fn next_item_id(queue: &Queue) -> String {
    let next = max_numeric_suffix(queue.solutions.iter().map(|i| i.item_id.as_str()), "S-") + 1;
    format!("S-{next}")
}

fn max_numeric_suffix<'a>(ids: impl Iterator<Item = &'a str>, prefix: &str) -> u64 {
    ids.filter_map(|id| id.strip_prefix(prefix))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}
