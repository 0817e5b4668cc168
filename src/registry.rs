//! Intake boundary for issues and solutions.
//!
//! Upstream planning supplies issue and solution content through these
//! structured create calls; the scheduler treats the payloads as opaque
//! except for declared file targets and dependencies. This module also owns
//! the at-most-one-bound-solution invariant.

use chrono::Utc;
use tracing::info;

use crate::error::{Result, SchedulerError};
use crate::model::{Issue, IssueStatus, Solution, SolutionTask};
use crate::store::{ids, Store};

/// Payload for creating an issue.
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub priority: i32,
    pub context: String,
}

/// Issue and solution intake over the shared store.
#[derive(Debug, Clone)]
pub struct IssueRegistry {
    store: Store,
}

impl IssueRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Register a new issue with a freshly generated daily-sequence id.
    pub fn create_issue(&self, new: NewIssue) -> Result<Issue> {
        let mut issues = self.store.load_issues()?;
        let id = ids::next_issue_id(&issues, Utc::now());
        let mut issue = Issue::new(&id, new.title, new.priority);
        issue.context = new.context;
        issues.push(issue.clone());
        self.store.save_issues(&issues)?;
        info!(issue_id = %id, "registered issue");
        Ok(issue)
    }

    /// Fetch one issue from the active collection.
    pub fn get_issue(&self, issue_id: &str) -> Result<Issue> {
        self.store
            .load_issues()?
            .into_iter()
            .find(|i| i.id == issue_id)
            .ok_or_else(|| SchedulerError::not_found("issue", issue_id))
    }

    /// Add a candidate solution for an issue.
    ///
    /// Moves a `registered` issue into `planning`; the solution id carries a
    /// per-issue sequence.
    pub fn add_solution(&self, issue_id: &str, mut tasks: Vec<SolutionTask>) -> Result<Solution> {
        let mut issues = self.store.load_issues()?;
        let issue = issues
            .iter_mut()
            .find(|i| i.id == issue_id)
            .ok_or_else(|| SchedulerError::not_found("issue", issue_id))?;
        if issue.status.is_terminal() {
            return Err(SchedulerError::invalid_state(
                issue_id,
                format!("cannot plan an issue that is {}", issue.status),
            ));
        }
        if issue.status == IssueStatus::Registered {
            issue.transition(IssueStatus::Planning)?;
        }

        for task in &mut tasks {
            task.normalize();
        }
        let mut solutions = self.store.load_solutions(issue_id)?;
        let id = ids::next_solution_id(issue_id, &solutions);
        let solution = Solution::new(&id, issue_id, tasks);
        solutions.push(solution.clone());
        self.store.save_solutions(issue_id, &solutions)?;
        self.store.save_issues(&issues)?;
        info!(issue_id, solution_id = %id, "added solution");
        Ok(solution)
    }

    /// Bind one solution to its issue.
    ///
    /// At most one solution per issue carries `is_bound`; any previously
    /// bound solution is unbound first, and `bound_solution_id` always
    /// matches the bound one. Binding marks the issue `planned`.
    pub fn bind_solution(&self, issue_id: &str, solution_id: &str) -> Result<()> {
        let mut issues = self.store.load_issues()?;
        let issue = issues
            .iter_mut()
            .find(|i| i.id == issue_id)
            .ok_or_else(|| SchedulerError::not_found("issue", issue_id))?;

        let mut solutions = self.store.load_solutions(issue_id)?;
        if !solutions.iter().any(|s| s.id == solution_id) {
            return Err(SchedulerError::not_found("solution", solution_id));
        }
        for solution in &mut solutions {
            if solution.id == solution_id {
                if !solution.is_bound {
                    solution.bind();
                }
            } else if solution.is_bound {
                solution.is_bound = false;
                solution.bound_at = None;
            }
        }
        self.store.save_solutions(issue_id, &solutions)?;

        issue.bound_solution_id = Some(solution_id.to_string());
        if issue.status == IssueStatus::Planning {
            issue.transition(IssueStatus::Planned)?;
        }
        self.store.save_issues(&issues)?;
        info!(issue_id, solution_id, "bound solution");
        Ok(())
    }
}
