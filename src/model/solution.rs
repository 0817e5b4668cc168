use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A file target from the legacy `modification_points` task shape.
///
/// Older documents stored either bare path strings or objects with a `file`
/// field; both resolve to the same logical file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModificationPoint {
    Path(String),
    Detailed {
        file: String,
        #[serde(flatten)]
        rest: serde_json::Map<String, Value>,
    },
}

impl ModificationPoint {
    pub fn file(&self) -> &str {
        match self {
            ModificationPoint::Path(path) => path,
            ModificationPoint::Detailed { file, .. } => file,
        }
    }
}

/// One sub-step of a solution.
///
/// Task content is opaque to scheduling; only the declared file targets,
/// intra-solution dependencies, and time estimate are interpreted. The
/// remaining payload round-trips untouched through `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionTask {
    #[serde(default)]
    pub id: String,
    /// Canonical declared file targets.
    #[serde(default)]
    pub files: Vec<String>,
    /// Legacy file-target shape, folded into `files` by [`normalize`].
    ///
    /// [`normalize`]: SolutionTask::normalize
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modification_points: Vec<ModificationPoint>,
    /// Task ids within the same solution that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    /// Opaque upstream payload (title, instructions, acceptance criteria).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl SolutionTask {
    /// Fold the legacy `modification_points` shape into the canonical `files`
    /// list. Called at the persistence boundary so the planner never branches
    /// on both shapes.
    pub fn normalize(&mut self) {
        if self.modification_points.is_empty() {
            return;
        }
        for point in self.modification_points.drain(..) {
            let file = point.file().to_string();
            if !self.files.contains(&file) {
                self.files.push(file);
            }
        }
    }
}

/// One candidate implementation plan for an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    /// Identifier `SOL-{issue_id}-{seq}`, sequence scoped per issue.
    pub id: String,
    pub issue_id: String,
    /// Ordered sub-steps.
    #[serde(default)]
    pub tasks: Vec<SolutionTask>,
    #[serde(default)]
    pub is_bound: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_at: Option<DateTime<Utc>>,
}

impl Solution {
    pub fn new(id: impl Into<String>, issue_id: impl Into<String>, tasks: Vec<SolutionTask>) -> Self {
        Self {
            id: id.into(),
            issue_id: issue_id.into(),
            tasks,
            is_bound: false,
            created_at: Utc::now(),
            bound_at: None,
        }
    }

    /// Normalize every task's file targets into the canonical shape.
    pub fn normalize(&mut self) {
        for task in &mut self.tasks {
            task.normalize();
        }
    }

    /// Mark this solution as the bound one for its issue.
    pub fn bind(&mut self) {
        self.is_bound = true;
        self.bound_at = Some(Utc::now());
    }

    /// Aggregate file-touch set across all tasks, first occurrence order.
    pub fn files_touched(&self) -> Vec<String> {
        let mut files = Vec::new();
        for task in &self.tasks {
            for file in &task.files {
                if !files.contains(file) {
                    files.push(file.clone());
                }
            }
            for point in &task.modification_points {
                let file = point.file().to_string();
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        files
    }

    /// Aggregate time estimate in minutes across all tasks.
    pub fn estimated_minutes(&self) -> u32 {
        self.tasks
            .iter()
            .filter_map(|t| t.estimated_minutes)
            .sum()
    }
}
