//! File-backed persistence for issues, solutions, and queues.
//!
//! Issues and per-issue solutions live in newline-delimited JSON collections;
//! each queue is a standalone pretty-printed JSON document next to one index
//! document. Updates are whole-file rewrites through a temp file and an
//! atomic rename; only the completed-issue history log is truly append-only.
//!
//! A corrupted collection reads as empty rather than failing the operation.
//! That trades durability for availability, so every such read logs loudly.
//!
//! Queue and index documents carry a monotonic `revision`; writes re-read the
//! on-disk revision and fail with `RevisionConflict` when another writer got
//! there first. Callers retry the whole read-mutate-write cycle.

pub mod ids;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::{Result, SchedulerError};
use crate::model::{Issue, Queue, QueueIndex, Solution};

const ISSUES_FILE: &str = "issues.jsonl";
const HISTORY_FILE: &str = "issue-history.jsonl";
const SOLUTIONS_DIR: &str = "solutions";
const QUEUES_DIR: &str = "queues";
const INDEX_FILE: &str = "index.json";

/// File-backed store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open (creating directories as needed) a store at the configured root.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let root = config.data_dir.clone();
        fs::create_dir_all(root.join(SOLUTIONS_DIR))?;
        fs::create_dir_all(root.join(QUEUES_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ------------------------------------------------------------------
    // Issues
    // ------------------------------------------------------------------

    /// Load the active issue collection.
    pub fn load_issues(&self) -> Result<Vec<Issue>> {
        read_jsonl(&self.root.join(ISSUES_FILE))
    }

    /// Rewrite the active issue collection.
    pub fn save_issues(&self, issues: &[Issue]) -> Result<()> {
        write_jsonl(&self.root.join(ISSUES_FILE), issues)
    }

    /// Append a completed issue to the history log. The log is append-only
    /// and never rewritten.
    pub fn append_history(&self, issue: &Issue) -> Result<()> {
        let path = self.root.join(HISTORY_FILE);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let json = serde_json::to_string(issue)?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load the completed-issue history log.
    pub fn load_history(&self) -> Result<Vec<Issue>> {
        read_jsonl(&self.root.join(HISTORY_FILE))
    }

    // ------------------------------------------------------------------
    // Solutions
    // ------------------------------------------------------------------

    /// Load all solutions for one issue, normalized to the canonical task
    /// file shape.
    pub fn load_solutions(&self, issue_id: &str) -> Result<Vec<Solution>> {
        let mut solutions: Vec<Solution> = read_jsonl(&self.solutions_path(issue_id))?;
        for solution in &mut solutions {
            solution.normalize();
        }
        Ok(solutions)
    }

    /// Rewrite the solution collection for one issue.
    pub fn save_solutions(&self, issue_id: &str, solutions: &[Solution]) -> Result<()> {
        write_jsonl(&self.solutions_path(issue_id), solutions)
    }

    /// Find one solution by id.
    pub fn load_solution(&self, issue_id: &str, solution_id: &str) -> Result<Solution> {
        self.load_solutions(issue_id)?
            .into_iter()
            .find(|s| s.id == solution_id)
            .ok_or_else(|| SchedulerError::not_found("solution", solution_id))
    }

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    /// Load one queue document, normalized. Returns `None` when the file
    /// does not exist.
    pub fn load_queue(&self, queue_id: &str) -> Result<Option<Queue>> {
        let path = self.queue_path(queue_id);
        match read_json::<Queue>(&path)? {
            Some(mut queue) => {
                queue.normalize();
                Ok(Some(queue))
            }
            None => Ok(None),
        }
    }

    /// Load a queue, erroring when absent.
    pub fn require_queue(&self, queue_id: &str) -> Result<Queue> {
        self.load_queue(queue_id)?
            .ok_or_else(|| SchedulerError::not_found("queue", queue_id))
    }

    /// Write a queue document with revision compare-and-swap.
    ///
    /// The caller's copy must carry the revision it was loaded with; on a
    /// match the stored document gets `revision + 1` and the caller's copy is
    /// bumped to match. Derived metadata is recomputed before writing.
    pub fn write_queue(&self, queue: &mut Queue) -> Result<()> {
        let path = self.queue_path(&queue.id);
        if let Some(on_disk) = read_json::<Queue>(&path)? {
            if on_disk.revision != queue.revision {
                return Err(SchedulerError::RevisionConflict {
                    id: queue.id.clone(),
                    expected: queue.revision,
                    found: on_disk.revision,
                });
            }
        }
        queue.revision += 1;
        queue.recompute_metadata();
        write_json_atomic(&path, queue)
    }

    /// Delete a queue document (used when a merge consumes the source).
    pub fn delete_queue(&self, queue_id: &str) -> Result<()> {
        match fs::remove_file(self.queue_path(queue_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SchedulerError::Io(err)),
        }
    }

    /// Load the queue index, normalized. A missing or corrupt index reads as
    /// the empty index.
    pub fn load_index(&self) -> Result<QueueIndex> {
        let mut index = read_json::<QueueIndex>(&self.index_path())?.unwrap_or_default();
        index.normalize();
        Ok(index)
    }

    /// Write the queue index with the same revision compare-and-swap as
    /// queue documents.
    pub fn write_index(&self, index: &mut QueueIndex) -> Result<()> {
        let path = self.index_path();
        if let Some(on_disk) = read_json::<QueueIndex>(&path)? {
            if on_disk.revision != index.revision {
                return Err(SchedulerError::RevisionConflict {
                    id: "queues/index".to_string(),
                    expected: index.revision,
                    found: on_disk.revision,
                });
            }
        }
        index.revision += 1;
        write_json_atomic(&path, index)
    }

    fn solutions_path(&self, issue_id: &str) -> PathBuf {
        self.root.join(SOLUTIONS_DIR).join(format!("{issue_id}.jsonl"))
    }

    fn queue_path(&self, queue_id: &str) -> PathBuf {
        self.root.join(QUEUES_DIR).join(format!("{queue_id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(QUEUES_DIR).join(INDEX_FILE)
    }
}

/// Read a JSONL collection. Missing file or any parse failure yields the
/// empty collection; parse failures log loudly first.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(SchedulerError::Io(err)),
    };

    let mut records = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "corrupt JSONL collection; treating as empty"
                );
                return Ok(Vec::new());
            }
        }
    }
    Ok(records)
}

/// Rewrite a JSONL collection atomically, one record per line with a
/// trailing newline even for the empty collection.
fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut content = String::new();
    for record in records {
        content.push_str(&serde_json::to_string(record)?);
        content.push('\n');
    }
    if content.is_empty() {
        content.push('\n');
    }
    write_atomic(path, content.as_bytes())
}

/// Read a standalone JSON document. Missing file yields `None`; a parse
/// failure logs loudly and also yields `None`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(doc) => Ok(Some(doc)),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "corrupt JSON document; treating as missing"
                );
                Ok(None)
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SchedulerError::Io(err)),
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)?;
    write_atomic(path, json.as_bytes())
}

/// Write through a temp file and rename so readers never see a torn
/// document.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SchedulerError::Validation(format!("invalid path: {}", path.display())))?;
    let temp_path = path.with_file_name(format!("{file_name}.tmp"));

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
