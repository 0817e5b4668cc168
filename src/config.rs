use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV_VAR: &str = "DECKHAND_DATA_DIR";

/// Name of the data directory created under the repository root.
pub const DATA_DIR_NAME: &str = ".deckhand";

/// Configuration for the file-backed store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory holding all persisted collections.
    pub data_dir: PathBuf,
}

impl StoreConfig {
    /// Create a config rooted at an explicit directory.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Build config from the environment, falling back to a `.deckhand`
    /// directory under the nearest repository root.
    pub fn from_env() -> Self {
        let data_dir = env::var(DATA_DIR_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let start = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                resolve_repo_root(&start).join(DATA_DIR_NAME)
            });
        Self { data_dir }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Walk parent directories looking for a `.git` marker.
///
/// Returns the starting directory unchanged when no repository root is found,
/// so the scheduler still works in a bare directory.
pub fn resolve_repo_root(start: &Path) -> PathBuf {
    let mut current = start.to_path_buf();
    loop {
        if current.join(".git").exists() {
            return current;
        }
        if !current.pop() {
            return start.to_path_buf();
        }
    }
}
