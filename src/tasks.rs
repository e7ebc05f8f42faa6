//! Task-group progress records.
//!
//! Each group is a directory named after a session id holding one JSON file
//! per task.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::TaskError;
use crate::transcript::lenient;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One task file. Any JSON object counts; unusable fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub subject: String,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub active_form: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
}

/// Tasks of one group, ordered by numeric id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskGroup {
    pub tasks: Vec<Task>,
    pub stats: TaskStats,
}

impl TaskGroup {
    fn new(mut tasks: Vec<Task>) -> Self {
        tasks.sort_by_key(|t| numeric_id(&t.id));

        let count = |status| tasks.iter().filter(|t| t.status == status).count();
        let stats = TaskStats {
            total: tasks.len(),
            pending: count(TaskStatus::Pending),
            in_progress: count(TaskStatus::InProgress),
            completed: count(TaskStatus::Completed),
        };

        Self { tasks, stats }
    }
}

/// All task groups keyed by group id
#[derive(Debug, Default)]
pub struct TaskIndex {
    groups: HashMap<String, TaskGroup>,
}

impl TaskIndex {
    /// Load every group under `tasks_dir`.
    ///
    /// Invalid task files are skipped one by one; groups without a single
    /// valid task don't exist. A missing root yields an empty index.
    pub fn load(tasks_dir: &Path) -> Self {
        if !tasks_dir.is_dir() {
            debug!("No task directory at {}", tasks_dir.display());
            return Self::default();
        }

        let mut raw: HashMap<String, Vec<Task>> = HashMap::new();

        let walker = WalkDir::new(tasks_dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable task entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let Some(group_id) = group_id(path) else {
                continue;
            };

            match read_task(path) {
                Ok(task) => raw.entry(group_id).or_default().push(task),
                Err(e) => debug!("Skipping task: {}", e),
            }
        }

        let groups = raw
            .into_iter()
            .map(|(id, tasks)| (id, TaskGroup::new(tasks)))
            .collect();
        Self { groups }
    }

    /// Task group sharing the session's id
    pub fn for_session(&self, session_id: &str) -> Option<&TaskGroup> {
        self.groups.get(session_id)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

fn group_id(task_path: &Path) -> Option<String> {
    task_path
        .parent()?
        .file_name()?
        .to_str()
        .map(str::to_string)
}

fn read_task(path: &Path) -> Result<Task, TaskError> {
    let raw = fs::read_to_string(path).map_err(|source| TaskError::Io {
        path: PathBuf::from(path),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|e| TaskError::Malformed {
        path: PathBuf::from(path),
        message: e.to_string(),
    })
}

/// Leading digits of an id; anything else sorts as 0
fn numeric_id(id: &str) -> u64 {
    let digits: String = id
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}
