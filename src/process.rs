//! Correlation of running agent processes with recorded sessions.
//!
//! No agent exposes which session it is writing, so a process is attributed
//! to the most recently written session recorded against its working
//! directory. Any transcript written in the last few seconds also counts as
//! live, which catches short-lived invocations the process scan misses.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

use crate::config::RECENT_WRITE_WINDOW;
use crate::sessions::Session;

/// One row of the OS process table
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command: String,
    /// Unavailable when the process can't be introspected
    pub cwd: Option<PathBuf>,
}

/// Source of process listings
pub trait ProcessTable: Send + Sync {
    /// Current processes. An unavailable listing is an empty one.
    fn processes(&self) -> Vec<ProcessEntry>;
}

/// Process table backed by the operating system
#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn processes(&self) -> Vec<ProcessEntry> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cwd(UpdateKind::Always),
        );

        sys.processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                command: process.name().to_string_lossy().into_owned(),
                cwd: process.cwd().map(Path::to_path_buf),
            })
            .collect()
    }
}

/// Decides which sessions have a live agent behind them
pub struct ProcessCorrelator {
    table: Box<dyn ProcessTable>,
    agent_binary: String,
}

impl ProcessCorrelator {
    pub fn new(table: Box<dyn ProcessTable>, agent_binary: impl Into<String>) -> Self {
        Self {
            table,
            agent_binary: agent_binary.into(),
        }
    }

    /// Working directories of running agent processes
    pub fn agent_cwds(&self) -> BTreeSet<PathBuf> {
        let cwds: BTreeSet<PathBuf> = self
            .table
            .processes()
            .into_iter()
            .filter(|p| is_agent_command(&p.command, &self.agent_binary))
            .filter_map(|p| {
                if p.cwd.is_none() {
                    debug!(pid = p.pid, "Agent process has no readable cwd");
                }
                p.cwd
            })
            .filter(|cwd| cwd.is_absolute())
            .collect();

        debug!(count = cwds.len(), "Found running agent processes");
        cwds
    }

    /// Ids of sessions believed to have a live agent process
    pub fn live_sessions(
        &self,
        sessions: &BTreeMap<String, Session>,
        mtimes: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> HashSet<String> {
        if sessions.is_empty() {
            return HashSet::new();
        }
        correlate(sessions, &self.agent_cwds(), mtimes, now)
    }
}

/// Fixed process listing for tests
#[cfg(test)]
pub(crate) struct StaticProcessTable(pub Vec<ProcessEntry>);

#[cfg(test)]
impl ProcessTable for StaticProcessTable {
    fn processes(&self) -> Vec<ProcessEntry> {
        self.0.clone()
    }
}

/// Exact command name, or a path ending in it
fn is_agent_command(command: &str, binary: &str) -> bool {
    command == binary
        || command
            .strip_suffix(binary)
            .is_some_and(|rest| rest.ends_with('/'))
}

/// Match process working directories to sessions.
///
/// `mtimes` holds each session's transcript modification time; sessions
/// without one rank oldest within their project.
pub fn correlate(
    sessions: &BTreeMap<String, Session>,
    cwds: &BTreeSet<PathBuf>,
    mtimes: &HashMap<String, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> HashSet<String> {
    let mut live = HashSet::new();

    // project path -> session ids, most recently written first
    let mut by_project: BTreeMap<PathBuf, Vec<(&str, Option<DateTime<Utc>>)>> = BTreeMap::new();
    for (id, session) in sessions {
        if session.project_path.is_empty() {
            continue;
        }
        by_project
            .entry(PathBuf::from(&session.project_path))
            .or_default()
            .push((id.as_str(), mtimes.get(id).copied()));
    }
    for group in by_project.values_mut() {
        group.sort_by(|a, b| b.1.cmp(&a.1));
    }

    for cwd in cwds {
        let group = by_project.get(cwd).or_else(|| {
            by_project
                .iter()
                .find(|(project, _)| cwd.starts_with(project) || project.starts_with(cwd))
                .map(|(_, group)| group)
        });
        if let Some((id, _)) = group.and_then(|g| g.first()) {
            live.insert(id.to_string());
        }
    }

    let window = chrono::Duration::seconds(RECENT_WRITE_WINDOW.as_secs() as i64);
    for (id, mtime) in mtimes {
        if sessions.contains_key(id) && now - *mtime < window {
            live.insert(id.clone());
        }
    }

    live
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::test_session;
    use chrono::Duration;

    fn entry(pid: u32, command: &str, cwd: Option<&str>) -> ProcessEntry {
        ProcessEntry {
            pid,
            command: command.to_string(),
            cwd: cwd.map(PathBuf::from),
        }
    }

    fn sessions(list: &[(&str, &str)]) -> BTreeMap<String, Session> {
        list.iter()
            .map(|(id, path)| (id.to_string(), test_session(id, path)))
            .collect()
    }

    fn cwds(list: &[&str]) -> BTreeSet<PathBuf> {
        list.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_agent_command_matching() {
        assert!(is_agent_command("claude", "claude"));
        assert!(is_agent_command("/usr/local/bin/claude", "claude"));
        assert!(!is_agent_command("claude-helper", "claude"));
        assert!(!is_agent_command("notclaude", "claude"));
        assert!(!is_agent_command("Claude.app", "claude"));
    }

    #[test]
    fn test_agent_cwds_filters_processes() {
        let correlator = ProcessCorrelator::new(
            Box::new(StaticProcessTable(vec![
                entry(1, "claude", Some("/repo")),
                entry(2, "/opt/bin/claude", Some("/other")),
                entry(3, "bash", Some("/shell")),
                entry(4, "claude", None),
                entry(5, "claude", Some("relative/dir")),
            ])),
            "claude",
        );
        assert_eq!(correlator.agent_cwds(), cwds(&["/other", "/repo"]));
    }

    #[test]
    fn test_only_newest_session_in_project_is_live() {
        let now = Utc::now();
        let sessions = sessions(&[("a", "/repo"), ("b", "/repo")]);
        let mtimes = HashMap::from([
            ("a".to_string(), now - Duration::seconds(60)),
            ("b".to_string(), now - Duration::hours(1)),
        ]);

        let live = correlate(&sessions, &cwds(&["/repo"]), &mtimes, now);
        assert_eq!(live, HashSet::from(["a".to_string()]));
    }

    #[test]
    fn test_subdirectory_match_either_direction() {
        let now = Utc::now();
        let sessions = sessions(&[("a", "/repo"), ("b", "/work/app/crates/core")]);
        let mtimes = HashMap::from([
            ("a".to_string(), now - Duration::hours(2)),
            ("b".to_string(), now - Duration::hours(2)),
        ]);

        let live = correlate(&sessions, &cwds(&["/repo/src", "/work/app"]), &mtimes, now);
        assert_eq!(live, HashSet::from(["a".to_string(), "b".to_string()]));

        // Sibling with a shared string prefix is not a subdirectory.
        let live = correlate(&sessions, &cwds(&["/repository"]), &mtimes, now);
        assert!(live.is_empty());
    }

    #[test]
    fn test_recent_write_counts_as_live_without_process() {
        let now = Utc::now();
        let sessions = sessions(&[("fresh", "/x"), ("stale", "/y"), ("none", "")]);
        let mtimes = HashMap::from([
            ("fresh".to_string(), now - Duration::seconds(5)),
            ("stale".to_string(), now - Duration::seconds(31)),
        ]);

        let live = correlate(&sessions, &BTreeSet::new(), &mtimes, now);
        assert_eq!(live, HashSet::from(["fresh".to_string()]));
    }

    #[test]
    fn test_session_without_mtime_ranks_last() {
        let now = Utc::now();
        let sessions = sessions(&[("a", "/repo"), ("b", "/repo")]);
        let mtimes = HashMap::from([("b".to_string(), now - Duration::hours(3))]);

        let live = correlate(&sessions, &cwds(&["/repo"]), &mtimes, now);
        assert_eq!(live, HashSet::from(["b".to_string()]));
    }

    #[test]
    fn test_empty_table_degrades_to_recent_writes() {
        let now = Utc::now();
        let correlator = ProcessCorrelator::new(Box::new(StaticProcessTable(vec![])), "claude");
        let sessions = sessions(&[("a", "/repo")]);
        let mtimes = HashMap::from([("a".to_string(), now)]);

        let live = correlator.live_sessions(&sessions, &mtimes, now);
        assert!(live.contains("a"));
    }
}
