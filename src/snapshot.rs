//! One consistent view of every known session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;
use crate::process::{ProcessCorrelator, ProcessTable};
use crate::sessions::{Session, SessionScanner};
use crate::status::{SessionStatus, StatusAnalysis, StatusBucket, StatusClassifier};
use crate::tasks::{TaskGroup, TaskIndex};

/// A session joined with its inferred status and task progress
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    #[serde(flatten)]
    pub session: Session,
    pub project_name: String,
    #[serde(flatten)]
    pub analysis: StatusAnalysis,
    pub tasks: Option<TaskGroup>,
}

/// Session counts; the four buckets always sum to `total`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub total: usize,
    pub active: usize,
    pub stuck: usize,
    pub completed: usize,
    pub idle: usize,
}

impl SnapshotStats {
    fn record(&mut self, status: SessionStatus) {
        self.total += 1;
        match status.bucket() {
            StatusBucket::Stuck => self.stuck += 1,
            StatusBucket::Active => self.active += 1,
            StatusBucket::Completed => self.completed += 1,
            StatusBucket::Idle => self.idle += 1,
        }
    }
}

/// Immutable dashboard state produced by one recompute
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    /// Stuck first, then active, completed, idle; newest first within each
    pub sessions: Vec<SnapshotEntry>,
    pub stats: SnapshotStats,
    /// `None` until the first recompute lands
    pub updated_at: Option<DateTime<Utc>>,
}

/// Runs scan, correlation and classification into a snapshot
pub struct SnapshotBuilder {
    scanner: SessionScanner,
    correlator: ProcessCorrelator,
    tasks_dir: PathBuf,
}

impl SnapshotBuilder {
    pub fn new(config: &Config, processes: Box<dyn ProcessTable>) -> Self {
        Self {
            scanner: SessionScanner::new(config.projects_dir()),
            correlator: ProcessCorrelator::new(processes, config.agent_binary.clone()),
            tasks_dir: config.tasks_dir(),
        }
    }

    pub fn build(&self) -> DashboardSnapshot {
        self.build_at(Utc::now())
    }

    /// Build a snapshot as of `now`
    pub fn build_at(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        let sessions = self.scanner.scan();
        let mtimes = transcript_mtimes(&sessions);
        let live = self.correlator.live_sessions(&sessions, &mtimes, now);
        let tasks = TaskIndex::load(&self.tasks_dir);

        debug!(
            sessions = sessions.len(),
            live = live.len(),
            task_groups = tasks.group_count(),
            "Building snapshot"
        );

        let mut stats = SnapshotStats::default();
        let mut entries: Vec<SnapshotEntry> = sessions
            .into_values()
            .map(|session| {
                let id = &session.session_id;
                let analysis = StatusClassifier::analyze(
                    &session,
                    live.contains(id),
                    mtimes.get(id).copied(),
                    now,
                );
                stats.record(analysis.status);

                SnapshotEntry {
                    project_name: session.project_name(),
                    tasks: tasks.for_session(id).cloned(),
                    analysis,
                    session,
                }
            })
            .collect();

        sort_entries(&mut entries);

        DashboardSnapshot {
            sessions: entries,
            stats,
            updated_at: Some(now),
        }
    }
}

/// Transcript modification times, for sessions whose transcript can be stat'ed
fn transcript_mtimes(sessions: &BTreeMap<String, Session>) -> HashMap<String, DateTime<Utc>> {
    sessions
        .iter()
        .filter_map(|(id, session)| {
            let path = session.transcript_path.as_ref()?;
            let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
            Some((id.clone(), DateTime::<Utc>::from(modified)))
        })
        .collect()
}

/// Bucket rank ascending, then newest first; missing timestamps sort oldest
fn sort_entries(entries: &mut [SnapshotEntry]) {
    entries.sort_by(|a, b| {
        a.analysis
            .status
            .bucket()
            .cmp(&b.analysis.status.bucket())
            .then_with(|| b.analysis.last_timestamp.cmp(&a.analysis.last_timestamp))
    });
}
