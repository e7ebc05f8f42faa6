//! Filesystem change notification.
//!
//! Watches the projects and tasks roots recursively and turns bursts of
//! relevant events into a single `Trigger::FileChange` once things go quiet.
//! Only these paths count:
//!
//! ```text
//! projects/{slug}/sessions-index.json
//! projects/{slug}/{sessionId}.jsonl
//! tasks/{group}/{task}.json
//! ```
//!
//! Deeper files (sub-agent transcripts, tool-result dumps) are ignored by
//! depth, not by name.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::Trigger;

const INDEX_FILE: &str = "sessions-index.json";

/// Coalescing timer: each poke cancels the pending fire and schedules a new
/// one `delay` later.
pub struct Debouncer {
    delay: Duration,
    triggers: mpsc::UnboundedSender<Trigger>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration, triggers: mpsc::UnboundedSender<Trigger>) -> Self {
        Self {
            delay,
            triggers,
            pending: Mutex::new(None),
        }
    }

    /// Record a change. Must be called from within a tokio runtime.
    pub fn poke(&self) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let delay = self.delay;
        let triggers = self.triggers.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = triggers.send(Trigger::FileChange);
        }));
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
            }
        }
    }
}

/// Running watcher. Dropping it stops notification.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Start watching `projects_dir` and `tasks_dir`.
///
/// A root that doesn't exist yet is skipped with a warning; the poller still
/// picks up its contents once it appears.
pub fn watch_changes(
    projects_dir: PathBuf,
    tasks_dir: PathBuf,
    debounce: Duration,
    triggers: mpsc::UnboundedSender<Trigger>,
) -> notify::Result<ChangeWatcher> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<()>();

    let roots = (projects_dir.clone(), tasks_dir.clone());
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            if event
                .paths
                .iter()
                .any(|p| is_relevant(p, &roots.0, &roots.1))
            {
                let _ = raw_tx.send(());
            }
        }
        Err(e) => error!("File watcher error: {}", e),
    })?;

    for root in [&projects_dir, &tasks_dir] {
        if root.is_dir() {
            watcher.watch(root, RecursiveMode::Recursive)?;
            info!("Watching {}", root.display());
        } else {
            warn!("{} does not exist; not watching it", root.display());
        }
    }

    // notify calls back on its own thread; the debouncer needs the runtime.
    let debouncer = Debouncer::new(debounce, triggers);
    let forwarder = tokio::spawn(async move {
        while raw_rx.recv().await.is_some() {
            debouncer.poke();
        }
    });

    Ok(ChangeWatcher {
        _watcher: watcher,
        forwarder,
    })
}

/// Whether a changed path can affect a snapshot
fn is_relevant(path: &Path, projects_dir: &Path, tasks_dir: &Path) -> bool {
    if let Ok(rel) = path.strip_prefix(projects_dir) {
        if rel.components().count() != 2 {
            return false;
        }
        return path.file_name().is_some_and(|n| n == INDEX_FILE)
            || path.extension().is_some_and(|e| e == "jsonl");
    }
    if let Ok(rel) = path.strip_prefix(tasks_dir) {
        return rel.components().count() == 2 && path.extension().is_some_and(|e| e == "json");
    }
    false
}
