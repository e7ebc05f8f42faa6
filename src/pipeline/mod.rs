//! The recompute pipeline.
//!
//! Triggers from the file watcher, the poller and the viewer all land on one
//! channel. A single task drains it and runs one recompute at a time, then
//! swaps the published snapshot. Readers hold an `Arc` to whichever snapshot
//! was current when they looked, so they never see a partial one.

mod watcher;

pub use watcher::watch_changes;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::snapshot::{DashboardSnapshot, SnapshotBuilder};

/// Why a recompute was requested. Carries no payload: every recompute
/// rescans from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    FileChange,
    Poll,
    Manual,
}

/// Owner of the current snapshot and its only writer
pub struct RefreshPipeline {
    builder: Arc<SnapshotBuilder>,
    current: watch::Sender<Arc<DashboardSnapshot>>,
}

impl RefreshPipeline {
    pub fn new(builder: SnapshotBuilder) -> Self {
        let (current, _) = watch::channel(Arc::new(DashboardSnapshot::default()));
        Self {
            builder: Arc::new(builder),
            current,
        }
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardSnapshot>> {
        self.current.subscribe()
    }

    /// The snapshot currently published
    pub fn current(&self) -> Arc<DashboardSnapshot> {
        Arc::clone(&self.current.borrow())
    }

    /// Run one recompute and publish it.
    ///
    /// Returns `false` if the recompute died, in which case the previous
    /// snapshot stays current.
    pub async fn refresh(&self) -> bool {
        let builder = Arc::clone(&self.builder);
        match tokio::task::spawn_blocking(move || builder.build()).await {
            Ok(snapshot) => {
                debug!(
                    sessions = snapshot.stats.total,
                    stuck = snapshot.stats.stuck,
                    "Publishing snapshot"
                );
                self.current.send_replace(Arc::new(snapshot));
                true
            }
            Err(e) => {
                error!("Recompute failed, keeping previous snapshot: {}", e);
                false
            }
        }
    }

    /// Recompute once per batch of triggers until every sender is gone.
    pub fn spawn(self: Arc<Self>, mut triggers: mpsc::UnboundedReceiver<Trigger>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(trigger) = triggers.recv().await {
                // Triggers queued behind this one are satisfied by the same rescan.
                let mut coalesced = 0usize;
                while triggers.try_recv().is_ok() {
                    coalesced += 1;
                }
                debug!(?trigger, coalesced, "Recompute triggered");
                self.refresh().await;
            }
            debug!("Trigger channel closed, pipeline stopping");
        })
    }
}

/// Send a `Poll` trigger every `interval`, starting immediately.
pub fn spawn_poller(interval: Duration, triggers: mpsc::UnboundedSender<Trigger>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if triggers.send(Trigger::Poll).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Args, Config};
    use crate::process::{ProcessEntry, ProcessTable, StaticProcessTable};
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    struct PanickingTable;

    impl ProcessTable for PanickingTable {
        fn processes(&self) -> Vec<ProcessEntry> {
            panic!("process listing blew up");
        }
    }

    fn config(tmp: &TempDir) -> Config {
        let dir = tmp.path().to_str().unwrap();
        Config::from_args(&Args::parse_from(["agent-pulse", "--claude-dir", dir]))
    }

    fn write_session(tmp: &TempDir, id: &str) {
        let dir = tmp.path().join("projects").join("-repo");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{id}.jsonl")),
            r#"{"message":{"role":"assistant","content":"done"}}"#,
        )
        .unwrap();
    }

    fn pipeline(tmp: &TempDir, table: Box<dyn ProcessTable>) -> Arc<RefreshPipeline> {
        Arc::new(RefreshPipeline::new(SnapshotBuilder::new(&config(tmp), table)))
    }

    #[tokio::test]
    async fn test_starts_with_empty_snapshot() {
        let tmp = TempDir::new().unwrap();
        let pipeline = pipeline(&tmp, Box::new(StaticProcessTable(vec![])));

        let current = pipeline.current();
        assert!(current.sessions.is_empty());
        assert!(current.updated_at.is_none());
    }

    #[tokio::test]
    async fn test_refresh_publishes_to_subscribers() {
        let tmp = TempDir::new().unwrap();
        write_session(&tmp, "abc");
        let pipeline = pipeline(&tmp, Box::new(StaticProcessTable(vec![])));
        let mut rx = pipeline.subscribe();

        assert!(pipeline.refresh().await);
        assert!(rx.has_changed().unwrap());

        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.stats.total, 1);
        assert!(Arc::ptr_eq(&seen, &pipeline.current()));
    }

    #[tokio::test]
    async fn test_failed_recompute_keeps_previous_snapshot() {
        let tmp = TempDir::new().unwrap();
        write_session(&tmp, "abc");
        let pipeline = pipeline(&tmp, Box::new(PanickingTable));
        let before = pipeline.current();
        let rx = pipeline.subscribe();

        assert!(!pipeline.refresh().await);
        assert!(Arc::ptr_eq(&before, &pipeline.current()));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_trigger_loop_recomputes() {
        let tmp = TempDir::new().unwrap();
        write_session(&tmp, "abc");
        let pipeline = pipeline(&tmp, Box::new(StaticProcessTable(vec![])));
        let mut rx = pipeline.subscribe();

        let (tx, trigger_rx) = mpsc::unbounded_channel();
        let handle = Arc::clone(&pipeline).spawn(trigger_rx);

        tx.send(Trigger::Manual).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().stats.total, 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_ticks_on_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = tokio::time::Instant::now();
        let handle = spawn_poller(Duration::from_secs(5), tx);

        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(Trigger::Poll));
        }
        // First tick is immediate, then one per interval.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(15));

        drop(rx);
        handle.await.unwrap();
    }
}
