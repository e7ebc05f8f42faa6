use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyEventKind};
use std::fs::OpenOptions;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod actions;
mod app;
mod config;
mod error;
mod pipeline;
mod process;
mod sessions;
mod snapshot;
mod status;
mod tasks;
mod transcript;

use actions::{Action, ResumeCommand};
use app::App;
use config::{Args, Config};
use pipeline::{spawn_poller, watch_changes, RefreshPipeline, Trigger};
use process::SystemProcessTable;
use snapshot::SnapshotBuilder;

const LOG_FILE: &str = "agent-pulse.log";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args);
    init_tracing(args.json)?;

    info!(claude_dir = %config.claude_dir.display(), "Starting agent-pulse");
    let builder = SnapshotBuilder::new(&config, Box::new(SystemProcessTable));

    if args.json {
        let snapshot = tokio::task::spawn_blocking(move || builder.build()).await?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    run_dashboard(config, builder).await
}

/// Log to stderr for one-shot output, to a file while the TUI owns the terminal
fn init_tracing(to_stderr: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        let path = std::env::temp_dir().join(LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

async fn run_dashboard(config: Config, builder: SnapshotBuilder) -> Result<()> {
    let pipeline = Arc::new(RefreshPipeline::new(builder));

    // Recompute triggers: file changes, the poller, and the viewer
    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel::<Trigger>();
    Arc::clone(&pipeline).spawn(trigger_rx);
    spawn_poller(config.poll_interval, trigger_tx.clone());
    let _watcher = match watch_changes(
        config.projects_dir(),
        config.tasks_dir(),
        config.debounce,
        trigger_tx.clone(),
    ) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("File watching unavailable, relying on polling: {}", e);
            None
        }
    };

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Forward published snapshots
    let mut snapshots = pipeline.subscribe();
    let snapshot_tx = tx.clone();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = Arc::clone(&snapshots.borrow_and_update());
            if snapshot_tx.send(Action::SnapshotUpdated(snapshot)).is_err() {
                break;
            }
        }
    });

    // Spawn input handler; paused while a resumed session owns the terminal
    let input_paused = Arc::new(AtomicBool::new(false));
    let input_tx = tx.clone();
    let paused = Arc::clone(&input_paused);
    tokio::task::spawn_blocking(move || {
        while !input_tx.is_closed() {
            if paused.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
            if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
                continue;
            }
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == KeyEventKind::Press {
                    let _ = input_tx.send(Action::KeyPress(key));
                }
            }
        }
    });

    let mut app = App::new(config.agent_binary.clone());
    app.handle_action(Action::SnapshotUpdated(pipeline.current()))?;

    let mut terminal = ratatui::init();

    // Main event loop
    let result = loop {
        if let Err(e) = terminal.draw(|f| app.render(f)) {
            break Err(e.into());
        }

        for pending_action in app.take_pending_actions() {
            match pending_action {
                Action::Refresh => {
                    let _ = trigger_tx.send(Trigger::Manual);
                }
                Action::ResumeSession(cmd) => {
                    // Suspend TUI while the session runs
                    input_paused.store(true, Ordering::Relaxed);
                    ratatui::restore();
                    let status = run_resume(&cmd);
                    terminal = ratatui::init();
                    input_paused.store(false, Ordering::Relaxed);

                    match status {
                        Ok(status) if !status.success() => {
                            app.message = Some(format!("{} exited with {}", cmd.program, status));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            app.message = Some(format!("Failed to resume: {}", e));
                        }
                    }
                    let _ = trigger_tx.send(Trigger::Manual);
                }
                Action::CopyResumeCommand(cmd) => {
                    app.message = Some(copy_to_clipboard(&cmd.shell_line()));
                }
                _ => {}
            }
        }

        match rx.recv().await {
            Some(action) => match app.handle_action(action) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            },
            None => break Ok(()),
        }
    };

    // Restore terminal
    ratatui::restore();
    result
}

fn run_resume(cmd: &ResumeCommand) -> std::io::Result<ExitStatus> {
    let mut command = std::process::Command::new(&cmd.program);
    command
        .args(cmd.args())
        // A nested agent refuses to start if it thinks it is inside another one.
        .env_remove("CLAUDECODE")
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(dir) = cmd.project_dir.as_deref().filter(|d| d.is_dir()) {
        command.current_dir(dir);
    }
    info!(session = %cmd.session_id, "Resuming session");
    command.status()
}

fn copy_to_clipboard(text: &str) -> String {
    match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(text)) {
        Ok(()) => format!("Copied: {}", text),
        Err(e) => format!("Clipboard error: {}", e),
    }
}
