use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// How long a session may go without transcript writes before it counts as stale.
pub const ACTIVITY_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Any transcript written within this window marks its session live.
pub const RECENT_WRITE_WINDOW: Duration = Duration::from_secs(30);

/// Bytes read from the end of a transcript on every recompute.
pub const TAIL_BYTES: u64 = 16 * 1024;

/// Bytes read from the start of an unindexed transcript to recover its metadata.
pub const PREFIX_BYTES: usize = 4 * 1024;

/// Max characters kept for prompts, message summaries and error text.
pub const SUMMARY_CHARS: usize = 200;

/// Max characters kept for a pending tool's input summary.
pub const TOOL_INPUT_CHARS: usize = 150;

/// Command line for the dashboard
#[derive(Debug, Parser)]
#[command(name = "agent-pulse", version, about)]
pub struct Args {
    /// Agent data directory (contains `projects/` and `tasks/`)
    #[arg(long, env = "CLAUDE_DIR")]
    pub claude_dir: Option<PathBuf>,

    /// Interval between process polls, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub poll_interval_ms: u64,

    /// Quiet period before a burst of file events triggers a recompute, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub debounce_ms: u64,

    /// Command name of the agent process to correlate with sessions
    #[arg(long, default_value = "claude")]
    pub agent_binary: String,

    /// Print a single snapshot as JSON and exit
    #[arg(long)]
    pub json: bool,
}

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub claude_dir: PathBuf,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub agent_binary: String,
}

impl Config {
    pub fn from_args(args: &Args) -> Self {
        let claude_dir = args.claude_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_default()
                .join(".claude")
        });

        Self {
            claude_dir,
            poll_interval: Duration::from_millis(args.poll_interval_ms.max(100)),
            debounce: Duration::from_millis(args.debounce_ms),
            agent_binary: args.agent_binary.clone(),
        }
    }

    /// Directory holding one sub-directory per project
    pub fn projects_dir(&self) -> PathBuf {
        self.claude_dir.join("projects")
    }

    /// Directory holding one sub-directory per task group
    pub fn tasks_dir(&self) -> PathBuf {
        self.claude_dir.join("tasks")
    }
}
