use crossterm::event::KeyEvent;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;

use crate::snapshot::DashboardSnapshot;

/// Session ids are UUIDs; nothing else goes near a shell
static SESSION_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[0-9a-f-]+$").expect("valid session id regex"));

/// Actions that can be dispatched through the application
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// The pipeline published a new snapshot
    SnapshotUpdated(Arc<DashboardSnapshot>),
    /// Ask the pipeline for an immediate recompute
    Refresh,
    /// Suspend the dashboard and resume the session in the foreground
    ResumeSession(ResumeCommand),
    /// Put the resume command line on the clipboard
    CopyResumeCommand(ResumeCommand),
}

/// Command that picks a session back up in its project directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeCommand {
    pub program: String,
    pub session_id: String,
    pub project_dir: Option<PathBuf>,
}

impl ResumeCommand {
    /// `None` unless `session_id` looks like a session id.
    pub fn new(program: &str, session_id: &str, project_path: &str) -> Option<Self> {
        if !SESSION_ID_RE.is_match(session_id) {
            return None;
        }
        Some(Self {
            program: program.to_string(),
            session_id: session_id.to_string(),
            project_dir: (!project_path.is_empty()).then(|| PathBuf::from(project_path)),
        })
    }

    pub fn args(&self) -> [&str; 2] {
        ["--resume", &self.session_id]
    }

    /// Shell line for pasting into a terminal
    pub fn shell_line(&self) -> String {
        let resume = format!("{} --resume {}", self.program, self.session_id);
        match &self.project_dir {
            Some(dir) => format!("cd {} && {}", shell_quote(&dir.to_string_lossy()), resume),
            None => resume,
        }
    }
}

fn shell_quote(raw: &str) -> String {
    let plain = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '~'));
    if plain {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        assert!(ResumeCommand::new("claude", "3f2a9c1e-0b7d-4e55-9a1b-ABCDEF012345", "").is_some());
        assert!(ResumeCommand::new("claude", "", "/repo").is_none());
        assert!(ResumeCommand::new("claude", "abc; rm -rf /", "/repo").is_none());
        assert!(ResumeCommand::new("claude", "$(whoami)", "/repo").is_none());
        assert!(ResumeCommand::new("claude", "xyz", "/repo").is_none());
    }

    #[test]
    fn test_shell_line() {
        let cmd = ResumeCommand::new("claude", "abc-123", "/home/me/app").unwrap();
        assert_eq!(cmd.shell_line(), "cd /home/me/app && claude --resume abc-123");
        assert_eq!(cmd.args(), ["--resume", "abc-123"]);

        let cmd = ResumeCommand::new("claude", "abc-123", "").unwrap();
        assert_eq!(cmd.shell_line(), "claude --resume abc-123");
        assert_eq!(cmd.project_dir, None);
    }

    #[test]
    fn test_project_path_is_quoted() {
        let cmd = ResumeCommand::new("claude", "abc", "/home/me/my app").unwrap();
        assert_eq!(cmd.shell_line(), "cd '/home/me/my app' && claude --resume abc");

        let cmd = ResumeCommand::new("claude", "abc", "/tmp/it's").unwrap();
        assert_eq!(cmd.shell_line(), r"cd '/tmp/it'\''s' && claude --resume abc");
    }
}
