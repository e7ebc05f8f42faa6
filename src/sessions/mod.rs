mod scanner;

pub use scanner::SessionScanner;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One recorded agent conversation, rebuilt from disk on every scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    /// Append-only transcript; `None` for index entries without a path
    pub transcript_path: Option<PathBuf>,
    pub first_prompt: String,
    pub summary: String,
    pub message_count: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub git_branch: String,
    pub project_path: String,
    pub project_slug: String,
    pub is_sidechain: bool,
}

impl Session {
    /// Human-readable project name.
    ///
    /// Basename of the project path, else the last dash-separated segment of
    /// the slug, else the slug itself.
    pub fn project_name(&self) -> String {
        if !self.project_path.is_empty() {
            if let Some(name) = Path::new(&self.project_path).file_name() {
                return name.to_string_lossy().into_owned();
            }
        }
        self.project_slug
            .split('-')
            .filter(|part| !part.is_empty())
            .last()
            .unwrap_or(&self.project_slug)
            .to_string()
    }
}

/// Reconstruct a project path from its directory slug.
///
/// The slug is the path with every separator replaced by a dash, so this is
/// lossy: `-Users-me-my-app` decodes to `/Users/me/my/app`.
pub fn decode_project_slug(slug: &str) -> String {
    slug.replace('-', "/")
}

#[cfg(test)]
pub(crate) fn test_session(id: &str, project_path: &str) -> Session {
    Session {
        session_id: id.to_string(),
        transcript_path: None,
        first_prompt: String::new(),
        summary: String::new(),
        message_count: 0,
        created: None,
        modified: None,
        git_branch: String::new(),
        project_path: project_path.to_string(),
        project_slug: project_path.replace('/', "-"),
        is_sidechain: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_slug() {
        assert_eq!(decode_project_slug("-Users-john-projects"), "/Users/john/projects");
        // Dashes in the original path are not recoverable.
        assert_eq!(decode_project_slug("-home-me-my-app"), "/home/me/my/app");
        assert_eq!(decode_project_slug("plain"), "plain");
    }

    #[test]
    fn test_project_name_prefers_path() {
        let session = test_session("s1", "/home/me/my-app");
        assert_eq!(session.project_name(), "my-app");
    }

    #[test]
    fn test_project_name_falls_back_to_slug() {
        let mut session = test_session("s1", "");
        session.project_slug = "-home-me-widget-".to_string();
        assert_eq!(session.project_name(), "widget");

        session.project_slug = "---".to_string();
        assert_eq!(session.project_name(), "---");
    }
}
