use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{decode_project_slug, Session};
use crate::config::{PREFIX_BYTES, SUMMARY_CHARS};
use crate::error::ScanError;
use crate::transcript::{self, lenient, parse_lenient, truncate_chars, Role, TranscriptLine};

const INDEX_FILE: &str = "sessions-index.json";

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

/// One entry of a project's `sessions-index.json`.
///
/// Only `sessionId` is required; any other field that is null or of the
/// wrong type falls back to its default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    #[serde(default)]
    session_id: String,
    #[serde(default, deserialize_with = "lenient")]
    full_path: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    first_prompt: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    message_count: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    created: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    modified: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    git_branch: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    project_path: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    is_sidechain: Option<bool>,
}

/// Metadata recovered from the head of an unindexed transcript
#[derive(Debug, Default, PartialEq)]
struct TranscriptMeta {
    first_prompt: String,
    git_branch: String,
    cwd: String,
}

impl TranscriptMeta {
    fn is_complete(&self) -> bool {
        !self.first_prompt.is_empty() && !self.git_branch.is_empty() && !self.cwd.is_empty()
    }
}

/// Enumerates every session visible under the projects directory
pub struct SessionScanner {
    projects_dir: PathBuf,
}

impl SessionScanner {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    /// Scan all project directories, keyed by session id.
    ///
    /// Never fails: an unreadable root yields no sessions, an unreadable
    /// project or session file is skipped.
    pub fn scan(&self) -> BTreeMap<String, Session> {
        let mut sessions = BTreeMap::new();

        let project_dirs = match list_dir(&self.projects_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping session scan: {}", e);
                return sessions;
            }
        };

        for dir in project_dirs.into_iter().filter(|p| p.is_dir()) {
            let Some(slug) = dir.file_name().and_then(|n| n.to_str()) else {
                debug!("Skipping project directory with non-UTF-8 name: {}", dir.display());
                continue;
            };
            self.scan_project(&dir, slug, &mut sessions);
        }

        sessions
    }

    fn scan_project(&self, dir: &Path, slug: &str, sessions: &mut BTreeMap<String, Session>) {
        let index_path = dir.join(INDEX_FILE);
        if index_path.is_file() {
            match read_index(&index_path) {
                Ok(entries) => {
                    for entry in entries {
                        let session = session_from_index(entry, slug);
                        sessions.insert(session.session_id.clone(), session);
                    }
                }
                Err(e) => debug!("Ignoring session index: {}", e),
            }
        }

        let files = match list_dir(dir) {
            Ok(files) => files,
            Err(e) => {
                debug!("Skipping project transcripts: {}", e);
                return;
            }
        };

        for path in files {
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if session_id.is_empty() || sessions.contains_key(session_id) {
                continue;
            }
            if let Some(session) = discover_session(&path, session_id, slug) {
                sessions.insert(session.session_id.clone(), session);
            }
        }
    }
}

/// Directory entries sorted by path
fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let read_dir = fs::read_dir(dir).map_err(|source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = read_dir.flatten().map(|e| e.path()).collect();
    paths.sort();
    Ok(paths)
}

fn read_index(path: &Path) -> Result<Vec<IndexEntry>, ScanError> {
    let raw = fs::read_to_string(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let index: IndexFile =
        serde_json::from_str(&raw).map_err(|e| ScanError::MalformedIndex {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    // A bad entry costs only itself.
    Ok(index
        .entries
        .into_iter()
        .filter_map(|value| serde_json::from_value::<IndexEntry>(value).ok())
        .filter(|entry| !entry.session_id.is_empty())
        .collect())
}

fn session_from_index(entry: IndexEntry, slug: &str) -> Session {
    let project_path = entry
        .project_path
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| decode_project_slug(slug));

    Session {
        session_id: entry.session_id,
        transcript_path: entry.full_path.filter(|p| !p.is_empty()).map(PathBuf::from),
        first_prompt: entry.first_prompt.unwrap_or_default(),
        summary: entry.summary.unwrap_or_default(),
        message_count: entry.message_count.unwrap_or(0),
        created: entry.created.as_deref().and_then(parse_timestamp),
        modified: entry.modified.as_deref().and_then(parse_timestamp),
        git_branch: entry.git_branch.unwrap_or_default(),
        project_path,
        project_slug: slug.to_string(),
        is_sidechain: entry.is_sidechain.unwrap_or(false),
    }
}

fn discover_session(path: &Path, session_id: &str, slug: &str) -> Option<Session> {
    let metadata = match fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return None,
        Err(e) => {
            debug!("Skipping transcript {}: {}", path.display(), e);
            return None;
        }
    };

    let meta = read_transcript_meta(path);
    let project_path = if meta.cwd.is_empty() {
        decode_project_slug(slug)
    } else {
        meta.cwd
    };

    Some(Session {
        session_id: session_id.to_string(),
        transcript_path: Some(path.to_path_buf()),
        first_prompt: meta.first_prompt,
        summary: String::new(),
        message_count: 0,
        created: metadata.created().ok().map(DateTime::<Utc>::from),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        git_branch: meta.git_branch,
        project_path,
        project_slug: slug.to_string(),
        is_sidechain: false,
    })
}

fn read_transcript_meta(path: &Path) -> TranscriptMeta {
    let mut meta = TranscriptMeta::default();

    let text = match transcript::read_prefix(path, PREFIX_BYTES) {
        Ok(text) => text,
        Err(e) => {
            debug!("No metadata from transcript head: {}", e);
            return meta;
        }
    };

    for raw in text.lines() {
        let Some(line) = parse_lenient::<TranscriptLine>(raw) else {
            continue;
        };

        if meta.git_branch.is_empty() {
            if let Some(branch) = line.git_branch.as_deref() {
                meta.git_branch = branch.to_string();
            }
        }
        if meta.cwd.is_empty() {
            if let Some(cwd) = line.cwd.as_deref() {
                meta.cwd = cwd.to_string();
            }
        }
        if meta.first_prompt.is_empty() && line.role() == Some(Role::User) {
            if let Some(text) = line.content().and_then(|c| c.first_text()) {
                meta.first_prompt = truncate_chars(text, SUMMARY_CHARS);
            }
        }

        if meta.is_complete() {
            break;
        }
    }

    meta
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
