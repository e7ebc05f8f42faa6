use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{SessionStatus, StatusAnalysis, StatusDetail};
use crate::config::{ACTIVITY_TIMEOUT, SUMMARY_CHARS, TOOL_INPUT_CHARS};
use crate::sessions::Session;
use crate::transcript::{self, truncate_chars, ContentBlock, MessageContent, Role, TranscriptLine};

/// Tool input fields worth showing, most useful first
const TOOL_INPUT_FIELDS: [&str; 3] = ["command", "file_path", "pattern"];

/// Engine for inferring session status from a transcript tail
pub struct StatusClassifier;

impl StatusClassifier {
    /// Read the session's transcript tail and classify it.
    ///
    /// `transcript_mtime` is the transcript's modification time if it could be
    /// read; otherwise the index timestamp stands in.
    pub fn analyze(
        session: &Session,
        is_live: bool,
        transcript_mtime: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StatusAnalysis {
        let Some(path) = session.transcript_path.as_deref() else {
            return StatusAnalysis::idle();
        };

        let lines = match transcript::read_tail(path) {
            Ok(lines) => lines,
            Err(e) => {
                debug!(session = %session.session_id, "Transcript unavailable: {}", e);
                return StatusAnalysis::idle();
            }
        };

        if lines.is_empty() {
            return StatusAnalysis {
                status: if is_live {
                    SessionStatus::Active
                } else {
                    SessionStatus::Idle
                },
                last_message: None,
                last_timestamp: session.modified,
                detail: None,
            };
        }

        Self::classify(&lines, is_live, transcript_mtime.or(session.modified), now)
    }

    /// Classify a parsed transcript tail.
    ///
    /// Rules are checked in order and the first match wins:
    /// stuck_permission, stuck_error, stuck_timeout, active, completed, idle.
    pub fn classify(
        lines: &[TranscriptLine],
        is_live: bool,
        last_timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StatusAnalysis {
        let conversation: Vec<&TranscriptLine> =
            lines.iter().filter(|l| l.is_conversational()).collect();

        let timeout = Duration::seconds(ACTIVITY_TIMEOUT.as_secs() as i64);
        // No timestamp means the session is infinitely old.
        let age = last_timestamp.map(|t| now - t);
        let recent = age.is_some_and(|a| a < timeout);
        let timed_out = age.map_or(true, |a| a > timeout);

        let assistant_idx = conversation
            .iter()
            .rposition(|l| l.role() == Some(Role::Assistant));
        let last_assistant = assistant_idx.map(|i| conversation[i]);
        let last_user = conversation
            .iter()
            .rev()
            .find(|l| l.role() == Some(Role::User))
            .copied();
        let last = conversation.last().copied();

        let detail = extract_detail(last_assistant, last_user);
        let analysis = |status, message: Option<&TranscriptLine>| StatusAnalysis {
            status,
            last_message: summarize(message),
            last_timestamp,
            detail: detail.clone(),
        };

        if let Some(idx) = assistant_idx {
            if has_pending_tool_use(&conversation[idx..]) && (is_live || recent) {
                return analysis(SessionStatus::StuckPermission, last_assistant);
            }
        }

        if let Some(user) = last_user {
            if user.has_error_tool_result() && is_live {
                return analysis(SessionStatus::StuckError, Some(user));
            }
        }

        if is_live && timed_out {
            return analysis(SessionStatus::StuckTimeout, last);
        }

        if is_live {
            return analysis(SessionStatus::Active, last);
        }

        if let Some(line) = last {
            if line.role() == Some(Role::Assistant) && !line.has_tool_use() {
                return analysis(SessionStatus::Completed, last);
            }
        }

        analysis(SessionStatus::Idle, last)
    }
}

/// Whether the first line (an assistant turn) has a tool use that no later
/// user line answers. A result without an id answers any use.
fn has_pending_tool_use(from_assistant: &[&TranscriptLine]) -> bool {
    let Some((assistant, rest)) = from_assistant.split_first() else {
        return false;
    };

    let uses: Vec<Option<&str>> = assistant
        .blocks()
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, .. } => Some(id.as_deref()),
            _ => None,
        })
        .collect();
    if uses.is_empty() {
        return false;
    }

    let results: Vec<Option<&str>> = rest
        .iter()
        .filter(|l| l.role() == Some(Role::User))
        .flat_map(|l| l.blocks())
        .filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_deref()),
            _ => None,
        })
        .collect();

    if results.iter().any(Option::is_none) {
        return false;
    }

    uses.iter().any(|used| match used {
        Some(id) => !results.contains(&Some(*id)),
        None => results.is_empty(),
    })
}

/// One-line human summary of a message.
///
/// Text wins, then invoked tool names, then the tool result outcome.
fn summarize(line: Option<&TranscriptLine>) -> Option<String> {
    let content = line?.content()?;

    let blocks = match content {
        MessageContent::Text(text) => return Some(truncate_chars(text, SUMMARY_CHARS)),
        MessageContent::Blocks(blocks) => blocks,
    };

    if let Some(text) = content.joined_text() {
        return Some(truncate_chars(&text, SUMMARY_CHARS));
    }

    let tools: Vec<&str> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    if !tools.is_empty() {
        return Some(format!("[Tool: {}]", tools.join(", ")));
    }

    let mut results = blocks
        .iter()
        .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
        .peekable();
    if results.peek().is_some() {
        let outcome = if results.any(ContentBlock::is_error_result) {
            "ERROR"
        } else {
            "OK"
        };
        return Some(format!("[Tool result: {}]", outcome));
    }

    None
}

fn extract_detail(
    last_assistant: Option<&TranscriptLine>,
    last_user: Option<&TranscriptLine>,
) -> Option<StatusDetail> {
    let mut detail = StatusDetail::default();

    let last_tool = last_assistant.and_then(|line| {
        line.blocks().iter().rev().find_map(|b| match b {
            ContentBlock::ToolUse { name, input, .. } => Some((name, input)),
            _ => None,
        })
    });
    if let Some((name, input)) = last_tool {
        detail.waiting_tool = Some(name.clone()).filter(|n| !n.is_empty());
        detail.waiting_tool_input = TOOL_INPUT_FIELDS
            .iter()
            .find_map(|field| input.get(field)?.as_str().filter(|v| !v.is_empty()))
            .map(|v| truncate_chars(v, TOOL_INPUT_CHARS));
    }

    let error_content = last_user.and_then(|line| {
        line.blocks().iter().find_map(|b| match b {
            ContentBlock::ToolResult {
                content,
                is_error: Some(true),
                ..
            } => Some(content),
            _ => None,
        })
    });
    if let Some(content) = error_content {
        detail.error_message = content
            .as_ref()
            .and_then(MessageContent::joined_text)
            .map(|text| truncate_chars(&text, SUMMARY_CHARS));
    }

    (!detail.is_empty()).then_some(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::parse_lenient;

    fn lines(raw: &[&str]) -> Vec<TranscriptLine> {
        raw.iter().map(|l| parse_lenient(l).unwrap()).collect()
    }

    const USER_FIX_BUG: &str = r#"{"message":{"role":"user","content":"fix bug"}}"#;
    const ASSISTANT_BASH: &str = r#"{"message":{"role":"assistant","content":[
        {"type":"text","text":"Running the tests"},
        {"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"npm test"}}]}}"#;
    const USER_RESULT_OK: &str = r#"{"message":{"role":"user","content":[
        {"type":"tool_result","tool_use_id":"toolu_1","content":"all passed"}]}}"#;
    const USER_RESULT_ERR: &str = r#"{"message":{"role":"user","content":[
        {"type":"tool_result","tool_use_id":"toolu_1","is_error":true,
         "content":[{"type":"text","text":"npm ERR!"},{"type":"text","text":"exit 1"}]}]}}"#;
    const ASSISTANT_DONE: &str =
        r#"{"message":{"role":"assistant","content":[{"type":"text","text":"All fixed."}]}}"#;
    const SUMMARY: &str = r#"{"type":"summary","summary":"Fix the bug"}"#;

    fn ago(now: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
        Some(now - Duration::seconds(seconds))
    }

    #[test]
    fn test_pending_tool_use_live_is_stuck_permission() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_BASH]);
        let analysis = StatusClassifier::classify(&tail, true, ago(now, 5), now);

        assert_eq!(analysis.status, SessionStatus::StuckPermission);
        let detail = analysis.detail.unwrap();
        assert_eq!(detail.waiting_tool.as_deref(), Some("Bash"));
        assert_eq!(detail.waiting_tool_input.as_deref(), Some("npm test"));
        assert_eq!(analysis.last_message.as_deref(), Some("Running the tests"));
    }

    #[test]
    fn test_pending_tool_use_recent_but_not_live() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_BASH]);
        let analysis = StatusClassifier::classify(&tail, false, ago(now, 60), now);
        assert_eq!(analysis.status, SessionStatus::StuckPermission);
    }

    #[test]
    fn test_stale_pending_tool_use_not_live_is_idle() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_BASH]);
        let analysis = StatusClassifier::classify(&tail, false, ago(now, 600), now);
        assert_eq!(analysis.status, SessionStatus::Idle);
        // Detail is still reported for the dangling tool.
        assert_eq!(
            analysis.detail.and_then(|d| d.waiting_tool).as_deref(),
            Some("Bash")
        );
    }

    #[test]
    fn test_pending_tool_use_beats_earlier_error() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_BASH, USER_RESULT_ERR, ASSISTANT_BASH]);
        let analysis = StatusClassifier::classify(&tail, true, ago(now, 5), now);
        assert_eq!(analysis.status, SessionStatus::StuckPermission);
    }

    #[test]
    fn test_error_result_live_is_stuck_error() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_BASH, USER_RESULT_ERR]);
        let analysis = StatusClassifier::classify(&tail, true, ago(now, 5), now);

        assert_eq!(analysis.status, SessionStatus::StuckError);
        assert_eq!(
            analysis.detail.unwrap().error_message.as_deref(),
            Some("npm ERR! exit 1")
        );
        assert_eq!(analysis.last_message.as_deref(), Some("[Tool result: ERROR]"));
    }

    #[test]
    fn test_error_result_not_live_falls_through() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_BASH, USER_RESULT_ERR]);
        let analysis = StatusClassifier::classify(&tail, false, ago(now, 5), now);
        assert_eq!(analysis.status, SessionStatus::Idle);
    }

    #[test]
    fn test_silent_live_session_is_stuck_timeout() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_DONE]);
        let analysis = StatusClassifier::classify(&tail, true, ago(now, 600), now);
        assert_eq!(analysis.status, SessionStatus::StuckTimeout);
        assert_eq!(analysis.last_message.as_deref(), Some("All fixed."));
    }

    #[test]
    fn test_live_without_timestamp_is_stuck_timeout() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_DONE]);
        let analysis = StatusClassifier::classify(&tail, true, None, now);
        assert_eq!(analysis.status, SessionStatus::StuckTimeout);
    }

    #[test]
    fn test_live_recent_session_is_active() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_BASH, USER_RESULT_OK]);
        let analysis = StatusClassifier::classify(&tail, true, ago(now, 10), now);
        assert_eq!(analysis.status, SessionStatus::Active);
        assert_eq!(analysis.last_message.as_deref(), Some("[Tool result: OK]"));
    }

    #[test]
    fn test_final_answer_not_live_is_completed() {
        let now = Utc::now();
        let tail = lines(&[USER_FIX_BUG, ASSISTANT_DONE, SUMMARY]);
        let analysis = StatusClassifier::classify(&tail, false, ago(now, 3600), now);
        assert_eq!(analysis.status, SessionStatus::Completed);
        assert_eq!(analysis.detail, None);
    }

    #[test]
    fn test_trailing_user_message_not_live_is_idle() {
        let now = Utc::now();
        let tail = lines(&[ASSISTANT_DONE, USER_FIX_BUG]);
        let analysis = StatusClassifier::classify(&tail, false, ago(now, 3600), now);
        assert_eq!(analysis.status, SessionStatus::Idle);
        assert_eq!(analysis.last_message.as_deref(), Some("fix bug"));
    }

    #[test]
    fn test_only_meta_lines_is_idle() {
        let now = Utc::now();
        let tail = lines(&[SUMMARY]);
        let analysis = StatusClassifier::classify(&tail, false, ago(now, 10), now);
        assert_eq!(analysis.status, SessionStatus::Idle);
        assert_eq!(analysis.last_message, None);
    }

    #[test]
    fn test_partially_answered_parallel_tools_still_pending() {
        let now = Utc::now();
        let tail = lines(&[
            r#"{"message":{"role":"assistant","content":[
                {"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"/a.rs"}},
                {"type":"tool_use","id":"t2","name":"Grep","input":{"pattern":"fn main"}}]}}"#,
            r#"{"message":{"role":"user","content":[
                {"type":"tool_result","tool_use_id":"t1","content":"..."}]}}"#,
        ]);
        let analysis = StatusClassifier::classify(&tail, true, ago(now, 1), now);
        assert_eq!(analysis.status, SessionStatus::StuckPermission);
        let detail = analysis.detail.unwrap();
        assert_eq!(detail.waiting_tool.as_deref(), Some("Grep"));
        assert_eq!(detail.waiting_tool_input.as_deref(), Some("fn main"));
        assert_eq!(analysis.last_message.as_deref(), Some("[Tool: Read, Grep]"));
    }

    #[test]
    fn test_long_text_and_tool_input_are_truncated() {
        let now = Utc::now();
        let long = "x".repeat(400);
        let raw = format!(
            r#"{{"message":{{"role":"assistant","content":[
                {{"type":"text","text":"{long}"}},
                {{"type":"tool_use","id":"t","name":"Bash","input":{{"command":"{long}"}}}}]}}}}"#
        );
        let tail = lines(&[raw.as_str()]);
        let analysis = StatusClassifier::classify(&tail, true, ago(now, 1), now);

        assert_eq!(analysis.last_message.unwrap().len(), SUMMARY_CHARS);
        assert_eq!(
            analysis.detail.unwrap().waiting_tool_input.unwrap().len(),
            TOOL_INPUT_CHARS
        );
    }

    #[test]
    fn test_analyze_without_transcript_is_idle_even_if_live() {
        let session = crate::sessions::test_session("s", "/repo");
        let analysis = StatusClassifier::analyze(&session, true, None, Utc::now());
        assert_eq!(analysis, StatusAnalysis::idle());
    }

    #[test]
    fn test_analyze_unreadable_transcript_is_idle() {
        let mut session = crate::sessions::test_session("s", "/repo");
        session.transcript_path = Some("/nonexistent/s.jsonl".into());
        let analysis = StatusClassifier::analyze(&session, true, None, Utc::now());
        assert_eq!(analysis.status, SessionStatus::Idle);
    }

    #[test]
    fn test_analyze_empty_transcript_uses_liveness() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut session = crate::sessions::test_session("s", "/repo");
        session.transcript_path = Some(tmp.path().to_path_buf());
        session.modified = Some(Utc::now());

        let live = StatusClassifier::analyze(&session, true, None, Utc::now());
        assert_eq!(live.status, SessionStatus::Active);
        assert_eq!(live.last_timestamp, session.modified);

        let idle = StatusClassifier::analyze(&session, false, None, Utc::now());
        assert_eq!(idle.status, SessionStatus::Idle);
    }
}
