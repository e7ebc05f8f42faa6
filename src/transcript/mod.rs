//! Transcript line model.
//!
//! A transcript is an append-only file with one JSON object per line. Only the
//! fields the status pipeline reads are modelled; everything else is ignored.

mod tail;

pub use tail::{read_prefix, read_tail};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Author of a conversational line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[serde(other)]
    Other,
}

/// One parsed transcript line
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptLine {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub cwd: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub message: Option<MessageBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// Message payload: a bare string or a list of typed blocks
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Option<MessageContent>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

impl ContentBlock {
    pub fn is_error_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { is_error: Some(true), .. })
    }
}

impl MessageContent {
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        }
    }

    /// Text blocks joined with single spaces, or the bare string.
    /// `None` when there is no text at all.
    pub fn joined_text(&self) -> Option<String> {
        match self {
            MessageContent::Text(text) => Some(text.clone()),
            MessageContent::Blocks(blocks) => {
                let texts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join(" "))
                }
            }
        }
    }

    /// First text block, or the bare string
    pub fn first_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }
}

impl TranscriptLine {
    /// User or assistant role; `None` for summaries and other meta lines
    pub fn role(&self) -> Option<Role> {
        match self.message.as_ref()?.role? {
            Role::Other => None,
            role => Some(role),
        }
    }

    pub fn is_conversational(&self) -> bool {
        self.role().is_some()
    }

    pub fn content(&self) -> Option<&MessageContent> {
        self.message.as_ref()?.content.as_ref()
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        self.content().map(MessageContent::blocks).unwrap_or(&[])
    }

    pub fn has_tool_use(&self) -> bool {
        self.blocks()
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }

    pub fn has_error_tool_result(&self) -> bool {
        self.blocks().iter().any(ContentBlock::is_error_result)
    }
}

/// Keep at most `max` characters of `text`
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Parse one untrusted JSON value, yielding `None` instead of an error.
///
/// Blank input is `None` as well.
pub fn parse_lenient<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    serde_json::from_str(raw).ok()
}

/// Field deserializer for optional record fields: `null` or a value of the
/// wrong type becomes the default instead of failing the whole record.
pub fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}
