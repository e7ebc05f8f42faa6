mod classifier;

pub use classifier::StatusClassifier;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inferred status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Agent is running and producing output
    Active,
    /// Agent asked to use a tool and no result came back
    StuckPermission,
    /// A tool failed and the agent hasn't moved on
    StuckError,
    /// Agent process is alive but silent past the activity timeout
    StuckTimeout,
    /// Agent finished with a final answer
    Completed,
    Idle,
}

/// Coarse grouping used for counts and ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusBucket {
    Stuck = 0,
    Active = 1,
    Completed = 2,
    Idle = 3,
}

impl SessionStatus {
    pub fn is_stuck(self) -> bool {
        matches!(
            self,
            SessionStatus::StuckPermission | SessionStatus::StuckError | SessionStatus::StuckTimeout
        )
    }

    pub fn bucket(self) -> StatusBucket {
        match self {
            SessionStatus::StuckPermission
            | SessionStatus::StuckError
            | SessionStatus::StuckTimeout => StatusBucket::Stuck,
            SessionStatus::Active => StatusBucket::Active,
            SessionStatus::Completed => StatusBucket::Completed,
            SessionStatus::Idle => StatusBucket::Idle,
        }
    }

    /// Short label for display
    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::StuckPermission => "PERMISSION",
            SessionStatus::StuckError => "ERROR",
            SessionStatus::StuckTimeout => "TIMEOUT",
            SessionStatus::Completed => "DONE",
            SessionStatus::Idle => "IDLE",
        }
    }
}

/// Extra context for stuck sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_tool_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusDetail {
    pub fn is_empty(&self) -> bool {
        self.waiting_tool.is_none()
            && self.waiting_tool_input.is_none()
            && self.error_message.is_none()
    }
}

/// Classifier output for one session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAnalysis {
    pub status: SessionStatus,
    pub last_message: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub detail: Option<StatusDetail>,
}

impl StatusAnalysis {
    pub fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            last_message: None,
            last_timestamp: None,
            detail: None,
        }
    }
}
