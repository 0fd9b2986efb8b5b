//! Execution event stream types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ExecutionStatus, RequestId};

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Completed,
    Failed { error: String },
    Cancelled,
}

impl TerminalOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Completed => ExecutionStatus::Completed,
            Self::Failed { .. } => ExecutionStatus::Failed,
            Self::Cancelled => ExecutionStatus::Cancelled,
        }
    }
}

/// Severity of a [`AgentEvent::Log`] line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A todo-list entry reported by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

/// Event payloads emitted while an execution runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Status {
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Incremental assistant text.
    AssistantDelta {
        text: String,
    },
    /// A complete assistant message.
    Message {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolUse {
        call_id: String,
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    TodoList {
        items: Vec<TodoItem>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    /// Always the last event of a stream.
    Terminal {
        outcome: TerminalOutcome,
    },
}

impl AgentEvent {
    pub fn status(status: ExecutionStatus) -> Self {
        Self::Status {
            status,
            message: None,
        }
    }

    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// Envelope delivered to stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub request_id: RequestId,
    /// Position in the execution's stream, starting at 0.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: AgentEvent,
}

impl StreamEvent {
    pub fn terminal_outcome(&self) -> Option<&TerminalOutcome> {
        match &self.event {
            AgentEvent::Terminal { outcome } => Some(outcome),
            _ => None,
        }
    }
}
