//! Error classification and recovery hints.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Channel,
    Protocol,
    NotFound,
    Upstream,
    Engine,
    Configuration,
    Contract,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    IncreaseTimeout,
    ReconnectPeer,
    RefreshCatalog,
    CheckConfiguration,
    CheckEngineInstallation,
    ReportBug,
}
