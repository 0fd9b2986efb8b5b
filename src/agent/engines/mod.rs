//! Agent engines: the coding-agent CLIs an execution can run on.

pub mod claude;
pub mod codex;
pub mod process;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::bridge::AgentToolBridge;
use super::events::AgentEvent;
use super::stream::StreamManager;
use super::types::{EngineName, RequestId, SessionId};
use crate::error::Result;

pub use claude::ClaudeEngine;
pub use codex::CodexEngine;

/// Inputs for one engine run.
#[derive(Debug, Clone, Default)]
pub struct EngineRunOptions {
    pub instruction: String,
    pub project_root: Option<PathBuf>,
    pub model: Option<String>,
}

/// Publishes events into one execution's stream.
#[derive(Clone)]
pub struct EventEmitter {
    request_id: RequestId,
    streams: Arc<StreamManager>,
}

impl EventEmitter {
    pub fn new(request_id: RequestId, streams: Arc<StreamManager>) -> Self {
        Self { request_id, streams }
    }

    /// Returns `false` once the stream is closed.
    pub fn emit(&self, event: AgentEvent) -> bool {
        self.streams.publish(&self.request_id, event)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Everything an engine needs from the surrounding execution.
#[derive(Clone)]
pub struct EngineExecutionContext {
    pub request_id: RequestId,
    pub session_id: SessionId,
    /// Fired when the execution is cancelled; the engine stops its process.
    pub cancel: CancellationToken,
    pub emitter: EventEmitter,
    pub tools: Arc<AgentToolBridge>,
}

/// A coding-agent backend.
///
/// Engines report progress through `ctx.emitter`; the terminal event is
/// published by the caller from the returned result.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    fn name(&self) -> EngineName;

    /// Whether the engine talks to the tool surface over MCP itself.
    fn supports_mcp(&self) -> bool;

    async fn initialize_and_run(
        &self,
        options: EngineRunOptions,
        ctx: EngineExecutionContext,
    ) -> Result<()>;
}
