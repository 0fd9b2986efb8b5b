//! Agent execution: act requests, engines, per-request event streams,
//! and the bridge engines use to reach browser tools.

pub mod bridge;
pub mod chat;
pub mod engines;
pub mod events;
pub mod registry;
pub mod stream;
pub mod types;

pub use bridge::{AgentToolBridge, LocalConnector, ToolConnector};
pub use chat::AgentChatService;
pub use engines::{AgentEngine, EngineExecutionContext, EngineRunOptions, EventEmitter};
pub use events::{AgentEvent, LogLevel, StreamEvent, TerminalOutcome, TodoItem};
pub use registry::AgentExecutionRegistry;
pub use stream::{EventStream, StreamManager};
pub use types::{
    ActAccepted, ActRequest, EngineInfo, EngineName, ExecutionStatus, RequestId, RunningExecution,
    SessionId,
};
