//! Convenience re-exports for common use.

pub use crate::agent::{
    ActAccepted, ActRequest, AgentChatService, AgentEngine, AgentEvent, AgentToolBridge,
    EngineName, ExecutionStatus, StreamEvent, StreamManager, TerminalOutcome,
};
pub use crate::broker::{PeerClient, RequestCorrelationBroker};
pub use crate::channel::{ChannelTransport, MessageKind, StreamChannel};
pub use crate::config::RelayConfig;
pub use crate::error::{RelayError, Result};
pub use crate::tools::{
    ToolCallEnvelope, ToolCallResult, ToolCatalogService, ToolDefinition, ToolDispatcher,
    ToolSurface,
};
