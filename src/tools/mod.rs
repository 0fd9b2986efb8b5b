//! Tool surface: the catalog of browser tools and published flows, and the
//! dispatcher routing calls for them to the extension.

pub mod builtin;
pub mod catalog;
pub mod dispatcher;
pub mod flows;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use catalog::ToolCatalogService;
pub use dispatcher::ToolDispatcher;
pub use flows::{PublishedFlow, FLOW_TOOL_PREFIX};
pub use types::{CliToolInvocation, ParameterBuilder, ToolCallEnvelope, ToolCallResult, ToolContent, ToolDefinition};

/// `list_tools` / `call_tool` as seen by protocol clients.
///
/// Served in-process by [`ToolDispatcher`] and, with the `mcp` feature, by a
/// remote MCP session.
#[async_trait]
pub trait ToolSurface: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    async fn call_tool(&self, name: &str, args: serde_json::Value) -> Result<ToolCallResult>;
}
