//! Tool bridge letting engines call back into the tool surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::tools::{CliToolInvocation, ToolCallResult, ToolDefinition, ToolDispatcher, ToolSurface};
use crate::util::timeout::with_timeout;

/// Establishes the tool session an [`AgentToolBridge`] forwards to.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ToolSurface>>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Serves the bridge from the in-process dispatcher, so engine tool calls
/// take the same correlation path as any other caller.
pub struct LocalConnector {
    dispatcher: Arc<ToolDispatcher>,
}

impl LocalConnector {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl ToolConnector for LocalConnector {
    async fn connect(&self) -> Result<Arc<dyn ToolSurface>> {
        Ok(self.dispatcher.clone())
    }

    fn describe(&self) -> String {
        "local dispatcher".to_string()
    }
}

/// Client used by engines to issue tool calls.
///
/// One session is established on first use and reused for the bridge's
/// lifetime. A failed connect is not cached; the next call retries.
pub struct AgentToolBridge {
    connector: Arc<dyn ToolConnector>,
    session: OnceCell<Arc<dyn ToolSurface>>,
    connect_timeout: Duration,
}

impl AgentToolBridge {
    pub fn new(connector: Arc<dyn ToolConnector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            session: OnceCell::new(),
            connect_timeout,
        }
    }

    /// Bridge over the in-process dispatcher.
    pub fn local(dispatcher: Arc<ToolDispatcher>, connect_timeout: Duration) -> Self {
        Self::new(Arc::new(LocalConnector::new(dispatcher)), connect_timeout)
    }

    /// Bridge over the local MCP HTTP endpoint.
    #[cfg(feature = "mcp")]
    pub fn mcp_http(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self::new(
            Arc::new(crate::mcp::McpHttpConnector::new(url)),
            connect_timeout,
        )
    }

    /// Establish the session if it is not already established.
    pub async fn ensure_connected(&self) -> Result<Arc<dyn ToolSurface>> {
        let session = self
            .session
            .get_or_try_init(|| async {
                let session = with_timeout(self.connect_timeout, self.connector.connect()).await?;
                tracing::debug!(connector = %self.connector.describe(), "tool bridge connected");
                Ok::<_, crate::error::RelayError>(session)
            })
            .await?;
        Ok(session.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.session.initialized()
    }

    /// Forward an engine tool call. Missing `args` become `{}`.
    pub async fn call_tool(&self, invocation: &CliToolInvocation) -> Result<ToolCallResult> {
        let session = self.ensure_connected().await?;
        let args = invocation.args_or_empty();
        tracing::debug!(
            tool = %invocation.tool,
            server = invocation.server.as_deref().unwrap_or("local"),
            "bridging engine tool call"
        );
        session.call_tool(&invocation.tool, args).await
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        self.ensure_connected().await?.list_tools().await
    }
}
