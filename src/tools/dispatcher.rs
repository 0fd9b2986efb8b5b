//! Tool call routing: direct calls and published flow aliases.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::broker::PeerClient;
use crate::channel::MessageKind;
use crate::config::TimeoutConfig;
use crate::error::{RelayError, Result};

use super::catalog::ToolCatalogService;
use super::flows::{flow_slug, PublishedFlow, FLOW_RUN_TOOL};
use super::types::{ToolCallResult, ToolDefinition};
use super::ToolSurface;

/// Reply shape of a `call_tool` request.
#[derive(Debug, Deserialize)]
struct PeerToolResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

impl PeerToolResponse {
    fn parse(value: serde_json::Value) -> std::result::Result<Self, String> {
        serde_json::from_value(value).map_err(|err| format!("malformed tool response: {err}"))
    }

    /// The data payload on success, the peer's error text otherwise.
    fn into_outcome(self) -> std::result::Result<serde_json::Value, String> {
        if self.status == "success" {
            Ok(self.data)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| format!("tool returned status {:?}", self.status)))
        }
    }
}

/// Routes tool calls to the peer. Never fails: every error becomes a
/// result with `isError: true`.
pub struct ToolDispatcher {
    peer: Arc<dyn PeerClient>,
    catalog: Arc<ToolCatalogService>,
    tool_call_timeout: Duration,
    flow_run_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(
        peer: Arc<dyn PeerClient>,
        catalog: Arc<ToolCatalogService>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            peer,
            catalog,
            tool_call_timeout: timeouts.tool_call(),
            flow_run_timeout: timeouts.flow_run(),
        }
    }

    /// Catalog and dispatcher sharing one peer client.
    pub fn with_default_catalog(peer: Arc<dyn PeerClient>, timeouts: &TimeoutConfig) -> Self {
        let catalog = Arc::new(ToolCatalogService::new(peer.clone(), timeouts));
        Self::new(peer, catalog, timeouts)
    }

    pub fn catalog(&self) -> &Arc<ToolCatalogService> {
        &self.catalog
    }

    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.catalog.list_tools().await
    }

    /// Call `name` with `args`.
    pub async fn call_tool(&self, name: &str, args: serde_json::Value) -> ToolCallResult {
        tracing::debug!(tool = name, "dispatching tool call");
        let result = match flow_slug(name) {
            Some(slug) => self.call_flow(name, slug, args).await,
            None => self.call_direct(name, args).await,
        };
        if result.is_error() {
            tracing::debug!(tool = name, error = result.first_text().unwrap_or_default(), "tool call failed");
        }
        result
    }

    async fn call_direct(&self, name: &str, args: serde_json::Value) -> ToolCallResult {
        let payload = serde_json::json!({ "name": name, "args": args });
        match self.forward(payload, self.tool_call_timeout).await {
            Ok(data) => ToolCallResult::from_peer_data(data),
            Err(error) => ToolCallResult::error(format!("Error calling tool: {error}")),
        }
    }

    async fn call_flow(&self, name: &str, slug: &str, args: serde_json::Value) -> ToolCallResult {
        let flow = match self.resolve(name, slug).await {
            Ok(flow) => flow,
            Err(err) => {
                return ToolCallResult::error(format!(
                    "Error resolving dynamic flow tool: {}",
                    describe(&err)
                ))
            }
        };

        tracing::debug!(tool = name, flow_id = %flow.id, "running published flow");
        let payload = serde_json::json!({
            "name": FLOW_RUN_TOOL,
            "args": { "flowId": flow.id, "args": args },
        });
        match self.forward(payload, self.flow_run_timeout).await {
            Ok(data) => ToolCallResult::from_peer_data(data),
            Err(error) => ToolCallResult::error(format!("Error calling dynamic flow tool: {error}")),
        }
    }

    async fn resolve(&self, name: &str, slug: &str) -> Result<PublishedFlow> {
        self.catalog
            .resolve_flow(slug)
            .await?
            .ok_or_else(|| RelayError::ToolNotFound(name.to_string()))
    }

    /// Send a `call_tool` request and unwrap the peer's status envelope.
    async fn forward(
        &self,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<serde_json::Value, String> {
        let response = self
            .peer
            .request(payload, MessageKind::CallTool, timeout)
            .await
            .map_err(|err| describe(&err))?;
        PeerToolResponse::parse(response)?.into_outcome()
    }
}

/// Human-readable text for an error placed in a tool result.
fn describe(err: &RelayError) -> String {
    match err {
        RelayError::Upstream(message) => message.clone(),
        RelayError::ToolNotFound(name) => format!("Flow not found for tool {name}"),
        other => other.to_string(),
    }
}

#[async_trait]
impl ToolSurface for ToolDispatcher {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        Ok(ToolDispatcher::list_tools(self).await)
    }

    async fn call_tool(&self, name: &str, args: serde_json::Value) -> Result<ToolCallResult> {
        Ok(ToolDispatcher::call_tool(self, name, args).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedPeer {
        flows: serde_json::Value,
        reply: Mutex<Option<Result<serde_json::Value>>>,
        calls: Mutex<Vec<(serde_json::Value, Duration)>>,
    }

    #[async_trait]
    impl PeerClient for ScriptedPeer {
        async fn request(
            &self,
            payload: serde_json::Value,
            kind: MessageKind,
            timeout: Duration,
        ) -> Result<serde_json::Value> {
            match kind {
                MessageKind::ListPublishedFlows => Ok(self.flows.clone()),
                _ => {
                    self.calls.lock().unwrap().push((payload, timeout));
                    self.reply
                        .lock()
                        .unwrap()
                        .take()
                        .unwrap_or_else(|| Ok(json!({"status": "success", "data": "ok"})))
                }
            }
        }
    }

    fn dispatcher(peer: Arc<ScriptedPeer>) -> ToolDispatcher {
        ToolDispatcher::with_default_catalog(peer, &TimeoutConfig::default())
    }

    fn peer_with(flows: serde_json::Value, reply: Result<serde_json::Value>) -> Arc<ScriptedPeer> {
        Arc::new(ScriptedPeer {
            flows,
            reply: Mutex::new(Some(reply)),
            ..ScriptedPeer::default()
        })
    }

    #[tokio::test]
    async fn direct_call_returns_data_payload() {
        let peer = peer_with(
            json!({"status": "success", "items": []}),
            Ok(json!({"status": "success", "data": {"content": [{"type": "text", "text": "3 tabs"}]}})),
        );
        let result = dispatcher(peer.clone())
            .call_tool("get_windows_and_tabs", json!({}))
            .await;

        assert!(!result.is_error());
        assert_eq!(result.first_text(), Some("3 tabs"));
        let calls = peer.calls.lock().unwrap();
        assert_eq!(calls[0].0, json!({"name": "get_windows_and_tabs", "args": {}}));
        assert_eq!(calls[0].1, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn direct_call_failure_status_becomes_error_result() {
        let peer = peer_with(
            json!({"status": "success", "items": []}),
            Ok(json!({"status": "error", "error": "no active tab"})),
        );
        let result = dispatcher(peer).call_tool("chrome_screenshot", json!({})).await;
        assert!(result.is_error());
        assert_eq!(result.first_text(), Some("Error calling tool: no active tab"));
    }

    #[tokio::test]
    async fn broker_timeout_becomes_error_result() {
        let peer = peer_with(json!({"status": "success", "items": []}), Err(RelayError::Timeout(30_000)));
        let result = dispatcher(peer).call_tool("chrome_navigate", json!({"url": "x"})).await;
        assert!(result.is_error());
        assert_eq!(result.first_text(), Some("Error calling tool: Timeout after 30000ms"));
    }

    #[tokio::test]
    async fn flow_alias_runs_through_flow_runner() {
        let peer = peer_with(
            json!({"status": "success", "items": [{"id": "flow-42", "slug": "login"}]}),
            Ok(json!({"status": "success", "data": {"content": [{"type": "text", "text": "logged in"}]}})),
        );
        let result = dispatcher(peer.clone())
            .call_tool("flow.login", json!({"user": "ada"}))
            .await;

        assert_eq!(result.first_text(), Some("logged in"));
        let calls = peer.calls.lock().unwrap();
        assert_eq!(
            calls[0].0,
            json!({
                "name": "record_replay_flow_run",
                "args": {"flowId": "flow-42", "args": {"user": "ada"}}
            })
        );
        assert_eq!(calls[0].1, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn unknown_flow_never_issues_a_call() {
        let peer = peer_with(json!({"status": "success", "items": []}), Ok(json!({})));
        let result = dispatcher(peer.clone()).call_tool("flow.missing", json!({})).await;

        assert!(result.is_error());
        assert_eq!(
            result.first_text(),
            Some("Error resolving dynamic flow tool: Flow not found for tool flow.missing")
        );
        assert!(peer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_flow_run_reports_peer_error() {
        let peer = peer_with(
            json!({"status": "success", "items": [{"id": "f1", "slug": "login"}]}),
            Ok(json!({"status": "error", "error": "selector not found"})),
        );
        let result = dispatcher(peer).call_tool("flow.login", json!({})).await;
        assert_eq!(
            result.first_text(),
            Some("Error calling dynamic flow tool: selector not found")
        );
    }

    #[tokio::test]
    async fn flow_listing_failure_is_a_resolution_error() {
        let peer = peer_with(json!({"status": "error", "error": "storage locked"}), Ok(json!({})));
        let result = dispatcher(peer).call_tool("flow.login", json!({})).await;
        assert_eq!(
            result.first_text(),
            Some("Error resolving dynamic flow tool: storage locked")
        );
    }
}
