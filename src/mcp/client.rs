//! Streamable HTTP MCP client used as a remote tool surface.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParams, CallToolResult, JsonObject, ProtocolVersion},
    service::{ClientInitializeError, DynService, RoleClient, RunningService, ServiceError},
    transport::StreamableHttpClientTransport,
    ServiceExt,
};

use crate::agent::bridge::ToolConnector;
use crate::error::{RelayError, Result};
use crate::tools::{ToolCallResult, ToolDefinition, ToolSurface};

type DynClientService = Box<dyn DynService<RoleClient>>;
pub type McpRunningService = RunningService<RoleClient, DynClientService>;

/// Connects to the local MCP endpoint over streamable HTTP.
#[derive(Debug, Clone)]
pub struct McpHttpConnector {
    url: String,
}

impl McpHttpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn serve(&self, protocol_version: ProtocolVersion) -> std::result::Result<McpRunningService, ClientInitializeError> {
        let transport = StreamableHttpClientTransport::from_uri(self.url.clone());
        let client_info = rmcp::model::ClientInfo {
            protocol_version,
            ..Default::default()
        };
        client_info.into_dyn().serve(transport).await
    }
}

#[async_trait]
impl ToolConnector for McpHttpConnector {
    async fn connect(&self) -> Result<Arc<dyn ToolSurface>> {
        tracing::debug!(url = %self.url, "connecting MCP tool session");
        let session = match self.serve(ProtocolVersion::LATEST).await {
            Ok(session) => session,
            Err(error) if should_retry_protocol_fallback(&error) => self
                .serve(ProtocolVersion::V_2024_11_05)
                .await
                .map_err(map_client_initialize_error)?,
            Err(error) => return Err(map_client_initialize_error(error)),
        };
        Ok(Arc::new(McpToolSession { session }))
    }

    fn describe(&self) -> String {
        format!("mcp {}", self.url)
    }
}

fn should_retry_protocol_fallback(error: &ClientInitializeError) -> bool {
    matches!(error, ClientInitializeError::JsonRpcError(_))
}

/// An initialized MCP session.
pub struct McpToolSession {
    session: McpRunningService,
}

/// What the session was doing when the server or transport failed.
#[derive(Debug, Clone, Copy)]
enum SessionOp<'a> {
    ListTools,
    CallTool(&'a str),
}

impl std::fmt::Display for SessionOp<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListTools => f.write_str("listing bridged tools"),
            Self::CallTool(name) => write!(f, "calling bridged tool {name}"),
        }
    }
}

#[async_trait]
impl ToolSurface for McpToolSession {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let tools = self
            .session
            .list_all_tools()
            .await
            .map_err(|e| session_error(SessionOp::ListTools, e))?;
        Ok(tools.into_iter().map(map_tool_definition).collect())
    }

    async fn call_tool(&self, name: &str, args: serde_json::Value) -> Result<ToolCallResult> {
        let arguments = bridged_arguments(name, args)?;
        let result = self
            .session
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| session_error(SessionOp::CallTool(name), e))?;
        map_call_result(result)
    }
}

fn map_tool_definition(tool: rmcp::model::Tool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
        input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
    }
}

/// Engine-supplied arguments: an object, `null`, or an object serialized
/// into a string.
fn bridged_arguments(tool: &str, args: serde_json::Value) -> Result<Option<JsonObject>> {
    let args = match args {
        serde_json::Value::String(raw) if raw.trim().is_empty() => return Ok(None),
        serde_json::Value::String(raw) => serde_json::from_str(raw.trim()).map_err(|e| {
            RelayError::InvalidArgument(format!("{tool}: arguments string is not JSON ({e})"))
        })?,
        other => other,
    };
    match args {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        other => Err(RelayError::InvalidArgument(format!(
            "{tool}: expected an arguments object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Error results stay in-band; only the wire shape changes.
fn map_call_result(result: CallToolResult) -> Result<ToolCallResult> {
    let value = serde_json::to_value(&result)?;
    Ok(serde_json::from_value(value)?)
}

fn map_client_initialize_error(error: ClientInitializeError) -> RelayError {
    match error {
        ClientInitializeError::JsonRpcError(error) => RelayError::Upstream(format!(
            "tool server refused the handshake ({}): {}",
            error.code.0, error.message
        )),
        other => RelayError::channel_unavailable(format!("tool server handshake failed: {other}")),
    }
}

/// Server-reported failures are upstream errors; a dropped session is a
/// channel error.
fn session_error(op: SessionOp<'_>, error: ServiceError) -> RelayError {
    match error {
        ServiceError::Timeout { timeout } => RelayError::Timeout(timeout.as_millis() as u64),
        ServiceError::McpError(error) => {
            RelayError::Upstream(format!("{op}: server error {}: {}", error.code.0, error.message))
        }
        ServiceError::UnexpectedResponse => {
            RelayError::Upstream(format!("{op}: server sent a mismatched response"))
        }
        ServiceError::TransportSend(_)
        | ServiceError::TransportClosed
        | ServiceError::Cancelled { .. } => {
            RelayError::channel_unavailable(format!("{op}: tool session lost ({error})"))
        }
        other => RelayError::Upstream(format!("{op}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn bridged_arguments_accept_object_and_double_encoded_object() {
        let from_obj = bridged_arguments("chrome_navigate", json!({"url": "https://a.test"}))
            .unwrap()
            .unwrap();
        assert_eq!(from_obj.get("url"), Some(&json!("https://a.test")));

        let from_str = bridged_arguments("chrome_navigate", json!(r#"{"url":"https://b.test"}"#))
            .unwrap()
            .unwrap();
        assert_eq!(from_str.get("url"), Some(&json!("https://b.test")));

        assert_eq!(bridged_arguments("chrome_navigate", json!("  ")).unwrap(), None);
    }

    #[test]
    fn bridged_arguments_name_the_tool_and_the_wrong_kind() {
        let err = bridged_arguments("chrome_click", json!(["bad"])).unwrap_err();
        assert!(matches!(
            err,
            RelayError::InvalidArgument(msg) if msg == "chrome_click: expected an arguments object, got an array"
        ));
    }

    #[test]
    fn error_call_result_stays_in_band() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "Error calling tool: no active tab"}],
            "isError": true
        }))
        .unwrap();

        let mapped = map_call_result(result).unwrap();
        assert!(mapped.is_error());
        assert_eq!(mapped.first_text(), Some("Error calling tool: no active tab"));
    }

    #[test]
    fn tool_schema_is_copied() {
        let mut schema = serde_json::Map::new();
        schema.insert("type".into(), json!("object"));
        let tool = rmcp::model::Tool::new("chrome_navigate", "Navigate", schema);

        let mapped = map_tool_definition(tool);
        assert_eq!(mapped.name, "chrome_navigate");
        assert_eq!(mapped.description, "Navigate");
        assert_eq!(mapped.input_schema["type"], "object");
    }

    #[test]
    fn service_timeout_maps_to_timeout_error() {
        let err = session_error(
            SessionOp::CallTool("chrome_navigate"),
            ServiceError::Timeout {
                timeout: Duration::from_millis(2750),
            },
        );
        assert!(matches!(err, RelayError::Timeout(2750)));
    }

    #[test]
    fn closed_transport_is_a_lost_session() {
        let err = session_error(SessionOp::CallTool("chrome_click"), ServiceError::TransportClosed);
        assert!(matches!(
            err,
            RelayError::ChannelUnavailable(msg)
                if msg.starts_with("calling bridged tool chrome_click: tool session lost")
        ));
    }

    #[test]
    fn unexpected_response_is_upstream() {
        let err = session_error(SessionOp::ListTools, ServiceError::UnexpectedResponse);
        assert!(matches!(
            err,
            RelayError::Upstream(msg) if msg == "listing bridged tools: server sent a mismatched response"
        ));
    }
}
