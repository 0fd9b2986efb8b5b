//! Claude Code CLI engine (`claude -p --output-format stream-json`).

use async_trait::async_trait;
use serde_json::Value;

use super::process::{drive, CliCommand, EngineAction, EventMapper};
use super::{AgentEngine, EngineExecutionContext, EngineRunOptions};
use crate::agent::events::AgentEvent;
use crate::agent::types::EngineName;
use crate::config::{AgentSettings, BridgeSettings};
use crate::error::Result;

/// Runs executions on the Claude CLI, which reaches the tool surface
/// through its own MCP client.
#[derive(Debug, Clone)]
pub struct ClaudeEngine {
    program: String,
    mcp_server_name: String,
    mcp_url: String,
}

impl ClaudeEngine {
    pub fn new(settings: &AgentSettings, bridge: &BridgeSettings) -> Self {
        Self {
            program: settings.claude_bin.clone(),
            mcp_server_name: bridge.server_name.clone(),
            mcp_url: bridge.mcp_url.clone(),
        }
    }

    /// Inline `--mcp-config` pointing Claude at the local MCP endpoint.
    pub fn mcp_config(&self) -> Value {
        serde_json::json!({
            "mcpServers": {
                self.mcp_server_name.as_str(): { "type": "http", "url": self.mcp_url },
            }
        })
    }

    pub fn command(&self, options: &EngineRunOptions) -> CliCommand {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("--mcp-config".to_string());
        args.push(self.mcp_config().to_string());
        args.push(options.instruction.clone());

        CliCommand {
            program: self.program.clone(),
            args,
            cwd: options.project_root.clone(),
            env: Vec::new(),
        }
    }
}

#[async_trait]
impl AgentEngine for ClaudeEngine {
    fn name(&self) -> EngineName {
        EngineName::Claude
    }

    fn supports_mcp(&self) -> bool {
        true
    }

    async fn initialize_and_run(
        &self,
        options: EngineRunOptions,
        ctx: EngineExecutionContext,
    ) -> Result<()> {
        let command = self.command(&options);
        drive(EngineName::Claude, &command, &ctx, &mut ClaudeEventMapper).await
    }
}

/// Maps `stream-json` messages.
#[derive(Debug, Default)]
pub struct ClaudeEventMapper;

impl EventMapper for ClaudeEventMapper {
    fn map(&mut self, event: &Value) -> Vec<EngineAction> {
        match event.get("type").and_then(Value::as_str) {
            Some("assistant") => content_blocks(event)
                .iter()
                .filter_map(assistant_block)
                .map(EngineAction::Emit)
                .collect(),
            Some("user") => content_blocks(event)
                .iter()
                .filter_map(tool_result_block)
                .map(EngineAction::Emit)
                .collect(),
            Some("result") => {
                let subtype = event.get("subtype").and_then(Value::as_str).unwrap_or("success");
                let is_error = event.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                if subtype.starts_with("error") || is_error {
                    let message = event
                        .get("result")
                        .and_then(Value::as_str)
                        .filter(|r| !r.is_empty())
                        .unwrap_or(subtype);
                    vec![EngineAction::Fail(message.to_string())]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }
}

fn content_blocks(event: &Value) -> &[Value] {
    event
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn assistant_block(block: &Value) -> Option<AgentEvent> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => {
            let text = block.get("text").and_then(Value::as_str)?;
            Some(AgentEvent::Message {
                text: text.to_string(),
            })
        }
        "thinking" => {
            let text = block.get("thinking").and_then(Value::as_str)?;
            Some(AgentEvent::Reasoning {
                text: text.to_string(),
            })
        }
        "tool_use" => Some(AgentEvent::ToolUse {
            call_id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            tool: block.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            args: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        _ => None,
    }
}

fn tool_result_block(block: &Value) -> Option<AgentEvent> {
    if block.get("type").and_then(Value::as_str)? != "tool_result" {
        return None;
    }
    Some(AgentEvent::ToolResult {
        call_id: block
            .get("tool_use_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        result: block.get("content").cloned().unwrap_or(Value::Null),
        is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
    })
}
