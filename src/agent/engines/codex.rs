//! Codex CLI engine (`codex exec --json`).

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::process::{drive, CliCommand, EngineAction, EventMapper};
use super::{AgentEngine, EngineExecutionContext, EngineRunOptions};
use crate::agent::events::{AgentEvent, LogLevel, TodoItem};
use crate::agent::types::EngineName;
use crate::config::AgentSettings;
use crate::error::Result;
use crate::tools::CliToolInvocation;

/// Top-level entries listed in the project context block.
const MAX_CONTEXT_ENTRIES: usize = 50;

/// Runs executions on the Codex CLI.
///
/// Codex runs without MCP servers configured; the tool calls it reports are
/// fulfilled through the agent tool bridge instead.
#[derive(Debug, Clone)]
pub struct CodexEngine {
    program: String,
    config_overrides: Vec<String>,
}

impl CodexEngine {
    pub fn new(settings: &AgentSettings) -> Self {
        Self {
            program: settings.codex_bin.clone(),
            config_overrides: settings.codex_config.clone(),
        }
    }

    /// The CLI invocation for `options`; `prompt` already carries any
    /// project context.
    pub fn command(&self, options: &EngineRunOptions, prompt: &str) -> CliCommand {
        let mut args = vec![
            "exec".to_string(),
            "--json".to_string(),
            "--skip-git-repo-check".to_string(),
        ];
        if let Some(root) = &options.project_root {
            args.push("-C".to_string());
            args.push(root.display().to_string());
        }
        if let Some(model) = &options.model {
            args.push("-m".to_string());
            args.push(model.clone());
        }
        for kv in &self.config_overrides {
            args.push("-c".to_string());
            args.push(kv.clone());
        }
        args.push(prompt.to_string());

        CliCommand {
            program: self.program.clone(),
            args,
            cwd: options.project_root.clone(),
            env: Vec::new(),
        }
    }
}

#[async_trait]
impl AgentEngine for CodexEngine {
    fn name(&self) -> EngineName {
        EngineName::Codex
    }

    fn supports_mcp(&self) -> bool {
        false
    }

    async fn initialize_and_run(
        &self,
        options: EngineRunOptions,
        ctx: EngineExecutionContext,
    ) -> Result<()> {
        let prompt = match &options.project_root {
            Some(root) => append_project_context(&options.instruction, root).await,
            None => options.instruction.clone(),
        };
        let command = self.command(&options, &prompt);
        let mut mapper = CodexEventMapper::default();
        drive(EngineName::Codex, &command, &ctx, &mut mapper).await
    }
}

/// Append a bounded listing of the project's top-level entries.
async fn append_project_context(instruction: &str, root: &Path) -> String {
    let mut entries = Vec::new();
    match tokio::fs::read_dir(root).await {
        Ok(mut dir) => {
            while let Ok(Some(entry)) = dir.next_entry().await {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                    name.push('/');
                }
                entries.push(name);
            }
        }
        Err(err) => {
            tracing::debug!(root = %root.display(), error = %err, "project root not listable");
            return instruction.to_string();
        }
    }
    entries.sort();

    let mut prompt = format!(
        "{instruction}\n\n[Project context]\nRoot: {}\nTop-level entries:\n",
        root.display()
    );
    for name in entries.iter().take(MAX_CONTEXT_ENTRIES) {
        prompt.push_str("- ");
        prompt.push_str(name);
        prompt.push('\n');
    }
    if entries.len() > MAX_CONTEXT_ENTRIES {
        prompt.push_str(&format!("... and {} more\n", entries.len() - MAX_CONTEXT_ENTRIES));
    }
    prompt
}

/// Maps `codex exec --json` events.
#[derive(Debug, Default)]
pub struct CodexEventMapper {
    bridged: HashSet<String>,
}

impl EventMapper for CodexEventMapper {
    fn map(&mut self, event: &Value) -> Vec<EngineAction> {
        let kind = str_field(event, "type").unwrap_or_default();
        match kind {
            "item.started" | "item.updated" | "item.completed" | "item.failed" => {
                match event.get("item") {
                    Some(item) => self.map_item(kind, item),
                    None => Vec::new(),
                }
            }
            "item.delta" => delta_text(event)
                .map(|text| vec![EngineAction::Emit(AgentEvent::AssistantDelta { text })])
                .unwrap_or_default(),
            "turn.failed" => {
                let message = event
                    .get("error")
                    .and_then(|e| str_field(e, "message"))
                    .unwrap_or("turn failed");
                vec![EngineAction::Fail(message.to_string())]
            }
            "error" => {
                let message = str_field(event, "message").unwrap_or("codex reported an error");
                vec![EngineAction::Fail(message.to_string())]
            }
            _ => Vec::new(),
        }
    }
}

impl CodexEventMapper {
    fn map_item(&mut self, phase: &str, item: &Value) -> Vec<EngineAction> {
        let id = str_field(item, "id").unwrap_or_default().to_string();
        let item_type = str_field(item, "type").unwrap_or_default();

        match (phase, item_type) {
            ("item.completed", "agent_message") => text_event(item, |text| AgentEvent::Message { text }),
            ("item.completed", "reasoning") => text_event(item, |text| AgentEvent::Reasoning { text }),

            ("item.started", "command_execution") => vec![EngineAction::Emit(AgentEvent::ToolUse {
                call_id: id,
                tool: "command_execution".to_string(),
                args: serde_json::json!({ "command": item.get("command").cloned().unwrap_or(Value::Null) }),
            })],
            ("item.completed" | "item.failed", "command_execution") => {
                let exit_code = item.get("exit_code").and_then(Value::as_i64);
                let failed = phase == "item.failed"
                    || str_field(item, "status") == Some("failed")
                    || exit_code.is_some_and(|code| code != 0);
                vec![EngineAction::Emit(AgentEvent::ToolResult {
                    call_id: id,
                    result: serde_json::json!({
                        "exitCode": exit_code,
                        "output": str_field(item, "aggregated_output").unwrap_or_default(),
                    }),
                    is_error: failed,
                })]
            }

            ("item.completed" | "item.failed", "file_change") => {
                let changes = item.get("changes").cloned().unwrap_or(Value::Array(Vec::new()));
                vec![
                    EngineAction::Emit(AgentEvent::ToolUse {
                        call_id: id.clone(),
                        tool: "apply_patch".to_string(),
                        args: serde_json::json!({ "changes": changes }),
                    }),
                    EngineAction::Emit(AgentEvent::ToolResult {
                        call_id: id,
                        result: serde_json::json!({ "summary": summarize_file_changes(&changes) }),
                        is_error: phase == "item.failed" || str_field(item, "status") == Some("failed"),
                    }),
                ]
            }

            (_, "todo_list") => vec![EngineAction::Emit(AgentEvent::TodoList {
                items: normalize_todo_items(item),
            })],

            ("item.started", "mcp_tool_call") => {
                let Some(tool) = str_field(item, "tool") else {
                    return Vec::new();
                };
                let invocation = CliToolInvocation {
                    server: str_field(item, "server").map(str::to_string),
                    tool: tool.to_string(),
                    args: item.get("arguments").cloned(),
                };
                self.bridged.insert(id.clone());
                vec![
                    EngineAction::Emit(AgentEvent::ToolUse {
                        call_id: id.clone(),
                        tool: tool.to_string(),
                        args: invocation.args_or_empty(),
                    }),
                    EngineAction::Bridge {
                        call_id: id,
                        invocation,
                    },
                ]
            }
            ("item.completed" | "item.failed", "mcp_tool_call") => {
                if self.bridged.remove(&id) {
                    return Vec::new();
                }
                let error = item.get("error").and_then(|e| e.get("message").or(Some(e))).cloned();
                vec![EngineAction::Emit(AgentEvent::ToolResult {
                    call_id: id,
                    is_error: phase == "item.failed" || error.is_some(),
                    result: item.get("result").cloned().or(error).unwrap_or(Value::Null),
                })]
            }

            (_, "error") => {
                let message = str_field(item, "message").unwrap_or("codex item error");
                vec![EngineAction::Emit(AgentEvent::log(LogLevel::Error, message))]
            }
            ("item.failed", _) => {
                let message = item
                    .get("error")
                    .and_then(|e| str_field(e, "message"))
                    .unwrap_or("item failed");
                vec![EngineAction::Emit(AgentEvent::log(
                    LogLevel::Warn,
                    format!("{item_type}: {message}"),
                ))]
            }
            _ => Vec::new(),
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn text_event(item: &Value, build: impl FnOnce(String) -> AgentEvent) -> Vec<EngineAction> {
    match str_field(item, "text") {
        Some(text) if !text.is_empty() => vec![EngineAction::Emit(build(text.to_string()))],
        _ => Vec::new(),
    }
}

fn delta_text(event: &Value) -> Option<String> {
    let delta = event.get("delta")?;
    match delta {
        Value::String(text) => Some(text.clone()),
        other => str_field(other, "text").map(str::to_string),
    }
}

/// One line per changed path, e.g. `update src/lib.rs`.
fn summarize_file_changes(changes: &Value) -> String {
    let Some(changes) = changes.as_array() else {
        return "no changes".to_string();
    };
    if changes.is_empty() {
        return "no changes".to_string();
    }
    changes
        .iter()
        .map(|change| {
            let kind = str_field(change, "kind").unwrap_or("update");
            let path = str_field(change, "path").unwrap_or("<unknown>");
            format!("{kind} {path}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Accepts `{text, completed}` entries as well as bare strings and
/// `{content, status}` variants.
fn normalize_todo_items(item: &Value) -> Vec<TodoItem> {
    let Some(items) = item.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|entry| match entry {
            Value::String(text) => Some(TodoItem {
                text: text.clone(),
                completed: false,
            }),
            Value::Object(_) => {
                let text = str_field(entry, "text").or_else(|| str_field(entry, "content"))?;
                let completed = entry
                    .get("completed")
                    .and_then(Value::as_bool)
                    .unwrap_or_else(|| str_field(entry, "status") == Some("completed"));
                Some(TodoItem {
                    text: text.to_string(),
                    completed,
                })
            }
            _ => None,
        })
        .collect()
}
