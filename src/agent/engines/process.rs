//! Shared runner for engine CLIs emitting JSON lines on stdout.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::EngineExecutionContext;
use crate::agent::events::{AgentEvent, LogLevel};
use crate::agent::types::EngineName;
use crate::error::{RelayError, Result};
use crate::tools::CliToolInvocation;

/// Stderr lines kept for error messages.
pub const STDERR_TAIL_LINES: usize = 200;

/// A CLI invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// One line read from the child's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum StdoutLine {
    Json(serde_json::Value),
    Text(String),
}

/// What an engine wants done in response to one stdout event.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    Emit(AgentEvent),
    /// Fulfil a tool call through the agent tool bridge.
    Bridge {
        call_id: String,
        invocation: CliToolInvocation,
    },
    /// The engine reported a fatal error; the run fails once output ends.
    Fail(String),
}

/// Translates an engine's JSON events into actions.
pub trait EventMapper: Send {
    fn map(&mut self, event: &serde_json::Value) -> Vec<EngineAction>;
}

/// A running engine CLI.
pub struct CliProcess {
    engine: EngineName,
    child: Child,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl CliProcess {
    pub fn spawn(engine: EngineName, command: &CliCommand, cancel: CancellationToken) -> Result<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            RelayError::engine(
                engine.to_string(),
                format!("failed to spawn {}: {e}", command.program),
            )
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::engine(engine.to_string(), "child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RelayError::engine(engine.to_string(), "child stderr not captured"))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let tail = stderr_tail.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        tracing::debug!(engine = %engine, program = %command.program, pid = child.id(), "engine process spawned");
        Ok(Self {
            engine,
            child,
            stdout: BufReader::new(stdout).lines(),
            stderr_tail,
            stderr_task: Some(stderr_task),
            cancel,
        })
    }

    /// Next non-empty stdout line. `None` at EOF, on a read error or once
    /// cancelled.
    pub async fn next_line(&mut self) -> Option<StdoutLine> {
        loop {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                line = self.stdout.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(match serde_json::from_str(trimmed) {
                        Ok(value) => StdoutLine::Json(value),
                        Err(_) => StdoutLine::Text(trimmed.to_string()),
                    });
                }
                Ok(None) => return None,
                Err(err) => {
                    tracing::warn!(engine = %self.engine, error = %err, "engine stdout read failed");
                    return None;
                }
            }
        }
    }

    /// The last stderr lines, joined.
    pub fn stderr_tail(&self) -> String {
        let tail = self.stderr_tail.lock().unwrap_or_else(PoisonError::into_inner);
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Wait for the child to exit, killing it if the run was cancelled.
    /// A non-zero exit is an engine error carrying the stderr tail.
    pub async fn finish(mut self) -> Result<()> {
        let status = tokio::select! {
            _ = self.cancel.cancelled() => {
                if let Err(err) = self.child.kill().await {
                    tracing::warn!(engine = %self.engine, error = %err, "failed to kill engine process");
                }
                return Ok(());
            }
            status = self.child.wait() => status?,
        };
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        if status.success() {
            return Ok(());
        }

        let tail = self.stderr_tail();
        let message = if tail.is_empty() {
            format!("process exited with {status}")
        } else {
            format!("process exited with {status}: {tail}")
        };
        Err(RelayError::engine(self.engine.to_string(), message))
    }
}

/// Run `command` to completion, feeding stdout events through `mapper`.
///
/// Returns `Ok` when cancelled; the caller reads the cancel token.
pub async fn drive(
    engine: EngineName,
    command: &CliCommand,
    ctx: &EngineExecutionContext,
    mapper: &mut dyn EventMapper,
) -> Result<()> {
    let mut process = CliProcess::spawn(engine, command, ctx.cancel.clone())?;
    let mut failure: Option<String> = None;

    while let Some(line) = process.next_line().await {
        let event = match line {
            StdoutLine::Json(event) => event,
            StdoutLine::Text(text) => {
                ctx.emitter.emit(AgentEvent::log(LogLevel::Info, text));
                continue;
            }
        };
        for action in mapper.map(&event) {
            match action {
                EngineAction::Emit(event) => {
                    ctx.emitter.emit(event);
                }
                EngineAction::Bridge { call_id, invocation } => {
                    bridge_tool_call(ctx, call_id, &invocation).await;
                }
                EngineAction::Fail(message) => {
                    tracing::warn!(engine = %engine, request_id = %ctx.request_id, error = %message, "engine reported failure");
                    failure.get_or_insert(message);
                }
            }
        }
    }

    let exit = process.finish().await;
    if ctx.cancel.is_cancelled() {
        return Ok(());
    }
    match failure {
        Some(message) => Err(RelayError::engine(engine.to_string(), message)),
        None => exit,
    }
}

async fn bridge_tool_call(ctx: &EngineExecutionContext, call_id: String, invocation: &CliToolInvocation) {
    let outcome = tokio::select! {
        _ = ctx.cancel.cancelled() => return,
        outcome = ctx.tools.call_tool(invocation) => outcome,
    };
    let event = match outcome {
        Ok(result) => AgentEvent::ToolResult {
            call_id,
            is_error: result.is_error(),
            result: serde_json::to_value(&result).unwrap_or_default(),
        },
        Err(err) => AgentEvent::ToolResult {
            call_id,
            result: serde_json::json!({ "error": err.to_string() }),
            is_error: true,
        },
    };
    ctx.emitter.emit(event);
}
