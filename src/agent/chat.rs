//! Agent chat service: accepts act requests and runs them on engines.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use futures::FutureExt;
use strum::IntoEnumIterator;
use tokio_util::sync::CancellationToken;

use super::bridge::AgentToolBridge;
use super::engines::{
    AgentEngine, ClaudeEngine, CodexEngine, EngineExecutionContext, EngineRunOptions, EventEmitter,
};
use super::events::{AgentEvent, TerminalOutcome};
use super::registry::AgentExecutionRegistry;
use super::stream::{EventStream, StreamManager};
use super::types::{
    ActAccepted, ActRequest, EngineInfo, EngineName, ExecutionStatus, RunningExecution,
};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// Orchestrates executions: engine selection, registration, the engine
/// task, and retirement with exactly one terminal event.
pub struct AgentChatService {
    engines: HashMap<EngineName, Arc<dyn AgentEngine>>,
    default_engine: EngineName,
    registry: Arc<AgentExecutionRegistry>,
    streams: Arc<StreamManager>,
    tools: Arc<AgentToolBridge>,
}

impl AgentChatService {
    pub fn new(
        engines: Vec<Arc<dyn AgentEngine>>,
        default_engine: EngineName,
        streams: Arc<StreamManager>,
        tools: Arc<AgentToolBridge>,
    ) -> Self {
        Self {
            engines: engines.into_iter().map(|e| (e.name(), e)).collect(),
            default_engine,
            registry: Arc::new(AgentExecutionRegistry::new()),
            streams,
            tools,
        }
    }

    /// Service with the Codex and Claude engines configured from `config`.
    pub fn from_config(config: &RelayConfig, tools: Arc<AgentToolBridge>) -> Self {
        let engines: Vec<Arc<dyn AgentEngine>> = vec![
            Arc::new(CodexEngine::new(&config.agent)),
            Arc::new(ClaudeEngine::new(&config.agent, &config.bridge)),
        ];
        let streams = Arc::new(StreamManager::new(
            config.agent.stream_capacity,
            config.agent.closed_stream_retention,
        ));
        Self::new(engines, config.agent.default_engine, streams, tools)
    }

    pub fn registry(&self) -> &Arc<AgentExecutionRegistry> {
        &self.registry
    }

    pub fn streams(&self) -> &Arc<StreamManager> {
        &self.streams
    }

    /// Accept an act request and start it in the background.
    ///
    /// Returns as soon as the execution is registered and its stream is
    /// open; progress is observed through [`subscribe`](Self::subscribe).
    /// Must be called from within a Tokio runtime.
    pub fn handle_act(&self, session_id: &str, request: ActRequest) -> Result<ActAccepted> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| RelayError::InvalidState("handle_act requires a Tokio runtime".into()))?;
        let engine = self.resolve_engine(request.engine.as_deref())?;
        if request.instruction.trim().is_empty() {
            return Err(RelayError::InvalidArgument("instruction must not be empty".into()));
        }

        let request_id = match request.request_id {
            Some(id) if id.trim().is_empty() => {
                return Err(RelayError::InvalidArgument("request id must not be empty".into()))
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        // The stream exists before the record, so a cancel that finds the
        // record always has a stream to close.
        if !self.streams.open(&request_id) {
            return Err(RelayError::InvalidArgument(format!(
                "request id {request_id} is already in use"
            )));
        }
        let cancel = CancellationToken::new();
        if let Err(err) = self.registry.register(
            request_id.clone(),
            session_id.to_string(),
            engine.name(),
            cancel.clone(),
        ) {
            self.streams.discard(&request_id);
            return Err(err);
        }

        let ctx = EngineExecutionContext {
            request_id: request_id.clone(),
            session_id: session_id.to_string(),
            cancel,
            emitter: EventEmitter::new(request_id.clone(), self.streams.clone()),
            tools: self.tools.clone(),
        };
        let options = EngineRunOptions {
            instruction: request.instruction,
            project_root: request.project_root,
            model: request.model,
        };

        tracing::info!(
            request_id = %request_id,
            session_id,
            engine = %engine.name(),
            "execution accepted"
        );
        runtime.spawn(run_execution(
            engine,
            options,
            ctx,
            self.registry.clone(),
            self.streams.clone(),
        ));

        Ok(ActAccepted { request_id })
    }

    /// Cancel one execution. `false` if it is unknown or already finished.
    ///
    /// The stream is closed before the engine sees the cancellation, so
    /// nothing it emits afterwards follows the terminal event.
    pub fn cancel_execution(&self, request_id: &str) -> bool {
        let Some(token) = self.registry.retire(request_id) else {
            return false;
        };
        self.streams.close(request_id, TerminalOutcome::Cancelled);
        token.cancel();
        tracing::info!(request_id, "execution cancelled");
        true
    }

    /// Cancel every live execution of a session; returns how many.
    pub fn cancel_session_executions(&self, session_id: &str) -> usize {
        let retired = self.registry.retire_session(session_id);
        for (request_id, token) in &retired {
            self.streams.close(request_id, TerminalOutcome::Cancelled);
            token.cancel();
        }
        if !retired.is_empty() {
            tracing::info!(session_id, count = retired.len(), "session executions cancelled");
        }
        retired.len()
    }

    pub fn get_running_executions(&self) -> Vec<RunningExecution> {
        self.registry.snapshot()
    }

    pub fn subscribe(&self, request_id: &str) -> Result<EventStream> {
        self.streams.subscribe(request_id)
    }

    /// Registered engines, in declaration order.
    pub fn engine_infos(&self) -> Vec<EngineInfo> {
        EngineName::iter()
            .filter_map(|name| self.engines.get(&name))
            .map(|engine| EngineInfo {
                name: engine.name(),
                supports_mcp: engine.supports_mcp(),
            })
            .collect()
    }

    fn resolve_engine(&self, requested: Option<&str>) -> Result<Arc<dyn AgentEngine>> {
        let name = match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => EngineName::from_str(raw)
                .map_err(|_| RelayError::InvalidArgument(format!("unknown engine '{raw}'")))?,
            None => self.default_engine,
        };
        self.engines
            .get(&name)
            .cloned()
            .ok_or_else(|| RelayError::InvalidArgument(format!("engine {name} is not available")))
    }
}

async fn run_execution(
    engine: Arc<dyn AgentEngine>,
    options: EngineRunOptions,
    ctx: EngineExecutionContext,
    registry: Arc<AgentExecutionRegistry>,
    streams: Arc<StreamManager>,
) {
    let request_id = ctx.request_id.clone();
    if !registry.mark_running(&request_id) {
        tracing::debug!(request_id = %request_id, "execution cancelled before start");
        return;
    }
    streams.publish(&request_id, AgentEvent::status(ExecutionStatus::Running));

    let cancel = ctx.cancel.clone();
    let outcome = AssertUnwindSafe(engine.initialize_and_run(options, ctx))
        .catch_unwind()
        .await;

    let terminal = if cancel.is_cancelled() {
        TerminalOutcome::Cancelled
    } else {
        match outcome {
            Ok(Ok(())) => TerminalOutcome::Completed,
            Ok(Err(err)) => TerminalOutcome::failed(err.to_string()),
            Err(panic) => TerminalOutcome::failed(format!("engine panicked: {}", panic_message(&panic))),
        }
    };

    let status = terminal.status();
    if registry.finish(&request_id, status) {
        if let TerminalOutcome::Failed { error } = &terminal {
            tracing::warn!(request_id = %request_id, engine = %engine.name(), error = %error, "execution failed");
        } else {
            tracing::info!(request_id = %request_id, engine = %engine.name(), status = %status, "execution finished");
        }
        streams.close(&request_id, terminal);
    } else {
        tracing::debug!(request_id = %request_id, "execution already retired");
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::bridge::ToolConnector;
    use crate::tools::ToolSurface;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::time::Duration;

    struct NoTools;

    #[async_trait]
    impl ToolConnector for NoTools {
        async fn connect(&self) -> Result<Arc<dyn ToolSurface>> {
            Err(RelayError::channel_unavailable("no tools in this test"))
        }

        fn describe(&self) -> String {
            "none".into()
        }
    }

    struct EchoEngine;

    #[async_trait]
    impl AgentEngine for EchoEngine {
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
            ctx.emitter.emit(AgentEvent::Message {
                text: options.instruction,
            });
            Ok(())
        }
    }

    /// Waits for cancellation, then tries to report one more message.
    struct LateEngine;

    #[async_trait]
    impl AgentEngine for LateEngine {
        fn name(&self) -> EngineName {
            EngineName::Claude
        }

        fn supports_mcp(&self) -> bool {
            false
        }

        async fn initialize_and_run(
            &self,
            _options: EngineRunOptions,
            ctx: EngineExecutionContext,
        ) -> Result<()> {
            ctx.cancel.cancelled().await;
            ctx.emitter.emit(AgentEvent::Message {
                text: "after cancel".into(),
            });
            Ok(())
        }
    }

    fn service() -> AgentChatService {
        service_with(Arc::new(EchoEngine))
    }

    fn service_with(engine: Arc<dyn AgentEngine>) -> AgentChatService {
        let default_engine = engine.name();
        AgentChatService::new(
            vec![engine],
            default_engine,
            Arc::new(StreamManager::new(16, 16)),
            Arc::new(AgentToolBridge::new(Arc::new(NoTools), Duration::from_secs(1))),
        )
    }

    #[tokio::test]
    async fn completed_run_ends_with_completed_terminal() {
        let service = service();
        let accepted = service.handle_act("s1", ActRequest::new("hello")).unwrap();
        let events: Vec<_> = service.subscribe(&accepted.request_id).unwrap().collect().await;

        let last = events.last().unwrap();
        assert_eq!(last.terminal_outcome(), Some(&TerminalOutcome::Completed));
        assert!(service.get_running_executions().is_empty());
    }

    #[tokio::test]
    async fn unknown_engine_is_rejected() {
        let service = service();
        let err = service
            .handle_act("s1", ActRequest::new("x").with_engine("gemini"))
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(msg) if msg.contains("gemini")));
    }

    #[tokio::test]
    async fn unregistered_engine_is_rejected() {
        let service = service();
        let err = service
            .handle_act("s1", ActRequest::new("x").with_engine("claude"))
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(msg) if msg.contains("not available")));
    }

    #[tokio::test]
    async fn blank_instruction_is_rejected() {
        let err = service().handle_act("s1", ActRequest::new("  ")).unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn caller_supplied_request_id_is_used_once() {
        let service = service();
        let request = ActRequest::new("x").with_request_id("fixed-id");
        let accepted = service.handle_act("s1", request.clone()).unwrap();
        assert_eq!(accepted.request_id, "fixed-id");
        assert!(service.handle_act("s1", request).is_err());
    }

    #[tokio::test]
    async fn finished_request_id_is_not_reused() {
        let service = service();
        let request = ActRequest::new("x").with_request_id("done-id");
        service.handle_act("s1", request.clone()).unwrap();
        let _: Vec<_> = service.subscribe("done-id").unwrap().collect().await;

        let err = service.handle_act("s1", request).unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(msg) if msg.contains("already in use")));
    }

    #[tokio::test]
    async fn cancel_right_after_accept_still_ends_the_stream() {
        let service = service_with(Arc::new(LateEngine));
        let accepted = service.handle_act("s1", ActRequest::new("x")).unwrap();
        assert!(service.cancel_execution(&accepted.request_id));

        let events: Vec<_> = tokio::time::timeout(
            Duration::from_secs(5),
            service.subscribe(&accepted.request_id).unwrap().collect::<Vec<_>>(),
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].terminal_outcome(), Some(&TerminalOutcome::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn events_emitted_on_cancel_never_follow_the_terminal() {
        let service = service_with(Arc::new(LateEngine));
        let accepted = service.handle_act("s1", ActRequest::new("x")).unwrap();
        let events = service.subscribe(&accepted.request_id).unwrap();
        while service
            .registry()
            .get(&accepted.request_id)
            .is_some_and(|record| record.status != ExecutionStatus::Running)
        {
            tokio::task::yield_now().await;
        }

        assert!(service.cancel_execution(&accepted.request_id));
        let events: Vec<_> = events.collect().await;

        let last = events.last().unwrap();
        assert_eq!(last.terminal_outcome(), Some(&TerminalOutcome::Cancelled));
        assert!(!events.iter().any(|e| matches!(&e.event, AgentEvent::Message { .. })));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.streams().is_closed(&accepted.request_id));
        assert!(service.get_running_executions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_cancel_closes_streams_before_engines_react() {
        let service = service_with(Arc::new(LateEngine));
        let ids: Vec<String> = (0..3)
            .map(|_| service.handle_act("s1", ActRequest::new("x")).unwrap().request_id)
            .collect();
        let subscribers: Vec<_> = ids.iter().map(|id| service.subscribe(id).unwrap()).collect();

        assert_eq!(service.cancel_session_executions("s1"), 3);
        for subscriber in subscribers {
            let events: Vec<_> = subscriber.collect().await;
            let last = events.last().unwrap();
            assert_eq!(last.terminal_outcome(), Some(&TerminalOutcome::Cancelled));
            assert!(!events.iter().any(|e| matches!(&e.event, AgentEvent::Message { .. })));
        }
    }

    #[test]
    fn handle_act_outside_runtime_is_an_error() {
        let err = service().handle_act("s1", ActRequest::new("x")).unwrap_err();
        assert!(matches!(err, RelayError::InvalidState(_)));
    }

    #[test]
    fn engine_infos_list_registered_engines() {
        assert_eq!(
            service().engine_infos(),
            vec![EngineInfo {
                name: EngineName::Codex,
                supports_mcp: false
            }]
        );
    }
}
