//! Execution lifecycle through the chat service with scripted engines.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;

use common::{local_bridge, Ending, FakePeer, ScriptedEngine};
use tabrelay::agent::{
    ActRequest, AgentChatService, AgentEngine, AgentEvent, EngineInfo, EngineName,
    ExecutionStatus, StreamEvent, StreamManager, TerminalOutcome,
};
use tabrelay::config::RelayConfig;

fn service_with(engines: Vec<Arc<dyn AgentEngine>>) -> AgentChatService {
    AgentChatService::new(
        engines,
        EngineName::Codex,
        Arc::new(StreamManager::new(64, 64)),
        local_bridge(Arc::new(FakePeer::empty())),
    )
}

fn codex(events: Vec<AgentEvent>, ending: Ending) -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(EngineName::Codex, events, ending))
}

fn message(text: &str) -> AgentEvent {
    AgentEvent::Message { text: text.into() }
}

async fn collect(service: &AgentChatService, request_id: &str) -> Vec<StreamEvent> {
    let stream = service.subscribe(request_id).unwrap();
    tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .expect("stream should end with a terminal event")
}

fn terminal_count(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| e.event.is_terminal()).count()
}

#[tokio::test]
async fn cancel_closes_stream_and_retires_execution() {
    let service = service_with(vec![codex(vec![], Ending::WaitForCancel)]);
    let accepted = service
        .handle_act("session-1", ActRequest::new("x").with_engine("codex"))
        .unwrap();
    let stream = service.subscribe(&accepted.request_id).unwrap();
    assert_eq!(service.get_running_executions().len(), 1);

    assert!(service.cancel_execution(&accepted.request_id));
    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .unwrap();

    assert_eq!(terminal_count(&events), 1);
    assert_eq!(
        events.last().unwrap().terminal_outcome(),
        Some(&TerminalOutcome::Cancelled)
    );
    assert!(service.get_running_executions().is_empty());
}

#[tokio::test]
async fn events_arrive_in_publish_order_then_completed() {
    let service = service_with(vec![codex(
        vec![message("a"), message("b"), message("c")],
        Ending::Complete,
    )]);
    let accepted = service.handle_act("s", ActRequest::new("x")).unwrap();
    let events = collect(&service, &accepted.request_id).await;

    let kinds: Vec<_> = events.iter().map(|e| e.event.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            AgentEvent::status(ExecutionStatus::Running),
            message("a"),
            message("b"),
            message("c"),
            AgentEvent::Terminal {
                outcome: TerminalOutcome::Completed
            },
        ]
    );
    let seqs: Vec<_> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn late_subscriber_sees_only_the_terminal_event() {
    let service = service_with(vec![codex(vec![message("a")], Ending::Complete)]);
    let accepted = service.handle_act("s", ActRequest::new("x")).unwrap();
    collect(&service, &accepted.request_id).await;

    let late = collect(&service, &accepted.request_id).await;
    assert_eq!(late.len(), 1);
    assert_eq!(late[0].terminal_outcome(), Some(&TerminalOutcome::Completed));
}

#[tokio::test]
async fn unknown_request_cancel_is_a_no_op() {
    let service = service_with(vec![codex(vec![], Ending::WaitForCancel)]);
    let accepted = service.handle_act("s", ActRequest::new("x")).unwrap();

    assert!(!service.cancel_execution("no-such-request"));
    assert_eq!(service.get_running_executions().len(), 1);
    assert!(service.cancel_execution(&accepted.request_id));
}

#[tokio::test]
async fn concurrent_cancels_produce_one_terminal() {
    let service = service_with(vec![codex(vec![], Ending::WaitForCancel)]);
    let accepted = service.handle_act("s", ActRequest::new("x")).unwrap();
    let stream = service.subscribe(&accepted.request_id).unwrap();

    let id = accepted.request_id.as_str();
    let wins = std::thread::scope(|scope| {
        let first = scope.spawn(|| service.cancel_execution(id));
        let second = scope.spawn(|| service.cancel_execution(id));
        [first.join().unwrap(), second.join().unwrap()]
    });
    assert_eq!(wins.iter().filter(|won| **won).count(), 1);

    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .unwrap();
    assert_eq!(terminal_count(&events), 1);
}

#[tokio::test]
async fn engine_error_ends_in_failed_terminal() {
    let service = service_with(vec![codex(vec![], Ending::Fail("exit status 2".into()))]);
    let accepted = service.handle_act("s", ActRequest::new("x")).unwrap();
    let events = collect(&service, &accepted.request_id).await;

    match events.last().unwrap().terminal_outcome() {
        Some(TerminalOutcome::Failed { error }) => assert!(error.contains("exit status 2")),
        other => panic!("expected failed terminal, got {other:?}"),
    }
    assert!(service.get_running_executions().is_empty());
}

#[tokio::test]
async fn engine_panic_ends_in_failed_terminal() {
    let service = service_with(vec![codex(vec![], Ending::Panic("kaboom".into()))]);
    let accepted = service.handle_act("s", ActRequest::new("x")).unwrap();
    let events = collect(&service, &accepted.request_id).await;

    match events.last().unwrap().terminal_outcome() {
        Some(TerminalOutcome::Failed { error }) => assert!(error.contains("kaboom")),
        other => panic!("expected failed terminal, got {other:?}"),
    }
    assert_eq!(terminal_count(&events), 1);
}

#[tokio::test]
async fn session_cancel_only_touches_that_session() {
    let engine = codex(vec![], Ending::WaitForCancel);
    let service = service_with(vec![engine.clone()]);
    service.handle_act("s1", ActRequest::new("one")).unwrap();
    service.handle_act("s1", ActRequest::new("two")).unwrap();
    let other = service.handle_act("s2", ActRequest::new("three")).unwrap();

    assert_eq!(service.cancel_session_executions("s1"), 2);
    assert_eq!(service.cancel_session_executions("s1"), 0);

    let running = service.get_running_executions();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].request_id, other.request_id);
    assert!(service.cancel_execution(&other.request_id));
}

#[tokio::test]
async fn request_routes_to_named_engine() {
    let codex_engine = codex(vec![], Ending::Complete);
    let claude_engine = Arc::new(ScriptedEngine::new(EngineName::Claude, vec![], Ending::Complete));
    let service = service_with(vec![codex_engine.clone(), claude_engine.clone()]);

    let accepted = service
        .handle_act("s", ActRequest::new("x").with_engine("Claude"))
        .unwrap();
    collect(&service, &accepted.request_id).await;

    assert_eq!(claude_engine.runs(), 1);
    assert_eq!(codex_engine.runs(), 0);
}

#[tokio::test]
async fn configured_service_lists_both_engines() {
    let service = AgentChatService::from_config(
        &RelayConfig::default(),
        local_bridge(Arc::new(FakePeer::empty())),
    );
    assert_eq!(
        service.engine_infos(),
        vec![
            EngineInfo {
                name: EngineName::Codex,
                supports_mcp: false
            },
            EngineInfo {
                name: EngineName::Claude,
                supports_mcp: true
            },
        ]
    );
}
