//! Shared test doubles: a scripted peer and scripted agent engines.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tabrelay::agent::{
    AgentEngine, AgentEvent, AgentToolBridge, EngineExecutionContext, EngineName, EngineRunOptions,
};
use tabrelay::broker::PeerClient;
use tabrelay::channel::MessageKind;
use tabrelay::config::TimeoutConfig;
use tabrelay::error::{RelayError, Result};
use tabrelay::tools::ToolDispatcher;

/// Peer answering flow listings from a fixed value and tool calls with a
/// success envelope echoing the payload.
pub struct FakePeer {
    flows: Value,
    list_requests: AtomicUsize,
    tool_calls: Mutex<Vec<(Value, Duration)>>,
}

impl FakePeer {
    pub fn with_flows(items: Value) -> Self {
        Self {
            flows: json!({ "status": "success", "items": items }),
            list_requests: AtomicUsize::new(0),
            tool_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::with_flows(json!([]))
    }

    pub fn list_requests(&self) -> usize {
        self.list_requests.load(Ordering::SeqCst)
    }

    pub fn tool_calls(&self) -> Vec<(Value, Duration)> {
        self.tool_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerClient for FakePeer {
    async fn request(&self, payload: Value, kind: MessageKind, timeout: Duration) -> Result<Value> {
        match kind {
            MessageKind::ListPublishedFlows => {
                self.list_requests.fetch_add(1, Ordering::SeqCst);
                Ok(self.flows.clone())
            }
            MessageKind::CallTool => {
                self.tool_calls.lock().unwrap().push((payload.clone(), timeout));
                Ok(json!({ "status": "success", "data": { "echo": payload } }))
            }
            MessageKind::Ping => Ok(json!("pong")),
        }
    }
}

pub fn dispatcher(peer: Arc<FakePeer>) -> Arc<ToolDispatcher> {
    Arc::new(ToolDispatcher::with_default_catalog(peer, &TimeoutConfig::default()))
}

pub fn local_bridge(peer: Arc<FakePeer>) -> Arc<AgentToolBridge> {
    Arc::new(AgentToolBridge::local(dispatcher(peer), Duration::from_secs(1)))
}

/// How a [`ScriptedEngine`] ends its run.
#[derive(Debug, Clone)]
pub enum Ending {
    Complete,
    /// Keep running until cancelled.
    WaitForCancel,
    Fail(String),
    Panic(String),
}

/// Engine that emits a fixed list of events, then ends as scripted.
pub struct ScriptedEngine {
    name: EngineName,
    events: Vec<AgentEvent>,
    ending: Ending,
    runs: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(name: EngineName, events: Vec<AgentEvent>, ending: Ending) -> Self {
        Self {
            name,
            events,
            ending,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentEngine for ScriptedEngine {
    fn name(&self) -> EngineName {
        self.name
    }

    fn supports_mcp(&self) -> bool {
        self.name == EngineName::Claude
    }

    async fn initialize_and_run(
        &self,
        _options: EngineRunOptions,
        ctx: EngineExecutionContext,
    ) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for event in &self.events {
            ctx.emitter.emit(event.clone());
        }
        match &self.ending {
            Ending::Complete => Ok(()),
            Ending::WaitForCancel => {
                ctx.cancel.cancelled().await;
                Ok(())
            }
            Ending::Fail(message) => Err(RelayError::engine(self.name.to_string(), message.clone())),
            Ending::Panic(message) => panic!("{message}"),
        }
    }
}
