//! Per-execution event streams with subscriber fan-out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use super::events::{AgentEvent, StreamEvent, TerminalOutcome};
use super::types::RequestId;
use crate::error::{RelayError, Result};

/// Finite stream of one execution's events, ending with its terminal event.
pub type EventStream = BoxStream<'static, StreamEvent>;

struct OpenStream {
    sender: broadcast::Sender<StreamEvent>,
    next_seq: u64,
    terminal: Arc<OnceLock<StreamEvent>>,
}

#[derive(Default)]
struct Streams {
    open: HashMap<RequestId, OpenStream>,
    closed: HashMap<RequestId, StreamEvent>,
    closed_order: VecDeque<RequestId>,
}

/// Ordered, bounded fan-out of execution events.
///
/// Sequence numbers are assigned and events sent under one lock, so every
/// subscriber sees publish order. The producer never waits: a subscriber
/// more than `capacity` events behind loses the oldest ones.
pub struct StreamManager {
    streams: Mutex<Streams>,
    capacity: usize,
    retention: usize,
}

impl StreamManager {
    pub fn new(capacity: usize, retention: usize) -> Self {
        Self {
            streams: Mutex::new(Streams::default()),
            capacity: capacity.max(1),
            retention: retention.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Streams> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the stream for `request_id`. Returns `false` if the id is
    /// already open or still retained as closed.
    pub fn open(&self, request_id: &str) -> bool {
        let mut streams = self.lock();
        if streams.open.contains_key(request_id) || streams.closed.contains_key(request_id) {
            return false;
        }
        let (sender, _) = broadcast::channel(self.capacity);
        streams.open.insert(
            request_id.to_string(),
            OpenStream {
                sender,
                next_seq: 0,
                terminal: Arc::new(OnceLock::new()),
            },
        );
        true
    }

    /// Drop an open stream that never started, without a terminal event.
    /// Existing subscribers see the sequence end.
    pub fn discard(&self, request_id: &str) -> bool {
        self.lock().open.remove(request_id).is_some()
    }

    /// Publish a non-terminal event. Terminal events are routed to
    /// [`close`](Self::close). Returns `false` if the event was discarded.
    pub fn publish(&self, request_id: &str, event: AgentEvent) -> bool {
        if let AgentEvent::Terminal { outcome } = event {
            return self.close(request_id, outcome);
        }

        let mut streams = self.lock();
        if !streams.open.contains_key(request_id) {
            let closed = streams.closed.contains_key(request_id);
            drop(streams);
            if closed {
                tracing::warn!(request_id, "discarding event published after close");
            } else {
                tracing::warn!(request_id, "discarding event for unknown stream");
            }
            return false;
        }
        let Some(stream) = streams.open.get_mut(request_id) else {
            return false;
        };

        let event = StreamEvent {
            request_id: request_id.to_string(),
            seq: stream.next_seq,
            timestamp: Utc::now(),
            event,
        };
        stream.next_seq += 1;
        // No subscribers is fine; the event is simply not observed.
        let _ = stream.sender.send(event);
        true
    }

    /// Send the terminal event and retire the stream. Idempotent: returns
    /// `false` if the stream was not open.
    pub fn close(&self, request_id: &str, outcome: TerminalOutcome) -> bool {
        let mut streams = self.lock();
        let Some(stream) = streams.open.remove(request_id) else {
            return false;
        };

        let terminal = StreamEvent {
            request_id: request_id.to_string(),
            seq: stream.next_seq,
            timestamp: Utc::now(),
            event: AgentEvent::Terminal { outcome },
        };
        let _ = stream.terminal.set(terminal.clone());
        let _ = stream.sender.send(terminal.clone());

        streams.closed.insert(request_id.to_string(), terminal);
        streams.closed_order.push_back(request_id.to_string());
        while streams.closed_order.len() > self.retention {
            if let Some(evicted) = streams.closed_order.pop_front() {
                streams.closed.remove(&evicted);
            }
        }
        true
    }

    /// Subscribe from now on. A closed stream yields only its terminal event.
    pub fn subscribe(&self, request_id: &str) -> Result<EventStream> {
        let streams = self.lock();
        if let Some(stream) = streams.open.get(request_id) {
            let receiver = stream.sender.subscribe();
            let terminal = stream.terminal.clone();
            return Ok(follow(request_id.to_string(), receiver, terminal));
        }
        if let Some(terminal) = streams.closed.get(request_id) {
            return Ok(stream::once(futures::future::ready(terminal.clone())).boxed());
        }
        Err(RelayError::NotFound(format!("no event stream for {request_id}")))
    }

    pub fn is_open(&self, request_id: &str) -> bool {
        self.lock().open.contains_key(request_id)
    }

    pub fn is_closed(&self, request_id: &str) -> bool {
        self.lock().closed.contains_key(request_id)
    }
}

fn follow(
    request_id: RequestId,
    mut receiver: broadcast::Receiver<StreamEvent>,
    terminal: Arc<OnceLock<StreamEvent>>,
) -> EventStream {
    async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let done = event.event.is_terminal();
                    yield event;
                    if done {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(request_id = %request_id, skipped, "stream subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    if let Some(event) = terminal.get() {
                        yield event.clone();
                    }
                    break;
                }
            }
        }
    }
    .boxed()
}
