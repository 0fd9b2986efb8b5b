//! Request-correlation broker over the single peer channel.
//!
//! Many callers may have requests outstanding at once; each waits on its own
//! correlation id while frames are written to and read from one channel.

pub mod table;

pub use table::{CorrelationTable, PendingRequest};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::channel::{ChannelTransport, CorrelationId, InboundFrame, MessageKind, OutboundFrame};
use crate::error::{RelayError, Result};

/// Anything that can send a request to the peer and await its response.
///
/// Implemented by [`RequestCorrelationBroker`]; the tool layer depends on
/// this trait rather than the broker itself.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn request(
        &self,
        payload: serde_json::Value,
        kind: MessageKind,
        timeout: Duration,
    ) -> Result<serde_json::Value>;
}

/// Counters for diagnosing peer behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Requests currently awaiting a response.
    pub pending: usize,
    /// Responses that arrived for an unknown or already retired id.
    pub late_responses: u64,
    /// Requests that hit their deadline.
    pub timeouts: u64,
}

/// Issues correlation ids, writes frames and pairs responses with callers.
pub struct RequestCorrelationBroker {
    table: CorrelationTable,
    transport: RwLock<Option<Arc<dyn ChannelTransport>>>,
    next_id: AtomicU64,
    late_responses: AtomicU64,
    timeouts: AtomicU64,
}

impl Default for RequestCorrelationBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelationBroker {
    /// Create a broker with no channel attached.
    pub fn new() -> Self {
        Self {
            table: CorrelationTable::new(),
            transport: RwLock::new(None),
            next_id: AtomicU64::new(1),
            late_responses: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Attach (or replace) the channel. Requests pending on a replaced
    /// channel can never be answered and are failed.
    pub fn attach(&self, transport: Arc<dyn ChannelTransport>) {
        let previous = self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(transport);
        if previous.is_some() {
            self.fail_pending("channel replaced");
        }
    }

    /// Drop the current channel and fail every pending request.
    pub fn detach(&self, reason: &str) {
        self.transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.fail_pending(reason);
    }

    /// Detach only if `transport` is still the attached channel.
    pub fn detach_transport(&self, transport: &Arc<dyn ChannelTransport>, reason: &str) {
        {
            let mut current = self.transport.write().unwrap_or_else(PoisonError::into_inner);
            let is_current = current
                .as_ref()
                .is_some_and(|attached| same_transport(attached, transport));
            if !is_current {
                return;
            }
            current.take();
        }
        self.fail_pending(reason);
    }

    /// Whether a connected channel is attached.
    pub fn is_connected(&self) -> bool {
        self.current_transport()
            .is_some_and(|transport| transport.is_connected())
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            pending: self.table.len(),
            late_responses: self.late_responses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Send `payload` to the peer and wait up to `timeout` for the response.
    pub async fn send(
        &self,
        payload: serde_json::Value,
        kind: MessageKind,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let transport = self
            .current_transport()
            .filter(|transport| transport.is_connected())
            .ok_or_else(|| RelayError::channel_unavailable("peer channel is not connected"))?;

        let (tx, mut rx) = oneshot::channel();
        let created_at = Instant::now();
        let correlation_id = self.register(kind, created_at, created_at + timeout, tx);
        let guard = PendingGuard {
            table: &self.table,
            id: &correlation_id,
        };

        tracing::debug!(
            correlation_id = %correlation_id,
            kind = %kind,
            timeout_ms = timeout.as_millis() as u64,
            "sending peer request"
        );

        let frame = OutboundFrame {
            correlation_id: correlation_id.clone(),
            kind,
            payload,
        };
        if let Err(err) = transport.send_frame(&frame).await {
            return Err(match err {
                RelayError::ChannelUnavailable(_) => err,
                other => RelayError::channel_unavailable(format!("failed to write frame: {other}")),
            });
        }

        let outcome = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RelayError::channel_unavailable(
                "pending request dropped before completion",
            )),
            Err(_) => {
                if self.table.remove(&correlation_id).is_some() {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        kind = %kind,
                        timeout_ms = timeout.as_millis() as u64,
                        "peer request timed out"
                    );
                    Err(RelayError::Timeout(timeout.as_millis() as u64))
                } else {
                    // Resolved between the deadline firing and the removal.
                    rx.try_recv()
                        .unwrap_or(Err(RelayError::Timeout(timeout.as_millis() as u64)))
                }
            }
        };
        drop(guard);

        tracing::debug!(
            correlation_id = %correlation_id,
            ok = outcome.is_ok(),
            elapsed_ms = created_at.elapsed().as_millis() as u64,
            "peer request finished"
        );
        outcome
    }

    /// Completion path for frames read from the channel.
    pub fn handle_inbound(&self, frame: InboundFrame) {
        let Some(correlation_id) = frame.correlation_id else {
            tracing::debug!(payload = %frame.payload, "ignoring unsolicited peer message");
            return;
        };

        let outcome = match frame.error {
            Some(error) => Err(RelayError::Upstream(error)),
            None => Ok(frame.payload),
        };

        if !self.table.resolve(&correlation_id, outcome) {
            let late = self.late_responses.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                correlation_id = %correlation_id,
                late_responses = late,
                "discarding response for unknown or retired correlation id"
            );
        }
    }

    fn register(
        &self,
        kind: MessageKind,
        created_at: Instant,
        deadline: Instant,
        completion: table::Completion,
    ) -> CorrelationId {
        let mut entry = PendingRequest::new(
            self.allocate_id(),
            kind,
            created_at,
            deadline,
            completion,
        );
        loop {
            let id = entry.correlation_id.clone();
            match self.table.insert(entry) {
                Ok(()) => return id,
                Err(mut rejected) => {
                    rejected.correlation_id = self.allocate_id();
                    entry = rejected;
                }
            }
        }
    }

    fn allocate_id(&self) -> CorrelationId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        CorrelationId::new(format!("req-{n}"))
    }

    fn current_transport(&self) -> Option<Arc<dyn ChannelTransport>> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fail_pending(&self, reason: &str) {
        let failed = self
            .table
            .fail_all(|| RelayError::channel_unavailable(reason.to_string()));
        if failed > 0 {
            tracing::warn!(failed, reason, "failed pending peer requests");
        }
    }
}

#[async_trait]
impl PeerClient for RequestCorrelationBroker {
    async fn request(
        &self,
        payload: serde_json::Value,
        kind: MessageKind,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        self.send(payload, kind, timeout).await
    }
}

/// Retires the caller's entry if the caller stops waiting early.
struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    id: &'a CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

fn same_transport(a: &Arc<dyn ChannelTransport>, b: &Arc<dyn ChannelTransport>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
