//! Duplex channel to the peer process (the browser extension).
//!
//! - [`ChannelTransport`]: the write side the broker sends frames through
//! - [`OutboundFrame`] / [`InboundFrame`]: JSON envelopes carrying the
//!   correlation id slot
//! - [`FrameReader`] / [`FrameWriter`]: native-messaging framing
//!   (`u32` little-endian length + JSON body)
//! - [`StreamChannel`]: transport over any `AsyncRead`/`AsyncWrite` pair

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

pub mod codec;
pub mod stream;

pub use codec::{FrameReader, FrameWriter, MAX_INBOUND_FRAME_LEN, MAX_OUTBOUND_FRAME_LEN};
pub use stream::StreamChannel;

/// Opaque token pairing a request with its response on the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kind of request sent to the peer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
pub enum MessageKind {
    /// Invoke a tool implemented by the extension.
    #[serde(rename = "call_tool")]
    #[strum(serialize = "call_tool")]
    CallTool,
    /// Fetch the published record-replay flows.
    #[serde(rename = "rr_list_published_flows")]
    #[strum(serialize = "rr_list_published_flows")]
    ListPublishedFlows,
    /// Liveness check.
    #[serde(rename = "ping")]
    #[strum(serialize = "ping")]
    Ping,
}

/// Frame written to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "requestId")]
    pub correlation_id: CorrelationId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: serde_json::Value,
}

/// Frame read from the peer.
///
/// Frames without `responseToRequestId` are unsolicited messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(
        rename = "responseToRequestId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InboundFrame {
    /// Successful response to `correlation_id`.
    pub fn response(correlation_id: impl Into<CorrelationId>, payload: serde_json::Value) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            payload,
            error: None,
        }
    }

    /// Transport-level failure reported by the peer for `correlation_id`.
    pub fn failure(correlation_id: impl Into<CorrelationId>, error: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            payload: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Write side of the peer channel.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Write one frame to the peer.
    async fn send_frame(&self, frame: &OutboundFrame) -> Result<(), RelayError>;

    /// Whether the peer connection is still open.
    fn is_connected(&self) -> bool;
}
