//! Channel transport over an `AsyncRead`/`AsyncWrite` pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::codec::{FrameReader, FrameWriter};
use super::{ChannelTransport, InboundFrame, OutboundFrame};
use crate::broker::RequestCorrelationBroker;
use crate::error::RelayError;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Peer channel backed by a byte stream (stdio for a native messaging host).
///
/// Writes are serialized through a mutex; a single reader task feeds every
/// inbound frame to the broker and detaches the channel on EOF or error.
pub struct StreamChannel {
    writer: Mutex<FrameWriter<BoxedWriter>>,
    connected: AtomicBool,
    broker: Weak<RequestCorrelationBroker>,
}

impl StreamChannel {
    /// Attach a channel over `reader`/`writer` to `broker` and start reading.
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        broker: Arc<RequestCorrelationBroker>,
    ) -> (Arc<Self>, JoinHandle<()>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let channel = Arc::new(Self {
            writer: Mutex::new(FrameWriter::new(Box::new(writer) as BoxedWriter)),
            connected: AtomicBool::new(true),
            broker: Arc::downgrade(&broker),
        });
        let transport: Arc<dyn ChannelTransport> = channel.clone();
        broker.attach(transport.clone());

        let reader_channel = channel.clone();
        let handle = tokio::spawn(async move {
            let reason = read_loop(FrameReader::new(reader), &broker).await;
            reader_channel.connected.store(false, Ordering::SeqCst);
            broker.detach_transport(&transport, &reason);
        });
        (channel, handle)
    }

    /// Attach a channel over this process's stdin/stdout.
    pub fn stdio(broker: Arc<RequestCorrelationBroker>) -> (Arc<Self>, JoinHandle<()>) {
        Self::spawn(tokio::io::stdin(), tokio::io::stdout(), broker)
    }

    /// Close the write side and detach from the broker, failing whatever is
    /// still pending on this channel. The reader task ends when the peer
    /// hangs up.
    pub async fn close(self: &Arc<Self>) -> Result<(), RelayError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let shutdown = self.writer.lock().await.shutdown().await;
        if let Some(broker) = self.broker.upgrade() {
            let transport: Arc<dyn ChannelTransport> = self.clone();
            broker.detach_transport(&transport, "channel closed locally");
        }
        shutdown
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    broker: &RequestCorrelationBroker,
) -> String {
    loop {
        let body = match reader.read_message().await {
            Ok(Some(body)) => body,
            Ok(None) => return "peer closed the channel".to_string(),
            Err(err) => return format!("channel read failed: {err}"),
        };
        match serde_json::from_slice::<InboundFrame>(&body) {
            Ok(frame) => broker.handle_inbound(frame),
            Err(err) => {
                tracing::warn!(error = %err, len = body.len(), "dropping malformed peer frame");
            }
        }
    }
}

#[async_trait]
impl ChannelTransport for StreamChannel {
    async fn send_frame(&self, frame: &OutboundFrame) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::channel_unavailable("channel closed"));
        }
        self.writer.lock().await.write_json(frame).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
