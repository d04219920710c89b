//! WebSocket Transport
//!
//! Subscribes to a remote publisher over `ws://` or `wss://`. Each
//! subscription runs a pump task on the tokio runtime that connects,
//! forwards matching frames to the ingestion thread and reconnects with
//! backoff when the connection drops.
//!
//! # Message Mapping
//!
//! - binary message: one-part frame
//! - text message whose first line is not a JSON object: that line is the
//!   topic and the remainder is the payload
//! - any other text message: one-part frame

use std::sync::Arc;
use std::sync::mpsc::{self, Sender};

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::{ChannelSubscription, matches_prefix};
use crate::application::ports::{Frame, Subscription, Transport, TransportError};
use crate::infrastructure::metrics;

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("connection closed by peer")]
    Closed,
}

/// Why a connection stopped without error.
enum Stopped {
    Cancelled,
    ReceiverGone,
}

/// WebSocket-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    runtime: Handle,
    reconnect: ReconnectConfig,
}

impl WebSocketTransport {
    /// Transport whose pump tasks run on `runtime`.
    #[must_use]
    pub const fn new(runtime: Handle, reconnect: ReconnectConfig) -> Self {
        Self { runtime, reconnect }
    }
}

impl Transport for WebSocketTransport {
    fn subscribe(
        &self,
        endpoint: &str,
        topic: &str,
    ) -> Result<Arc<dyn Subscription>, TransportError> {
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(TransportError::Subscribe {
                endpoint: endpoint.to_string(),
                reason: "expected a ws:// or wss:// URL".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel();
        let cancel = CancellationToken::new();
        let pump = Pump {
            endpoint: endpoint.to_string(),
            prefix: topic.to_string(),
            tx,
            cancel: cancel.clone(),
        };
        self.runtime.spawn(pump.run(self.reconnect.clone()));

        Ok(Arc::new(ChannelSubscription::new(rx, cancel)))
    }
}

struct Pump {
    endpoint: String,
    prefix: String,
    tx: Sender<Frame>,
    cancel: CancellationToken,
}

impl Pump {
    async fn run(self, reconnect: ReconnectConfig) {
        let mut policy = ReconnectPolicy::new(reconnect);

        loop {
            match self.connect_and_forward(&mut policy).await {
                Ok(Stopped::Cancelled) => {
                    debug!(endpoint = %self.endpoint, "WebSocket pump cancelled");
                    return;
                }
                Ok(Stopped::ReceiverGone) => {
                    debug!(endpoint = %self.endpoint, "Subscriber dropped, stopping pump");
                    return;
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "WebSocket connection lost");
                }
            }

            let Some(delay) = policy.next_delay() else {
                error!(
                    endpoint = %self.endpoint,
                    attempts = policy.failures(),
                    "Giving up on WebSocket endpoint"
                );
                return;
            };
            metrics::record_reconnect(&self.endpoint);
            info!(
                endpoint = %self.endpoint,
                attempt = policy.failures(),
                delay_ms = delay.as_millis(),
                "Reconnecting"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect_and_forward(
        &self,
        policy: &mut ReconnectPolicy,
    ) -> Result<Stopped, ConnectionError> {
        let connect = tokio_tungstenite::connect_async(self.endpoint.as_str());
        let (mut ws, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(Stopped::Cancelled),
            result = connect => result?,
        };
        info!(endpoint = %self.endpoint, topic = %self.prefix, "WebSocket connected");
        policy.reset();

        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(Stopped::Cancelled);
                }
                message = ws.next() => message,
            };

            let frame = match message {
                Some(Ok(Message::Binary(data))) => Frame::single(data.to_vec()),
                Some(Ok(Message::Text(text))) => text_frame(text.as_str()),
                Some(Ok(Message::Ping(data))) => {
                    ws.send(Message::Pong(data)).await?;
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            if !matches_prefix(&frame, &self.prefix) {
                continue;
            }
            if self.tx.send(frame).is_err() {
                return Ok(Stopped::ReceiverGone);
            }
        }
    }
}

fn text_frame(text: &str) -> Frame {
    match text.split_once('\n') {
        Some((topic, payload)) if !topic.trim_start().starts_with('{') => {
            Frame::with_topic(topic.trim_end_matches('\r'), payload)
        }
        _ => Frame::single(text),
    }
}
