//! Transport Adapters
//!
//! Implementations of the [`Transport`](crate::application::ports::Transport)
//! port.
//!
//! - [`MemoryTransport`]: in-process bus, used by tests and demos
//! - [`WebSocketTransport`]: remote publisher over WebSocket with reconnect
//!
//! Both hand frames to the ingestion thread through a [`ChannelSubscription`].
//!
//! # Topic Filtering
//!
//! A subscription with prefix `p` receives a frame when the frame's first
//! part starts with `p`. The empty prefix receives everything.

pub mod memory;
pub mod reconnect;
pub mod websocket;

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Frame, Subscription, TransportError};

pub use memory::MemoryTransport;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use websocket::WebSocketTransport;

/// Whether `frame` passes the subscription filter `prefix`.
#[must_use]
pub fn matches_prefix(frame: &Frame, prefix: &str) -> bool {
    prefix.is_empty()
        || frame
            .parts()
            .first()
            .is_some_and(|first| first.starts_with(prefix.as_bytes()))
}

type CloseHook = Box<dyn FnOnce() + Send>;

/// Subscription fed by a standard channel.
///
/// `recv` blocks the calling thread. Closing cancels the token and runs the
/// close hook, which must arrange for every sender to be dropped.
pub struct ChannelSubscription {
    rx: Mutex<Receiver<Frame>>,
    cancel: CancellationToken,
    on_close: Mutex<Option<CloseHook>>,
}

impl std::fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("closed", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ChannelSubscription {
    /// Wrap a receiver; `cancel` is observed by the producing side.
    #[must_use]
    pub fn new(rx: Receiver<Frame>, cancel: CancellationToken) -> Self {
        Self {
            rx: Mutex::new(rx),
            cancel,
            on_close: Mutex::new(None),
        }
    }

    /// Run `hook` once when the subscription is closed.
    #[must_use]
    pub fn with_close_hook(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.on_close.lock() = Some(Box::new(hook));
        self
    }

    /// Whether [`Subscription::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Subscription for ChannelSubscription {
    fn recv(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        match self.rx.lock().recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) if !self.cancel.is_cancelled() => Ok(None),
            Err(_) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.cancel.cancel();
        let hook = self.on_close.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn prefix_matches_first_part() {
        let frame = Frame::with_topic("xdp.h1", "{}");
        assert!(matches_prefix(&frame, ""));
        assert!(matches_prefix(&frame, "xdp"));
        assert!(!matches_prefix(&frame, "integrity"));
        assert!(!matches_prefix(&Frame::new(Vec::new()), "xdp"));
    }

    #[test]
    fn recv_times_out_then_delivers() {
        let (tx, rx) = mpsc::channel();
        let sub = ChannelSubscription::new(rx, CancellationToken::new());
        assert!(sub.recv(Duration::from_millis(5)).unwrap().is_none());
        tx.send(Frame::single("{}")).unwrap();
        assert!(sub.recv(Duration::from_millis(5)).unwrap().is_some());
    }

    #[test]
    fn close_runs_hook_once_and_reports_closed() {
        let (tx, rx) = mpsc::channel::<Frame>();
        let tx = Mutex::new(Some(tx));
        let sub = ChannelSubscription::new(rx, CancellationToken::new());
        let sub = sub.with_close_hook(move || {
            tx.lock().take();
        });
        sub.close();
        sub.close();
        assert!(sub.is_closed());
        assert!(matches!(
            sub.recv(Duration::from_millis(5)),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn dropped_sender_reports_closed() {
        let (tx, rx) = mpsc::channel::<Frame>();
        let sub = ChannelSubscription::new(rx, CancellationToken::new());
        drop(tx);
        assert!(matches!(
            sub.recv(Duration::from_millis(5)),
            Err(TransportError::Closed)
        ));
    }
}
