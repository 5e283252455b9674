//! Peer transport to the realtime service.
//!
//! A [`Negotiator`] opens a [`Transport`]: local capture, a peer connection and
//! one ordered data channel carrying the JSON control protocol. Everything the
//! transport observes is pushed through an [`EventSink`] into the session queue.

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::session::Input;

mod sdp;
#[cfg(feature = "webrtc")]
mod peer;

pub use sdp::SdpExchange;
#[cfg(feature = "webrtc")]
pub use peer::WebRtcNegotiator;

/// Peer connectivity as surfaced to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// Whether this state ends a live session.
    pub fn is_lost(&self) -> bool {
        matches!(
            self,
            ConnectivityState::Disconnected | ConnectivityState::Failed | ConnectivityState::Closed
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectivityState::New => "new",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The control channel is open and can carry messages.
    ChannelOpen,
    /// A raw text message from the control channel.
    Message(String),
    Connectivity(ConnectivityState),
    ChannelClosed,
}

/// Delivers transport events into the session queue, tagged with the session they belong to.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::Sender<Input>,
}

impl EventSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::Sender<Input>) -> Self {
        Self { epoch, tx }
    }

    /// Returns false once the session controller is gone.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Input::Transport {
                epoch: self.epoch,
                event,
            })
            .await
            .is_ok()
    }
}

/// An open connection. Exclusively owned by one session and released through [`Transport::close`].
#[async_trait]
pub trait Transport: Send {
    /// Writes one text message on the control channel.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Stops local capture while keeping the connection open. Idempotent.
    fn stop_capture(&mut self);

    fn is_capturing(&self) -> bool;

    /// Releases the channel, the peer connection and the media tracks. Idempotent.
    async fn close(&mut self);
}

#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Opens a transport. On failure nothing is left behind.
    async fn open(&self, credential: SecretString, sink: EventSink) -> Result<Box<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_states_end_the_session() {
        assert!(ConnectivityState::Failed.is_lost());
        assert!(ConnectivityState::Disconnected.is_lost());
        assert!(ConnectivityState::Closed.is_lost());
        assert!(!ConnectivityState::Connected.is_lost());
        assert!(!ConnectivityState::Connecting.is_lost());
    }

    #[tokio::test]
    async fn sink_tags_events_with_epoch() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(7, tx);
        assert!(sink.emit(TransportEvent::ChannelOpen).await);

        match rx.recv().await {
            Some(Input::Transport { epoch, event }) => {
                assert_eq!(epoch, 7);
                assert_eq!(event, TransportEvent::ChannelOpen);
            }
            other => panic!("unexpected input: {other:?}"),
        }

        drop(rx);
        assert!(!sink.emit(TransportEvent::ChannelClosed).await);
    }
}
