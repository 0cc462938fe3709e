use anyhow::{
    Error,
    Result,
};
use tokio::sync::{
    broadcast,
    mpsc,
};

use crate::message::message::Message;

/// A sink through which outbound WAMP messages are delivered to the other peer.
///
/// The engine does not own a connection. A transport layer hands inbound messages to the engine
/// and implements this trait for the outbound direction. Sends are fire-and-forget: they queue
/// the message and never wait for transport acknowledgement.
pub trait MessageSink: Send + Sync {
    /// Queues a message for delivery.
    fn send(&self, message: Message) -> Result<()>;

    /// Releases the underlying connection, if the sink holds one.
    fn close(&self);
}

/// A [`MessageSink`] over an in-process channel.
///
/// The receiver half belongs to the transport loop, which forwards queued messages onto the
/// wire. Closing the sink notifies the loop through a separate channel rather than dropping the
/// sender, so pending messages are still delivered.
#[derive(Debug)]
pub struct ChannelSink {
    message_tx: mpsc::UnboundedSender<Message>,
    closed_tx: broadcast::Sender<()>,
}

impl ChannelSink {
    /// Creates a new sink, returning the receiver half for the transport loop.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = broadcast::channel(1);
        (
            Self {
                message_tx,
                closed_tx,
            },
            message_rx,
        )
    }

    /// Subscribes to the close notification.
    pub fn closed_rx(&self) -> broadcast::Receiver<()> {
        self.closed_tx.subscribe()
    }
}

impl MessageSink for ChannelSink {
    fn send(&self, message: Message) -> Result<()> {
        self.message_tx
            .send(message)
            .map_err(|_| Error::msg("connection is closed"))
    }

    fn close(&self) {
        self.closed_tx.send(()).ok();
    }
}
