use tokio::sync::{broadcast, mpsc};

use crate::types::ConversationEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: broadcast::Sender<ConversationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ConversationEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One-way sender for the text a dispatch target streams.
///
/// The engine owns the receiving end and appends chunks to the step's buffer
/// in the order they were sent. Once the step resolves the receiver is
/// dropped and further sends report `false`.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChunkSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Stream one chunk. Empty chunks are dropped.
    pub fn send(&self, chunk: impl Into<String>) -> bool {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(chunk).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
