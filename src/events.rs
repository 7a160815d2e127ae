use tokio::sync::mpsc;
use tracing::debug;

use crate::envelope::Delivery;
use crate::protocol::TransferError;

/// Notifications handed to external collaborators, in emission order
#[derive(Debug)]
pub enum TransferEvent {
    Status(String),
    Delivered(Delivery),
    Progress { acked: usize, total: usize },
    Completed { id: String },
    Error(TransferError),
}

/// Sending half of the single ordered event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: TransferEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(TransferEvent::Status(text.into()));
    }
}
