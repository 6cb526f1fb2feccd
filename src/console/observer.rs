use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use super::event::{ConsoleMessage, ServerId};

pub type ObserverId = Uuid;

#[derive(Debug, Clone, Copy, Error)]
pub enum ChannelError {
    /// The observer's bounded queue is full: it cannot keep up and must be
    /// detached so it never stalls fan-out to the others.
    #[error("observer queue overflow")]
    Overflow,

    /// The receiving half is gone (connection already closed).
    #[error("observer disconnected")]
    Disconnected,
}

/// Send side of one connected console client.
///
/// Pushes never block: the queue is bounded and a full queue is an error the
/// session answers by force-detaching this observer only. The channel holds
/// no reference to the session; detachment is tracked by id.
#[derive(Clone)]
pub struct ObserverChannel {
    id: ObserverId,
    server_id: ServerId,
    tx: mpsc::Sender<ConsoleMessage>,
}

impl ObserverChannel {
    pub fn new(
        server_id: ServerId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ConsoleMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: Uuid::new_v4(),
                server_id,
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn push(&self, message: ConsoleMessage) -> Result<(), ChannelError> {
        self.tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => ChannelError::Overflow,
            TrySendError::Closed(_) => ChannelError::Disconnected,
        })
    }
}
