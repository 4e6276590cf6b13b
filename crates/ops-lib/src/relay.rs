//! Progress relay between a running operation and its observer
//!
//! - Bounded channel; the producer never waits longer than its send timeout
//! - [`ProgressSender`] is not `Clone`, so the channel closes exactly once,
//!   when the runner drops or [`ProgressSender::close`]s it
//! - A dropped consumer turns every send into a no-op

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tracing::{debug, warn};

use crate::lifecycle::OperationState;

/// Default number of buffered events
pub const DEFAULT_CAPACITY: usize = 32;

/// Default upper bound on a single send
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One line of operation progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub state: OperationState,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(state: OperationState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

/// Producer half, owned by the operation runner
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
    send_timeout: Duration,
}

impl ProgressSender {
    /// Override how long a send may wait for buffer space
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Emit an event. Returns `false` when the event was dropped because the
    /// consumer went away or stayed full past the send timeout.
    pub async fn emit(&self, state: OperationState, message: impl Into<String>) -> bool {
        let event = ProgressEvent::new(state, message);
        match self.tx.send_timeout(event, self.send_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(event)) => {
                warn!(
                    state = ?event.state,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Progress consumer is not keeping up, dropping event"
                );
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!("Progress consumer gone, event discarded");
                false
            }
        }
    }

    /// Emit only if the buffer has room right now
    pub fn try_emit(&self, state: OperationState, message: impl Into<String>) -> bool {
        match self.tx.try_send(ProgressEvent::new(state, message)) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(state = ?event.state, "Progress buffer full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Progress consumer gone, event discarded");
                false
            }
        }
    }

    /// Close the relay. Consuming `self` makes a second close unrepresentable.
    pub fn close(self) {
        drop(self);
    }
}

/// Consumer half
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressReceiver {
    /// Next event, or `None` once the producer has closed and the buffer is empty
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Collect everything until the producer closes
    pub async fn drain(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

/// Create a relay with room for `capacity` buffered events
pub fn channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressSender {
            tx,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        },
        ProgressReceiver { rx },
    )
}
