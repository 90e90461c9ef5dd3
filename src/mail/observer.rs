//! Session-wide lifecycle observers.
//!
//! Observers see every transport error and the end of the session,
//! independently of whichever operation happens to be running. Errors that
//! arrive after an operation has already settled end up only here.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::TransportError;
use crate::transport::SessionEvent;

/// Passive listener for session lifecycle events.
pub trait SessionObserver: Send + Sync {
    fn on_error(&self, err: &TransportError);
    fn on_end(&self);
}

/// Logs lifecycle events through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LoggingObserver {
    host: String,
}

impl LoggingObserver {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl SessionObserver for LoggingObserver {
    fn on_error(&self, err: &TransportError) {
        error!(host = %self.host, "IMAP session error: {err}");
    }

    fn on_end(&self) {
        info!(host = %self.host, "IMAP connection ended");
    }
}

/// Forward lifecycle events to `observers` until the channel closes.
pub fn spawn_observer_pump(
    mut events: broadcast::Receiver<SessionEvent>,
    observers: Arc<[Arc<dyn SessionObserver>]>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Error(err)) => {
                    for o in observers.iter() {
                        o.on_error(&err);
                    }
                }
                Ok(SessionEvent::Ended) => {
                    for o in observers.iter() {
                        o.on_end();
                    }
                }
                Ok(SessionEvent::Ready) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Session observers lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
