//! IMAP client: connect, fetch recent messages, mark them read, list
//! mailboxes.
//!
//! Transport lifecycle events are bridged into plain `async fn`s. A fetch
//! spawns one decode task per delivered message into a [`JoinSet`] and joins
//! them all once the transport reports the end of the fetch, so a slow
//! message is never dropped. Records come back in decode completion order,
//! which is not necessarily sequence order; sort by `uid` if that matters.
//!
//! One client drives one transport. Overlapping operations on the same
//! client are not supported.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ImapConfig;
use crate::error::{MailError, TransportError};
use crate::mail::decode::decode_message;
use crate::mail::filter::FilterChain;
use crate::mail::observer::{LoggingObserver, SessionObserver, spawn_observer_pump};
use crate::mail::range::plan;
use crate::mail::EmailRecord;
use crate::transport::{
    FetchEvent, FetchRequest, MailTransport, MailboxStatus, SEEN_FLAG, SessionEvent,
};

/// One UID or several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidSet(Vec<u32>);

impl UidSet {
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<u32> for UidSet {
    fn from(uid: u32) -> Self {
        UidSet(vec![uid])
    }
}

impl From<Vec<u32>> for UidSet {
    fn from(uids: Vec<u32>) -> Self {
        UidSet(uids)
    }
}

impl From<&[u32]> for UidSet {
    fn from(uids: &[u32]) -> Self {
        UidSet(uids.to_vec())
    }
}

/// High-level mailbox client over a [`MailTransport`].
pub struct ImapClient<T: MailTransport> {
    transport: Arc<T>,
    config: ImapConfig,
    observers: Arc<[Arc<dyn SessionObserver>]>,
    observer_pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T: MailTransport + 'static> ImapClient<T> {
    /// Client with the default logging observer.
    pub fn new(transport: T, config: ImapConfig) -> Self {
        let logger: Arc<dyn SessionObserver> = Arc::new(LoggingObserver::new(config.host.clone()));
        Self::with_observers(transport, config, vec![logger])
    }

    /// Client with an explicit, fixed set of session observers.
    pub fn with_observers(
        transport: T,
        config: ImapConfig,
        observers: Vec<Arc<dyn SessionObserver>>,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
            observers: Arc::from(observers),
            observer_pump: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ImapConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connect and wait for the session to become ready.
    ///
    /// Settles on the first `Ready` or `Error`; whatever follows goes only to
    /// the session observers.
    pub async fn connect(&self) -> Result<(), MailError> {
        self.start_observers();
        let mut events = self.transport.subscribe();
        self.transport.connect();

        let outcome = self
            .with_timeout("connect", async move {
                loop {
                    match events.recv().await {
                        Ok(SessionEvent::Ready) => return Ok(()),
                        Ok(SessionEvent::Error(err)) => return Err(MailError::Connect(err)),
                        Ok(SessionEvent::Ended) => return Err(MailError::SessionEnded),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "Lifecycle events lagged during connect");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(MailError::SessionEnded);
                        }
                    }
                }
            })
            .await;

        match &outcome {
            Ok(()) => info!(host = %self.config.host, "IMAP session ready"),
            Err(e) => error!(host = %self.config.host, "Connection attempt failed: {e}"),
        }
        outcome
    }

    /// Ask the transport to shut down. Does not wait.
    pub fn terminate(&self) {
        debug!("Terminating IMAP session");
        self.transport.end();
    }

    /// Fetch the `max_to_fetch` most recent messages of the configured
    /// mailbox, decode them, and apply the unread and prefix filters.
    ///
    /// Any transport failure fails the whole call; records decoded so far
    /// are discarded.
    pub async fn fetch(
        &self,
        max_to_fetch: u32,
        only_unread: bool,
    ) -> Result<Vec<EmailRecord>, MailError> {
        let records = self
            .with_timeout("fetch", self.fetch_all(max_to_fetch))
            .await?;

        let chain = FilterChain::for_fetch(only_unread, &self.config.match_prefix);
        let kept = chain.filter_emails(records);
        info!(
            mailbox = %self.config.mailbox,
            count = kept.len(),
            "Fetched messages"
        );
        Ok(kept)
    }

    /// [`fetch`](Self::fetch) with the limit and unread option from config.
    pub async fn fetch_configured(&self) -> Result<Vec<EmailRecord>, MailError> {
        self.fetch(self.config.fetch_limit, self.config.only_unread)
            .await
    }

    /// Fetch and decode every message in range, unfiltered.
    async fn fetch_all(&self, max_to_fetch: u32) -> Result<Vec<EmailRecord>, MailError> {
        let status = self.open_mailbox().await?;

        let Some(range) = plan(status.total, max_to_fetch) else {
            debug!(mailbox = %status.name, "Mailbox is empty");
            return Ok(Vec::new());
        };

        debug!(mailbox = %status.name, range = %range, "Fetching messages");
        let mut events = self
            .transport
            .fetch(range, &FetchRequest::headers_and_text())
            .await
            .map_err(MailError::Fetch)?;

        let mut decoders = JoinSet::new();
        loop {
            match events.recv().await {
                Some(FetchEvent::Message(stream)) => {
                    decoders.spawn(decode_message(stream));
                }
                Some(FetchEvent::Error(err)) => {
                    error!("Fetch error: {err}");
                    return Err(MailError::Fetch(err));
                }
                Some(FetchEvent::End) => break,
                None => {
                    error!("Fetch stream closed before completion");
                    return Err(MailError::Fetch(TransportError::Closed));
                }
            }
        }

        let mut records = Vec::with_capacity(decoders.len());
        while let Some(joined) = decoders.join_next().await {
            let record = joined.map_err(|e| MailError::DecodeTask(e.to_string()))?;
            records.push(record);
        }
        debug!(count = records.len(), "Decoded messages");
        Ok(records)
    }

    /// Add `\Seen` to the given UIDs in the configured mailbox.
    pub async fn mark_as_read(&self, uids: impl Into<UidSet>) -> Result<(), MailError> {
        let uids = uids.into();
        if uids.is_empty() {
            return Ok(());
        }

        self.with_timeout("mark_as_read", async {
            self.open_mailbox().await?;
            self.transport
                .add_flags(uids.as_slice(), &[SEEN_FLAG])
                .await
                .map_err(|e| {
                    error!("Error marking message as read: {e}");
                    MailError::SetFlags(e)
                })
        })
        .await?;

        debug!(uids = ?uids.as_slice(), "Marked messages as read");
        Ok(())
    }

    /// Names of the top-level mailboxes. Children are not expanded.
    pub async fn available_mailboxes(&self) -> Result<Vec<String>, MailError> {
        self.with_timeout("list_mailboxes", async {
            let tree = self.transport.list_mailboxes().await.map_err(|e| {
                error!("Error getting mailboxes: {e}");
                MailError::ListMailboxes(e)
            })?;
            Ok(tree.into_keys().collect())
        })
        .await
    }

    /// Open the configured mailbox read-write.
    async fn open_mailbox(&self) -> Result<MailboxStatus, MailError> {
        self.transport
            .open_mailbox(&self.config.mailbox, false)
            .await
            .map_err(|source| {
                error!(mailbox = %self.config.mailbox, "Error opening mailbox: {source}");
                MailError::OpenMailbox {
                    mailbox: self.config.mailbox.clone(),
                    source,
                }
            })
    }

    /// Start forwarding lifecycle events to the observers, once.
    fn start_observers(&self) {
        let Ok(mut pump) = self.observer_pump.lock() else {
            return;
        };
        if pump.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *pump = Some(spawn_observer_pump(
            self.transport.subscribe(),
            Arc::clone(&self.observers),
        ));
    }

    /// Apply the configured timeout. On expiry the transport is asked to end.
    async fn with_timeout<R, F>(&self, operation: &'static str, fut: F) -> Result<R, MailError>
    where
        F: Future<Output = Result<R, MailError>>,
    {
        let Some(timeout) = self.config.timeout else {
            return fut.await;
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, ?timeout, "Operation timed out, ending session");
                self.transport.end();
                Err(MailError::Timeout { operation, timeout })
            }
        }
    }
}

impl<T: MailTransport> Drop for ImapClient<T> {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.observer_pump.lock()
            && let Some(handle) = pump.take()
        {
            handle.abort();
        }
    }
}
