//! [`MailTransport`] over a hand-rolled blocking IMAP connection.
//!
//! Socket work runs on the blocking pool; the single connection sits behind
//! a mutex. Fetch results are parsed on the blocking thread and streamed
//! back as [`FetchEvent`]s.

pub mod connection;
pub mod parse;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::ImapConfig;
use crate::error::TransportError;
use crate::mail::range::FetchRange;
use crate::transport::{
    FetchEvent, FetchRequest, FetchStream, MailTransport, MailboxStatus, MailboxTree,
    MessageAttributes, MessageEvent, SessionEvent,
};

pub use connection::ImapConnection;
use parse::{FetchedMessage, ListEntry, build_tree, parse_fetch, parse_list};

/// Socket timeout when none is configured.
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Body literals are handed to the decoder in chunks of this size.
const BODY_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Clone)]
struct ConnectSettings {
    host: String,
    port: u16,
    tls: bool,
    user: String,
    password: SecretString,
    io_timeout: Duration,
}

type SharedConnection = Arc<Mutex<Option<ImapConnection>>>;

/// IMAP session backed by [`ImapConnection`].
pub struct ImapTransport {
    settings: ConnectSettings,
    conn: SharedConnection,
    events: broadcast::Sender<SessionEvent>,
}

impl ImapTransport {
    pub fn new(config: &ImapConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            settings: ConnectSettings {
                host: config.host.clone(),
                port: config.port,
                tls: config.tls,
                user: config.user.clone(),
                password: config.password.clone(),
                io_timeout: config.timeout.unwrap_or(DEFAULT_IO_TIMEOUT),
            },
            conn: Arc::new(Mutex::new(None)),
            events,
        }
    }

    /// Run `op` on the live connection, on the blocking pool.
    ///
    /// I/O failures drop the connection and are also reported as a session
    /// error.
    async fn with_connection<R, F>(&self, op: F) -> Result<R, TransportError>
    where
        F: FnOnce(&mut ImapConnection) -> Result<R, TransportError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let events = self.events.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            let live = guard.as_mut().ok_or(TransportError::NotConnected)?;
            let result = op(live);
            if let Err(e) = &result
                && is_fatal(e)
            {
                *guard = None;
                let _ = events.send(SessionEvent::Error(e.clone()));
            }
            result
        })
        .await
        .map_err(|e| TransportError::Protocol(format!("IMAP task failed: {e}")))?
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn connect(&self) {
        let settings = self.settings.clone();
        let conn = Arc::clone(&self.conn);
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            let opened = ImapConnection::open(
                &settings.host,
                settings.port,
                settings.tls,
                settings.io_timeout,
            )
            .and_then(|mut c| {
                c.login(&settings.user, settings.password.expose_secret())?;
                Ok(c)
            });

            match opened.and_then(|c| {
                *lock(&conn)? = Some(c);
                Ok(())
            }) {
                Ok(()) => {
                    info!(host = %settings.host, port = settings.port, "Logged in");
                    let _ = events.send(SessionEvent::Ready);
                }
                Err(e) => {
                    let _ = events.send(SessionEvent::Error(e));
                }
            }
        });
    }

    fn end(&self) {
        let conn = Arc::clone(&self.conn);
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            let taken = lock(&conn).ok().and_then(|mut guard| guard.take());
            if let Some(mut c) = taken
                && let Err(e) = c.logout()
            {
                debug!("LOGOUT failed: {e}");
            }
            let _ = events.send(SessionEvent::Ended);
        });
    }

    async fn open_mailbox(
        &self,
        name: &str,
        read_only: bool,
    ) -> Result<MailboxStatus, TransportError> {
        let name = name.to_string();
        self.with_connection(move |c| c.select(&name, read_only))
            .await
    }

    async fn fetch(
        &self,
        range: FetchRange,
        request: &FetchRequest,
    ) -> Result<FetchStream, TransportError> {
        let mut items = vec!["UID".to_string(), "FLAGS".to_string()];
        if request.structure {
            items.push("BODYSTRUCTURE".to_string());
        }
        items.extend(
            request
                .bodies
                .iter()
                .map(|part| format!("BODY.PEEK[{}]", part.section())),
        );
        let command = format!("FETCH {range} ({})", items.join(" "));

        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::clone(&self.conn);
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            let outcome = lock(&conn).and_then(|mut guard| {
                let live = guard.as_mut().ok_or(TransportError::NotConnected)?;
                let result = live.run("FETCH", &command, |response| {
                    match parse_fetch(response) {
                        Ok(Some(message)) => deliver(&tx, message),
                        Ok(None) => {}
                        Err(e) => warn!("Skipping unparseable FETCH response: {e}"),
                    }
                });
                if let Err(e) = &result
                    && is_fatal(e)
                {
                    *guard = None;
                    let _ = events.send(SessionEvent::Error(e.clone()));
                }
                result
            });

            let _ = match outcome {
                Ok(()) => tx.send(FetchEvent::End),
                Err(e) => tx.send(FetchEvent::Error(e)),
            };
        });

        Ok(rx)
    }

    async fn add_flags(&self, uids: &[u32], flags: &[&str]) -> Result<(), TransportError> {
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let command = format!("UID STORE {set} +FLAGS.SILENT ({})", flags.join(" "));
        self.with_connection(move |c| c.run("STORE", &command, |_| {}))
            .await
    }

    async fn list_mailboxes(&self) -> Result<MailboxTree, TransportError> {
        self.with_connection(|c| {
            let mut entries: Vec<ListEntry> = Vec::new();
            c.run("LIST", "LIST \"\" \"*\"", |response| match parse_list(response) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!("Skipping unparseable LIST response: {e}"),
            })?;
            Ok(build_tree(entries))
        })
        .await
    }
}

/// Turn one parsed FETCH response into a message event stream.
///
/// Responses without body sections (unsolicited flag updates) are not
/// messages and are dropped.
fn deliver(tx: &mpsc::UnboundedSender<FetchEvent>, message: FetchedMessage) {
    if message.sections.is_empty() {
        debug!(seq = message.seq, "Ignoring FETCH response without body sections");
        return;
    }

    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    if tx.send(FetchEvent::Message(msg_rx)).is_err() {
        return;
    }

    for (part, bytes) in message.sections {
        for chunk in bytes.chunks(BODY_CHUNK_SIZE) {
            let _ = msg_tx.send(MessageEvent::BodyChunk {
                part: part.clone(),
                data: chunk.to_vec(),
            });
        }
        let _ = msg_tx.send(MessageEvent::BodyEnd { part });
    }

    match message.uid {
        Some(uid) => {
            let _ = msg_tx.send(MessageEvent::Attributes(MessageAttributes {
                uid,
                flags: message.flags,
                encoding: message.encoding,
            }));
        }
        None => warn!(seq = message.seq, "FETCH response without UID"),
    }
    let _ = msg_tx.send(MessageEvent::End);
}

fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Option<ImapConnection>>, TransportError> {
    conn.lock()
        .map_err(|_| TransportError::Protocol("IMAP connection lock poisoned".into()))
}

/// Errors after which the connection cannot be reused.
fn is_fatal(e: &TransportError) -> bool {
    matches!(e, TransportError::Io(_) | TransportError::Closed)
}
