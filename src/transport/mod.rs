//! Mailbox transport contract and the typed values that cross it.
//!
//! Everything the IMAP session hands back (mailbox status, fetch events,
//! message attributes, the folder tree) is modelled here as plain values so
//! untyped wire data never leaks past the transport.

pub mod imap;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::TransportError;
use crate::mail::range::FetchRange;

pub use imap::ImapTransport;

/// The `\Seen` system flag.
pub const SEEN_FLAG: &str = "\\Seen";

/// Session lifecycle signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connected and authenticated.
    Ready,
    /// Asynchronous transport failure.
    Error(TransportError),
    /// The session is over.
    Ended,
}

/// Result of opening a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxStatus {
    pub name: String,
    /// Number of messages (`EXISTS`).
    pub total: u32,
}

/// Which body section a delivery belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartSelector {
    /// `HEADER.FIELDS (<fields>)`.
    HeaderFields(Vec<String>),
    /// `TEXT`, the full body below the header.
    Text,
    /// Anything else the server chose to send.
    Other(String),
}

impl PartSelector {
    /// The header fields the importer asks for.
    pub fn summary_headers() -> Self {
        PartSelector::HeaderFields(
            ["FROM", "TO", "SUBJECT", "DATE"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    /// IMAP section spec, e.g. `HEADER.FIELDS (FROM TO)` or `TEXT`.
    pub fn section(&self) -> String {
        match self {
            PartSelector::HeaderFields(fields) => {
                format!("HEADER.FIELDS ({})", fields.join(" "))
            }
            PartSelector::Text => "TEXT".to_string(),
            PartSelector::Other(s) => s.clone(),
        }
    }

    /// Classify a section spec as echoed back by the server.
    pub fn from_section(section: &str) -> Self {
        let upper = section.trim().to_ascii_uppercase();
        if upper == "TEXT" {
            return PartSelector::Text;
        }
        if let Some(rest) = upper.strip_prefix("HEADER.FIELDS") {
            let fields = rest
                .trim()
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split_whitespace()
                .map(|f| f.trim_matches('"').to_string())
                .collect();
            return PartSelector::HeaderFields(fields);
        }
        PartSelector::Other(section.to_string())
    }
}

/// What to fetch for every message in a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub bodies: Vec<PartSelector>,
    /// Also fetch `BODYSTRUCTURE`.
    pub structure: bool,
}

impl FetchRequest {
    /// Summary headers plus the text body, with structure.
    pub fn headers_and_text() -> Self {
        Self {
            bodies: vec![PartSelector::summary_headers(), PartSelector::Text],
            structure: true,
        }
    }
}

/// Content-Transfer-Encoding of a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7bit, 8bit or binary: bytes are the text.
    Identity,
    QuotedPrintable,
    /// Declared but not decoded here (base64, x-token, ...).
    Other(String),
}

impl TransferEncoding {
    pub fn from_declared(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "7bit" | "8bit" | "binary" => TransferEncoding::Identity,
            "quoted-printable" => TransferEncoding::QuotedPrintable,
            other => TransferEncoding::Other(other.to_string()),
        }
    }
}

/// Per-message attributes, delivered once per message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageAttributes {
    pub uid: u32,
    pub flags: Vec<String>,
    /// Declared body encoding, when the structure is single-part.
    pub encoding: Option<TransferEncoding>,
}

/// Events for one message, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    BodyChunk { part: PartSelector, data: Vec<u8> },
    BodyEnd { part: PartSelector },
    Attributes(MessageAttributes),
    /// No further events for this message.
    End,
}

/// Receiving side of one message's event stream.
pub type MessageStream = mpsc::UnboundedReceiver<MessageEvent>;

/// Events of a whole range fetch.
#[derive(Debug)]
pub enum FetchEvent {
    Message(MessageStream),
    Error(TransportError),
    /// No more messages will be delivered.
    End,
}

pub type FetchStream = mpsc::UnboundedReceiver<FetchEvent>;

/// A node in the mailbox hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailboxNode {
    pub delimiter: Option<char>,
    pub attributes: Vec<String>,
    pub children: MailboxTree,
}

/// Mailbox hierarchy keyed by name at each level.
pub type MailboxTree = BTreeMap<String, MailboxNode>;

/// An IMAP-like session.
///
/// `connect` and `end` only initiate; their outcome is reported as
/// [`SessionEvent`]s to every subscriber.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Start connecting. Emits `Ready` or `Error`.
    fn connect(&self);

    /// Start shutting down. Emits `Ended`.
    fn end(&self);

    async fn open_mailbox(
        &self,
        name: &str,
        read_only: bool,
    ) -> Result<MailboxStatus, TransportError>;

    /// Fetch a sequence range. Deliveries arrive on the returned stream.
    async fn fetch(
        &self,
        range: FetchRange,
        request: &FetchRequest,
    ) -> Result<FetchStream, TransportError>;

    /// Add `flags` to the messages with the given UIDs.
    async fn add_flags(&self, uids: &[u32], flags: &[&str]) -> Result<(), TransportError>;

    async fn list_mailboxes(&self) -> Result<MailboxTree, TransportError>;
}
