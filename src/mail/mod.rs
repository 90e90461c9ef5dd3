//! Mail fetch pipeline: decoded records, range planning, decoding,
//! filtering and the client that ties them together.

pub mod client;
pub mod decode;
pub mod filter;
pub mod header;
pub mod observer;
pub mod range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::{ImapClient, UidSet};
pub use filter::{EmailFilter, FilterChain, PrefixFilter, UnreadFilter};
pub use observer::{LoggingObserver, SessionObserver};
pub use range::{FetchRange, plan};

/// One fetched and decoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Mailbox UID. Zero if the server never sent attributes.
    pub uid: u32,
    /// Decoded subject, empty when absent.
    pub subject: String,
    /// `Date` header, `None` when absent or unparseable.
    pub date: Option<DateTime<Utc>>,
    /// Plain-text body with `\n` line endings and no trailing newlines.
    pub body: String,
    /// `Some(true)` unless the message carries `\Seen`; `None` if unknown.
    pub unread: Option<bool>,
    /// First sender address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Recipient addresses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
}

impl EmailRecord {
    /// True only when the message is known to be unread.
    pub fn is_unread(&self) -> bool {
        self.unread == Some(true)
    }
}

/// Bare addresses of a parsed `From`/`To` field, display names dropped.
///
/// Group members are flattened in order; entries without an address are
/// skipped.
pub fn extract_addresses(field: Option<&mail_parser::Address>) -> Vec<String> {
    let members: Vec<&mail_parser::Addr> = match field {
        Some(mail_parser::Address::List(list)) => list.iter().collect(),
        Some(mail_parser::Address::Group(groups)) => {
            groups.iter().flat_map(|g| g.addresses.iter()).collect()
        }
        None => return Vec::new(),
    };
    members
        .into_iter()
        .filter_map(|member| member.address.as_deref())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(unread: Option<bool>) -> EmailRecord {
        EmailRecord {
            uid: 7,
            subject: "Hello".into(),
            date: None,
            body: "Body".into(),
            unread,
            from: None,
            to: vec![],
        }
    }

    #[test]
    fn unknown_unread_state_is_not_unread() {
        assert!(record(Some(true)).is_unread());
        assert!(!record(Some(false)).is_unread());
        assert!(!record(None).is_unread());
    }

    #[test]
    fn empty_addresses_omitted_from_json() {
        let json = serde_json::to_string(&record(Some(true))).unwrap();
        assert!(!json.contains("\"from\""));
        assert!(!json.contains("\"to\""));
        assert!(json.contains("\"unread\":true"));
    }

    #[test]
    fn record_deserializes_without_addresses() {
        let json = r#"{
            "uid": 3,
            "subject": "Invoice #1",
            "date": "2026-02-15T10:00:00Z",
            "body": "Total: 10",
            "unread": false
        }"#;
        let rec: EmailRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.uid, 3);
        assert!(rec.to.is_empty());
        assert!(rec.from.is_none());
        assert!(rec.date.is_some());
    }

    #[test]
    fn extract_addresses_none() {
        assert!(extract_addresses(None).is_empty());
    }

    #[test]
    fn extract_addresses_from_list_and_group() {
        let raw = b"From: Alice <alice@example.com>\r\nTo: Team: bob@example.com, Carol <carol@example.com>;\r\n\r\n";
        let msg = mail_parser::MessageParser::default().parse(&raw[..]).unwrap();
        assert_eq!(extract_addresses(msg.from()), vec!["alice@example.com"]);
        assert_eq!(
            extract_addresses(msg.to()),
            vec!["bob@example.com", "carol@example.com"]
        );
    }
}
