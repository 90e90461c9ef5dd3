//! Per-message decoding: body-part demultiplexing, header summary,
//! transfer decoding and line-ending cleanup.
//!
//! A [`MessageDecoder`] consumes one message's [`MessageEvent`]s in whatever
//! order they arrive and seals into an [`EmailRecord`] on the terminal event.
//! Text decoding is deferred until sealing so the declared transfer encoding
//! from the attributes can be taken into account, whichever came first.
//!
//! When no encoding is declared (multipart bodies, servers without
//! `BODYSTRUCTURE`) the body is sniffed for `=C3=`, the quoted-printable form
//! of a UTF-8 lead byte. That heuristic decodes plain bodies which merely
//! contain the marker, and leaves quoted-printable bodies without it alone.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use mail_parser::MessageParser;
use tracing::{debug, trace, warn};

use crate::mail::header::parse_header;
use crate::mail::{EmailRecord, extract_addresses};
use crate::transport::{
    MessageAttributes, MessageEvent, MessageStream, PartSelector, SEEN_FLAG, TransferEncoding,
};

/// Marker that triggers the quoted-printable heuristic.
const QP_UTF8_MARKER: &str = "=C3=";

/// Decoder progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    AwaitingParts,
    Complete,
}

/// Typed view of the summary header part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSummary {
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub from: Option<String>,
    pub to: Vec<String>,
}

/// Accumulates one message's events into a record.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    parts: HashMap<PartSelector, Vec<u8>>,
    header: Option<HeaderSummary>,
    text: Option<Vec<u8>>,
    attributes: Option<MessageAttributes>,
    complete: bool,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecodeState {
        if self.complete {
            DecodeState::Complete
        } else {
            DecodeState::AwaitingParts
        }
    }

    /// Feed one event. Events after completion are ignored.
    pub fn apply(&mut self, event: MessageEvent) -> DecodeState {
        if self.complete {
            trace!("Ignoring event after message end");
            return DecodeState::Complete;
        }

        match event {
            MessageEvent::BodyChunk { part, data } => {
                self.parts.entry(part).or_default().extend_from_slice(&data);
            }
            MessageEvent::BodyEnd { part } => {
                let bytes = self.parts.remove(&part).unwrap_or_default();
                match part {
                    PartSelector::HeaderFields(_) => {
                        self.header = Some(summarize_header(&bytes));
                    }
                    PartSelector::Text => {
                        self.text = Some(bytes);
                    }
                    PartSelector::Other(section) => {
                        debug!(section = %section, "Ignoring unrequested body part");
                    }
                }
            }
            MessageEvent::Attributes(attrs) => {
                if self.attributes.is_none() {
                    self.attributes = Some(attrs);
                } else {
                    debug!(uid = attrs.uid, "Ignoring repeated attributes");
                }
            }
            MessageEvent::End => {
                self.complete = true;
            }
        }

        self.state()
    }

    /// Seal the record from whatever was observed.
    pub fn finish(self) -> EmailRecord {
        let header = self.header.unwrap_or_default();

        let (uid, unread, declared) = match self.attributes {
            Some(attrs) => (attrs.uid, Some(is_unread(&attrs.flags)), attrs.encoding),
            None => {
                warn!("Message ended without attributes");
                (0, None, None)
            }
        };

        let body = self
            .text
            .map(|raw| decode_body(&raw, declared.as_ref()))
            .unwrap_or_default();

        EmailRecord {
            uid,
            subject: header.subject,
            date: header.date,
            body,
            unread,
            from: header.from,
            to: header.to,
        }
    }
}

/// Drive a decoder over one message's event stream.
///
/// A stream that closes without `End` is sealed as-is.
pub async fn decode_message(mut stream: MessageStream) -> EmailRecord {
    let mut decoder = MessageDecoder::new();
    while let Some(event) = stream.recv().await {
        if decoder.apply(event) == DecodeState::Complete {
            break;
        }
    }
    decoder.finish()
}

/// `true` unless `\Seen` is among the flags.
pub fn is_unread(flags: &[String]) -> bool {
    !flags.iter().any(|f| f.eq_ignore_ascii_case(SEEN_FLAG))
}

/// Parse the summary header part. Never fails.
pub fn summarize_header(raw: &[u8]) -> HeaderSummary {
    let text = String::from_utf8_lossy(raw);
    let fields = parse_header(&text);
    let parsed = MessageParser::default().parse(raw);

    let subject = parsed
        .as_ref()
        .and_then(|m| m.subject())
        .map(str::to_string)
        .or_else(|| fields.first("subject").map(str::to_string))
        .unwrap_or_default();

    let date = fields.first("date").and_then(parse_date).or_else(|| {
        parsed
            .as_ref()
            .and_then(|m| m.date())
            .and_then(convert_date)
    });

    let from = parsed
        .as_ref()
        .and_then(|m| extract_addresses(m.from()).into_iter().next())
        .or_else(|| fields.first("from").map(str::to_string));

    let to = parsed
        .as_ref()
        .map(|m| extract_addresses(m.to()))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fields.get_all("to").to_vec());

    HeaderSummary {
        subject,
        date,
        from,
        to,
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Lenient fallback for dates chrono rejects.
fn convert_date(d: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    let naive = NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))?
        .and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))?;
    let offset_secs = (i32::from(d.tz_hour) * 3600 + i32::from(d.tz_minute) * 60)
        * if d.tz_before_gmt { -1 } else { 1 };
    let offset = FixedOffset::east_opt(offset_secs)?;
    naive
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Pick the transfer encoding: declared first, heuristic otherwise.
pub fn resolve_encoding(declared: Option<&TransferEncoding>, text: &str) -> TransferEncoding {
    match declared {
        Some(encoding) => encoding.clone(),
        None => sniff_encoding(text),
    }
}

/// Heuristic for bodies without a declared encoding.
pub fn sniff_encoding(text: &str) -> TransferEncoding {
    if text.contains(QP_UTF8_MARKER) {
        TransferEncoding::QuotedPrintable
    } else {
        TransferEncoding::Identity
    }
}

/// Decode a text part and clean up its line endings.
pub fn decode_body(raw: &[u8], declared: Option<&TransferEncoding>) -> String {
    let text = String::from_utf8_lossy(raw);
    let decoded = match resolve_encoding(declared, &text) {
        TransferEncoding::QuotedPrintable => decode_quoted_printable(raw),
        TransferEncoding::Identity => text.into_owned(),
        TransferEncoding::Other(name) => {
            debug!(encoding = %name, "Leaving body in its transfer encoding");
            text.into_owned()
        }
    };
    normalize_body(&decoded)
}

/// Quoted-printable decode in robust mode: malformed escapes pass through,
/// soft line breaks vanish. The bytes are then read as UTF-8.
pub fn decode_quoted_printable(input: &[u8]) -> String {
    let bytes = quoted_printable::decode(input, quoted_printable::ParseMode::Robust)
        .unwrap_or_else(|e| {
            debug!("Quoted-printable decode failed, keeping raw body: {e}");
            input.to_vec()
        });
    String::from_utf8_lossy(&bytes).into_owned()
}

/// `\r\n` → `\n`, then drop trailing newlines.
pub fn normalize_body(text: &str) -> String {
    text.replace("\r\n", "\n").trim_end_matches('\n').to_string()
}
