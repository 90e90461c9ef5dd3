//! Just enough IMAP response parsing for SELECT, FETCH and LIST.
//!
//! Responses are handed in whole, with literals already inlined after their
//! `{n}\r\n` marker (see `connection::read_response`).

use std::borrow::Cow;

use crate::error::TransportError;
use crate::transport::{MailboxNode, MailboxTree, PartSelector, TransferEncoding};

/// A parsed IMAP data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Number(u64),
    Atom(String),
    /// Quoted string or literal.
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Atom(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b)),
            Value::Number(n) => Some(Cow::Owned(n.to_string())),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        match self {
            Value::Bytes(b) => b,
            Value::Atom(s) => s.into_bytes(),
            Value::Number(n) => n.to_string().into_bytes(),
            Value::Nil | Value::List(_) => Vec::new(),
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), None | Some(b'\r') | Some(b'\n'))
    }

    fn error(&self, what: &str) -> TransportError {
        TransportError::Protocol(format!("{what} at byte {}", self.pos))
    }

    fn value(&mut self) -> Result<Value, TransportError> {
        self.skip_spaces();
        match self.peek() {
            Some(b'(') => self.list(),
            Some(b'"') => self.quoted(),
            Some(b'{') => self.literal(),
            Some(_) => {
                let token = self.atom()?;
                if token.is_empty() {
                    Err(self.error("unexpected character"))
                } else if token.eq_ignore_ascii_case("NIL") {
                    Ok(Value::Nil)
                } else if token.bytes().all(|b| b.is_ascii_digit()) {
                    token
                        .parse()
                        .map(Value::Number)
                        .map_err(|_| self.error("number out of range"))
                } else {
                    Ok(Value::Atom(token))
                }
            }
            None => Err(self.error("unexpected end of response")),
        }
    }

    fn list(&mut self) -> Result<Value, TransportError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_spaces();
            match self.peek() {
                Some(b')') => {
                    self.pos += 1;
                    return Ok(Value::List(items));
                }
                None => return Err(self.error("unterminated list")),
                _ => items.push(self.value()?),
            }
        }
    }

    fn quoted(&mut self) -> Result<Value, TransportError> {
        self.pos += 1;
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'"' => return Ok(Value::Bytes(out)),
                b'\\' => {
                    if let Some(escaped) = self.peek() {
                        out.push(escaped);
                        self.pos += 1;
                    }
                }
                _ => out.push(b),
            }
        }
        Err(self.error("unterminated quoted string"))
    }

    fn literal(&mut self) -> Result<Value, TransportError> {
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        let len: usize = std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("bad literal length"))?;
        if self.peek() == Some(b'+') {
            self.pos += 1;
        }
        if !self.input[self.pos..].starts_with(b"}\r\n") {
            return Err(self.error("bad literal marker"));
        }
        self.pos += 3;
        let end = self.pos + len;
        if end > self.input.len() {
            return Err(self.error("truncated literal"));
        }
        let data = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(Value::Bytes(data))
    }

    /// Atom, including a `[section]` and `<partial>` suffix such as
    /// `BODY[HEADER.FIELDS (FROM TO)]<0>`.
    fn atom(&mut self) -> Result<String, TransportError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'(' | b')' | b'"' | b'{' | b'\r' | b'\n' => break,
                b'[' => {
                    let close = self.input[self.pos..]
                        .iter()
                        .position(|&c| c == b']')
                        .ok_or_else(|| self.error("unterminated section"))?;
                    self.pos += close + 1;
                    if self.peek() == Some(b'<') {
                        let close = self.input[self.pos..]
                            .iter()
                            .position(|&c| c == b'>')
                            .ok_or_else(|| self.error("unterminated partial"))?;
                        self.pos += close + 1;
                    }
                }
                _ => self.pos += 1,
            }
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }
}

/// Parse every value of a response line into a flat list.
pub fn parse_values(input: &[u8]) -> Result<Vec<Value>, TransportError> {
    let mut parser = Parser::new(input);
    let mut values = Vec::new();
    loop {
        parser.skip_spaces();
        if parser.at_end() {
            return Ok(values);
        }
        values.push(parser.value()?);
    }
}

/// Completion status of a tagged response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Ok(String),
    No(String),
    Bad(String),
}

/// If `line` is the tagged completion for `tag`, return its status.
pub fn parse_tagged(line: &[u8], tag: &str) -> Option<Completion> {
    let line = String::from_utf8_lossy(line);
    let rest = line.strip_prefix(tag)?.strip_prefix(' ')?;
    let (status, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let text = text.trim_end().to_string();
    match status.trim_end().to_ascii_uppercase().as_str() {
        "OK" => Some(Completion::Ok(text)),
        "NO" => Some(Completion::No(text)),
        _ => Some(Completion::Bad(text)),
    }
}

/// `* <n> EXISTS` → `n`.
pub fn parse_exists(line: &[u8]) -> Option<u32> {
    let line = std::str::from_utf8(line).ok()?;
    let mut words = line.split_whitespace();
    if words.next()? != "*" {
        return None;
    }
    let n = words.next()?.parse().ok()?;
    words
        .next()
        .filter(|w| w.eq_ignore_ascii_case("EXISTS"))
        .map(|_| n)
}

/// One message's worth of a FETCH response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    pub seq: u32,
    pub uid: Option<u32>,
    pub flags: Vec<String>,
    pub encoding: Option<TransferEncoding>,
    pub sections: Vec<(PartSelector, Vec<u8>)>,
}

/// Parse `* <seq> FETCH (...)`. Other responses yield `Ok(None)`.
pub fn parse_fetch(response: &[u8]) -> Result<Option<FetchedMessage>, TransportError> {
    if !response.starts_with(b"* ") {
        return Ok(None);
    }
    let values = parse_values(response)?;
    let [_, Value::Number(seq), Value::Atom(keyword), Value::List(items), ..] = values.as_slice()
    else {
        return Ok(None);
    };
    if !keyword.eq_ignore_ascii_case("FETCH") {
        return Ok(None);
    }

    let mut message = FetchedMessage {
        seq: u32::try_from(*seq).map_err(|_| TransportError::Protocol("sequence number out of range".into()))?,
        ..Default::default()
    };

    let mut iter = items.iter().cloned();
    while let Some(key) = iter.next() {
        let Some(key) = key.as_text().map(|k| k.to_ascii_uppercase()) else {
            return Err(TransportError::Protocol("FETCH item name is not an atom".into()));
        };
        let value = iter
            .next()
            .ok_or_else(|| TransportError::Protocol(format!("FETCH item {key} has no value")))?;

        match key.as_str() {
            "UID" => {
                message.uid = value.as_number().and_then(|n| u32::try_from(n).ok());
            }
            "FLAGS" => {
                message.flags = value
                    .as_list()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|f| f.as_text().map(Cow::into_owned))
                    .collect();
            }
            "BODYSTRUCTURE" => {
                message.encoding = declared_encoding(&value);
            }
            _ => {
                if let Some(section) = section_of(&key) {
                    message.sections.push((PartSelector::from_section(section), value.into_bytes()));
                }
            }
        }
    }

    Ok(Some(message))
}

/// `BODY[TEXT]<0>` → `TEXT`. Uses the upper-cased key.
fn section_of(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("BODY[")?;
    let end = rest.find(']')?;
    Some(&rest[..end])
}

/// Content-Transfer-Encoding of a single-part BODYSTRUCTURE. Multipart
/// structures start with a nested list and declare nothing for `TEXT`.
pub fn declared_encoding(structure: &Value) -> Option<TransferEncoding> {
    let items = structure.as_list()?;
    if matches!(items.first(), Some(Value::List(_))) {
        return None;
    }
    let encoding = items.get(5)?.as_text()?;
    Some(TransferEncoding::from_declared(&encoding))
}

/// One `* LIST` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub attributes: Vec<String>,
    pub delimiter: Option<char>,
    pub name: String,
}

/// Parse `* LIST (<attrs>) <delim> <name>`.
pub fn parse_list(response: &[u8]) -> Result<Option<ListEntry>, TransportError> {
    if !response.starts_with(b"* ") {
        return Ok(None);
    }
    let values = parse_values(response)?;
    let [_, Value::Atom(keyword), Value::List(attrs), delimiter, name, ..] = values.as_slice()
    else {
        return Ok(None);
    };
    if !keyword.eq_ignore_ascii_case("LIST") {
        return Ok(None);
    }
    let Some(name) = name.as_text() else {
        return Ok(None);
    };

    Ok(Some(ListEntry {
        attributes: attrs
            .iter()
            .filter_map(|a| a.as_text().map(Cow::into_owned))
            .collect(),
        delimiter: delimiter.as_text().and_then(|d| d.chars().next()),
        name: name.into_owned(),
    }))
}

/// Nest flat LIST entries into a tree by their hierarchy delimiter.
pub fn build_tree(entries: Vec<ListEntry>) -> MailboxTree {
    let mut tree = MailboxTree::new();
    for entry in entries {
        let path: Vec<&str> = match entry.delimiter {
            Some(d) => entry.name.split(d).filter(|p| !p.is_empty()).collect(),
            None => vec![entry.name.as_str()],
        };
        let Some((leaf, parents)) = path.split_last() else {
            continue;
        };

        let mut level = &mut tree;
        for parent in parents {
            let node = level.entry(parent.to_string()).or_insert_with(|| MailboxNode {
                delimiter: entry.delimiter,
                ..Default::default()
            });
            level = &mut node.children;
        }
        let node = level.entry(leaf.to_string()).or_default();
        node.delimiter = entry.delimiter;
        node.attributes = entry.attributes.clone();
    }
    tree
}

/// IMAP quoted string.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FETCH: &[u8] = b"* 12 FETCH (UID 812 FLAGS (\\Seen \\Flagged) BODYSTRUCTURE (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"utf-8\") NIL NIL \"QUOTED-PRINTABLE\" 18 1 NIL NIL NIL NIL) BODY[HEADER.FIELDS (FROM TO SUBJECT DATE)] {15}\r\nSubject: Hi\r\n\r\n BODY[TEXT] {8}\r\nF=C3=BCr)\r\n";

    #[test]
    fn fetch_response_items() {
        let msg = parse_fetch(FETCH).unwrap().unwrap();
        assert_eq!(msg.seq, 12);
        assert_eq!(msg.uid, Some(812));
        assert_eq!(msg.flags, vec!["\\Seen", "\\Flagged"]);
        assert_eq!(msg.encoding, Some(TransferEncoding::QuotedPrintable));
        assert_eq!(msg.sections.len(), 2);
        assert_eq!(msg.sections[0].0, PartSelector::summary_headers());
        assert_eq!(msg.sections[0].1, b"Subject: Hi\r\n\r\n".to_vec());
        assert_eq!(msg.sections[1], (PartSelector::Text, b"F=C3=BCr".to_vec()));
    }

    #[test]
    fn multipart_structure_declares_nothing() {
        let values = parse_values(
            b"((\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 3 1) (\"TEXT\" \"HTML\" NIL NIL NIL \"BASE64\" 8 1) \"ALTERNATIVE\")",
        )
        .unwrap();
        assert_eq!(declared_encoding(&values[0]), None);
    }

    #[test]
    fn fetch_with_nil_body_and_partial_origin() {
        let msg = parse_fetch(b"* 3 FETCH (FLAGS () UID 9 BODY[TEXT]<0> NIL)\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(msg.uid, Some(9));
        assert!(msg.flags.is_empty());
        assert_eq!(msg.sections, vec![(PartSelector::Text, Vec::new())]);
    }

    #[test]
    fn quoted_body_value() {
        let msg = parse_fetch(b"* 1 FETCH (UID 1 BODY[TEXT] \"say \\\"hi\\\"\")\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(msg.sections[0].1, b"say \"hi\"".to_vec());
    }

    #[test]
    fn non_fetch_responses_are_skipped() {
        assert_eq!(parse_fetch(b"* 4 EXISTS\r\n").unwrap(), None);
        assert_eq!(parse_fetch(b"A3 OK FETCH completed\r\n").unwrap(), None);
    }

    #[test]
    fn truncated_literal_is_an_error() {
        assert!(parse_fetch(b"* 1 FETCH (BODY[TEXT] {50}\r\nshort)\r\n").is_err());
    }

    #[test]
    fn unterminated_list_is_an_error() {
        assert!(parse_values(b"(A B\r\n").is_err());
    }

    #[test]
    fn exists_count() {
        assert_eq!(parse_exists(b"* 172 EXISTS\r\n"), Some(172));
        assert_eq!(parse_exists(b"* 0 exists\r\n"), Some(0));
        assert_eq!(parse_exists(b"* 3 RECENT\r\n"), None);
        assert_eq!(parse_exists(b"* OK [UIDVALIDITY 3857529045]\r\n"), None);
    }

    #[test]
    fn tagged_completion() {
        assert_eq!(
            parse_tagged(b"A2 OK [READ-WRITE] SELECT completed\r\n", "A2"),
            Some(Completion::Ok("[READ-WRITE] SELECT completed".into()))
        );
        assert_eq!(
            parse_tagged(b"A2 NO Mailbox doesn't exist\r\n", "A2"),
            Some(Completion::No("Mailbox doesn't exist".into()))
        );
        assert!(matches!(parse_tagged(b"A2 BAD parse\r\n", "A2"), Some(Completion::Bad(_))));
        assert_eq!(parse_tagged(b"A20 OK done\r\n", "A2"), None);
        assert_eq!(parse_tagged(b"* OK still going\r\n", "A2"), None);
    }

    #[test]
    fn list_entries_build_tree() {
        let lines: [&[u8]; 4] = [
            b"* LIST (\\HasChildren) \"/\" \"INBOX\"\r\n",
            b"* LIST (\\HasNoChildren) \"/\" \"INBOX/Receipts\"\r\n",
            b"* LIST (\\HasNoChildren \\Sent) \"/\" Sent\r\n",
            b"* LIST (\\Noselect) NIL {7}\r\nArchive\r\n",
        ];
        let entries: Vec<ListEntry> = lines
            .iter()
            .filter_map(|l| parse_list(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[3].delimiter, None);
        assert_eq!(entries[3].name, "Archive");

        let tree = build_tree(entries);
        let names: Vec<&str> = tree.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Archive", "INBOX", "Sent"]);
        assert!(tree["INBOX"].children.contains_key("Receipts"));
        assert_eq!(tree["Sent"].attributes, vec!["\\HasNoChildren", "\\Sent"]);
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }
}
