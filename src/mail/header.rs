//! Minimal RFC 2822 header block parsing.
//!
//! Produces field name (lower-cased) → raw values, with folded lines joined.
//! Encoded words are left as-is; see [`crate::mail::decode`] for the typed
//! view of subject, date and addresses.

use std::collections::BTreeMap;

/// Header fields keyed by lower-cased name, values in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    fields: BTreeMap<String, Vec<String>>,
}

impl HeaderMap {
    /// All values of a field. Lookup is case-insensitive.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First value of a field.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Parse a raw header block. Never fails: lines that are not fields are
/// skipped, and parsing stops at the first empty line.
pub fn parse_header(raw: &str) -> HeaderMap {
    let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in raw.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            break;
        }

        if line.starts_with([' ', '\t']) {
            // Folded continuation of the previous field.
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = current.take() {
            fields.entry(name).or_default().push(value);
        }

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.contains(' ') {
            continue;
        }
        current = Some((name.to_ascii_lowercase(), value.trim().to_string()));
    }

    if let Some((name, value)) = current {
        fields.entry(name).or_default().push(value);
    }

    HeaderMap { fields }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_summary_fields() {
        let raw = "From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: Hello\r\nDate: Mon, 2 Feb 2026 10:00:00 +0000\r\n\r\n";
        let h = parse_header(raw);
        assert_eq!(h.first("subject"), Some("Hello"));
        assert_eq!(h.first("from"), Some("Alice <alice@example.com>"));
        assert_eq!(h.first("to"), Some("bob@example.com"));
        assert_eq!(h.first("date"), Some("Mon, 2 Feb 2026 10:00:00 +0000"));
        assert_eq!(h.len(), 4);
    }

    #[test]
    fn names_are_case_insensitive() {
        let h = parse_header("SUBJECT: Loud\r\n");
        assert_eq!(h.first("subject"), Some("Loud"));
        assert_eq!(h.first("Subject"), Some("Loud"));
    }

    #[test]
    fn folded_lines_are_joined() {
        let h = parse_header("Subject: A very\r\n long subject\r\n\tthat folds\r\nTo: x@y.z\r\n");
        assert_eq!(h.first("subject"), Some("A very long subject that folds"));
        assert_eq!(h.first("to"), Some("x@y.z"));
    }

    #[test]
    fn repeated_fields_keep_order() {
        let h = parse_header("To: a@x.com\nTo: b@x.com\n");
        assert_eq!(h.get_all("to"), ["a@x.com".to_string(), "b@x.com".to_string()]);
    }

    #[test]
    fn value_may_contain_colons() {
        let h = parse_header("Subject: Re: Meeting: 10:00\r\n");
        assert_eq!(h.first("subject"), Some("Re: Meeting: 10:00"));
    }

    #[test]
    fn garbage_yields_empty_map() {
        let h = parse_header("\u{0}\u{1}not a header line\r\n  \r\n");
        assert!(h.is_empty());
        assert_eq!(h.first("subject"), None);
        assert!(h.get_all("date").is_empty());
    }

    #[test]
    fn stops_at_blank_line() {
        let h = parse_header("Subject: Top\r\n\r\nSubject: Body\r\n");
        assert_eq!(h.get_all("subject").len(), 1);
    }
}
