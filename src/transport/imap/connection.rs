//! Blocking IMAP connection over plain TCP or implicit TLS (rustls).
//!
//! Run everything here inside `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::TransportError;
use crate::transport::MailboxStatus;
use crate::transport::imap::parse::{Completion, parse_exists, parse_tagged, quote};

/// Socket I/O, TLS or not.
enum ImapStream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for ImapStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ImapStream::Plain(s) => s.read(buf),
            ImapStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for ImapStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ImapStream::Plain(s) => s.write(buf),
            ImapStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ImapStream::Plain(s) => s.flush(),
            ImapStream::Tls(s) => s.flush(),
        }
    }
}

/// An authenticated-or-not IMAP session.
pub struct ImapConnection {
    reader: BufReader<ImapStream>,
    tag_counter: u32,
}

impl ImapConnection {
    /// Connect and read the server greeting.
    pub fn open(host: &str, port: u16, tls: bool, io_timeout: Duration) -> Result<Self, TransportError> {
        let connect_err = |reason: String| TransportError::Connect {
            host: host.to_string(),
            port,
            reason,
        };

        let tcp = TcpStream::connect((host, port)).map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(io_timeout))?;
        tcp.set_write_timeout(Some(io_timeout))?;

        let stream = if tls {
            ImapStream::Tls(Box::new(tls_stream(host, tcp)?))
        } else {
            ImapStream::Plain(tcp)
        };

        let mut conn = Self {
            reader: BufReader::new(stream),
            tag_counter: 0,
        };

        let greeting = conn.read_response()?;
        let text = String::from_utf8_lossy(&greeting);
        if text.starts_with("* BYE") {
            return Err(connect_err(format!("server refused: {}", text.trim_end())));
        }
        if !(text.starts_with("* OK") || text.starts_with("* PREAUTH")) {
            return Err(TransportError::Protocol(format!(
                "unexpected greeting: {}",
                text.trim_end()
            )));
        }
        debug!(host, port, tls, "IMAP greeting received");
        Ok(conn)
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), TransportError> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(password));
        self.run("LOGIN", &cmd, |_| {}).map_err(|e| match e {
            TransportError::Rejected { reason, .. } => TransportError::AuthFailed {
                user: user.to_string(),
                reason,
            },
            other => other,
        })
    }

    /// SELECT (read-write) or EXAMINE (read-only) a mailbox.
    pub fn select(&mut self, mailbox: &str, read_only: bool) -> Result<MailboxStatus, TransportError> {
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        let mut total = 0;
        self.run(verb, &format!("{verb} {}", quote(mailbox)), |response| {
            if let Some(n) = parse_exists(response) {
                total = n;
            }
        })?;
        Ok(MailboxStatus {
            name: mailbox.to_string(),
            total,
        })
    }

    /// Run a command, passing every untagged response to `on_untagged`.
    ///
    /// A `NO`/`BAD` completion becomes [`TransportError::Rejected`].
    pub fn run(
        &mut self,
        verb: &str,
        command: &str,
        mut on_untagged: impl FnMut(&[u8]),
    ) -> Result<(), TransportError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);

        debug!(tag = %tag, command = verb, "IMAP command");
        let line = format!("{tag} {command}\r\n");
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.flush()?;

        loop {
            let response = self.read_response()?;
            match parse_tagged(&response, &tag) {
                Some(Completion::Ok(_)) => return Ok(()),
                Some(Completion::No(reason)) | Some(Completion::Bad(reason)) => {
                    return Err(TransportError::Rejected {
                        command: verb.to_string(),
                        reason,
                    });
                }
                None => {
                    if response.starts_with(b"* BYE") {
                        trace!("Server said BYE");
                    }
                    on_untagged(&response);
                }
            }
        }
    }

    /// Send LOGOUT. The server closes the connection afterwards.
    pub fn logout(&mut self) -> Result<(), TransportError> {
        self.run("LOGOUT", "LOGOUT", |_| {})
    }

    /// Read one response: a line plus any literals it announces, inlined.
    fn read_response(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = Vec::new();
        loop {
            let read = self.reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                return Err(TransportError::Closed);
            }
            let Some(len) = literal_length(&buf) else {
                trace!(bytes = buf.len(), "IMAP response");
                return Ok(buf);
            };
            let start = buf.len();
            buf.resize(start + len, 0);
            self.reader.read_exact(&mut buf[start..])?;
        }
    }
}

/// Length announced by a trailing `{n}\r\n` (or `{n+}\r\n`), if any.
fn literal_length(line: &[u8]) -> Option<usize> {
    let body = line.strip_suffix(b"}\r\n")?;
    let open = body.iter().rposition(|&b| b == b'{')?;
    let digits = &body[open + 1..];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn tls_stream(
    host: &str,
    tcp: TcpStream,
) -> Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>, TransportError> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::Tls(format!("invalid server name {host}: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}
