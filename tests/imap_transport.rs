//! The real IMAP transport against a minimal plain-TCP server.
//!
//! The server runs on a std thread, answers a fixed script and records
//! every command it receives.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use email_importer::config::ImapConfig;
use email_importer::error::{MailError, TransportError};
use email_importer::mail::ImapClient;
use email_importer::transport::ImapTransport;

type Commands = Arc<Mutex<Vec<String>>>;

const FETCH_KEY: &str = "BODY[HEADER.FIELDS (FROM TO SUBJECT DATE)]";

fn fetch_response(seq: u32, uid: u32, flags: &str, subject: &str, encoding: &str, body: &str) -> String {
    let header = format!(
        "From: Alice <alice@example.com>\r\nSubject: {subject}\r\nDate: Wed, 02 Jul 2025 08:30:00 +0200\r\n\r\n"
    );
    format!(
        "* {seq} FETCH (UID {uid} FLAGS ({flags}) BODYSTRUCTURE (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"utf-8\") NIL NIL \"{encoding}\" {} 1 NIL NIL NIL NIL) {FETCH_KEY} {{{}}}\r\n{header} BODY[TEXT] {{{}}}\r\n{body})\r\n",
        body.len(),
        header.len(),
        body.len(),
    )
}

/// Serve one client connection with a canned mailbox of three messages.
fn spawn_server(password: &'static str) -> (u16, Commands) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let commands: Commands = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&commands);

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        writer.write_all(b"* OK IMAP4rev1 test server ready\r\n").unwrap();

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            let command = line.trim_end().to_string();
            log.lock().unwrap().push(command.clone());
            let Some((tag, rest)) = command.split_once(' ') else {
                continue;
            };
            let verb = rest.split_whitespace().next().unwrap_or("").to_ascii_uppercase();

            let reply = match verb.as_str() {
                "LOGIN" if rest.contains(&format!("\"{password}\"")) => {
                    format!("{tag} OK LOGIN completed\r\n")
                }
                "LOGIN" => format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n"),
                "SELECT" | "EXAMINE" => format!(
                    "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n* 3 EXISTS\r\n* 0 RECENT\r\n{tag} OK [READ-WRITE] {verb} completed\r\n"
                ),
                "FETCH" => {
                    let mut out = String::from("* 1 FETCH (FLAGS (\\Seen))\r\n");
                    out.push_str(&fetch_response(
                        2,
                        12,
                        "",
                        "=?UTF-8?Q?Gr=C3=BC=C3=9Fe?=",
                        "QUOTED-PRINTABLE",
                        "F=C3=BCr alle=\r\n zusammen\r\n\r\n",
                    ));
                    out.push_str(&fetch_response(
                        3,
                        13,
                        "\\Seen",
                        "Status report",
                        "7BIT",
                        "Hello\r\nWorld\r\n",
                    ));
                    out.push_str(&format!("{tag} OK FETCH completed\r\n"));
                    out
                }
                "UID" => format!("{tag} OK STORE completed\r\n"),
                "LIST" => format!(
                    "* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n* LIST (\\HasChildren) \"/\" \"Sent\"\r\n* LIST (\\HasNoChildren) \"/\" \"Sent/2024\"\r\n{tag} OK LIST completed\r\n"
                ),
                "LOGOUT" => {
                    let _ = writer.write_all(format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n").as_bytes());
                    return;
                }
                _ => format!("{tag} BAD unknown command\r\n"),
            };
            if writer.write_all(reply.as_bytes()).is_err() {
                return;
            }
        }
    });

    (port, commands)
}

fn config(port: u16, password: &str) -> ImapConfig {
    let mut cfg = ImapConfig::new("me@example.com", password, "127.0.0.1");
    cfg.port = port;
    cfg.tls = false;
    cfg.timeout = Some(Duration::from_secs(5));
    cfg
}

#[tokio::test]
async fn fetch_mark_and_list_over_tcp() {
    let (port, commands) = spawn_server("secret");
    let cfg = config(port, "secret");
    let client = ImapClient::new(ImapTransport::new(&cfg), cfg);

    client.connect().await.unwrap();

    let mut emails = client.fetch(2, false).await.unwrap();
    emails.sort_by_key(|e| e.uid);
    assert_eq!(emails.len(), 2);

    assert_eq!(emails[0].uid, 12);
    assert_eq!(emails[0].subject, "Grüße");
    assert_eq!(emails[0].body, "Für alle zusammen");
    assert_eq!(emails[0].unread, Some(true));
    assert_eq!(emails[0].from.as_deref(), Some("alice@example.com"));
    assert_eq!(
        emails[0].date.map(|d| d.to_rfc3339()),
        Some("2025-07-02T06:30:00+00:00".to_string())
    );

    assert_eq!(emails[1].uid, 13);
    assert_eq!(emails[1].body, "Hello\nWorld");
    assert_eq!(emails[1].unread, Some(false));

    let unread = client.fetch(2, true).await.unwrap();
    assert_eq!(unread.iter().map(|e| e.uid).collect::<Vec<_>>(), vec![12]);

    client.mark_as_read(12u32).await.unwrap();

    let names = client.available_mailboxes().await.unwrap();
    assert_eq!(names, vec!["INBOX".to_string(), "Sent".to_string()]);

    let sent = commands.lock().unwrap().clone();
    assert_eq!(sent[0], "A1 LOGIN \"me@example.com\" \"secret\"");
    assert_eq!(sent[1], "A2 SELECT \"INBOX\"");
    assert!(sent[2].starts_with("A3 FETCH 2:3 (UID FLAGS BODYSTRUCTURE BODY.PEEK[HEADER.FIELDS"));
    assert!(sent[2].ends_with("BODY.PEEK[TEXT])"));
    assert!(sent.iter().any(|c| c.ends_with("UID STORE 12 +FLAGS.SILENT (\\Seen)")));
    assert!(sent.iter().any(|c| c.ends_with("LIST \"\" \"*\"")));

    client.terminate();
}

#[tokio::test]
async fn wrong_password_rejects_connect() {
    let (port, _) = spawn_server("secret");
    let cfg = config(port, "hunter2");
    let client = ImapClient::new(ImapTransport::new(&cfg), cfg);

    let err = client.connect().await.unwrap_err();

    match err {
        MailError::Connect(TransportError::AuthFailed { user, .. }) => {
            assert_eq!(user, "me@example.com");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn operations_before_connect_fail() {
    let cfg = config(1, "secret");
    let client = ImapClient::new(ImapTransport::new(&cfg), cfg);

    let err = client.available_mailboxes().await.unwrap_err();

    assert!(matches!(
        err,
        MailError::ListMailboxes(TransportError::NotConnected)
    ));
}
