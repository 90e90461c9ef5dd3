use clap::{Parser, Subcommand};

use email_importer::config::ImapConfig;
use email_importer::error::Result;
use email_importer::mail::{EmailRecord, ImapClient};
use email_importer::transport::ImapTransport;

#[derive(Parser, Debug)]
#[command(name = "email-importer", version, about = "Fetch recent emails from an IMAP mailbox")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Mailbox to use instead of IMAP_MAILBOX
    #[arg(long, short, global = true, value_name = "NAME")]
    mailbox: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and print the most recent messages
    Fetch {
        /// How many of the most recent messages to fetch
        #[arg(long, short)]
        limit: Option<u32>,

        /// Only keep unread messages
        #[arg(long, short)]
        unread: bool,

        /// Only keep subjects starting with this prefix
        #[arg(long, short)]
        prefix: Option<String>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,

        /// Mark the printed messages as read afterwards
        #[arg(long)]
        mark_read: bool,
    },
    /// List top-level mailboxes
    Mailboxes,
    /// Mark messages as read by UID
    MarkRead {
        #[arg(required = true)]
        uids: Vec<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ImapConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  Missing required IMAP configuration. Check your environment variables or config file.");
        std::process::exit(1);
    });
    if let Some(mailbox) = cli.mailbox {
        config.mailbox = mailbox;
    }
    if let Command::Fetch {
        prefix: Some(prefix),
        ..
    } = &cli.command
    {
        config.match_prefix = prefix.clone();
    }

    let transport = ImapTransport::new(&config);
    let client = ImapClient::new(transport, config);
    client.connect().await?;

    let result = run(&client, cli.command).await;
    client.terminate();
    result
}

async fn run(
    client: &ImapClient<ImapTransport>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Fetch {
            limit,
            unread,
            json,
            mark_read,
            ..
        } => {
            let limit = limit.unwrap_or(client.config().fetch_limit).max(1);
            let only_unread = unread || client.config().only_unread;
            let mut emails = client.fetch(limit, only_unread).await?;
            emails.sort_by_key(|e| e.uid);

            if json {
                println!("{}", serde_json::to_string_pretty(&emails)?);
            } else {
                for email in &emails {
                    print_email(email);
                }
                eprintln!("{} message(s)", emails.len());
            }

            if mark_read {
                client.mark_as_read(markable_uids(&emails)).await?;
            }
        }
        Command::Mailboxes => {
            let names = client.available_mailboxes().await?;
            println!("Available mailboxes: {}", names.join(", "));
        }
        Command::MarkRead { uids } => {
            client.mark_as_read(uids).await?;
        }
    }
    Ok(())
}

fn print_email(email: &EmailRecord) {
    let date = email
        .date
        .map(|d| d.to_rfc2822())
        .unwrap_or_else(|| "(no date)".to_string());
    let marker = if email.is_unread() { "*" } else { " " };
    println!("{marker} [{}] {}  {}", email.uid, date, email.subject);
    if let Some(from) = &email.from {
        println!("    From: {from}");
    }
    for line in email.body.lines() {
        println!("    {line}");
    }
    println!();
}

/// UIDs worth flagging. `0` means the server never sent attributes.
fn markable_uids(emails: &[EmailRecord]) -> Vec<u32> {
    emails.iter().map(|e| e.uid).filter(|&uid| uid != 0).collect()
}
