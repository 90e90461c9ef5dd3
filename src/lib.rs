//! Email importer: fetch recent IMAP messages as structured records.

pub mod config;
pub mod error;
pub mod mail;
pub mod transport;
