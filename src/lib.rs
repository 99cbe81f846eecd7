//! A minimal SMTP receiver.
//!
//! Every accepted connection gets a banner, a permissive command loop and a
//! spool file holding the raw transcript. Transcripts over 50 bytes are moved
//! into the output directory as `<to>--<from>--<reversed ip>--<unix time>.txt`.
//! Peers listed by a DNS blocklist can be dropped before the banner.

pub mod address;
pub mod blocklist;
pub mod command;
pub mod config;
pub mod notifier;
pub mod reader;
pub mod server;
pub mod session;
pub mod store;
pub mod utils;

pub use blocklist::{DnsResolver, Resolve, SpamBlocklist};
pub use config::Config;
pub use notifier::{CommandNotifier, Notifier};
pub use server::MailServer;
