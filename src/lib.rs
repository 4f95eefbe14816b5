//! nullmail: receive-only SMTP server for disposable mailboxes
//!
//! The ingestion edge of a throwaway-inbox service: it terminates
//! ESMTP submission sessions, parses each accepted message into a
//! structured record, and hands the result to a Redis-backed index
//! keyed by message id and recipient address.
//!
//! # Features
//!
//! - **ESMTP**: pipelined command handling with SIZE, SMTPUTF8,
//!   8BITMIME, AUTH, and STARTTLS (RFC 5321 / RFC 3207)
//! - **Parsing**: RFC 5322 headers, MIME multipart bodies, base64 and
//!   quoted-printable transfer encodings, RFC 2047 subjects
//! - **Validation**: syntax and policy checks on every envelope address
//! - **Best-effort delivery**: store outages never bounce mail
//!
//! # Example
//!
//! ```no_run
//! use nullmail::config::Config;
//! use nullmail::smtp::SmtpServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let server = SmtpServer::new(config).await;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`smtp`]: session state machine, listener, wire replies
//! - [`mime`]: message parsing into [`mime::types::Email`]
//! - [`utils`]: address parsing and validation
//! - [`security`]: STARTTLS certificate handling
//! - [`store`]: the Redis index adapter
//! - [`config`], [`error`], [`health`]: service plumbing

pub mod config;
pub mod error;
pub mod health;
pub mod mime;
pub mod security;
pub mod smtp;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{NullmailError, Result};
pub use mime::types::Email;
pub use smtp::SmtpServer;
