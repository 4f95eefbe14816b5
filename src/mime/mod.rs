//! Message parsing: headers, bodies, attachments

pub mod encoding;
pub mod parser;
pub mod types;

pub use parser::EmailParser;
pub use types::{Attachment, Email, EmailBody, ParseOutcome};
