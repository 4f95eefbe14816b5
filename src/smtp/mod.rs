//! SMTP protocol implementation

pub mod commands;
pub mod response;
pub mod server;
pub mod session;

pub use commands::SmtpCommand;
pub use server::SmtpServer;
pub use session::SmtpSession;
