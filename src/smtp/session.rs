//! Per-connection SMTP session
//!
//! Each accepted socket gets one `SmtpSession` driving the command loop:
//! greeting, command dispatch, the DATA read phase, and the in-place
//! STARTTLS upgrade. The default profile is deliberately lenient about
//! command ordering; `strict_sequencing` opts into RFC 5321 rejections.

use crate::config::Config;
use crate::error::{NullmailError, Result};
use crate::mime::parser::EmailParser;
use crate::security::tls::TlsConfig;
use crate::smtp::commands::{self, MailParamError, SmtpCommand};
use crate::smtp::response::*;
use crate::store::redis::{email_record, RedisStore};
use crate::utils::validation::EmailValidator;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tracing::{debug, error, info, warn};

/// Unified stream type so the same command loop runs before and after a
/// STARTTLS upgrade.
enum SmtpStream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
    /// Transient state while the TLS handshake owns the socket.
    Upgrading,
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::Upgrading => panic!("I/O on SmtpStream during STARTTLS upgrade"),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::Upgrading => panic!("I/O on SmtpStream during STARTTLS upgrade"),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::Upgrading => panic!("I/O on SmtpStream during STARTTLS upgrade"),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::Upgrading => panic!("I/O on SmtpStream during STARTTLS upgrade"),
        }
    }
}

enum SessionResult {
    /// Re-enter the command loop (after a STARTTLS upgrade).
    Continue,
    Quit,
}

/// Outcome of the DATA read phase.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DataOutcome {
    /// Dot-unstuffed message bytes, terminator consumed.
    Message(Vec<u8>),
    TooLarge,
    InvalidUtf8,
    /// EOF or read error before the terminator.
    Interrupted,
}

pub struct SmtpSession {
    is_tls: bool,
    is_utf8: bool,
    declared_size: Option<i64>,
    reverse_path: Option<String>,
    forward_paths: Vec<String>,
    greeted: bool,
    peer: String,
    config: Arc<Config>,
    validator: Arc<EmailValidator>,
    parser: Arc<EmailParser>,
    tls: Option<TlsConfig>,
    store: Option<RedisStore>,
}

impl SmtpSession {
    pub fn new(
        config: Arc<Config>,
        validator: Arc<EmailValidator>,
        parser: Arc<EmailParser>,
        tls: Option<TlsConfig>,
        store: Option<RedisStore>,
        peer: String,
    ) -> Self {
        Self {
            is_tls: false,
            is_utf8: false,
            declared_size: None,
            reverse_path: None,
            forward_paths: Vec::new(),
            greeted: false,
            peer,
            config,
            validator,
            parser,
            tls,
            store,
        }
    }

    /// Drive the session until the client quits or the stream ends.
    pub async fn handle(mut self, stream: TcpStream) -> Result<()> {
        let mut stream = SmtpStream::Plain(stream);

        loop {
            match self.serve(&mut stream).await? {
                SessionResult::Continue => continue,
                SessionResult::Quit => break,
            }
        }

        info!("SMTP connection closed: {}", self.peer);
        Ok(())
    }

    async fn serve(&mut self, stream: &mut SmtpStream) -> Result<SessionResult> {
        let mut reader = BufReader::new(&mut *stream);

        if !self.is_tls {
            info!("New SMTP connection: {}", self.peer);
            send(&mut reader, &service_ready(&self.config.server.hostname)).await?;
        }

        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    debug!("Client disconnected: {}", self.peer);
                    return Ok(SessionResult::Quit);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Error reading from client {}: {}", self.peer, e);
                    return Ok(SessionResult::Quit);
                }
            }

            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim().to_string();
            debug!("Received SMTP command from {}: {}", self.peer, trimmed);

            match SmtpCommand::parse(&trimmed) {
                SmtpCommand::StartTls => {
                    // The buffered reader must release the stream before
                    // the handshake can take it over.
                    drop(reader);
                    if self.upgrade_to_tls(stream).await? {
                        return Ok(SessionResult::Continue);
                    }
                    reader = BufReader::new(&mut *stream);
                }
                SmtpCommand::Helo(arg) => {
                    if arg.is_none() {
                        send(&mut reader, &reply(CODE_SYNTAX_ERROR, MSG_SYNTAX_ERROR)).await?;
                    } else {
                        self.greeted = true;
                        send(&mut reader, &reply(CODE_OK, &self.config.server.hostname)).await?;
                    }
                }
                SmtpCommand::Ehlo(arg) => {
                    if arg.is_none() {
                        send(&mut reader, &reply(CODE_SYNTAX_ERROR, MSG_SYNTAX_ERROR)).await?;
                    } else {
                        self.greeted = true;
                        let capabilities = ehlo_capabilities(
                            &self.config.server.hostname,
                            self.config.smtp.max_message_size,
                        );
                        send(&mut reader, &capabilities).await?;
                    }
                }
                SmtpCommand::Mail(cmd) => self.handle_mail(&cmd, &line, &mut reader).await?,
                SmtpCommand::Rcpt(cmd) => self.handle_rcpt(&cmd, &mut reader).await?,
                SmtpCommand::Data => self.handle_data(&mut reader).await?,
                SmtpCommand::Rset => {
                    self.reset_transaction();
                    send(&mut reader, &reply(CODE_OK, MSG_OK)).await?;
                }
                SmtpCommand::Noop => {
                    send(&mut reader, &reply(CODE_OK, MSG_OK)).await?;
                }
                SmtpCommand::Quit => {
                    send(&mut reader, &reply(CODE_SERVICE_CLOSING, MSG_SERVICE_CLOSING)).await?;
                    return Ok(SessionResult::Quit);
                }
                SmtpCommand::Auth => {
                    // Accept-all stub: this service holds no accounts.
                    send(&mut reader, &reply(CODE_AUTH_SUCCESSFUL, MSG_AUTH_SUCCESSFUL)).await?;
                }
                SmtpCommand::Vrfy(arg) => self.handle_vrfy(arg, &mut reader).await?,
                SmtpCommand::Expn => {
                    send(&mut reader, &reply(CODE_USER_NOT_LOCAL, MSG_USER_NOT_LOCAL)).await?;
                }
                SmtpCommand::Help => {
                    send(&mut reader, &reply(CODE_OK, MSG_HELP)).await?;
                }
                SmtpCommand::Empty => {
                    send(
                        &mut reader,
                        &reply(CODE_COMMAND_NOT_RECOGNIZED, MSG_COMMAND_NOT_RECOGNIZED),
                    )
                    .await?;
                }
                SmtpCommand::Unknown(verb) => {
                    debug!("Unknown command from {}: {}", self.peer, verb);
                    send(
                        &mut reader,
                        &reply(CODE_COMMAND_NOT_IMPLEMENTED, MSG_COMMAND_NOT_IMPLEMENTED),
                    )
                    .await?;
                }
            }
        }
    }

    async fn handle_mail<S>(&mut self, cmd: &str, raw: &[u8], stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        if self.config.smtp.strict_sequencing && (!self.greeted || self.reverse_path.is_some()) {
            return send(stream, &reply(CODE_BAD_SEQUENCE, MSG_BAD_SEQUENCE)).await;
        }

        if !cmd.to_uppercase().contains("FROM:") {
            return send(stream, &reply(CODE_SYNTAX_ERROR, MSG_SYNTAX_ERROR)).await;
        }

        let Some(address) = commands::extract_address(cmd, "FROM:") else {
            return send(stream, &reply(CODE_SYNTAX_ERROR, "Invalid MAIL FROM syntax")).await;
        };

        let result = self.validator.validate(&address);
        if !result.valid {
            warn!("Invalid FROM address {}: {}", address, result.errors[0]);
            let message = format!("Invalid FROM address: {}", result.errors[0].message);
            return send(stream, &reply(CODE_SYNTAX_ERROR, &message)).await;
        }

        match commands::parse_mail_params(cmd, self.config.smtp.max_message_size) {
            Ok(params) => {
                if params.size.is_some() {
                    self.declared_size = params.size;
                }
                if params.smtputf8 {
                    self.is_utf8 = true;
                }
            }
            Err(MailParamError::InvalidSize) => {
                return send(stream, &reply(CODE_SYNTAX_ERROR, MSG_SYNTAX_ERROR)).await;
            }
            Err(MailParamError::SizeExceeded) => {
                return send(stream, &reply(CODE_MESSAGE_TOO_LARGE, MSG_MESSAGE_TOO_LARGE)).await;
            }
        }

        // With SMTPUTF8 in effect the command line itself must be valid
        // UTF-8; the lossy copy used for dispatch hides that.
        if self.is_utf8 && std::str::from_utf8(raw).is_err() {
            return send(stream, &reply(CODE_SYNTAX_ERROR, MSG_INVALID_UTF8)).await;
        }

        debug!(
            "MAIL FROM accepted: {} (declared size {:?})",
            address, self.declared_size
        );
        self.reverse_path = Some(address);
        send(stream, &reply(CODE_OK, MSG_OK)).await
    }

    async fn handle_rcpt<S>(&mut self, cmd: &str, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        if self.config.smtp.strict_sequencing && self.reverse_path.is_none() {
            return send(stream, &reply(CODE_BAD_SEQUENCE, MSG_BAD_SEQUENCE)).await;
        }

        if !cmd.to_uppercase().contains("TO:") {
            return send(stream, &reply(CODE_SYNTAX_ERROR, MSG_SYNTAX_ERROR)).await;
        }

        let Some(address) = commands::extract_address(cmd, "TO:") else {
            return send(stream, &reply(CODE_SYNTAX_ERROR, "Invalid RCPT TO syntax")).await;
        };

        let result = self.validator.validate(&address);
        if !result.valid {
            warn!("Invalid TO address {}: {}", address, result.errors[0]);
            let message = format!("Invalid TO address: {}", result.errors[0].message);
            return send(stream, &reply(CODE_SYNTAX_ERROR, &message)).await;
        }

        debug!("RCPT TO accepted: {}", address);
        self.forward_paths.push(address);
        send(stream, &reply(CODE_OK, MSG_OK)).await
    }

    async fn handle_data<S>(&mut self, stream: &mut S) -> Result<()>
    where
        S: AsyncBufRead + AsyncWrite + Unpin,
    {
        if self.config.smtp.strict_sequencing && self.forward_paths.is_empty() {
            return send(stream, &reply(CODE_BAD_SEQUENCE, MSG_BAD_SEQUENCE)).await;
        }

        send(stream, &reply(CODE_START_MAIL_INPUT, MSG_START_MAIL_INPUT)).await?;

        let outcome = read_message(stream, self.config.smtp.max_message_size, self.is_utf8).await;
        match outcome {
            DataOutcome::Interrupted => {
                error!("Error reading email data from {}", self.peer);
                send(stream, &reply(CODE_ACTION_ABORTED, MSG_ACTION_ABORTED)).await?;
            }
            DataOutcome::TooLarge => {
                error!(
                    "Message from {} exceeds limit of {} bytes",
                    self.peer, self.config.smtp.max_message_size
                );
                send(stream, &reply(CODE_MESSAGE_TOO_LARGE, MSG_MESSAGE_TOO_LARGE)).await?;
            }
            DataOutcome::InvalidUtf8 => {
                error!("Invalid UTF-8 in message from {}", self.peer);
                send(stream, &reply(CODE_SYNTAX_ERROR, MSG_INVALID_UTF8)).await?;
            }
            DataOutcome::Message(bytes) => {
                let parsed = self.parser.parse(&bytes);
                if !parsed.errors.is_empty() {
                    warn!(
                        "Email parsing warnings from {}: {:?}",
                        self.peer, parsed.errors
                    );
                }

                info!(
                    "Email received: id={} from={:?} recipients={:?} subject={:?} size={} attachments={}",
                    parsed.email.id,
                    self.reverse_path,
                    self.forward_paths,
                    parsed.email.subject,
                    parsed.email.size,
                    parsed.email.attachments.len()
                );

                self.store_email(&parsed.email).await;
                send(stream, &reply(CODE_OK, MSG_MESSAGE_ACCEPTED)).await?;
            }
        }

        self.reset_transaction();
        Ok(())
    }

    /// Hand the parsed email to the index. Failures are logged; the SMTP
    /// reply does not depend on them.
    async fn store_email(&self, email: &crate::mime::types::Email) {
        let Some(store) = &self.store else {
            debug!("Store not available, email {} not persisted", email.id);
            return;
        };

        let from = self.reverse_path.clone().unwrap_or_default();
        let record = email_record(email, &from, &self.forward_paths);

        if let Err(e) = store
            .store_email_with_recipients(&email.id, &record, &self.forward_paths)
            .await
        {
            error!("Failed to store email {}: {}", email.id, e);
        }
        if let Err(e) = store.queue_email("inbound", &record).await {
            warn!("Failed to queue email {} for processing: {}", email.id, e);
        }
        if let Err(e) = store.increment_counter("received").await {
            warn!("Failed to update email statistics: {}", e);
        }
    }

    async fn handle_vrfy<S>(&mut self, arg: Option<String>, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let Some(user) = arg else {
            return send(stream, &reply(CODE_SYNTAX_ERROR, MSG_SYNTAX_ERROR)).await;
        };

        // Mailboxes are ephemeral, so only the domain can be vouched for.
        let local = self
            .config
            .smtp
            .local_domains
            .iter()
            .any(|domain| user.contains(domain.as_str()));
        if local {
            send(stream, &reply(CODE_OK, &user)).await
        } else {
            send(stream, &reply(CODE_CANNOT_VERIFY, MSG_CANNOT_VERIFY)).await
        }
    }

    /// Upgrade the connection in place. Returns true when the handshake
    /// succeeded and the command loop should restart on the TLS stream.
    async fn upgrade_to_tls(&mut self, stream: &mut SmtpStream) -> Result<bool> {
        if self.is_tls {
            send(stream, &reply(CODE_COMMAND_NOT_IMPLEMENTED, "Already using TLS")).await?;
            return Ok(false);
        }

        let Some(tls) = self.tls.clone() else {
            send(stream, &reply(CODE_COMMAND_NOT_IMPLEMENTED, "TLS not available")).await?;
            return Ok(false);
        };

        send(stream, &reply(CODE_START_TLS, MSG_START_TLS)).await?;

        let tcp = match std::mem::replace(stream, SmtpStream::Upgrading) {
            SmtpStream::Plain(tcp) => tcp,
            other => {
                *stream = other;
                return Err(NullmailError::SmtpProtocol(
                    "stream state mismatch during STARTTLS".to_string(),
                ));
            }
        };

        match tls.acceptor().accept(tcp).await {
            Ok(tls_stream) => {
                *stream = SmtpStream::Tls(tls_stream);
                self.is_tls = true;
                // The pre-handshake envelope is discarded; only the
                // greeting survives the upgrade.
                self.reset_transaction();
                info!("TLS connection established: {}", self.peer);
                Ok(true)
            }
            Err(e) => {
                error!("TLS handshake failed for {}: {}", self.peer, e);
                Err(e.into())
            }
        }
    }

    fn reset_transaction(&mut self) {
        self.reverse_path = None;
        self.forward_paths.clear();
        self.declared_size = None;
        self.is_utf8 = false;
    }
}

async fn send<W>(writer: &mut W, response: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    debug!("Sent SMTP response: {}", response.trim_end());
    Ok(())
}

/// Read the DATA phase: dot-unstuffed lines up to the lone-dot
/// terminator, enforcing the size cap and, under SMTPUTF8, UTF-8
/// validity of every line.
pub(crate) async fn read_message<R>(
    reader: &mut R,
    max_size: i64,
    require_utf8: bool,
) -> DataOutcome
where
    R: AsyncBufRead + Unpin,
{
    let mut message = Vec::new();
    let mut total: i64 = 0;
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => return DataOutcome::Interrupted,
            Ok(_) => {}
        }

        if is_terminator(&line) {
            return DataOutcome::Message(message);
        }

        let content: &[u8] = if line.starts_with(b"..") { &line[1..] } else { &line };

        total += content.len() as i64;
        if total > max_size {
            return DataOutcome::TooLarge;
        }

        if require_utf8 && std::str::from_utf8(content).is_err() {
            return DataOutcome::InvalidUtf8;
        }

        message.extend_from_slice(content);
    }
}

fn is_terminator(line: &[u8]) -> bool {
    String::from_utf8_lossy(line).trim() == "."
}
