//! SMTP reply codes and canned messages

// Success codes
pub const CODE_OK: &str = "250";
pub const CODE_SERVICE_READY: &str = "220";
pub const CODE_SERVICE_CLOSING: &str = "221";
pub const CODE_START_MAIL_INPUT: &str = "354";
pub const CODE_AUTH_SUCCESSFUL: &str = "235";
pub const CODE_AUTH_CONTINUE: &str = "334";
pub const CODE_START_TLS: &str = "220";

// Error codes
pub const CODE_SYNTAX_ERROR: &str = "501";
pub const CODE_COMMAND_NOT_RECOGNIZED: &str = "500";
pub const CODE_COMMAND_NOT_IMPLEMENTED: &str = "502";
pub const CODE_BAD_SEQUENCE: &str = "503";
pub const CODE_ACTION_ABORTED: &str = "451";
pub const CODE_AUTH_FAILED: &str = "535";
pub const CODE_USER_NOT_LOCAL: &str = "550";
pub const CODE_CANNOT_VERIFY: &str = "252";
pub const CODE_MESSAGE_TOO_LARGE: &str = "552";
pub const CODE_TLS_REQUIRED: &str = "530";

pub const MSG_SERVICE_CLOSING: &str = "Bye";
pub const MSG_OK: &str = "OK";
pub const MSG_MESSAGE_ACCEPTED: &str = "OK: Message accepted for delivery";
pub const MSG_START_MAIL_INPUT: &str = "Start mail input; end with <CRLF>.<CRLF>";
pub const MSG_SYNTAX_ERROR: &str = "Syntax error";
pub const MSG_COMMAND_NOT_RECOGNIZED: &str = "Command not recognized";
pub const MSG_COMMAND_NOT_IMPLEMENTED: &str = "Command not implemented";
pub const MSG_BAD_SEQUENCE: &str = "Bad sequence of commands";
pub const MSG_ACTION_ABORTED: &str = "Requested action aborted: local error in processing";
pub const MSG_AUTH_SUCCESSFUL: &str = "Authentication successful";
pub const MSG_AUTH_FAILED: &str = "Authentication failed";
pub const MSG_USER_NOT_LOCAL: &str = "User not local";
pub const MSG_CANNOT_VERIFY: &str = "Cannot verify user, but will accept message";
pub const MSG_HELP: &str =
    "Commands: HELO EHLO MAIL RCPT DATA VRFY EXPN HELP RSET NOOP QUIT AUTH STARTTLS";
pub const MSG_START_TLS: &str = "Ready to start TLS";
pub const MSG_MESSAGE_TOO_LARGE: &str = "Message too large";
pub const MSG_TLS_REQUIRED: &str = "Must issue STARTTLS first";
pub const MSG_INVALID_UTF8: &str = "Invalid UTF-8";

/// Format a single-line reply.
pub fn reply(code: &str, message: &str) -> String {
    format!("{code} {message}\r\n")
}

/// The 220 banner sent on accept.
pub fn service_ready(hostname: &str) -> String {
    reply(CODE_SERVICE_READY, &format!("{hostname} ESMTP Ready"))
}

/// The multiline EHLO capability block.
pub fn ehlo_capabilities(hostname: &str, max_message_size: i64) -> String {
    format!(
        "250-{hostname}\r\n\
         250-8BITMIME\r\n\
         250-AUTH PLAIN LOGIN\r\n\
         250-STARTTLS\r\n\
         250-SIZE {max_message_size}\r\n\
         250-SMTPUTF8\r\n\
         250 HELP\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_format() {
        assert_eq!(reply(CODE_OK, MSG_OK), "250 OK\r\n");
        assert_eq!(
            reply(CODE_SYNTAX_ERROR, MSG_SYNTAX_ERROR),
            "501 Syntax error\r\n"
        );
    }

    #[test]
    fn test_service_ready_banner() {
        assert_eq!(
            service_ready("temp-smtp.local"),
            "220 temp-smtp.local ESMTP Ready\r\n"
        );
    }

    #[test]
    fn test_ehlo_capabilities() {
        let block = ehlo_capabilities("temp-smtp.local", 25_000_000);
        let lines: Vec<&str> = block.split("\r\n").filter(|l| !l.is_empty()).collect();

        assert_eq!(lines.first(), Some(&"250-temp-smtp.local"));
        assert_eq!(lines.last(), Some(&"250 HELP"));
        assert!(lines.contains(&"250-SIZE 25000000"));
        assert!(lines.contains(&"250-SMTPUTF8"));
        assert!(lines.contains(&"250-STARTTLS"));
        assert!(lines.contains(&"250-8BITMIME"));
        assert!(lines.contains(&"250-AUTH PLAIN LOGIN"));

        // Every line but the last is a continuation.
        for line in &lines[..lines.len() - 1] {
            assert!(line.starts_with("250-"));
        }
    }
}
