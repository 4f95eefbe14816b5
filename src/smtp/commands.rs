//! SMTP command-line parsing
//!
//! Dispatch is keyed on the first whitespace-delimited token, uppercased.
//! Argument extraction is deliberately lenient about case and spacing to
//! match the traffic real submission clients produce.

/// A dispatched SMTP command. Variants that need their arguments parsed
/// leniently (MAIL, RCPT) carry the original command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Helo(Option<String>),
    Ehlo(Option<String>),
    Mail(String),
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
    Auth,
    Vrfy(Option<String>),
    Expn,
    Help,
    StartTls,
    /// A blank command line.
    Empty,
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let mut fields = line.split_whitespace();
        let Some(verb) = fields.next() else {
            return SmtpCommand::Empty;
        };

        let arg = fields.next().map(str::to_string);

        match verb.to_uppercase().as_str() {
            "HELO" => SmtpCommand::Helo(arg),
            "EHLO" => SmtpCommand::Ehlo(arg),
            "MAIL" => SmtpCommand::Mail(line.to_string()),
            "RCPT" => SmtpCommand::Rcpt(line.to_string()),
            "DATA" => SmtpCommand::Data,
            "RSET" => SmtpCommand::Rset,
            "NOOP" => SmtpCommand::Noop,
            "QUIT" => SmtpCommand::Quit,
            "AUTH" => SmtpCommand::Auth,
            "VRFY" => SmtpCommand::Vrfy(arg),
            "EXPN" => SmtpCommand::Expn,
            "HELP" => SmtpCommand::Help,
            "STARTTLS" => SmtpCommand::StartTls,
            other => SmtpCommand::Unknown(other.to_string()),
        }
    }
}

/// Pull the mailbox out of a MAIL FROM / RCPT TO line. The label match
/// is case-insensitive; the address may be bracketed or bare, and any
/// trailing ESMTP parameters are ignored.
pub fn extract_address(line: &str, label: &str) -> Option<String> {
    let upper = line.to_uppercase();
    let index = upper.find(label)?;

    let remaining = line[index + label.len()..].trim();

    if remaining.starts_with('<') && remaining.ends_with('>') {
        return non_empty(&remaining[1..remaining.len() - 1]);
    }

    let first = remaining.split_whitespace().next()?;
    if first.starts_with('<') && first.ends_with('>') {
        non_empty(&first[1..first.len() - 1])
    } else {
        non_empty(first)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// ESMTP parameters accepted on MAIL FROM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailParams {
    pub size: Option<i64>,
    pub smtputf8: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailParamError {
    /// SIZE value did not parse as an integer.
    InvalidSize,
    /// SIZE value exceeds the server limit.
    SizeExceeded,
}

/// Scan a MAIL command line for SIZE and SMTPUTF8 parameters.
pub fn parse_mail_params(line: &str, max_size: i64) -> Result<MailParams, MailParamError> {
    let mut params = MailParams::default();
    let upper = line.to_uppercase();

    if upper.contains("SIZE=") {
        for field in line.split_whitespace() {
            let Some(value) = field.to_uppercase().strip_prefix("SIZE=").map(String::from) else {
                continue;
            };
            let size: i64 = value.parse().map_err(|_| MailParamError::InvalidSize)?;
            if size > max_size {
                return Err(MailParamError::SizeExceeded);
            }
            params.size = Some(size);
        }
    }

    if upper.contains("SMTPUTF8") {
        params.smtputf8 = true;
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dispatch() {
        assert_eq!(
            SmtpCommand::parse("HELO client.example"),
            SmtpCommand::Helo(Some("client.example".to_string()))
        );
        assert_eq!(SmtpCommand::parse("ehlo c"), SmtpCommand::Ehlo(Some("c".to_string())));
        assert_eq!(SmtpCommand::parse("HELO"), SmtpCommand::Helo(None));
        assert_eq!(SmtpCommand::parse("DATA"), SmtpCommand::Data);
        assert_eq!(SmtpCommand::parse("quit"), SmtpCommand::Quit);
        assert_eq!(SmtpCommand::parse("  RSET  "), SmtpCommand::Rset);
        assert_eq!(SmtpCommand::parse(""), SmtpCommand::Empty);
        assert_eq!(SmtpCommand::parse("   "), SmtpCommand::Empty);
        assert_eq!(
            SmtpCommand::parse("BDAT 1024"),
            SmtpCommand::Unknown("BDAT".to_string())
        );
    }

    #[test]
    fn test_mail_and_rcpt_keep_original_line() {
        assert_eq!(
            SmtpCommand::parse("MAIL FROM:<a@x.test> SIZE=100"),
            SmtpCommand::Mail("MAIL FROM:<a@x.test> SIZE=100".to_string())
        );
        assert_eq!(
            SmtpCommand::parse("rcpt to:<b@x.test>"),
            SmtpCommand::Rcpt("rcpt to:<b@x.test>".to_string())
        );
    }

    #[test]
    fn test_extract_address_bracketed() {
        assert_eq!(
            extract_address("MAIL FROM:<a@x.test>", "FROM:"),
            Some("a@x.test".to_string())
        );
        assert_eq!(
            extract_address("RCPT TO:<b@x.test>", "TO:"),
            Some("b@x.test".to_string())
        );
    }

    #[test]
    fn test_extract_address_case_and_spacing() {
        assert_eq!(
            extract_address("mail from: <a@x.test>", "FROM:"),
            Some("a@x.test".to_string())
        );
        assert_eq!(
            extract_address("MAIL FROM:a@x.test", "FROM:"),
            Some("a@x.test".to_string())
        );
    }

    #[test]
    fn test_extract_address_ignores_parameters() {
        assert_eq!(
            extract_address("MAIL FROM:<a@x.test> SIZE=2048 SMTPUTF8", "FROM:"),
            Some("a@x.test".to_string())
        );
    }

    #[test]
    fn test_extract_address_missing() {
        assert_eq!(extract_address("MAIL", "FROM:"), None);
        assert_eq!(extract_address("MAIL FROM:", "FROM:"), None);
        assert_eq!(extract_address("MAIL FROM:<>", "FROM:"), None);
    }

    #[test]
    fn test_mail_params_size() {
        let params = parse_mail_params("MAIL FROM:<a@x.test> SIZE=1000", 25_000_000).unwrap();
        assert_eq!(params.size, Some(1000));
        assert!(!params.smtputf8);
    }

    #[test]
    fn test_mail_params_size_boundary() {
        assert!(parse_mail_params("MAIL FROM:<a@x.test> SIZE=25000000", 25_000_000).is_ok());
        assert_eq!(
            parse_mail_params("MAIL FROM:<a@x.test> SIZE=25000001", 25_000_000),
            Err(MailParamError::SizeExceeded)
        );
    }

    #[test]
    fn test_mail_params_size_invalid() {
        assert_eq!(
            parse_mail_params("MAIL FROM:<a@x.test> SIZE=abc", 25_000_000),
            Err(MailParamError::InvalidSize)
        );
    }

    #[test]
    fn test_mail_params_smtputf8() {
        let params = parse_mail_params("MAIL FROM:<a@x.test> SMTPUTF8", 25_000_000).unwrap();
        assert!(params.smtputf8);
        assert_eq!(params.size, None);
    }

    #[test]
    fn test_no_params() {
        let params = parse_mail_params("MAIL FROM:<a@x.test>", 25_000_000).unwrap();
        assert_eq!(params, MailParams::default());
    }
}
