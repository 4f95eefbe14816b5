//! RFC 5322 address parsing
//!
//! Handles the forms that show up in real submission traffic: bare
//! addr-specs, `Display Name <user@domain>`, quoted display names, and
//! comma-separated lists. The addr-spec itself is only checked for shape
//! here; policy checks live in the validator.

use crate::error::{NullmailError, Result};
use serde::Serialize;

/// A single header address: optional display name plus addr-spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Parse one address, accepting display-name and bare forms.
pub fn parse_address(input: &str) -> Result<Mailbox> {
    let input = input.trim();
    if input.is_empty() {
        return Err(NullmailError::Parse("empty address".to_string()));
    }

    if let Some(open) = input.find('<') {
        let close = input[open..]
            .find('>')
            .map(|i| open + i)
            .ok_or_else(|| NullmailError::Parse("unclosed angle bracket".to_string()))?;

        let spec = input[open + 1..close].trim();
        check_addr_spec(spec)?;

        let name = unquote_display_name(input[..open].trim());
        return Ok(Mailbox {
            name: if name.is_empty() { None } else { Some(name) },
            address: spec.to_string(),
        });
    }

    check_addr_spec(input)?;
    Ok(Mailbox {
        name: None,
        address: input.to_string(),
    })
}

/// Parse a comma-separated address list; any invalid entry fails the list.
pub fn parse_address_list(input: &str) -> Result<Vec<Mailbox>> {
    let mut mailboxes = Vec::new();
    for part in split_list(input) {
        if part.trim().is_empty() {
            continue;
        }
        mailboxes.push(parse_address(&part)?);
    }
    if mailboxes.is_empty() {
        return Err(NullmailError::Parse("empty address list".to_string()));
    }
    Ok(mailboxes)
}

/// Shape check for an addr-spec: `local@domain` with a non-empty local
/// part (possibly quoted) and a non-empty domain.
fn check_addr_spec(spec: &str) -> Result<()> {
    if spec.is_empty() {
        return Err(NullmailError::Parse("empty addr-spec".to_string()));
    }

    let at = if spec.starts_with('"') {
        // The local part is a quoted-string; the @ after the closing
        // quote separates it from the domain.
        let close = spec[1..]
            .find('"')
            .map(|i| i + 1)
            .ok_or_else(|| NullmailError::Parse("unterminated quoted local part".to_string()))?;
        match spec[close + 1..].find('@') {
            Some(i) => close + 1 + i,
            None => return Err(NullmailError::Parse("missing @ in address".to_string())),
        }
    } else {
        spec.rfind('@')
            .ok_or_else(|| NullmailError::Parse("missing @ in address".to_string()))?
    };

    let (local, domain) = (&spec[..at], &spec[at + 1..]);
    if local.is_empty() {
        return Err(NullmailError::Parse("empty local part".to_string()));
    }
    if domain.is_empty() {
        return Err(NullmailError::Parse("empty domain".to_string()));
    }
    if !local.starts_with('"') && local.chars().any(char::is_whitespace) {
        return Err(NullmailError::Parse(
            "whitespace in unquoted local part".to_string(),
        ));
    }
    if domain.chars().any(char::is_whitespace) {
        return Err(NullmailError::Parse("whitespace in domain".to_string()));
    }
    Ok(())
}

fn unquote_display_name(name: &str) -> String {
    let name = name.trim();
    if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
        name[1..name.len() - 1].replace("\\\"", "\"")
    } else {
        name.to_string()
    }
}

/// Split on commas that are outside quoted strings and angle brackets.
fn split_list(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                current.push(ch);
                in_quotes = !in_quotes;
            }
            '<' if !in_quotes => {
                current.push(ch);
                in_brackets = true;
            }
            '>' if !in_quotes => {
                current.push(ch);
                in_brackets = false;
            }
            ',' if !in_quotes && !in_brackets => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_addr_spec() {
        let mailbox = parse_address("user@example.com").unwrap();
        assert_eq!(mailbox.name, None);
        assert_eq!(mailbox.address, "user@example.com");
    }

    #[test]
    fn test_display_name() {
        let mailbox = parse_address("Alice Example <alice@example.com>").unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Alice Example"));
        assert_eq!(mailbox.address, "alice@example.com");
    }

    #[test]
    fn test_quoted_display_name() {
        let mailbox = parse_address("\"Example, Alice\" <alice@example.com>").unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Example, Alice"));
        assert_eq!(mailbox.address, "alice@example.com");
    }

    #[test]
    fn test_quoted_local_part() {
        let mailbox = parse_address("\"odd local\"@example.com").unwrap();
        assert_eq!(mailbox.address, "\"odd local\"@example.com");
    }

    #[test]
    fn test_missing_at_sign() {
        assert!(parse_address("no-at-sign").is_err());
        assert!(parse_address("<no-at-sign>").is_err());
    }

    #[test]
    fn test_empty_parts() {
        assert!(parse_address("@example.com").is_err());
        assert!(parse_address("user@").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_address_list() {
        let list = parse_address_list("a@x.test, Bob <b@x.test>, \"C, D\" <c@x.test>").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].address, "a@x.test");
        assert_eq!(list[1].name.as_deref(), Some("Bob"));
        assert_eq!(list[2].name.as_deref(), Some("C, D"));
    }

    #[test]
    fn test_address_list_rejects_invalid_entry() {
        assert!(parse_address_list("a@x.test, broken").is_err());
    }
}
