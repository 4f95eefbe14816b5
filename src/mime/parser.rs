//! RFC 5322 / MIME message parsing
//!
//! Turns the raw bytes collected during DATA into a structured
//! [`Email`]. Parsing never fails outright: structural problems are
//! collected into the outcome's error list and whatever could be
//! extracted is returned alongside them.

use crate::mime::encoding::{decode_base64, decode_quoted_printable, decode_rfc2047};
use crate::mime::types::{Attachment, Email, ParseOutcome, ValidationError};
use crate::utils::addr;
use chrono::Utc;
use rand::RngCore;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

const DEFAULT_MAX_SIZE: usize = 25 * 1024 * 1024;
const DEFAULT_MAX_ATTACHMENTS: usize = 10;

pub struct EmailParser {
    max_size: usize,
    max_attachments: usize,
}

impl Default for EmailParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailParser {
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_attachments: DEFAULT_MAX_ATTACHMENTS,
        }
    }

    pub fn with_limits(max_size: usize, max_attachments: usize) -> Self {
        Self {
            max_size,
            max_attachments,
        }
    }

    /// Parse a raw message into an [`Email`] plus accumulated errors.
    pub fn parse(&self, raw: &[u8]) -> ParseOutcome {
        let mut email = Email::default();
        let mut errors = Vec::new();

        if raw.is_empty() {
            add_error(&mut errors, "email", "Email content cannot be empty", "");
            return ParseOutcome { email, errors };
        }

        if raw.len() > self.max_size {
            add_error(
                &mut errors,
                "email",
                format!("Email too large (max {} bytes)", self.max_size),
                "",
            );
            return ParseOutcome { email, errors };
        }

        let Ok(message) = std::str::from_utf8(raw) else {
            add_error(&mut errors, "email", "Invalid UTF-8 encoding in email", "");
            return ParseOutcome { email, errors };
        };

        let (header_src, body_src) = split_headers_body(message);
        email.headers = collect_headers(parse_header_lines(header_src));

        self.parse_standard_headers(&mut email, &mut errors);

        email.id = generate_email_id();
        email.received_at = Utc::now();
        email.size = raw.len() as u64;
        email.is_utf8 = !raw.is_ascii();

        self.parse_body(body_src, &mut email, &mut errors);

        ParseOutcome { email, errors }
    }

    fn parse_standard_headers(&self, email: &mut Email, errors: &mut Vec<ValidationError>) {
        if let Some(from) = email.header("From").map(str::to_string) {
            if !from.is_empty() {
                match addr::parse_address(&from) {
                    Ok(mailbox) => email.from = Some(mailbox),
                    Err(e) => {
                        add_error(errors, "from", format!("Invalid From address: {e}"), &from)
                    }
                }
            }
        }

        for (field, name) in [("to", "To"), ("cc", "Cc"), ("bcc", "Bcc")] {
            let Some(value) = email.header(name).map(str::to_string) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            match addr::parse_address_list(&value) {
                Ok(mailboxes) => match field {
                    "to" => email.to = mailboxes,
                    "cc" => email.cc = mailboxes,
                    _ => email.bcc = mailboxes,
                },
                Err(e) => add_error(
                    errors,
                    field,
                    format!("Invalid {name} addresses: {e}"),
                    &value,
                ),
            }
        }

        if let Some(subject) = email.header("Subject").map(str::to_string) {
            email.subject = decode_rfc2047(&subject);
        }
    }

    fn parse_body(&self, body: &str, email: &mut Email, errors: &mut Vec<ValidationError>) {
        let content_type = email
            .header("Content-Type")
            .unwrap_or("text/plain")
            .to_string();
        let (media_type, params) = parse_media_type(&content_type);

        email.body.raw = body.to_string();

        if media_type.starts_with("multipart/") {
            match params.get("boundary") {
                Some(boundary) => self.parse_multipart(boundary, body, email, errors),
                None => add_error(errors, "body", "Missing boundary in multipart message", ""),
            }
        } else if media_type == "text/html" {
            email.body.html = body.to_string();
        } else {
            // text/plain and anything unrecognized.
            email.body.text = body.to_string();
        }
    }

    fn parse_multipart(
        &self,
        boundary: &str,
        body: &str,
        email: &mut Email,
        errors: &mut Vec<ValidationError>,
    ) {
        let marker = format!("--{boundary}");

        // The slice before the first marker is the preamble; a section
        // starting with "--" is the closing marker.
        for section in body.split(marker.as_str()).skip(1) {
            let section = section.trim();
            if section.is_empty() {
                continue;
            }
            if section.starts_with("--") {
                break;
            }

            if !self.parse_part(section, email, errors) {
                break;
            }
        }
    }

    /// Parse one multipart section. Returns false when part processing
    /// should stop (attachment limit reached).
    fn parse_part(
        &self,
        section: &str,
        email: &mut Email,
        errors: &mut Vec<ValidationError>,
    ) -> bool {
        let (header_src, part_body) = split_headers_body(section);
        let headers = collect_headers(parse_header_lines(header_src));

        let content_type = get_header(&headers, "Content-Type")
            .unwrap_or("text/plain")
            .to_string();
        let (media_type, type_params) = parse_media_type(&content_type);

        let encoding = get_header(&headers, "Content-Transfer-Encoding").unwrap_or("");
        let content = decode_transfer_encoding(part_body.as_bytes(), encoding);

        let disposition = get_header(&headers, "Content-Disposition").unwrap_or("");
        if disposition.to_ascii_lowercase().starts_with("attachment") {
            if email.attachments.len() >= self.max_attachments {
                add_error(
                    errors,
                    "attachments",
                    format!("Too many attachments (max {})", self.max_attachments),
                    "",
                );
                return false;
            }

            let (_, disposition_params) = parse_media_type(disposition);
            let filename = disposition_params
                .get("filename")
                .or_else(|| type_params.get("name"))
                .cloned()
                .unwrap_or_default();

            email.attachments.push(Attachment {
                filename,
                content_type,
                size: content.len() as u64,
                data: content,
                headers,
            });
            return true;
        }

        match media_type.as_str() {
            "text/plain" if email.body.text.is_empty() => {
                email.body.text = String::from_utf8_lossy(&content).into_owned();
            }
            "text/html" if email.body.html.is_empty() => {
                email.body.html = String::from_utf8_lossy(&content).into_owned();
            }
            _ => {}
        }
        true
    }
}

/// Split a message (or part) into its header block and body at the
/// first blank line.
fn split_headers_body(message: &str) -> (&str, &str) {
    if let Some(pos) = message.find("\r\n\r\n") {
        (&message[..pos], &message[pos + 4..])
    } else if let Some(pos) = message.find("\n\n") {
        (&message[..pos], &message[pos + 2..])
    } else {
        (message, "")
    }
}

/// Parse raw header lines into ordered name/value pairs, merging folded
/// continuation lines.
fn parse_header_lines(src: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in src.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some(colon) = line.find(':') {
            if let Some(pair) = current.take() {
                pairs.push(pair);
            }
            current = Some((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }
    }

    if let Some(pair) = current {
        pairs.push(pair);
    }
    pairs
}

/// Fold header pairs into a map keyed by the first-seen spelling of
/// each name; repeated headers join with ", ".
fn collect_headers(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    let mut canonical: HashMap<String, String> = HashMap::new();

    for (name, value) in pairs {
        let key = canonical
            .entry(name.to_ascii_lowercase())
            .or_insert(name)
            .clone();
        match map.entry(key) {
            Entry::Occupied(mut e) => {
                let joined = e.get_mut();
                joined.push_str(", ");
                joined.push_str(&value);
            }
            Entry::Vacant(e) => {
                e.insert(value);
            }
        }
    }
    map
}

fn get_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Split a Content-Type-style value into a lowercased media type and
/// its parameters.
fn parse_media_type(value: &str) -> (String, HashMap<String, String>) {
    let mut parts = value.split(';');
    let media_type = parts.next().unwrap_or("").trim().to_ascii_lowercase();

    let mut params = HashMap::new();
    for part in parts {
        if let Some((key, value)) = part.trim().split_once('=') {
            params.insert(
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').trim_matches('\'').to_string(),
            );
        }
    }
    (media_type, params)
}

fn decode_transfer_encoding(content: &[u8], encoding: &str) -> Vec<u8> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "base64" => decode_base64(content).unwrap_or_else(|_| content.to_vec()),
        "quoted-printable" => decode_quoted_printable(content),
        // 7bit, 8bit, binary, or unspecified.
        _ => content.to_vec(),
    }
}

fn add_error(
    errors: &mut Vec<ValidationError>,
    field: &str,
    message: impl Into<String>,
    value: &str,
) {
    errors.push(ValidationError {
        field: field.to_string(),
        message: message.into(),
        value: value.to_string(),
    });
}

fn generate_email_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
