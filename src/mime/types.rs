use crate::utils::addr::Mailbox;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

/// A parsed inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct Email {
    pub id: String,
    pub from: Option<Mailbox>,
    pub to: Vec<Mailbox>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Mailbox>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<Mailbox>,
    pub subject: String,
    pub body: EmailBody,
    /// Header name → value(s) joined with ", ", keyed by the first-seen
    /// spelling of the name.
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub received_at: DateTime<Utc>,
    pub size: u64,
    pub is_utf8: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmailBody {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub html: String,
    pub raw: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    /// Raw decoded bytes; excluded from serialized records.
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}: {}", self.field, self.message)
        } else {
            write!(f, "{}: {} (value: {})", self.field, self.message, self.value)
        }
    }
}

impl std::error::Error for ValidationError {}

/// Parser output: a best-effort email plus anything that went wrong
/// while producing it.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub email: Email,
    pub errors: Vec<ValidationError>,
}

impl Default for Email {
    fn default() -> Self {
        Self {
            id: String::new(),
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            body: EmailBody::default(),
            headers: HashMap::new(),
            attachments: Vec::new(),
            received_at: DateTime::<Utc>::UNIX_EPOCH,
            size: 0,
            is_utf8: false,
        }
    }
}

impl Email {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    pub fn total_attachment_size(&self) -> u64 {
        self.attachments.iter().map(|a| a.size).sum()
    }

    /// Best-effort plain text: the text body when present, otherwise the
    /// HTML body stripped of tags, otherwise the raw body.
    pub fn plain_text(&self) -> String {
        if !self.body.text.is_empty() {
            return self.body.text.clone();
        }

        if !self.body.html.is_empty() {
            let tags = Regex::new(r"<[^>]*>").expect("tag pattern");
            let text = tags.replace_all(&self.body.html, "");
            let spaces = Regex::new(r"\s+").expect("whitespace pattern");
            return spaces.replace_all(&text, " ").trim().to_string();
        }

        self.body.raw.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut email = Email::default();
        email
            .headers
            .insert("Content-Type".to_string(), "text/plain".to_string());
        assert_eq!(email.header("content-type"), Some("text/plain"));
        assert_eq!(email.header("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(email.header("X-Missing"), None);
    }

    #[test]
    fn test_plain_text_prefers_text_body() {
        let email = Email {
            body: EmailBody {
                text: "plain".to_string(),
                html: "<p>html</p>".to_string(),
                raw: "raw".to_string(),
            },
            ..Email::default()
        };
        assert_eq!(email.plain_text(), "plain");
    }

    #[test]
    fn test_plain_text_strips_html() {
        let email = Email {
            body: EmailBody {
                text: String::new(),
                html: "<p>Hello   <b>World</b></p>\n<p>again</p>".to_string(),
                raw: "raw".to_string(),
            },
            ..Email::default()
        };
        assert_eq!(email.plain_text(), "Hello World again");
    }

    #[test]
    fn test_plain_text_falls_back_to_raw() {
        let email = Email {
            body: EmailBody {
                raw: "raw body".to_string(),
                ..EmailBody::default()
            },
            ..Email::default()
        };
        assert_eq!(email.plain_text(), "raw body");
    }

    #[test]
    fn test_attachment_data_not_serialized() {
        let attachment = Attachment {
            filename: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            size: 3,
            data: vec![1, 2, 3],
            headers: HashMap::new(),
        };
        let json = serde_json::to_value(&attachment).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["size"], 3);
        assert_eq!(json["filename"], "a.bin");
    }

    #[test]
    fn test_total_attachment_size() {
        let mut email = Email::default();
        for size in [5u64, 3] {
            email.attachments.push(Attachment {
                filename: String::new(),
                content_type: String::new(),
                size,
                data: Vec::new(),
                headers: HashMap::new(),
            });
        }
        assert_eq!(email.total_attachment_size(), 8);
        assert!(email.has_attachments());
    }
}
