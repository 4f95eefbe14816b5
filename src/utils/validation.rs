//! Mailbox address validation
//!
//! Applies the RFC 5321/5322 syntax limits plus local policy (allow and
//! deny lists) to a single address literal. Violations accumulate in a
//! [`ValidationResult`] so callers can report more than the first
//! problem; only structural failures cut the run short.

use crate::config::ValidationConfig;
use crate::error::{NullmailError, Result};
use crate::mime::types::ValidationError;
use crate::utils::addr;
use regex::Regex;
use serde::Serialize;

const MAX_LOCAL_LENGTH: usize = 64;
const MAX_DOMAIN_LENGTH: usize = 253;
const MAX_TOTAL_LENGTH: usize = 320;

const LOCAL_PART_PATTERN: &str = r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+$";
const DOMAIN_PATTERN: &str =
    r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$";

/// A validated address split into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
    pub raw: String,
    pub is_utf8: bool,
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn add_error(&mut self, field: &str, message: impl Into<String>, value: &str) {
        self.valid = false;
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
            value: value.to_string(),
        });
    }
}

pub struct EmailValidator {
    allow_utf8: bool,
    require_tld: bool,
    allow_ip_domains: bool,
    valid_domains: Vec<String>,
    invalid_domains: Vec<String>,
    local_re: Regex,
    domain_re: Regex,
}

impl Default for EmailValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailValidator {
    pub fn new() -> Self {
        Self::from_config(&ValidationConfig::default())
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            allow_utf8: config.allow_utf8,
            require_tld: config.require_tld,
            allow_ip_domains: config.allow_ip_domains,
            valid_domains: config.valid_domains.clone(),
            invalid_domains: config.invalid_domains.clone(),
            local_re: Regex::new(LOCAL_PART_PATTERN).expect("local part pattern"),
            domain_re: Regex::new(DOMAIN_PATTERN).expect("domain pattern"),
        }
    }

    pub fn validate(&self, address: &str) -> ValidationResult {
        let mut result = ValidationResult::ok();

        if address.is_empty() {
            result.add_error("address", "Email address cannot be empty", address);
            return result;
        }

        if address.len() > MAX_TOTAL_LENGTH {
            result.add_error(
                "address",
                format!("Email address too long (max {MAX_TOTAL_LENGTH} chars)"),
                address,
            );
            return result;
        }

        if !self.allow_utf8 && !address.is_ascii() {
            result.add_error("address", "Non-ASCII characters not allowed", address);
        }

        let mailbox = match addr::parse_address(address) {
            Ok(mailbox) => mailbox,
            Err(e) => {
                result.add_error("address", format!("Invalid email format: {e}"), address);
                return result;
            }
        };

        // The addr-spec is the unit under validation; a display name, if
        // any, has already been stripped.
        let spec = mailbox.address;
        let Some(at) = spec.rfind('@') else {
            result.add_error("address", "Email must contain exactly one @ symbol", address);
            return result;
        };
        let (local, domain) = (&spec[..at], &spec[at + 1..]);

        self.validate_local_part(local, &mut result);
        self.validate_domain(domain, &mut result);
        self.check_domain_policy(domain, &mut result);

        result
    }

    fn validate_local_part(&self, local: &str, result: &mut ValidationResult) {
        if local.is_empty() {
            result.add_error("local", "Local part cannot be empty", local);
            return;
        }

        if local.len() > MAX_LOCAL_LENGTH {
            result.add_error(
                "local",
                format!("Local part too long (max {MAX_LOCAL_LENGTH} chars)"),
                local,
            );
        }

        if local.contains("..") {
            result.add_error("local", "Consecutive dots not allowed", local);
        }

        if local.starts_with('.') || local.ends_with('.') {
            result.add_error("local", "Local part cannot start or end with dot", local);
        }

        if !local.starts_with('"') && !self.allow_utf8 && !self.local_re.is_match(local) {
            result.add_error("local", "Invalid characters in local part", local);
        }
    }

    fn validate_domain(&self, domain: &str, result: &mut ValidationResult) {
        if domain.is_empty() {
            result.add_error("domain", "Domain cannot be empty", domain);
            return;
        }

        if domain.len() > MAX_DOMAIN_LENGTH {
            result.add_error(
                "domain",
                format!("Domain too long (max {MAX_DOMAIN_LENGTH} chars)"),
                domain,
            );
        }

        if domain.starts_with('[') && domain.ends_with(']') {
            if !self.allow_ip_domains {
                result.add_error("domain", "IP address domains not allowed", domain);
                return;
            }
            self.validate_ip_domain(&domain[1..domain.len() - 1], result);
            return;
        }

        if !self.domain_re.is_match(domain) {
            result.add_error("domain", "Invalid domain format", domain);
            return;
        }

        if self.require_tld && !domain.contains('.') {
            result.add_error("domain", "Domain must have a top-level domain", domain);
        }

        let labels: Vec<&str> = domain.split('.').collect();
        for (i, label) in labels.iter().enumerate() {
            if label.is_empty() {
                result.add_error("domain", "Domain cannot have empty labels", domain);
                continue;
            }

            if label.len() > 63 {
                result.add_error(
                    "domain",
                    format!("Domain label '{label}' too long (max 63 chars)"),
                    domain,
                );
            }

            if label.starts_with('-') || label.ends_with('-') {
                result.add_error(
                    "domain",
                    format!("Domain label '{label}' cannot start or end with hyphen"),
                    domain,
                );
            }

            if i == labels.len() - 1 && self.require_tld && !is_valid_tld(label) {
                result.add_error("domain", format!("Invalid top-level domain: {label}"), domain);
            }
        }
    }

    fn validate_ip_domain(&self, literal: &str, result: &mut ValidationResult) {
        let literal = literal.strip_prefix("IPv6:").unwrap_or(literal);
        if literal.parse::<std::net::IpAddr>().is_err() {
            result.add_error("domain", "Invalid IP address format", literal);
        }
    }

    fn check_domain_policy(&self, domain: &str, result: &mut ValidationResult) {
        let domain = domain.to_lowercase();

        for blocked in &self.invalid_domains {
            if domain.eq_ignore_ascii_case(blocked) {
                result.add_error("domain", "Domain is not allowed", &domain);
                return;
            }
        }

        if !self.valid_domains.is_empty()
            && !self
                .valid_domains
                .iter()
                .any(|valid| domain.eq_ignore_ascii_case(valid))
        {
            result.add_error("domain", "Domain is not in allowed list", &domain);
        }
    }

    /// Validate and split an address into an [`EmailAddress`] value.
    pub fn parse_email_address(&self, address: &str) -> Result<EmailAddress> {
        let result = self.validate(address);
        if !result.valid {
            let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            return Err(NullmailError::InvalidAddress(messages.join("; ")));
        }

        let at = address.rfind('@').expect("validated address contains @");
        Ok(EmailAddress {
            local: address[..at].to_string(),
            domain: address[at + 1..].to_string(),
            raw: address.to_string(),
            is_utf8: !address.is_ascii(),
        })
    }
}

fn is_valid_tld(tld: &str) -> bool {
    tld.chars().count() >= 2 && tld.chars().all(char::is_alphabetic)
}
