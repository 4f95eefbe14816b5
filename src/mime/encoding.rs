//! Transfer-encoding and encoded-word decoders
//!
//! Decoding is deliberately forgiving: malformed input comes back as-is
//! instead of failing the whole message.

use base64::{engine::general_purpose, Engine as _};

/// Decode base64 content, ignoring embedded whitespace and line breaks.
pub fn decode_base64(content: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    let cleaned: Vec<u8> = content
        .iter()
        .filter(|b| !b.is_ascii_whitespace())
        .copied()
        .collect();

    general_purpose::STANDARD.decode(cleaned)
}

/// Decode quoted-printable content (RFC 2045 §6.7).
pub fn decode_quoted_printable(content: &[u8]) -> Vec<u8> {
    decode_qp(content, false)
}

fn decode_qp(content: &[u8], underscore_is_space: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());
    let mut i = 0;

    while i < content.len() {
        match content[i] {
            b'=' => {
                // Soft line break: = directly before CRLF or LF.
                if content.get(i + 1) == Some(&b'\r') && content.get(i + 2) == Some(&b'\n') {
                    i += 3;
                    continue;
                }
                if content.get(i + 1) == Some(&b'\n') {
                    i += 2;
                    continue;
                }
                match (hex_val(content.get(i + 1)), hex_val(content.get(i + 2))) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            b'_' if underscore_is_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    out
}

fn hex_val(b: Option<&u8>) -> Option<u8> {
    (*b? as char).to_digit(16).map(|d| d as u8)
}

/// Decode RFC 2047 encoded words (`=?charset?B|Q?text?=`) in a header
/// value. Whitespace between two adjacent encoded words is dropped;
/// anything that does not parse as an encoded word passes through.
pub fn decode_rfc2047(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut cursor = 0;
    let mut prev_was_word = false;

    while let Some(rel) = header[cursor..].find("=?") {
        let start = cursor + rel;
        match decode_encoded_word(&header[start..]) {
            Some((decoded, consumed)) => {
                let gap = &header[cursor..start];
                if !(prev_was_word && gap.chars().all(char::is_whitespace)) {
                    out.push_str(gap);
                }
                out.push_str(&decoded);
                cursor = start + consumed;
                prev_was_word = true;
            }
            None => {
                out.push_str(&header[cursor..start + 2]);
                cursor = start + 2;
                prev_was_word = false;
            }
        }
    }

    out.push_str(&header[cursor..]);
    out
}

fn decode_encoded_word(input: &str) -> Option<(String, usize)> {
    let inner = input.strip_prefix("=?")?;
    let q1 = inner.find('?')?;
    let charset = &inner[..q1];
    let rest = &inner[q1 + 1..];
    let q2 = rest.find('?')?;
    let encoding = &rest[..q2];
    let payload = &rest[q2 + 1..];
    let end = payload.find("?=")?;
    let text = &payload[..end];

    let bytes = match encoding {
        "B" | "b" => decode_base64(text.as_bytes()).ok()?,
        "Q" | "q" => decode_qp(text.as_bytes(), true),
        _ => return None,
    };

    let consumed = 2 + q1 + 1 + q2 + 1 + end + 2;
    Some((bytes_to_string(charset, bytes), consumed))
}

fn bytes_to_string(charset: &str, bytes: Vec<u8>) -> String {
    if charset.eq_ignore_ascii_case("iso-8859-1") || charset.eq_ignore_ascii_case("latin1") {
        return bytes.iter().map(|&b| b as char).collect();
    }
    // utf-8, us-ascii, and anything unknown: interpret as UTF-8.
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64(b"SGVsbG8gV29ybGQ=").unwrap(), b"Hello World");
    }

    #[test]
    fn test_decode_base64_with_whitespace() {
        assert_eq!(decode_base64(b"SGVs bG8g\r\nV29y bGQ=").unwrap(), b"Hello World");
    }

    #[test]
    fn test_decode_base64_invalid() {
        assert!(decode_base64(b"not base64!!!").is_err());
    }

    #[test]
    fn test_decode_quoted_printable() {
        assert_eq!(decode_quoted_printable(b"Hello=20World=21"), b"Hello World!");
    }

    #[test]
    fn test_quoted_printable_soft_break() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_invalid_escape_kept() {
        assert_eq!(decode_quoted_printable(b"100=ZZ"), b"100=ZZ");
    }

    #[test]
    fn test_quoted_printable_high_bytes() {
        // =C3=A9 is the UTF-8 encoding of é.
        assert_eq!(decode_quoted_printable(b"caf=C3=A9"), "café".as_bytes());
    }

    #[test]
    fn test_rfc2047_base64_word() {
        assert_eq!(decode_rfc2047("=?UTF-8?B?SGVsbG8=?="), "Hello");
    }

    #[test]
    fn test_rfc2047_q_word() {
        assert_eq!(decode_rfc2047("=?UTF-8?Q?Hello_World?="), "Hello World");
        assert_eq!(decode_rfc2047("=?utf-8?q?caf=C3=A9?="), "café");
    }

    #[test]
    fn test_rfc2047_mixed_text() {
        assert_eq!(
            decode_rfc2047("Re: =?UTF-8?Q?caf=C3=A9?= meeting"),
            "Re: café meeting"
        );
    }

    #[test]
    fn test_rfc2047_adjacent_words_drop_whitespace() {
        assert_eq!(
            decode_rfc2047("=?UTF-8?Q?Hello?= =?UTF-8?Q?World?="),
            "HelloWorld"
        );
    }

    #[test]
    fn test_rfc2047_latin1() {
        assert_eq!(decode_rfc2047("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_rfc2047_malformed_passthrough() {
        assert_eq!(decode_rfc2047("=?UTF-8?X?bogus?="), "=?UTF-8?X?bogus?=");
        assert_eq!(decode_rfc2047("plain subject"), "plain subject");
        assert_eq!(decode_rfc2047("=?unterminated"), "=?unterminated");
    }
}
