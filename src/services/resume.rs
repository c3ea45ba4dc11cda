//! Résumé extraction collaborator.
//!
//! Raw document bytes in, best-effort field map + raw text out. Missing or
//! unparseable documents yield an empty map — never an error that aborts
//! the run. The text scan is deliberately crude (printable-run extraction
//! that copes with PDF streams); the field inference only claims what it
//! can regex out with confidence.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct ExtractedResume {
    /// Inferred logical field name → value.
    pub fields: BTreeMap<String, String>,
    pub raw_text: String,
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
    })
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+?\d[\d\s().\-]{7,}\d").expect("valid phone regex"))
}

/// Pull readable text out of document bytes. PDFs get a printable-ASCII run
/// scan (good enough for excerpting and regex inference); everything else is
/// treated as UTF-8 with lossy decoding.
pub fn extract_text(bytes: &[u8]) -> String {
    if !bytes.starts_with(b"%PDF") {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    let mut out = String::new();
    let mut run = String::new();
    for &b in bytes {
        let c = b as char;
        if c.is_ascii_graphic() || c == ' ' {
            run.push(c);
        } else {
            // Keep runs long enough to be words; drop binary noise.
            if run.trim().len() >= 4 && run.chars().any(|c| c.is_ascii_alphabetic()) {
                out.push_str(run.trim());
                out.push('\n');
            }
            run.clear();
        }
    }
    if run.trim().len() >= 4 {
        out.push_str(run.trim());
    }
    out
}

/// Infer applicant fields from raw text: email and phone by regex, full name
/// from the first short all-words line.
pub fn infer_fields(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();

    if let Some(m) = email_re().find(text) {
        fields.insert("email".to_string(), m.as_str().to_string());
    }
    if let Some(m) = phone_re().find(text) {
        let candidate = m.as_str().trim();
        // Demand enough digits that years and zip codes don't qualify.
        let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
        if digits >= 9 {
            fields.insert("phone".to_string(), candidate.to_string());
        }
    }

    for line in text.lines().take(10) {
        let line = line.trim();
        let words: Vec<&str> = line.split_whitespace().collect();
        let looks_like_name = (2..=4).contains(&words.len())
            && words.iter().all(|w| {
                w.chars()
                    .all(|c| c.is_alphabetic() || c == '-' || c == '\'' || c == '.')
            })
            && line.len() < 60;
        if looks_like_name {
            fields.insert("full_name".to_string(), line.to_string());
            break;
        }
    }

    fields
}

/// Fetch + extract. URL wins over embedded bytes; every failure degrades to
/// an empty result.
pub async fn extract(
    http: &reqwest::Client,
    resume_url: Option<&str>,
    resume_base64: Option<&str>,
) -> ExtractedResume {
    let bytes: Option<Vec<u8>> = if let Some(url) = resume_url.filter(|u| !u.trim().is_empty()) {
        match http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(b) => Some(b.to_vec()),
                Err(e) => {
                    warn!("résumé body unreadable: {}", e);
                    None
                }
            },
            Ok(resp) => {
                warn!("résumé fetch returned {}", resp.status());
                None
            }
            Err(e) => {
                warn!("résumé fetch failed: {}", e);
                None
            }
        }
    } else if let Some(b64) = resume_base64.filter(|b| !b.trim().is_empty()) {
        match BASE64.decode(b64.trim()) {
            Ok(b) => Some(b),
            Err(e) => {
                warn!("résumé base64 undecodable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let Some(bytes) = bytes else {
        return ExtractedResume::default();
    };

    let raw_text = extract_text(&bytes);
    let fields = infer_fields(&raw_text);
    debug!(
        text_chars = raw_text.len(),
        inferred = fields.len(),
        "résumé extracted"
    );
    ExtractedResume { fields, raw_text }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_resume_round_trips() {
        let text = extract_text(b"Ada Lovelace\nada@example.com\n+44 20 7946 0958");
        assert!(text.contains("Ada Lovelace"));
    }

    #[test]
    fn pdf_bytes_yield_printable_runs_only() {
        let mut bytes = b"%PDF-1.4\x00\x01\x02".to_vec();
        bytes.extend_from_slice(b"Senior Rust Engineer");
        bytes.extend_from_slice(&[0xff, 0xfe, 0x00]);
        let text = extract_text(&bytes);
        assert!(text.contains("Senior Rust Engineer"));
        assert!(!text.contains('\u{0}'));
    }

    #[test]
    fn fields_are_inferred_from_text() {
        let text = "Ada Lovelace\nLondon, UK\nada.lovelace@example.com\n+44 20 7946 0958";
        let fields = infer_fields(text);
        assert_eq!(fields.get("full_name").map(String::as_str), Some("Ada Lovelace"));
        assert_eq!(
            fields.get("email").map(String::as_str),
            Some("ada.lovelace@example.com")
        );
        assert!(fields.contains_key("phone"));
    }

    #[test]
    fn short_digit_strings_are_not_phones() {
        let fields = infer_fields("Graduated 2019, GPA 4.0");
        assert!(!fields.contains_key("phone"));
    }

    #[test]
    fn no_input_means_empty_extraction() {
        let fields = infer_fields("");
        assert!(fields.is_empty());
    }

    #[tokio::test]
    async fn undecodable_base64_degrades_to_empty() {
        let out = extract(&reqwest::Client::new(), None, Some("!!not-base64!!")).await;
        assert!(out.fields.is_empty());
        assert!(out.raw_text.is_empty());
    }
}
