//! Submission-outcome detection.
//!
//! Two independent signals, OR-combined by the orchestrator: a phrase-scan
//! heuristic over the rendered page text (negative phrases always win), and
//! the vision-model verdict produced in `services::vision`. Either alone is
//! sufficient to declare success.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use std::sync::OnceLock;
use std::time::Duration;

use crate::browser::BrowserSession;
use crate::engine::evidence::EvidenceBundle;

/// Validation-failure wording. Presence of any of these short-circuits the
/// heuristic to failure regardless of co-present positive phrases.
const NEGATIVE_PHRASES: &[&str] = &[
    "required",
    "please fill out this field",
    "invalid",
    "there was a problem submitting",
    "fix the errors",
];

/// Confirmation wording, multilingual.
const POSITIVE_PHRASES: &[&str] = &[
    "thank you for applying",
    "thank you for your application",
    "thanks for applying",
    "application received",
    "application submitted",
    "application has been received",
    "application has been submitted",
    "successfully submitted",
    "we have received your application",
    "your application was sent",
    "merci pour votre candidature",
    "gracias por su solicitud",
    "danke für ihre bewerbung",
    "obrigado pela sua candidatura",
    "bedankt voor je sollicitatie",
];

fn negative_matcher() -> &'static AhoCorasick {
    static M: OnceLock<AhoCorasick> = OnceLock::new();
    M.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(NEGATIVE_PHRASES)
            .expect("valid negative phrase set")
    })
}

fn positive_matcher() -> &'static AhoCorasick {
    static M: OnceLock<AhoCorasick> = OnceLock::new();
    M.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(POSITIVE_PHRASES)
            .expect("valid positive phrase set")
    })
}

/// Scan page text. `Some(false)` = a negative phrase is present (takes
/// precedence), `Some(true)` = a positive phrase matched, `None` =
/// inconclusive.
pub fn scan_text(text: &str) -> Option<bool> {
    let lowered = text.to_lowercase();
    if negative_matcher().is_match(&lowered) {
        return Some(false);
    }
    if positive_matcher().is_match(&lowered) {
        return Some(true);
    }
    None
}

/// The heuristic signal: scan the current page, and when inconclusive wait
/// briefly for a confirmation redirect and scan the landing page for
/// positives.
pub async fn heuristic(session: &BrowserSession, evidence: &mut EvidenceBundle) -> bool {
    let text = session.page_text().await;
    match scan_text(&text) {
        Some(success) => {
            evidence.log(format!(
                "outcome heuristic: {} phrase matched",
                if success { "positive" } else { "negative" }
            ));
            return success;
        }
        None => {}
    }

    // Inconclusive on the submit page; many boards redirect to a thank-you
    // page a beat later.
    let before = session.current_url().await;
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let now = session.current_url().await;
        if !now.is_empty() && now != before {
            evidence.log(format!("outcome heuristic: url changed to {}", now));
            session.wait_until_stable(1_000, 4_000).await;
            let text = session.page_text().await;
            let confirmed = scan_text(&text) == Some(true);
            evidence.log(format!(
                "outcome heuristic on landing page: {}",
                if confirmed { "positive" } else { "inconclusive" }
            ));
            return confirmed;
        }
    }

    evidence.log("outcome heuristic: inconclusive");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_phrase_is_detected() {
        assert_eq!(scan_text("Thank you for applying to Acme!"), Some(true));
        assert_eq!(scan_text("Application received."), Some(true));
    }

    #[test]
    fn negative_phrase_wins_over_positive() {
        let text = "Thank you for applying! However this field is required.";
        assert_eq!(scan_text(text), Some(false));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(scan_text("APPLICATION SUBMITTED"), Some(true));
        assert_eq!(scan_text("InVaLiD email address"), Some(false));
    }

    #[test]
    fn multilingual_positives_match() {
        assert_eq!(scan_text("Merci pour votre candidature."), Some(true));
        assert_eq!(scan_text("danke für ihre bewerbung"), Some(true));
    }

    #[test]
    fn unrelated_text_is_inconclusive() {
        assert_eq!(scan_text("Welcome to our careers page"), None);
        assert_eq!(scan_text(""), None);
    }
}
