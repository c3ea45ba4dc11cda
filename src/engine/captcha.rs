//! Tiered CAPTCHA resolution.
//!
//! Tier 1: managed resolution by a vendor browser (bounded wait for the
//! widget token to appear). Tier 2: a paid solving service, brokered with
//! the detected site key, token injected back into the widget. Tier 3:
//! text/audio detection-only stubs that log and fall through. A CAPTCHA
//! that survives every tier is recorded and the run proceeds — failure here
//! is never fatal, only a contributing reason for non-success.

use chromiumoxide::Page;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::core::retry::{RetryPolicy, CATEGORY_CAPTCHA};
use crate::core::types::{CaptchaChallenge, CaptchaKind, CaptchaOutcome};
use crate::engine::evidence::EvidenceBundle;
use crate::engine::locator::eval_bool;
use crate::services::solver::TokenSolver;

/// How long tier 1 waits for the vendor to clear a detected challenge.
const MANAGED_WAIT: Duration = Duration::from_secs(15);

// ── Detection ────────────────────────────────────────────────────────────────

fn recaptcha_sitekey_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:data-sitekey="([0-9A-Za-z_-]{30,60})")|(?:recaptcha[^"']*[?&]k=([0-9A-Za-z_-]{30,60}))"#)
            .expect("valid recaptcha regex")
    })
}

fn hcaptcha_sitekey_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:h-captcha[^>]*data-sitekey="([0-9a-fA-F-]{36})")|(?:hcaptcha\.com[^"']*[?&]sitekey=([0-9a-fA-F-]{36}))"#)
            .expect("valid hcaptcha regex")
    })
}

/// Extract a reCAPTCHA site key from rendered HTML.
pub fn extract_recaptcha_site_key(html: &str) -> Option<String> {
    recaptcha_sitekey_re().captures(html).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().to_string())
    })
}

/// Extract an hCaptcha site key from rendered HTML.
pub fn extract_hcaptcha_site_key(html: &str) -> Option<String> {
    hcaptcha_sitekey_re().captures(html).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().to_string())
    })
}

/// Probe the DOM for a challenge. hCaptcha markers are checked before
/// reCAPTCHA because hCaptcha embeds a compatibility shim that also matches
/// loose reCAPTCHA probes.
async fn detect(page: &Page, html: &str) -> (CaptchaKind, Option<String>) {
    let has_hcaptcha = eval_bool(
        page,
        r#"!!(document.querySelector('.h-captcha, iframe[src*="hcaptcha.com"], [data-hcaptcha-widget-id]'))"#.to_string(),
    )
    .await;
    if has_hcaptcha {
        return (CaptchaKind::Hcaptcha, extract_hcaptcha_site_key(html));
    }

    let has_recaptcha = eval_bool(
        page,
        r#"!!(document.querySelector('.g-recaptcha, iframe[src*="recaptcha"], #g-recaptcha-response, textarea[name="g-recaptcha-response"]'))"#.to_string(),
    )
    .await;
    if has_recaptcha {
        return (CaptchaKind::Recaptcha, extract_recaptcha_site_key(html));
    }

    let has_text = eval_bool(
        page,
        r#"!!(document.querySelector('img[src*="captcha" i], input[name*="captcha" i]'))"#
            .to_string(),
    )
    .await;
    if has_text {
        return (CaptchaKind::Text, None);
    }

    let has_audio = eval_bool(
        page,
        r#"!!(document.querySelector('.rc-button-audio, button[aria-label*="audio" i]'))"#
            .to_string(),
    )
    .await;
    if has_audio {
        return (CaptchaKind::Audio, None);
    }

    (CaptchaKind::None, None)
}

/// Whether the widget already holds a response token.
async fn token_present(page: &Page) -> bool {
    eval_bool(
        page,
        r#"(() => {
    for (const sel of ['textarea[name="g-recaptcha-response"]', 'textarea[name="h-captcha-response"]', '#g-recaptcha-response']) {
        const el = document.querySelector(sel);
        if (el && el.value && el.value.length > 20) return true;
    }
    return false;
})()"#
            .to_string(),
    )
    .await
}

// ── Tier 1: managed resolution (vendor browser) ──────────────────────────────

/// Wait for the vendor's automatic solve: bounded poll of the widget token.
/// All three outcomes (solved / not detected / timeout) are valid terminals.
async fn managed_resolution(page: &Page, kind: CaptchaKind) -> CaptchaOutcome {
    if kind == CaptchaKind::None {
        return CaptchaOutcome::NotDetected;
    }
    let deadline = std::time::Instant::now() + MANAGED_WAIT;
    while std::time::Instant::now() < deadline {
        if token_present(page).await {
            return CaptchaOutcome::Solved;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    CaptchaOutcome::Unsolved
}

// ── Tier 2: paid solving service ─────────────────────────────────────────────

/// Inject a solved token into the widget's hidden response field and invoke
/// its callback hooks so client-side validation accepts it.
async fn inject_token(page: &Page, kind: CaptchaKind, token: &str) -> bool {
    let token_json = serde_json::to_string(token).unwrap_or_else(|_| "\"\"".into());
    let field = match kind {
        CaptchaKind::Hcaptcha => "h-captcha-response",
        _ => "g-recaptcha-response",
    };
    let js = format!(
        r#"(() => {{
    const token = {token};
    let injected = false;
    for (const el of document.querySelectorAll('textarea[name="{field}"], #{field_id}')) {{
        el.style.display = '';
        el.value = token;
        el.dispatchEvent(new Event('input', {{bubbles: true}}));
        el.dispatchEvent(new Event('change', {{bubbles: true}}));
        injected = true;
    }}
    // Widget-level callbacks: explicit data-callback attribute first.
    const widget = document.querySelector('.g-recaptcha[data-callback], .h-captcha[data-callback]');
    if (widget) {{
        const cb = window[widget.getAttribute('data-callback')];
        if (typeof cb === 'function') {{ try {{ cb(token); }} catch (e) {{}} }}
    }}
    // reCAPTCHA client registry fallback.
    if (window.___grecaptcha_cfg && window.___grecaptcha_cfg.clients) {{
        for (const client of Object.values(window.___grecaptcha_cfg.clients)) {{
            const walk = (obj, depth) => {{
                if (!obj || depth > 3) return;
                for (const v of Object.values(obj)) {{
                    if (v && typeof v.callback === 'function') {{
                        try {{ v.callback(token); }} catch (e) {{}}
                        return;
                    }}
                    if (v && typeof v === 'object') walk(v, depth + 1);
                }}
            }};
            walk(client, 0);
        }}
    }}
    return injected;
}})()"#,
        token = token_json,
        field = field,
        field_id = field,
    );
    eval_bool(page, js).await
}

// ── Chain ────────────────────────────────────────────────────────────────────

/// Run the full resolution chain, internally retried per the captcha budget.
/// Never errors: the worst case is an `Unsolved` challenge in the record.
pub async fn resolve(
    page: &Page,
    is_remote: bool,
    solver: Option<&dyn TokenSolver>,
    page_url: &str,
    policy: &RetryPolicy,
    evidence: &mut EvidenceBundle,
) -> CaptchaChallenge {
    let mut attempt = 0u32;
    let mut last = CaptchaChallenge {
        kind: CaptchaKind::None,
        site_key: None,
        outcome: CaptchaOutcome::NotDetected,
    };

    while policy.wait_before(CATEGORY_CAPTCHA, attempt).await {
        attempt += 1;

        let html = page.content().await.unwrap_or_default();
        let (kind, site_key) = detect(page, &html).await;
        debug!(?kind, site_key = site_key.as_deref(), "captcha probe");

        if kind == CaptchaKind::None {
            evidence.log("no captcha detected");
            return CaptchaChallenge {
                kind,
                site_key,
                outcome: CaptchaOutcome::NotDetected,
            };
        }
        if token_present(page).await {
            evidence.log("captcha already holds a response token");
            return CaptchaChallenge {
                kind,
                site_key,
                outcome: CaptchaOutcome::Solved,
            };
        }

        // Tier 1 — vendor-managed solve, only meaningful on a remote session.
        if is_remote {
            evidence.log("captcha tier 1: waiting for vendor-managed solve");
            match managed_resolution(page, kind).await {
                CaptchaOutcome::Solved => {
                    evidence.log("captcha solved by vendor");
                    return CaptchaChallenge {
                        kind,
                        site_key,
                        outcome: CaptchaOutcome::Solved,
                    };
                }
                CaptchaOutcome::NotDetected => {
                    return CaptchaChallenge {
                        kind,
                        site_key,
                        outcome: CaptchaOutcome::NotDetected,
                    };
                }
                CaptchaOutcome::Unsolved => {
                    evidence.log("vendor did not clear the captcha in time");
                }
            }
        }

        // Tier 2 — paid solving service, needs a site key and a credential.
        match (&site_key, solver) {
            (Some(key), Some(solver)) if matches!(kind, CaptchaKind::Recaptcha | CaptchaKind::Hcaptcha) => {
                evidence.log(format!("captcha tier 2: brokering {:?} to solving service", kind));
                match solver.solve(kind, key, page_url).await {
                    Ok(token) => {
                        if inject_token(page, kind, &token).await {
                            evidence.log("solver token injected");
                            return CaptchaChallenge {
                                kind,
                                site_key,
                                outcome: CaptchaOutcome::Solved,
                            };
                        }
                        evidence.count_error("captcha_inject");
                        evidence.log("solver token obtained but injection failed");
                    }
                    Err(e) => {
                        evidence.count_error("captcha_solver_error");
                        evidence.log(format!("captcha_solver_error: {}", e));
                    }
                }
            }
            (None, Some(_)) => {
                evidence.log("captcha tier 2 skipped: no site key found");
            }
            (_, None) => {
                // Distinguished from a solver failure on purpose.
                evidence.count_error("captcha_solver_unconfigured");
                evidence.log("captcha_solver_unconfigured: no solving-service credential");
            }
            _ => {}
        }

        // Tier 3 — text/audio stubs: detection only, designed to be replaced
        // by OCR / speech-to-text backends.
        match kind {
            CaptchaKind::Text => evidence.log("captcha tier 3: text challenge detected, no OCR backend"),
            CaptchaKind::Audio => evidence.log("captcha tier 3: audio challenge detected, no transcription backend"),
            _ => {}
        }

        last = CaptchaChallenge {
            kind,
            site_key,
            outcome: CaptchaOutcome::Unsolved,
        };
    }

    evidence.log("captcha: no automatic resolution");
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_recaptcha_key_from_widget_attribute() {
        let html = r#"<div class="g-recaptcha" data-sitekey="6LdAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"></div>"#;
        assert_eq!(
            extract_recaptcha_site_key(html).as_deref(),
            Some("6LdAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")
        );
    }

    #[test]
    fn extracts_recaptcha_key_from_iframe_url() {
        let html = r#"<iframe src="https://www.google.com/recaptcha/api2/anchor?ar=1&k=6LfXYZ123456789012345678901234567890abcd&co=x"></iframe>"#;
        assert_eq!(
            extract_recaptcha_site_key(html).as_deref(),
            Some("6LfXYZ123456789012345678901234567890abcd")
        );
    }

    #[test]
    fn extracts_hcaptcha_key_from_widget() {
        let html = r#"<div class="h-captcha" data-sitekey="10000000-ffff-ffff-ffff-000000000001"></div>"#;
        assert_eq!(
            extract_hcaptcha_site_key(html).as_deref(),
            Some("10000000-ffff-ffff-ffff-000000000001")
        );
    }

    #[test]
    fn extracts_hcaptcha_key_from_iframe_url() {
        let html = r#"<iframe src="https://newassets.hcaptcha.com/captcha/v1/x/static?sitekey=10000000-ffff-ffff-ffff-000000000001"></iframe>"#;
        assert_eq!(
            extract_hcaptcha_site_key(html).as_deref(),
            Some("10000000-ffff-ffff-ffff-000000000001")
        );
    }

    #[test]
    fn no_key_in_plain_html() {
        assert!(extract_recaptcha_site_key("<form></form>").is_none());
        assert!(extract_hcaptcha_site_key("<form></form>").is_none());
    }
}
