//! Corrective-instruction interpreter.
//!
//! Vision verdicts carry instructions either as structured
//! `{action, selector, value}` objects (with tolerant aliases) or as
//! free-text directives ("fill X with 'Y'", "click captcha image at
//! position (r,c)", …). Both normalize into the same directive set before
//! execution. Execution prefers label lookups, falling back to raw
//! selectors and visible-text matches, and never throws: malformed input
//! yields zero executed actions, not an error.

use chromiumoxide::Page;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::core::types::CorrectiveAction;
use crate::engine::evidence::EvidenceBundle;
use crate::engine::humanize::{Humanizer, Think};
use crate::engine::locator;

/// CAPTCHA image grids are flattened at this column count.
const GRID_COLUMNS: u32 = 3;

/// Normalized instruction, ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Act(CorrectiveAction),
    CaptchaGrid { row: u32, col: u32 },
    CaptchaSubmit,
    /// Explicitly marked unsolvable; skipped without counting as a failure.
    Skip,
    Unknown,
}

fn re(pattern: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid directive regex"))
}

fn grid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        r"(?i)captcha\s+image\s+at\s+position\s*\(\s*(\d+)\s*,\s*(\d+)\s*\)",
        &RE,
    )
}

fn fill_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        r#"(?i)^fill\s+(?:in\s+)?['"]?(.+?)['"]?\s+with\s+['"]?(.+?)['"]?\.?$"#,
        &RE,
    )
}

fn select_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        r#"(?i)^select\s+['"]?(.+?)['"]?\s+(?:in|from)\s+(?:the\s+)?(?:dropdown\s+)?['"]?(.+?)['"]?\.?$"#,
        &RE,
    )
}

fn check_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(r#"(?i)^check\s+(?:the\s+)?['"]?(.+?)['"]?\.?$"#, &RE)
}

fn click_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(r#"(?i)^click\s+(?:on\s+)?(?:the\s+)?['"]?(.+?)['"]?\.?$"#, &RE)
}

/// Parse a free-text directive into a `Directive`.
pub fn parse_directive(text: &str) -> Directive {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Directive::Unknown;
    }
    let lowered = trimmed.to_lowercase();

    if lowered.contains("unsolvable") || lowered.contains("cannot be solved") {
        return Directive::Skip;
    }
    if let Some(caps) = grid_re().captures(trimmed) {
        let row = caps[1].parse().unwrap_or(0);
        let col = caps[2].parse().unwrap_or(0);
        return Directive::CaptchaGrid { row, col };
    }
    if lowered.contains("captcha submit") || lowered.contains("captcha verify") {
        return Directive::CaptchaSubmit;
    }
    if let Some(caps) = fill_re().captures(trimmed) {
        return Directive::Act(CorrectiveAction::Fill {
            target: caps[1].trim().to_string(),
            value: caps[2].trim().to_string(),
        });
    }
    if let Some(caps) = select_re().captures(trimmed) {
        return Directive::Act(CorrectiveAction::Select {
            target: caps[2].trim().to_string(),
            value: caps[1].trim().to_string(),
        });
    }
    if let Some(caps) = check_re().captures(trimmed) {
        return Directive::Act(CorrectiveAction::Check {
            target: caps[1].trim().to_string(),
        });
    }
    if let Some(caps) = click_re().captures(trimmed) {
        return Directive::Act(CorrectiveAction::Click {
            target: caps[1].trim().to_string(),
        });
    }
    Directive::Unknown
}

/// Normalize a structured `{action, selector, value}` object, tolerating the
/// common aliases models emit (`type`, `choose`, `tick`, `press`).
pub fn normalize_structured(obj: &serde_json::Map<String, serde_json::Value>) -> Directive {
    let action = obj
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_lowercase();
    let target = obj
        .get("selector")
        .or_else(|| obj.get("target"))
        .or_else(|| obj.get("label"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    let value = obj
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    if target.is_empty() {
        return Directive::Unknown;
    }
    match action.as_str() {
        "fill" | "type" => Directive::Act(CorrectiveAction::Fill { target, value }),
        "select" | "choose" => Directive::Act(CorrectiveAction::Select { target, value }),
        "check" | "tick" => Directive::Act(CorrectiveAction::Check { target }),
        "click" | "press" => Directive::Act(CorrectiveAction::Click { target }),
        _ => Directive::Unknown,
    }
}

/// Normalize one raw instruction (JSON object or directive string).
pub fn interpret(raw: &serde_json::Value) -> Directive {
    match raw {
        serde_json::Value::String(s) => parse_directive(s),
        serde_json::Value::Object(obj) => normalize_structured(obj),
        _ => Directive::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exec {
    Done,
    Failed,
    Skipped,
}

/// Mark an input-like control by label first, then raw selector.
async fn mark_target(page: &Page, target: &str) -> bool {
    locator::mark_by_label(page, target).await || locator::mark_by_selector(page, target).await
}

/// Mark the `idx`-th (0-based) visible match of `selector`.
async fn mark_nth(page: &Page, selector: &str, idx: u32) -> bool {
    let js = format!(
        r#"(() => {{
    document.querySelectorAll('[data-fp-target]').forEach(el => el.removeAttribute('data-fp-target'));
    let matches;
    try {{ matches = document.querySelectorAll({sel}); }} catch (e) {{ return false; }}
    const visible = [];
    for (const el of matches) {{
        if (el.offsetParent !== null || (el.getClientRects && el.getClientRects().length)) visible.push(el);
    }}
    if (visible.length <= {idx}) return false;
    visible[{idx}].setAttribute('data-fp-target', '1');
    return true;
}})()"#,
        sel = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into()),
        idx = idx,
    );
    locator::eval_bool(page, js).await
}

async fn click_marked(page: &Page, humanizer: &Humanizer) -> bool {
    if let Some(rect) = locator::marked_rect(page).await {
        humanizer.click_rect(page, rect).await;
        return true;
    }
    // Rect unavailable (zero-size or detached): synthetic click fallback.
    locator::eval_bool(
        page,
        r#"(() => {
    const el = document.querySelector('[data-fp-target]');
    if (!el) return false;
    el.click();
    return true;
})()"#
            .to_string(),
    )
    .await
}

async fn execute(page: &Page, humanizer: &Humanizer, directive: &Directive) -> Exec {
    match directive {
        Directive::Act(CorrectiveAction::Fill { target, value }) => {
            if !mark_target(page, target).await {
                return Exec::Failed;
            }
            let done = if locator::marked_tag(page).await == "select" {
                locator::select_marked_option(page, value).await
            } else {
                humanizer.think(Think::SimpleField).await;
                locator::set_marked_value(page, value).await
            };
            locator::clear_mark(page).await;
            if done {
                Exec::Done
            } else {
                Exec::Failed
            }
        }
        Directive::Act(CorrectiveAction::Select { target, value }) => {
            if !mark_target(page, target).await {
                return Exec::Failed;
            }
            let mut done = locator::select_marked_option(page, value).await;
            if !done {
                // Not a native select: open the widget and pick by text.
                click_marked(page, humanizer).await;
                tokio::time::sleep(Duration::from_millis(350)).await;
                if locator::mark_clickable_by_text(page, value).await
                    || locator::mark_by_selector(page, r#"[role="option"]"#).await
                {
                    done = click_marked(page, humanizer).await;
                }
            }
            locator::clear_mark(page).await;
            if done {
                Exec::Done
            } else {
                Exec::Failed
            }
        }
        Directive::Act(CorrectiveAction::Check { target }) => {
            if !mark_target(page, target).await {
                return Exec::Failed;
            }
            let done = locator::eval_bool(
                page,
                r#"(() => {
    const el = document.querySelector('[data-fp-target]');
    if (!el) return false;
    if (el.type === 'checkbox' || el.type === 'radio') {
        if (!el.checked) el.click();
        if (!el.checked) {
            el.checked = true;
            el.dispatchEvent(new Event('change', {bubbles: true}));
        }
        return true;
    }
    el.click();
    return true;
})()"#
                    .to_string(),
            )
            .await;
            locator::clear_mark(page).await;
            if done {
                Exec::Done
            } else {
                Exec::Failed
            }
        }
        Directive::Act(CorrectiveAction::Click { target }) => {
            let marked = locator::mark_clickable_by_text(page, target).await
                || locator::mark_by_selector(page, target).await
                || locator::mark_by_label(page, target).await;
            if !marked {
                return Exec::Failed;
            }
            let done = click_marked(page, humanizer).await;
            locator::clear_mark(page).await;
            if done {
                Exec::Done
            } else {
                Exec::Failed
            }
        }
        Directive::CaptchaGrid { row, col } => {
            let idx = row.saturating_mul(GRID_COLUMNS) + col;
            let grid_selectors = [
                ".rc-imageselect-tile",
                ".rc-image-tile-wrapper img",
                ".task-image",
                "img", // last resort: nth visible image on the page
            ];
            for sel in grid_selectors {
                if mark_nth(page, sel, idx).await {
                    let done = click_marked(page, humanizer).await;
                    locator::clear_mark(page).await;
                    return if done { Exec::Done } else { Exec::Failed };
                }
            }
            Exec::Failed
        }
        Directive::CaptchaSubmit => {
            let submit_selectors = ["#recaptcha-verify-button", ".rc-button-default"];
            for sel in submit_selectors {
                if locator::mark_by_selector(page, sel).await {
                    let done = click_marked(page, humanizer).await;
                    locator::clear_mark(page).await;
                    return if done { Exec::Done } else { Exec::Failed };
                }
            }
            if locator::mark_clickable_by_text(page, "verify").await {
                let done = click_marked(page, humanizer).await;
                locator::clear_mark(page).await;
                return if done { Exec::Done } else { Exec::Failed };
            }
            Exec::Failed
        }
        Directive::Skip => Exec::Skipped,
        Directive::Unknown => Exec::Failed,
    }
}

/// Execute every instruction in order. Returns whether at least one executed
/// successfully. Malformed and unknown directives are logged, not raised.
pub async fn run_instructions(
    page: &Page,
    humanizer: &Humanizer,
    instructions: &[serde_json::Value],
    evidence: &mut EvidenceBundle,
) -> bool {
    let mut any_executed = false;
    for raw in instructions {
        let directive = interpret(raw);
        debug!(?directive, "corrective directive");
        match execute(page, humanizer, &directive).await {
            Exec::Done => {
                evidence.log(format!("corrective action applied: {:?}", directive));
                any_executed = true;
            }
            Exec::Skipped => {
                evidence.log("corrective action skipped (marked unsolvable)");
            }
            Exec::Failed => {
                evidence.log(format!("corrective action had no effect: {}", raw));
            }
        }
    }
    any_executed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_directive_with_quoted_value() {
        let d = parse_directive("fill Email with 'ada@example.com'");
        assert_eq!(
            d,
            Directive::Act(CorrectiveAction::Fill {
                target: "Email".into(),
                value: "ada@example.com".into()
            })
        );
    }

    #[test]
    fn click_directive_with_quotes() {
        let d = parse_directive("click 'Submit application'");
        assert_eq!(
            d,
            Directive::Act(CorrectiveAction::Click {
                target: "Submit application".into()
            })
        );
    }

    #[test]
    fn select_directive_orders_value_then_target() {
        let d = parse_directive("select 'Remote' in dropdown Work location");
        assert_eq!(
            d,
            Directive::Act(CorrectiveAction::Select {
                target: "Work location".into(),
                value: "Remote".into()
            })
        );
    }

    #[test]
    fn check_directive() {
        let d = parse_directive("check 'I agree to the privacy policy'");
        assert_eq!(
            d,
            Directive::Act(CorrectiveAction::Check {
                target: "I agree to the privacy policy".into()
            })
        );
    }

    #[test]
    fn captcha_grid_directive_parses_coordinates() {
        let d = parse_directive("click captcha image at position (1, 2)");
        assert_eq!(d, Directive::CaptchaGrid { row: 1, col: 2 });
    }

    #[test]
    fn captcha_submit_directive() {
        assert_eq!(parse_directive("click captcha submit"), Directive::CaptchaSubmit);
    }

    #[test]
    fn unsolvable_marker_is_skipped() {
        assert_eq!(
            parse_directive("the embedded challenge is unsolvable, move on"),
            Directive::Skip
        );
    }

    #[test]
    fn garbage_is_unknown_not_a_panic() {
        assert_eq!(parse_directive(""), Directive::Unknown);
        assert_eq!(parse_directive("¯\\_(ツ)_/¯"), Directive::Unknown);
        assert_eq!(parse_directive("do something about the thing"), Directive::Unknown);
    }

    #[test]
    fn structured_action_aliases_normalize() {
        let raw: serde_json::Value =
            serde_json::json!({"action": "type", "selector": "#email", "value": "a@b.c"});
        assert_eq!(
            interpret(&raw),
            Directive::Act(CorrectiveAction::Fill {
                target: "#email".into(),
                value: "a@b.c".into()
            })
        );

        let raw = serde_json::json!({"action": "tick", "target": "Terms"});
        assert_eq!(
            interpret(&raw),
            Directive::Act(CorrectiveAction::Check { target: "Terms".into() })
        );
    }

    #[test]
    fn structured_action_without_target_is_unknown() {
        let raw = serde_json::json!({"action": "click"});
        assert_eq!(interpret(&raw), Directive::Unknown);
    }

    #[test]
    fn non_object_non_string_is_unknown() {
        assert_eq!(interpret(&serde_json::json!(42)), Directive::Unknown);
        assert_eq!(interpret(&serde_json::json!(null)), Directive::Unknown);
    }
}
