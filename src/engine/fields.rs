//! Field resolution chain.
//!
//! For each logical field the chain tries, in order: visible-label match,
//! curated attribute patterns, and (for autocomplete-style fields) a
//! fill-open-pick flow with an Enter fallback. The first strategy that
//! resolves a control wins. Empty values are skipped; exhausting every
//! strategy records an issue but never fails the run.

use chromiumoxide::Page;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::core::error::{EngineError, EngineResult};
use crate::core::types::ApplicationState;
use crate::engine::evidence::EvidenceBundle;
use crate::engine::humanize::{Humanizer, Think};
use crate::engine::locator;
use crate::engine::platform::Ats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Location-style fields backed by a suggestion dropdown.
    Autocomplete,
}

/// One logical field: what to type and how to find its control.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub value: String,
    pub kind: FieldKind,
    labels: &'static [&'static str],
    patterns: &'static [&'static str],
}

/// Build the fill list for a request, preferring request values over
/// résumé-extracted ones.
pub fn specs_for(
    req: &crate::core::types::ApplicationRequest,
    extracted: &BTreeMap<String, String>,
) -> Vec<FieldSpec> {
    let pick = |direct: &Option<String>, key: &str| -> String {
        direct
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| extracted.get(key).cloned())
            .unwrap_or_default()
    };

    vec![
        FieldSpec {
            name: "full_name",
            value: pick(&req.full_name, "full_name"),
            kind: FieldKind::Text,
            labels: &["full name", "your name", "name"],
            patterns: &["full_name", "fullname", "full-name", "applicant", "name"],
        },
        FieldSpec {
            name: "email",
            value: req.email.clone(),
            kind: FieldKind::Text,
            labels: &["email"],
            patterns: &["email", "e-mail"],
        },
        FieldSpec {
            name: "phone",
            value: pick(&req.phone, "phone"),
            kind: FieldKind::Text,
            labels: &["phone", "mobile"],
            patterns: &["phone", "mobile", "tel"],
        },
        FieldSpec {
            name: "location",
            value: pick(&req.location, "location"),
            kind: FieldKind::Autocomplete,
            labels: &["location", "city"],
            patterns: &["location", "city"],
        },
        FieldSpec {
            name: "current_company",
            value: pick(&req.current_company, "current_company"),
            kind: FieldKind::Text,
            labels: &["current company", "company", "employer"],
            patterns: &["company", "employer", "organization", "org"],
        },
        FieldSpec {
            name: "current_location",
            value: req.current_location.clone().unwrap_or_default(),
            kind: FieldKind::Autocomplete,
            labels: &["current location", "where are you based"],
            patterns: &["current_location", "current-location"],
        },
        FieldSpec {
            name: "salary_expectation",
            value: req.salary_expectation.clone().unwrap_or_default(),
            kind: FieldKind::Text,
            labels: &["salary", "compensation", "expected salary"],
            patterns: &["salary", "compensation", "pay_expectation"],
        },
        FieldSpec {
            name: "notice_period",
            value: req.notice_period.clone().unwrap_or_default(),
            kind: FieldKind::Text,
            labels: &["notice period", "availability", "earliest start"],
            patterns: &["notice", "availability", "start_date"],
        },
        FieldSpec {
            name: "note",
            value: req.note.clone().unwrap_or_default(),
            kind: FieldKind::Text,
            labels: &["cover letter", "message", "additional information", "why do you want"],
            patterns: &["cover_letter", "coverletter", "message", "comments", "additional"],
        },
    ]
}

/// Locate the control for `spec`, trying labels first, then platform-specific
/// patterns, then the generic pattern set. Leaves the winner marked.
async fn locate(page: &Page, ats: Ats, spec: &FieldSpec) -> bool {
    for label in spec.labels {
        if locator::mark_by_label(page, label).await {
            debug!(field = spec.name, label, "resolved by label");
            return true;
        }
    }
    let extras = ats.extra_patterns(spec.name);
    if !extras.is_empty() && locator::mark_by_attr_patterns(page, extras).await {
        debug!(field = spec.name, "resolved by platform pattern");
        return true;
    }
    if locator::mark_by_attr_patterns(page, spec.patterns).await {
        debug!(field = spec.name, "resolved by generic pattern");
        return true;
    }
    false
}

/// Write `spec.value` into the marked control, humanized or direct.
async fn write_value(page: &Page, humanizer: &Humanizer, spec: &FieldSpec) -> EngineResult<()> {
    if locator::marked_tag(page).await == "select" {
        if locator::select_marked_option(page, &spec.value).await {
            return Ok(());
        }
        return Err(EngineError::NotFound(format!(
            "no matching option for {}",
            spec.name
        )));
    }

    if humanizer.roll_humanized() {
        humanizer.think(Think::SimpleField).await;
        if let Some(rect) = locator::marked_rect(page).await {
            humanizer.click_rect(page, rect).await;
        }
        if let Some(el) = locator::marked_element(page).await {
            humanizer.type_text(page, &el, &spec.value).await;
            return Ok(());
        }
        // Element vanished between mark and act; fall through to direct set.
    }

    if locator::set_marked_value(page, &spec.value).await {
        Ok(())
    } else {
        Err(EngineError::NotFound(format!(
            "control for {} disappeared before write",
            spec.name
        )))
    }
}

/// Autocomplete flow: type the value, wait briefly for a suggestion list,
/// pick the first suggestion — or fall back to committing with Enter.
async fn write_autocomplete(
    page: &Page,
    humanizer: &Humanizer,
    spec: &FieldSpec,
) -> EngineResult<()> {
    let element = locator::marked_element(page)
        .await
        .ok_or_else(|| EngineError::NotFound(format!("control for {} vanished", spec.name)))?;

    if let Some(rect) = locator::marked_rect(page).await {
        humanizer.click_rect(page, rect).await;
    }
    humanizer.type_text(page, &element, &spec.value).await;

    // Suggestion lists render asynchronously; poll for a short window.
    const OPTION_SELECTOR: &str = r#"[role="listbox"] [role="option"], ul[class*="autocomplete" i] li, .pac-item"#;
    let mut dropdown_seen = false;
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        if locator::mark_by_selector(page, OPTION_SELECTOR).await {
            dropdown_seen = true;
            break;
        }
    }

    if dropdown_seen {
        if let Some(rect) = locator::marked_rect(page).await {
            humanizer.think(Think::Decision).await;
            humanizer.click_rect(page, rect).await;
            return Ok(());
        }
    }

    // No list appeared (or it despawned): commit what was typed.
    let _ = element.press_key("Enter").await;
    Ok(())
}

/// Fill one field through the strategy chain.
pub async fn fill_field(
    page: &Page,
    humanizer: &Humanizer,
    ats: Ats,
    spec: &FieldSpec,
) -> EngineResult<()> {
    if !locate(page, ats, spec).await {
        return Err(EngineError::NotFound(format!(
            "no control found for {}",
            spec.name
        )));
    }

    let result = match spec.kind {
        FieldKind::Autocomplete => write_autocomplete(page, humanizer, spec).await,
        FieldKind::Text => write_value(page, humanizer, spec).await,
    };
    locator::clear_mark(page).await;
    result
}

/// Fill every non-empty, not-yet-filled field. Failures become issues, never
/// errors. Returns the number of fields newly filled.
pub async fn fill_all(
    page: &Page,
    humanizer: &Humanizer,
    ats: Ats,
    specs: &[FieldSpec],
    state: &mut ApplicationState,
    evidence: &mut EvidenceBundle,
) -> usize {
    let mut filled = 0usize;
    for spec in specs {
        if spec.value.trim().is_empty() {
            continue;
        }
        if state.filled_fields.contains(spec.name) {
            continue;
        }
        match fill_field(page, humanizer, ats, spec).await {
            Ok(()) => {
                state.mark_filled(spec.name);
                evidence.log(format!("filled field {}", spec.name));
                filled += 1;
            }
            Err(e) => {
                evidence.count_error(e.category());
                evidence.log(format!("field {} unresolved: {}", spec.name, e));
                state.record_issue(format!("field {} unresolved", spec.name));
            }
        }
        humanizer.random_break().await;
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ApplicationRequest;

    fn request() -> ApplicationRequest {
        ApplicationRequest {
            job_url: "https://jobs.example.com/1".into(),
            email: "ada@example.com".into(),
            full_name: Some("Ada Lovelace".into()),
            ..Default::default()
        }
    }

    #[test]
    fn request_values_win_over_extracted_values() {
        let mut extracted = BTreeMap::new();
        extracted.insert("full_name".to_string(), "Wrong Name".to_string());
        let specs = specs_for(&request(), &extracted);
        let name = specs.iter().find(|s| s.name == "full_name").unwrap();
        assert_eq!(name.value, "Ada Lovelace");
    }

    #[test]
    fn extracted_values_backfill_absent_request_fields() {
        let mut extracted = BTreeMap::new();
        extracted.insert("phone".to_string(), "+44 20 7946 0000".to_string());
        let specs = specs_for(&request(), &extracted);
        let phone = specs.iter().find(|s| s.name == "phone").unwrap();
        assert_eq!(phone.value, "+44 20 7946 0000");
    }

    #[test]
    fn location_fields_use_the_autocomplete_flow() {
        let specs = specs_for(&request(), &BTreeMap::new());
        let loc = specs.iter().find(|s| s.name == "location").unwrap();
        assert_eq!(loc.kind, FieldKind::Autocomplete);
    }

    #[test]
    fn email_spec_always_carries_the_request_email() {
        let specs = specs_for(&request(), &BTreeMap::new());
        let email = specs.iter().find(|s| s.name == "email").unwrap();
        assert_eq!(email.value, "ada@example.com");
    }
}
