//! Applicant-tracking-system classification.
//!
//! URL/domain matches are high confidence, HTML-marker-only matches are
//! medium, anything else falls back to the generic attribute-pattern
//! selector set at low/none. The detected platform only gates opportunistic
//! extras — it is never required for a run to succeed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ats {
    Greenhouse,
    Lever,
    Workday,
    Ashby,
    SmartRecruiters,
    Icims,
    Generic,
}

impl Ats {
    pub fn name(self) -> &'static str {
        match self {
            Ats::Greenhouse => "greenhouse",
            Ats::Lever => "lever",
            Ats::Workday => "workday",
            Ats::Ashby => "ashby",
            Ats::SmartRecruiters => "smartrecruiters",
            Ats::Icims => "icims",
            Ats::Generic => "generic",
        }
    }

    /// Platform-specific attribute patterns consulted *before* the generic
    /// set for a logical field.
    pub fn extra_patterns(self, field: &str) -> &'static [&'static str] {
        match (self, field) {
            (Ats::Greenhouse, "full_name") => &["first_name", "last_name"],
            (Ats::Greenhouse, "phone") => &["phone"],
            (Ats::Lever, "full_name") => &["name"],
            (Ats::Lever, "current_company") => &["org"],
            (Ats::Workday, _) => &["data-automation-id"],
            (Ats::Ashby, "location") => &["_systemfield_location"],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    None,
}

/// Classification result; cached per host on `AppState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformMatch {
    pub ats: Ats,
    pub confidence: Confidence,
}

/// Priority-ordered catalog: (platform, URL substrings, HTML markers).
const CATALOG: &[(Ats, &[&str], &[&str])] = &[
    (
        Ats::Greenhouse,
        &["greenhouse.io", "boards.greenhouse"],
        &["greenhouse-job-board", "grnhse", "boards.greenhouse.io"],
    ),
    (
        Ats::Lever,
        &["jobs.lever.co", "lever.co"],
        &["lever-job", "postings.lever", "lever-application"],
    ),
    (
        Ats::Workday,
        &["myworkdayjobs.com", "workday.com"],
        &["data-automation-id", "workday"],
    ),
    (
        Ats::Ashby,
        &["jobs.ashbyhq.com", "ashbyhq.com"],
        &["ashby_embed", "_systemfield_", "ashbyhq"],
    ),
    (
        Ats::SmartRecruiters,
        &["smartrecruiters.com", "jobs.smartrecruiters"],
        &["smartrecruiters", "sr-job"],
    ),
    (
        Ats::Icims,
        &["icims.com"],
        &["icims_content", "iCIMS"],
    ),
];

/// Classify the hosting ATS from the final URL and rendered HTML.
pub fn detect(url: &str, html: &str) -> PlatformMatch {
    let url_lower = url.to_lowercase();
    let html_lower = html.to_lowercase();

    for (ats, url_subs, _) in CATALOG {
        if url_subs.iter().any(|s| url_lower.contains(s)) {
            return PlatformMatch {
                ats: *ats,
                confidence: Confidence::High,
            };
        }
    }

    for (ats, _, markers) in CATALOG {
        if markers
            .iter()
            .any(|m| html_lower.contains(&m.to_lowercase()))
        {
            return PlatformMatch {
                ats: *ats,
                confidence: Confidence::Medium,
            };
        }
    }

    let confidence = if html_lower.contains("<form") {
        Confidence::Low
    } else {
        Confidence::None
    };
    PlatformMatch {
        ats: Ats::Generic,
        confidence,
    }
}

/// Opportunistic platform-specific touches — populating a "how did you hear
/// about us" control, a portfolio/website URL — applied after the generic
/// fill pass. Best-effort by definition: nothing here is required for the
/// run to succeed.
pub async fn apply_extras(
    page: &chromiumoxide::Page,
    ats: Ats,
    req: &crate::core::types::ApplicationRequest,
    evidence: &mut crate::engine::evidence::EvidenceBundle,
) {
    use crate::engine::locator;

    if matches!(ats, Ats::Greenhouse | Ats::Lever | Ats::Ashby) {
        if locator::mark_by_label(page, "how did you hear").await
            && locator::marked_tag(page).await == "select"
            && locator::select_marked_option(page, "other").await
        {
            evidence.log("platform extra: answered source question");
        }
        locator::clear_mark(page).await;
    }

    // A note that looks like a URL doubles as a portfolio link.
    if let Some(note) = req.note.as_deref() {
        if note.starts_with("http") && !note.contains(' ') {
            if locator::mark_by_label(page, "portfolio").await
                || locator::mark_by_label(page, "website").await
            {
                if locator::set_marked_value(page, note).await {
                    evidence.log("platform extra: filled portfolio url");
                }
            }
            locator::clear_mark(page).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_match_beats_html_markers() {
        // HTML says lever, URL says greenhouse — URL wins at high confidence.
        let m = detect(
            "https://boards.greenhouse.io/acme/jobs/123",
            "<div class='lever-job'></div>",
        );
        assert_eq!(m.ats, Ats::Greenhouse);
        assert_eq!(m.confidence, Confidence::High);
    }

    #[test]
    fn html_marker_only_is_medium_confidence() {
        let m = detect(
            "https://careers.acme.com/apply",
            "<div data-automation-id='jobTitle'></div>",
        );
        assert_eq!(m.ats, Ats::Workday);
        assert_eq!(m.confidence, Confidence::Medium);
    }

    #[test]
    fn unmatched_page_with_form_is_generic_low() {
        let m = detect("https://acme.example/jobs", "<form><input></form>");
        assert_eq!(m.ats, Ats::Generic);
        assert_eq!(m.confidence, Confidence::Low);
    }

    #[test]
    fn unmatched_page_without_form_is_none() {
        let m = detect("https://acme.example", "<p>hello</p>");
        assert_eq!(m.ats, Ats::Generic);
        assert_eq!(m.confidence, Confidence::None);
    }

    #[test]
    fn catalog_priority_is_stable() {
        let m = detect("https://x.myworkdayjobs.com/en-US/job/1", "");
        assert_eq!(m.ats, Ats::Workday);
    }
}
