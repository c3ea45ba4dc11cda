use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::engine::evidence::EvidenceBundle;

/// Inbound application request.
///
/// `job_url` and `email` are mandatory; everything else is best-effort
/// material for the field-resolution chain. Per-request credentials override
/// the file/env config so multi-tenant callers can bring their own keys.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApplicationRequest {
    #[serde(default)]
    pub job_url: String,
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub current_company: Option<String>,
    #[serde(default)]
    pub current_location: Option<String>,
    #[serde(default)]
    pub salary_expectation: Option<String>,
    #[serde(default)]
    pub notice_period: Option<String>,
    #[serde(default)]
    pub note: Option<String>,

    /// Résumé by URL (fetched) or embedded base64 bytes. URL wins when both
    /// are present.
    #[serde(default)]
    pub resume_url: Option<String>,
    #[serde(default)]
    pub resume_base64: Option<String>,

    /// Fill the form but never click submit; short-circuits the whole
    /// submit/verify loop.
    #[serde(default)]
    pub plan_only: bool,
    /// Explicit consent to click submit. Without it the run halts at
    /// `awaiting_consent` with the form filled.
    #[serde(default)]
    pub allow_submit: bool,

    #[serde(default)]
    pub vision_api_key: Option<String>,
    #[serde(default)]
    pub solver_api_key: Option<String>,
    /// Remote vendor browser (CDP websocket). When set, the run drives the
    /// vendor session instead of launching a local browser.
    #[serde(default)]
    pub browser_ws_url: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl ApplicationRequest {
    /// Names of mandatory fields that are absent. Empty means the request
    /// passes the precondition gate.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.job_url.trim().is_empty() {
            missing.push("job_url");
        }
        if self.email.trim().is_empty() {
            missing.push("email");
        }
        missing
    }
}

/// Where a run currently is. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Initial,
    PageLoaded,
    FormOpened,
    FillingForm,
    Submitted,
    Done,
}

/// Mutable run record. Owned by exactly one orchestrator run; never shared
/// across concurrent jobs.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationState {
    pub step: Step,
    /// Logical field names successfully filled. A set, so re-filling the
    /// same field is idempotent.
    pub filled_fields: BTreeSet<String>,
    /// Ordered record of everything that went wrong but didn't stop the run.
    pub issues: Vec<String>,
    pub captcha_solved: bool,
    pub platform: Option<String>,
}

impl ApplicationState {
    pub fn new() -> Self {
        Self {
            step: Step::Initial,
            filled_fields: BTreeSet::new(),
            issues: Vec::new(),
            captcha_solved: false,
            platform: None,
        }
    }

    pub fn advance(&mut self, step: Step) {
        self.step = step;
    }

    pub fn mark_filled(&mut self, field: &str) {
        self.filled_fields.insert(field.to_string());
    }

    pub fn record_issue(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }
}

impl Default for ApplicationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    MissingFields,
    PlannedOnly,
    AwaitingConsent,
    Submitted,
    NotConfirmed,
    MaxRetriesReached,
    Error,
}

impl ApplicationStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ApplicationStatus::Submitted)
    }
}

/// Normalized result returned for every run, fatal errors included.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationResult {
    pub ok: bool,
    pub status: ApplicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub elapsed_ms: u64,
    pub state: ApplicationState,
    pub evidence: EvidenceBundle,
    /// Flat copy of the evidence transcript for callers that only want logs.
    pub log: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Detected CAPTCHA challenge kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaKind {
    Recaptcha,
    Hcaptcha,
    Text,
    Audio,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaOutcome {
    Solved,
    NotDetected,
    Unsolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    pub kind: CaptchaKind,
    #[serde(default)]
    pub site_key: Option<String>,
    pub outcome: CaptchaOutcome,
}

/// One discrete page operation derived from a vision verdict.
///
/// `target` is preferably a human-readable label; execution falls back to
/// treating it as a raw selector or visible text when no label matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CorrectiveAction {
    Fill { target: String, value: String },
    Select { target: String, value: String },
    Check { target: String },
    Click { target: String },
}

impl CorrectiveAction {
    pub fn target(&self) -> &str {
        match self {
            CorrectiveAction::Fill { target, .. }
            | CorrectiveAction::Select { target, .. }
            | CorrectiveAction::Check { target }
            | CorrectiveAction::Click { target } => target,
        }
    }
}

/// Judgment returned by the vision model for one submission attempt.
///
/// `instructions` keeps the model's raw items — structured objects or
/// free-text directives — and the interpreter normalizes both forms into
/// [`CorrectiveAction`]s at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionVerdict {
    pub success: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub instructions: Vec<serde_json::Value>,
    #[serde(default)]
    pub captcha_type: Option<String>,
}

impl VisionVerdict {
    /// The verdict used whenever the model can't be consulted.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            instructions: Vec::new(),
            captcha_type: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_flags_both_mandatory_fields() {
        let req = ApplicationRequest::default();
        assert_eq!(req.missing_fields(), vec!["job_url", "email"]);

        let req = ApplicationRequest {
            job_url: "https://jobs.example.com/123".into(),
            email: "a@b.c".into(),
            ..Default::default()
        };
        assert!(req.missing_fields().is_empty());
    }

    #[test]
    fn whitespace_only_counts_as_missing() {
        let req = ApplicationRequest {
            job_url: "   ".into(),
            email: "a@b.c".into(),
            ..Default::default()
        };
        assert_eq!(req.missing_fields(), vec!["job_url"]);
    }

    #[test]
    fn filled_fields_set_is_idempotent() {
        let mut state = ApplicationState::new();
        state.mark_filled("email");
        state.mark_filled("email");
        assert_eq!(state.filled_fields.len(), 1);
    }

    #[test]
    fn corrective_action_round_trips_tagged_json() {
        let json = r#"{"action":"fill","target":"First name","value":"Ada"}"#;
        let action: CorrectiveAction = serde_json::from_str(json).unwrap();
        assert_eq!(
            action,
            CorrectiveAction::Fill {
                target: "First name".into(),
                value: "Ada".into()
            }
        );
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&ApplicationStatus::AwaitingConsent).unwrap();
        assert_eq!(s, r#""awaiting_consent""#);
    }
}
