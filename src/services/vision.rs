//! Vision-model collaborator.
//!
//! Sends the latest full-page screenshot, a truncated résumé excerpt, and
//! the known applicant values to an OpenAI-compatible vision model and asks
//! for a strict-JSON verdict. Everything degrades: no credential yields a
//! fixed failing verdict, and unparseable model output is rescued once
//! (code-fence unwrap, then first-brace extraction) before giving up.

use std::collections::BTreeMap;
use tracing::warn;

use crate::core::config::VisionConfig;
use crate::core::types::VisionVerdict;

const SYSTEM_PROMPT: &str = "You are a form-submission auditor. You inspect a screenshot of a job-application page and decide whether the application was submitted successfully. Respond with STRICT JSON only, no prose, no markdown fences: {\"success\": bool, \"reason\": string, \"instructions\": [{\"action\": \"fill|select|check|click\", \"selector\": string, \"value\": string}], \"captcha_type\": string|null}. `instructions` lists corrective page actions to try when the submission did not go through; use visible field labels as selectors where possible. Use an empty list when nothing can be done.";

/// Client for one run. Carries the resolved credential so per-request keys
/// override the file/env config.
#[derive(Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl VisionClient {
    pub fn from_config(
        http: reqwest::Client,
        cfg: &VisionConfig,
        override_key: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: cfg.resolve_base_url(),
            model: cfg.resolve_model(),
            api_key: override_key.or_else(|| cfg.resolve_api_key()),
        }
    }

    /// Whether a verdict request would actually reach a model.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Ask the model for a verdict. Never errors — every failure path
    /// collapses into a failing `VisionVerdict`.
    pub async fn assess(
        &self,
        screenshot_b64: &str,
        resume_excerpt: &str,
        known_fields: &BTreeMap<String, String>,
    ) -> VisionVerdict {
        let Some(api_key) = self.api_key.as_deref() else {
            return VisionVerdict::failure("API key not provided");
        };

        let fields: Vec<String> = known_fields
            .iter()
            .map(|(k, v)| format!("- {}: {}", k, v))
            .collect();
        let user_text = format!(
            "Did this job application submit successfully? If not, list corrective actions.\n\nApplicant fields:\n{}\n\nRésumé excerpt:\n{}",
            fields.join("\n"),
            resume_excerpt,
        );

        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": [
                    {"type": "text", "text": user_text},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:image/png;base64,{}", screenshot_b64)
                    }}
                ]}
            ]
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let builder = self.http.post(url).json(&body);
        // Key-less local endpoints work without the Authorization header.
        let builder = if api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(api_key.trim())
        };

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("vision request failed: {}", e);
                return VisionVerdict::failure(format!("vision request failed: {}", e));
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            return VisionVerdict::failure(format!("vision endpoint returned {}", status));
        }

        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return VisionVerdict::failure(format!("vision response unreadable: {}", e)),
        };

        let content = value
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();

        parse_verdict(content)
    }
}

/// Strip a single leading/trailing markdown code fence, with or without a
/// language tag.
pub fn unwrap_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse model output into a verdict: direct JSON first, then a best-effort
/// extraction of the first brace-delimited object, then a failing verdict.
pub fn parse_verdict(text: &str) -> VisionVerdict {
    let unwrapped = unwrap_code_fences(text);
    if let Ok(verdict) = serde_json::from_str::<VisionVerdict>(unwrapped) {
        return verdict;
    }

    if let (Some(start), Some(end)) = (unwrapped.find('{'), unwrapped.rfind('}')) {
        if start < end {
            if let Ok(verdict) = serde_json::from_str::<VisionVerdict>(&unwrapped[start..=end]) {
                return verdict;
            }
        }
    }

    warn!("vision verdict unparseable ({} chars)", text.len());
    VisionVerdict::failure("model response was not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_json_parses() {
        let v = parse_verdict(r#"{"success": true, "reason": "confirmation page visible", "instructions": []}"#);
        assert!(v.success);
        assert_eq!(v.reason, "confirmation page visible");
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let text = "```json\n{\"success\": false, \"reason\": \"missing phone\", \"instructions\": [\"fill Phone with '555'\"]}\n```";
        let v = parse_verdict(text);
        assert!(!v.success);
        assert_eq!(v.instructions.len(), 1);
    }

    #[test]
    fn prose_wrapped_json_is_rescued() {
        let text = "Here is my assessment: {\"success\": false, \"reason\": \"form error banner\", \"instructions\": []} Hope that helps!";
        let v = parse_verdict(text);
        assert!(!v.success);
        assert_eq!(v.reason, "form error banner");
    }

    #[test]
    fn garbage_yields_failing_verdict_with_no_instructions() {
        let v = parse_verdict("I can't tell, sorry");
        assert!(!v.success);
        assert!(v.instructions.is_empty());
    }

    #[test]
    fn fence_without_language_tag() {
        assert_eq!(unwrap_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(unwrap_code_fences("plain"), "plain");
    }

    #[tokio::test]
    async fn missing_credential_short_circuits() {
        let client = VisionClient {
            http: reqwest::Client::new(),
            base_url: "http://localhost:0".into(),
            model: "m".into(),
            api_key: None,
        };
        let v = client.assess("", "", &BTreeMap::new()).await;
        assert!(!v.success);
        assert_eq!(v.reason, "API key not provided");
        assert!(v.instructions.is_empty());
    }
}
