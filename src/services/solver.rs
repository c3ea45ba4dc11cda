//! Paid CAPTCHA solving-service collaborator (2captcha-compatible wire).
//!
//! The engine submits `(challenge type, site key, page url)` and polls for a
//! token. Network and service failures degrade to an error the caller
//! treats as "not solved" — they never propagate as run-fatal.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::core::config::SolverConfig;
use crate::core::types::CaptchaKind;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver transport error: {0}")]
    Http(String),

    #[error("solver rejected the task: {0}")]
    Service(String),

    #[error("solver did not produce a token in time")]
    Timeout,

    #[error("challenge type {0:?} is not brokered")]
    Unsupported(CaptchaKind),
}

/// Seam for the solving service, so the engine can run against a stub.
#[async_trait]
pub trait TokenSolver: Send + Sync {
    async fn solve(
        &self,
        kind: CaptchaKind,
        site_key: &str,
        page_url: &str,
    ) -> Result<String, SolverError>;
}

/// 2captcha-wire client: `POST /in.php` to create the task, poll
/// `GET /res.php` until the worker produces a token.
pub struct SolvingServiceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_timeout: Duration,
}

impl SolvingServiceClient {
    /// Build from config; `None` when no credential is configured anywhere.
    pub fn from_config(
        http: reqwest::Client,
        cfg: &SolverConfig,
        override_key: Option<String>,
    ) -> Option<Self> {
        let api_key = override_key.or_else(|| cfg.resolve_api_key())?;
        Some(Self {
            http,
            base_url: cfg.resolve_base_url(),
            api_key,
            poll_timeout: Duration::from_secs(cfg.resolve_poll_timeout_secs()),
        })
    }

    fn method_for(kind: CaptchaKind) -> Result<(&'static str, &'static str), SolverError> {
        match kind {
            CaptchaKind::Recaptcha => Ok(("userrecaptcha", "googlekey")),
            CaptchaKind::Hcaptcha => Ok(("hcaptcha", "sitekey")),
            other => Err(SolverError::Unsupported(other)),
        }
    }
}

#[async_trait]
impl TokenSolver for SolvingServiceClient {
    async fn solve(
        &self,
        kind: CaptchaKind,
        site_key: &str,
        page_url: &str,
    ) -> Result<String, SolverError> {
        let (method, key_param) = Self::method_for(kind)?;

        let submit_url = format!("{}/in.php", self.base_url.trim_end_matches('/'));
        let submit: serde_json::Value = self
            .http
            .post(&submit_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("method", method),
                (key_param, site_key),
                ("pageurl", page_url),
                ("json", "1"),
            ])
            .send()
            .await
            .map_err(|e| SolverError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| SolverError::Http(e.to_string()))?;

        if submit.get("status").and_then(|s| s.as_i64()) != Some(1) {
            let reason = submit
                .get("request")
                .and_then(|r| r.as_str())
                .unwrap_or("unknown rejection");
            return Err(SolverError::Service(reason.to_string()));
        }
        let task_id = submit
            .get("request")
            .and_then(|r| r.as_str())
            .ok_or_else(|| SolverError::Service("no task id in response".into()))?
            .to_string();

        debug!(task_id, method, "solver task submitted");

        let poll_url = format!("{}/res.php", self.base_url.trim_end_matches('/'));
        let deadline = std::time::Instant::now() + self.poll_timeout;
        loop {
            if std::time::Instant::now() >= deadline {
                return Err(SolverError::Timeout);
            }
            tokio::time::sleep(Duration::from_secs(5)).await;

            let poll: serde_json::Value = self
                .http
                .get(&poll_url)
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", task_id.as_str()),
                    ("json", "1"),
                ])
                .send()
                .await
                .map_err(|e| SolverError::Http(e.to_string()))?
                .json()
                .await
                .map_err(|e| SolverError::Http(e.to_string()))?;

            if poll.get("status").and_then(|s| s.as_i64()) == Some(1) {
                return poll
                    .get("request")
                    .and_then(|r| r.as_str())
                    .map(|t| t.to_string())
                    .ok_or_else(|| SolverError::Service("empty token".into()));
            }

            let pending = poll.get("request").and_then(|r| r.as_str()).unwrap_or("");
            if pending != "CAPCHA_NOT_READY" {
                return Err(SolverError::Service(pending.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_credential_yields_no_client() {
        let cfg = SolverConfig::default();
        // Only deterministic when the env var is absent; skip otherwise.
        if std::env::var("TWOCAPTCHA_API_KEY").is_ok()
            || std::env::var("FORMPILOT_SOLVER_API_KEY").is_ok()
        {
            return;
        }
        assert!(SolvingServiceClient::from_config(reqwest::Client::new(), &cfg, None).is_none());
    }

    #[test]
    fn per_request_key_overrides_config() {
        let cfg = SolverConfig::default();
        let client =
            SolvingServiceClient::from_config(reqwest::Client::new(), &cfg, Some("k".into()));
        assert!(client.is_some());
    }

    #[test]
    fn only_token_challenges_are_brokered() {
        assert!(SolvingServiceClient::method_for(CaptchaKind::Recaptcha).is_ok());
        assert!(SolvingServiceClient::method_for(CaptchaKind::Hcaptcha).is_ok());
        assert!(matches!(
            SolvingServiceClient::method_for(CaptchaKind::Text),
            Err(SolverError::Unsupported(_))
        ));
    }
}
