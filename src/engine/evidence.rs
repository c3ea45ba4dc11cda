//! Run evidence: the audit trail returned with every result.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

/// Everything a caller needs to audit a run: screenshots around the submit
/// click, the full transcript, per-step latencies and per-category error
/// counts. Created at run start, appended throughout, returned verbatim
/// regardless of outcome.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceBundle {
    pub run_id: uuid::Uuid,
    pub started_at: String,
    /// Base64 PNG captured immediately before the submit click.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_submit_screenshot: Option<String>,
    /// Base64 PNG captured immediately after the submit click.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_submit_screenshot: Option<String>,
    /// Timestamped log transcript, in order.
    pub transcript: Vec<String>,
    /// Per-step latency in milliseconds (navigate, fill_form, captcha, …).
    pub step_latency_ms: BTreeMap<String, u64>,
    /// Per-error-category occurrence counts.
    pub error_counts: BTreeMap<String, u32>,
}

impl EvidenceBundle {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            started_at: Utc::now().to_rfc3339(),
            pre_submit_screenshot: None,
            post_submit_screenshot: None,
            transcript: Vec::new(),
            step_latency_ms: BTreeMap::new(),
            error_counts: BTreeMap::new(),
        }
    }

    /// Append a transcript line and mirror it to the tracing log.
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!(run_id = %self.run_id, "{}", line);
        self.transcript
            .push(format!("{} {}", Utc::now().format("%H:%M:%S%.3f"), line));
    }

    /// Record how long `step` took. Repeated steps accumulate.
    pub fn record_latency(&mut self, step: &str, since: Instant) {
        let ms = since.elapsed().as_millis() as u64;
        *self.step_latency_ms.entry(step.to_string()).or_insert(0) += ms;
    }

    pub fn count_error(&mut self, category: &str) {
        *self.error_counts.entry(category.to_string()).or_insert(0) += 1;
    }

    /// Whether any transcript line contains `needle` — used by callers and
    /// tests to assert on run behavior (e.g. "no submit click recorded").
    pub fn transcript_contains(&self, needle: &str) -> bool {
        self.transcript.iter().any(|l| l.contains(needle))
    }
}

impl Default for EvidenceBundle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_preserves_order() {
        let mut ev = EvidenceBundle::new();
        ev.log("first");
        ev.log("second");
        assert_eq!(ev.transcript.len(), 2);
        assert!(ev.transcript[0].contains("first"));
        assert!(ev.transcript[1].contains("second"));
    }

    #[test]
    fn repeated_steps_accumulate_latency() {
        let mut ev = EvidenceBundle::new();
        let t = Instant::now();
        ev.record_latency("captcha", t);
        ev.record_latency("captcha", t);
        assert_eq!(ev.step_latency_ms.len(), 1);
    }

    #[test]
    fn error_counts_increment_per_category() {
        let mut ev = EvidenceBundle::new();
        ev.count_error("timeout");
        ev.count_error("timeout");
        ev.count_error("service");
        assert_eq!(ev.error_counts["timeout"], 2);
        assert_eq!(ev.error_counts["service"], 1);
    }
}
