use std::path::Path;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// PilotConfig — file-based config loader (formpilot.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Vision-model sub-config (mirrors the `vision` key in formpilot.json).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct VisionConfig {
    /// OpenAI-compatible endpoint — e.g. `https://api.openai.com/v1` or a
    /// local `http://localhost:11434/v1` (Ollama).
    pub base_url: Option<String>,
    /// API key. Never logged. Leave blank for key-less local endpoints.
    pub api_key: Option<String>,
    /// Vision-capable model name — e.g. `gpt-4o-mini`.
    pub model: Option<String>,
    /// Max characters of résumé text forwarded with each screenshot.
    pub resume_excerpt_chars: Option<usize>,
}

impl VisionConfig {
    /// API key: JSON field → `FORMPILOT_VISION_API_KEY` → `OPENAI_API_KEY` → `None`.
    ///
    /// An explicit empty string in the file means "no key required" (local
    /// endpoint); only a fully absent key disables the vision path.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.trim().to_string());
        }
        for var in ["FORMPILOT_VISION_API_KEY", "OPENAI_API_KEY"] {
            if let Ok(v) = std::env::var(var) {
                if !v.trim().is_empty() {
                    return Some(v.trim().to_string());
                }
            }
        }
        None
    }

    /// Base URL: JSON field → `OPENAI_BASE_URL` env var → OpenAI default.
    pub fn resolve_base_url(&self) -> String {
        if let Some(u) = &self.base_url {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
    }

    /// Model name: JSON field → `FORMPILOT_VISION_MODEL` env var → `gpt-4o-mini`.
    pub fn resolve_model(&self) -> String {
        if let Some(m) = &self.model {
            if !m.trim().is_empty() {
                return m.clone();
            }
        }
        std::env::var("FORMPILOT_VISION_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "gpt-4o-mini".to_string())
    }

    pub fn resolve_resume_excerpt_chars(&self) -> usize {
        if let Some(n) = self.resume_excerpt_chars {
            return n;
        }
        std::env::var("FORMPILOT_RESUME_EXCERPT_CHARS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2_000)
    }
}

/// Solving-service sub-config (2captcha-compatible wire).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SolverConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Seconds to keep polling for a solution before degrading to unsolved.
    pub poll_timeout_secs: Option<u64>,
}

impl SolverConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            let k = k.trim();
            if !k.is_empty() {
                return Some(k.to_string());
            }
        }
        for var in ["FORMPILOT_SOLVER_API_KEY", "TWOCAPTCHA_API_KEY"] {
            if let Ok(v) = std::env::var(var) {
                if !v.trim().is_empty() {
                    return Some(v.trim().to_string());
                }
            }
        }
        None
    }

    pub fn resolve_base_url(&self) -> String {
        if let Some(u) = &self.base_url {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var("FORMPILOT_SOLVER_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://2captcha.com".to_string())
    }

    pub fn resolve_poll_timeout_secs(&self) -> u64 {
        if let Some(n) = self.poll_timeout_secs {
            return n;
        }
        std::env::var("FORMPILOT_SOLVER_POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120)
    }
}

/// Browser acquisition sub-config.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct BrowserConfigSection {
    /// Remote vendor CDP websocket (e.g. a residential-proxy browser).
    pub ws_url: Option<String>,
    pub proxy_url: Option<String>,
    pub chrome_executable: Option<String>,
}

impl BrowserConfigSection {
    pub fn resolve_ws_url(&self) -> Option<String> {
        if let Some(u) = &self.ws_url {
            let u = u.trim();
            if !u.is_empty() {
                return Some(u.to_string());
            }
        }
        std::env::var("FORMPILOT_BROWSER_WS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn resolve_proxy_url(&self) -> Option<String> {
        if let Some(u) = &self.proxy_url {
            let u = u.trim();
            if !u.is_empty() {
                return Some(u.to_string());
            }
        }
        std::env::var("FORMPILOT_PROXY_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

/// Engine tuning knobs.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct EngineConfigSection {
    /// Probability of taking the fully humanized fill path instead of a
    /// direct value assignment.
    pub humanize_probability: Option<f64>,
    pub max_concurrent_runs: Option<usize>,
}

impl EngineConfigSection {
    pub fn resolve_humanize_probability(&self) -> f64 {
        if let Some(p) = self.humanize_probability {
            return p.clamp(0.0, 1.0);
        }
        std::env::var("FORMPILOT_HUMANIZE_PROBABILITY")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| p.clamp(0.0, 1.0))
            .unwrap_or(0.7)
    }

    pub fn resolve_max_concurrent_runs(&self) -> usize {
        if let Some(n) = self.max_concurrent_runs {
            return n.max(1);
        }
        std::env::var("FORMPILOT_MAX_CONCURRENT_RUNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4)
    }
}

/// Top-level config loaded from `formpilot.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct PilotConfig {
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub browser: BrowserConfigSection,
    #[serde(default)]
    pub engine: EngineConfigSection,
}

/// Load `formpilot.json` from `FORMPILOT_CONFIG`, the working directory, or
/// fall back to an all-env-var config. A malformed file is a warning, not a
/// startup failure.
pub fn load_pilot_config() -> PilotConfig {
    let explicit = std::env::var("FORMPILOT_CONFIG").ok();
    let candidates: Vec<String> = explicit
        .into_iter()
        .chain(["formpilot.json".to_string()])
        .collect();

    for candidate in candidates {
        if !Path::new(&candidate).exists() {
            continue;
        }
        match std::fs::read_to_string(&candidate) {
            Ok(raw) => match serde_json::from_str::<PilotConfig>(&raw) {
                Ok(cfg) => {
                    info!("loaded config from {}", candidate);
                    return cfg;
                }
                Err(e) => {
                    warn!("config {} is malformed ({}); using env-only config", candidate, e);
                }
            },
            Err(e) => {
                warn!("config {} unreadable ({}); using env-only config", candidate, e);
            }
        }
    }
    PilotConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_api_key_means_keyless_endpoint() {
        let cfg = VisionConfig {
            api_key: Some("".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_api_key(), Some(String::new()));
    }

    #[test]
    fn defaults_resolve_without_file_or_env() {
        let cfg = PilotConfig::default();
        assert_eq!(cfg.solver.resolve_base_url(), "https://2captcha.com");
        assert!(cfg.engine.resolve_humanize_probability() > 0.0);
        assert!(cfg.engine.resolve_max_concurrent_runs() >= 1);
    }

    #[test]
    fn humanize_probability_is_clamped() {
        let cfg = EngineConfigSection {
            humanize_probability: Some(7.5),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_humanize_probability(), 1.0);
    }

    #[test]
    fn config_json_parses_partial_sections() {
        let raw = r#"{"vision": {"model": "pixtral"}, "solver": {}}"#;
        let cfg: PilotConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.vision.resolve_model(), "pixtral");
    }
}
