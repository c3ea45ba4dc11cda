use std::env;
use std::sync::Arc;

/// Shared server state. Each application run is otherwise fully isolated —
/// one browser session, one page, one state record per run.
#[derive(Clone)]
pub struct AppState {
    pub http_client: reqwest::Client,
    /// File-based config loaded from `formpilot.json` (env-var fallback for all fields).
    pub config: Arc<crate::core::config::PilotConfig>,
    /// Caps the number of concurrent browser sessions on this host.
    pub run_limit: Arc<tokio::sync::Semaphore>,
    /// Per-host ATS classification cache — repeat applications to the same
    /// board skip re-detection.
    pub ats_cache: moka::future::Cache<String, crate::engine::platform::PlatformMatch>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("available_run_permits", &self.run_limit.available_permits())
            .finish()
    }
}

impl AppState {
    pub fn new(http_client: reqwest::Client) -> Self {
        let config = Arc::new(crate::core::config::load_pilot_config());
        Self::with_config(http_client, config)
    }

    pub fn with_config(
        http_client: reqwest::Client,
        config: Arc<crate::core::config::PilotConfig>,
    ) -> Self {
        let max_runs = env::var("FORMPILOT_MAX_CONCURRENT_RUNS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or_else(|| config.engine.resolve_max_concurrent_runs());

        Self {
            http_client,
            config,
            run_limit: Arc::new(tokio::sync::Semaphore::new(max_runs)),
            ats_cache: moka::future::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(std::time::Duration::from_secs(60 * 60))
                .build(),
        }
    }
}
