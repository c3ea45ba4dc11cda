//! Browser session acquisition and navigation.
//!
//! This module is the single source of truth for:
//! * Finding a usable browser executable (Brave → Chrome → Chromium, cross-platform).
//! * Launching a hardened local headless session, or connecting to a remote
//!   vendor browser over its CDP websocket (bounded retries, local fallback).
//! * Navigation with a ladder of progressively looser readiness strategies.
//! * Page settle / text / screenshot primitives used by the engine.
//!
//! The orchestrator must behave identically against a local or a vendor
//! session, so everything vendor-specific stops at `SessionOptions`.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use rand::seq::IndexedRandom;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::error::{EngineError, EngineResult};

// ── Realistic User-Agent pool ────────────────────────────────────────────────

const DESKTOP_USER_AGENTS: &[&str] = &[
    // Chrome 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 132 – macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 131 – Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Edge 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

/// Returns a randomly-chosen realistic desktop User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan via `which`
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    for exe in [
        "brave-browser",
        "brave",
        "google-chrome",
        "chromium",
        "chromium-browser",
        "chrome",
    ] {
        if let Ok(full) = which::which(exe) {
            return Some(full.to_string_lossy().to_string());
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/brave-browser",
            "/usr/bin/brave",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Returns `true` when a usable browser binary is present on this machine.
pub fn native_browser_available() -> bool {
    find_chrome_executable().is_some()
}

// ── Hardened browser config builder ──────────────────────────────────────────

/// Build a `BrowserConfig` for headless operation with stealth defaults.
///
/// `--disable-blink-features=AutomationControlled` hides the
/// `navigator.webdriver` flag; UA is randomly drawn from the desktop pool.
pub fn build_hardened_config(
    exe: &str,
    proxy_url: Option<&str>,
    width: u32,
    height: u32,
) -> Result<BrowserConfig> {
    let ua = random_user_agent();

    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--disable-gpu")
        .arg("--no-sandbox") // often required in CI / restricted environments
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-crash-reporter")
        .arg("--disable-breakpad")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        // Stealth: suppress CDP automation fingerprint
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua));

    if let Some(proxy) = proxy_url {
        builder = builder.arg(format!("--proxy-server={}", proxy));
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

// ── Session ─────────────────────────────────────────────────────────────────

/// How a session should be acquired.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Remote vendor CDP websocket. When present, connection is attempted
    /// (bounded retries) before falling back to a local launch.
    pub ws_url: Option<String>,
    pub proxy_url: Option<String>,
}

/// One live browser + page, owned by exactly one run.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    /// True when driving a vendor browser — managed CAPTCHA resolution is
    /// only meaningful there.
    pub is_remote: bool,
}

impl BrowserSession {
    /// Acquire a session per `opts`: vendor websocket first (with bounded
    /// backoff), hardened local launch otherwise or as fallback.
    pub async fn acquire(opts: &SessionOptions) -> EngineResult<Self> {
        if let Some(ws) = opts.ws_url.as_deref() {
            match Self::connect_remote(ws).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!("vendor browser unavailable ({}); falling back to local launch", e);
                }
            }
        }
        Self::launch_local(opts.proxy_url.as_deref()).await
    }

    /// Connect to a remote vendor browser, retrying transient failures for a
    /// bounded window.
    async fn connect_remote(ws_url: &str) -> Result<Self> {
        let (browser, mut handler) = backoff::future::retry(
            backoff::ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(500))
                .with_max_interval(Duration::from_secs(4))
                .with_max_elapsed_time(Some(Duration::from_secs(20)))
                .build(),
            || async {
                Browser::connect(ws_url.to_string())
                    .await
                    .map_err(|e| backoff::Error::transient(anyhow!("connect failed: {}", e)))
            },
        )
        .await?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("vendor CDP handler error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("vendor new_page failed: {}", e))?;

        info!("connected to vendor browser session");
        Ok(Self {
            browser,
            handler_task,
            page,
            is_remote: true,
        })
    }

    /// Launch a hardened local headless browser and open a blank page with
    /// the fingerprint-suppression script installed.
    async fn launch_local(proxy_url: Option<&str>) -> EngineResult<Self> {
        let exe = find_chrome_executable().ok_or_else(|| {
            EngineError::Browser(
                "no browser found; install Brave, Chrome, or Chromium (or set CHROME_EXECUTABLE)"
                    .to_string(),
            )
        })?;

        info!("launching hardened local browser ({})", exe);

        let config = build_hardened_config(&exe, proxy_url, 1366, 900)
            .map_err(|e| EngineError::Browser(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::Browser(format!("launch failed ({}): {}", exe, e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::Browser(format!("new_page failed: {}", e)))?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            crate::browser::stealth::hardening_script(),
        ))
        .await
        .map_err(|e| EngineError::Browser(format!("stealth injection failed: {}", e)))?;

        Ok(Self {
            browser,
            handler_task,
            page,
            is_remote: false,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigate with progressively looser readiness criteria.
    ///
    /// Ladder: full load event + network-idle settle → load event with a
    /// fixed grace → fire-and-wait. Only when every rung fails is the
    /// navigation considered dead.
    pub async fn navigate(&self, url: &str) -> EngineResult<()> {
        let mut last_err = String::new();

        for (attempt, strategy) in ["settled", "loaded", "loose"].iter().enumerate() {
            let result: Result<()> = async {
                self.page
                    .goto(url)
                    .await
                    .map_err(|e| anyhow!("goto: {}", e))?;
                match *strategy {
                    "settled" => {
                        tokio::time::timeout(
                            Duration::from_secs(15),
                            self.page.wait_for_navigation(),
                        )
                        .await
                        .map_err(|_| anyhow!("load event timeout"))?
                        .map_err(|e| anyhow!("navigation: {}", e))?;
                        self.wait_until_stable(1_500, 8_000).await;
                    }
                    "loaded" => {
                        tokio::time::timeout(
                            Duration::from_secs(10),
                            self.page.wait_for_navigation(),
                        )
                        .await
                        .map_err(|_| anyhow!("load event timeout"))?
                        .map_err(|e| anyhow!("navigation: {}", e))?;
                        tokio::time::sleep(Duration::from_millis(2_000)).await;
                    }
                    _ => {
                        // Last rung: give the page a short grace and accept
                        // whatever state it is in.
                        tokio::time::sleep(Duration::from_millis(2_500)).await;
                    }
                }
                Ok(())
            }
            .await;

            match result {
                Ok(()) => {
                    info!("navigated to {} (strategy: {})", url, strategy);
                    return Ok(());
                }
                Err(e) => {
                    warn!("navigation attempt {} ({}) failed: {}", attempt + 1, strategy, e);
                    last_err = e.to_string();
                }
            }
        }

        Err(EngineError::Navigation(format!("{}: {}", url, last_err)))
    }

    /// Wait until the page network goes idle (no new resource entries for
    /// `quiet_ms` consecutive ms) or until `timeout_ms` has elapsed.
    ///
    /// Polls `performance.getEntriesByType("resource").length` every 250 ms —
    /// a Playwright-style networkidle heuristic that works without CDP
    /// Network events.
    pub async fn wait_until_stable(&self, quiet_ms: u64, timeout_ms: u64) {
        let poll_ms = 250u64;
        let start = std::time::Instant::now();
        let mut last_count: u64 = 0;
        let mut stable_since = std::time::Instant::now();

        loop {
            if start.elapsed().as_millis() as u64 >= timeout_ms {
                break;
            }

            let count: u64 = self
                .page
                .evaluate("performance.getEntriesByType('resource').length")
                .await
                .ok()
                .and_then(|v| v.into_value::<serde_json::Value>().ok())
                .and_then(|j| j.as_u64())
                .unwrap_or(0);

            let ready_complete: bool = self
                .page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|v| v.into_value::<serde_json::Value>().ok())
                .and_then(|j| j.as_str().map(|s| s == "complete"))
                .unwrap_or(false);

            if !ready_complete {
                stable_since = std::time::Instant::now();
                last_count = count;
            } else if count != last_count {
                last_count = count;
                stable_since = std::time::Instant::now();
            } else if stable_since.elapsed().as_millis() as u64 >= quiet_ms {
                break;
            }

            tokio::time::sleep(Duration::from_millis(poll_ms)).await;
        }
    }

    /// Visible page text (`document.body.innerText`), empty on failure.
    pub async fn page_text(&self) -> String {
        self.page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .unwrap_or_default()
    }

    /// Current URL after any client-side redirects.
    pub async fn current_url(&self) -> String {
        self.page
            .evaluate("location.href")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .unwrap_or_default()
    }

    /// Rendered HTML of the current document, empty on failure.
    pub async fn page_html(&self) -> String {
        self.page.content().await.unwrap_or_default()
    }

    /// Capture a full-page PNG screenshot, returned base64-encoded.
    pub async fn capture_screenshot(&self) -> EngineResult<String> {
        let bytes = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(|e| EngineError::Browser(format!("screenshot failed: {}", e)))?;
        Ok(BASE64.encode(bytes))
    }

    /// Release the browser. Always called on the terminal path, success or
    /// failure, so vendor sessions and local processes never leak.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close error (non-fatal): {}", e);
        }
        self.handler_task.abort();
    }
}
