//! End-to-end engine scenarios.
//!
//! Pure precondition behavior runs everywhere; scenarios that need a live
//! DOM drive a real headless browser against `data:` URLs and skip cleanly
//! on machines without a local Chromium-family install.

use formpilot::browser::{session::native_browser_available, BrowserSession, SessionOptions};
use formpilot::engine::evidence::EvidenceBundle;
use formpilot::engine::humanize::{Humanizer, Pacing};
use formpilot::engine::{autofix, orchestrator, outcome};
use formpilot::types::{ApplicationRequest, ApplicationStatus, Step};
use formpilot::AppState;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

fn test_state() -> AppState {
    AppState::new(reqwest::Client::new())
}

/// data: URL with a small but realistic application form. The submit button
/// is type=button so clicking it never navigates away from the data page.
fn form_page() -> String {
    let html = r#"<html><body>
<h1>Join Acme</h1>
<form>
<label for="name">Full name</label><input id="name" type="text">
<label for="email">Email</label><input id="email" type="email">
<label for="phone">Phone</label><input id="phone" type="tel">
<button type="button">Submit application</button>
</form>
</body></html>"#;
    format!("data:text/html,{}", urlencode(html))
}

fn urlencode(s: &str) -> String {
    let mut out = String::new();
    for b in s.bytes() {
        match b {
            b' ' => out.push_str("%20"),
            b'#' => out.push_str("%23"),
            b'\n' => out.push_str("%0A"),
            b'"' => out.push_str("%22"),
            _ => out.push(b as char),
        }
    }
    out
}

#[tokio::test]
async fn missing_mandatory_fields_is_terminal_without_a_browser() {
    init_logger();
    let state = test_state();

    let req = ApplicationRequest {
        job_url: "".into(),
        email: "".into(),
        ..Default::default()
    };
    let result = orchestrator::run(&state, req).await;

    assert_eq!(result.status, ApplicationStatus::MissingFields);
    assert!(!result.ok);
    assert_eq!(result.state.step, Step::Initial);
    // No browser session may be created on the precondition path.
    assert!(!result.evidence.transcript_contains("browser"));
    assert_eq!(result.evidence.error_counts.get("precondition"), Some(&1));
}

#[tokio::test]
async fn missing_email_alone_is_also_terminal() {
    let state = test_state();
    let req = ApplicationRequest {
        job_url: "https://jobs.example.com/1".into(),
        email: "".into(),
        ..Default::default()
    };
    let result = orchestrator::run(&state, req).await;
    assert_eq!(result.status, ApplicationStatus::MissingFields);
}

#[tokio::test]
async fn plan_only_fills_but_never_clicks_submit() {
    init_logger();
    if !native_browser_available() {
        eprintln!("skipping: no local browser installed");
        return;
    }
    std::env::set_var("FORMPILOT_ZERO_PACING", "1");
    std::env::remove_var("FORMPILOT_BROWSER_WS_URL");

    let state = test_state();
    let req = ApplicationRequest {
        job_url: form_page(),
        email: "ada@example.com".into(),
        full_name: Some("Ada Lovelace".into()),
        phone: Some("+442079460958".into()),
        plan_only: true,
        ..Default::default()
    };
    let result = orchestrator::run(&state, req).await;

    assert_eq!(result.status, ApplicationStatus::PlannedOnly);
    assert!(result.ok);
    assert!(!result.evidence.transcript_contains("submit_click"));
    assert!(result.state.filled_fields.contains("email"));
    assert!(result.evidence.transcript_contains("browser session released"));
}

#[tokio::test]
async fn without_consent_the_loop_halts_before_any_submit_click() {
    init_logger();
    if !native_browser_available() {
        eprintln!("skipping: no local browser installed");
        return;
    }
    std::env::set_var("FORMPILOT_ZERO_PACING", "1");
    std::env::remove_var("FORMPILOT_BROWSER_WS_URL");

    let state = test_state();
    let req = ApplicationRequest {
        job_url: form_page(),
        email: "ada@example.com".into(),
        full_name: Some("Ada Lovelace".into()),
        allow_submit: false,
        ..Default::default()
    };
    let result = orchestrator::run(&state, req).await;

    assert_eq!(result.status, ApplicationStatus::AwaitingConsent);
    assert!(!result.evidence.transcript_contains("submit_click"));
}

#[tokio::test]
async fn confirmation_text_satisfies_the_heuristic_without_a_model() {
    init_logger();
    if !native_browser_available() {
        eprintln!("skipping: no local browser installed");
        return;
    }
    let session = BrowserSession::acquire(&SessionOptions::default())
        .await
        .expect("local browser session");
    session
        .navigate("data:text/html,<h1>Application%20received</h1>")
        .await
        .expect("data url navigation");

    let mut evidence = EvidenceBundle::new();
    assert!(outcome::heuristic(&session, &mut evidence).await);
    session.close().await;
}

#[tokio::test]
async fn autofixer_clears_a_placeholder_required_select() {
    init_logger();
    if !native_browser_available() {
        eprintln!("skipping: no local browser installed");
        return;
    }
    let html = r#"<form>
<select required>
<option value="">Choose an option...</option>
<option value="us">United States</option>
<option value="uk">United Kingdom</option>
</select>
</form>"#;
    let url = format!("data:text/html,{}", urlencode(html));

    let session = BrowserSession::acquire(&SessionOptions::default())
        .await
        .expect("local browser session");
    session.navigate(&url).await.expect("data url navigation");

    assert_eq!(autofix::remaining_required_violations(session.page()).await, 1);

    let humanizer = Humanizer::new(Pacing::zero(), 0.0);
    let mut evidence = EvidenceBundle::new();
    let fixed = autofix::run(session.page(), &humanizer, &mut evidence).await;
    assert!(fixed >= 1, "expected at least one fix, applied {}", fixed);

    // A subsequent scan reports zero remaining violations for that control.
    assert_eq!(autofix::remaining_required_violations(session.page()).await, 0);
    session.close().await;
}

#[tokio::test]
async fn unconfirmable_submission_exhausts_the_retry_budget() {
    init_logger();
    if !native_browser_available() {
        eprintln!("skipping: no local browser installed");
        return;
    }
    // Make the vision tier genuinely unavailable so the loop retries dry.
    std::env::set_var("FORMPILOT_ZERO_PACING", "1");
    std::env::remove_var("OPENAI_API_KEY");
    std::env::remove_var("FORMPILOT_VISION_API_KEY");
    std::env::remove_var("FORMPILOT_BROWSER_WS_URL");

    let state = test_state();
    let req = ApplicationRequest {
        job_url: form_page(),
        email: "ada@example.com".into(),
        full_name: Some("Ada Lovelace".into()),
        allow_submit: true,
        ..Default::default()
    };
    let result = orchestrator::run(&state, req).await;

    assert_eq!(result.status, ApplicationStatus::MaxRetriesReached);
    assert!(result.evidence.transcript_contains("submit_click"));
    assert!(result.evidence.transcript_contains(&format!(
        "submission attempt {}/{}",
        orchestrator::MAX_RETRIES,
        orchestrator::MAX_RETRIES
    )));
    assert!(result.evidence.post_submit_screenshot.is_some());
}
