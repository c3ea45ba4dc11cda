//! Submission orchestrator.
//!
//! One run = navigate → classify platform → fill → autofix → loop{captcha →
//! submit → screenshots → outcome → corrective replay} → terminal status.
//! The loop is bounded by `MAX_RETRIES`; the browser session is released on
//! every terminal path; and a structured result comes back no matter what
//! went wrong inside.

use std::collections::BTreeMap;
use std::time::Instant;
use url::Url;

use crate::browser::{BrowserSession, SessionOptions};
use crate::core::app_state::AppState;
use crate::core::error::EngineResult;
use crate::core::retry::RetryPolicy;
use crate::core::types::{
    ApplicationRequest, ApplicationResult, ApplicationState, ApplicationStatus, CaptchaOutcome,
    Step,
};
use crate::engine::evidence::EvidenceBundle;
use crate::engine::humanize::{Humanizer, Pacing, Think};
use crate::engine::locator::{self, eval_u64};
use crate::engine::{autofix, captcha, fields, interpreter, outcome, platform};
use crate::services::solver::{SolvingServiceClient, TokenSolver};
use crate::services::vision::VisionClient;

/// Upper bound on captcha→submit→verify→correct iterations.
pub const MAX_RETRIES: u32 = 5;
/// Upper bound on "next/continue" hops through a multi-step wizard.
const WIZARD_MAX_HOPS: u32 = 3;

/// Everything one run mutates, threaded explicitly through every component
/// call — no process-wide state.
pub struct RunContext {
    pub state: ApplicationState,
    pub evidence: EvidenceBundle,
    pub policy: RetryPolicy,
    pub humanizer: Humanizer,
}

impl RunContext {
    fn new(app: &AppState) -> Self {
        // Zero pacing collapses every simulated delay; used by test suites.
        let pacing = if std::env::var("FORMPILOT_ZERO_PACING").is_ok() {
            Pacing::zero()
        } else {
            Pacing::standard()
        };
        let policy = if std::env::var("FORMPILOT_ZERO_PACING").is_ok() {
            RetryPolicy::instant()
        } else {
            RetryPolicy::default()
        };
        Self {
            state: ApplicationState::new(),
            evidence: EvidenceBundle::new(),
            policy,
            humanizer: Humanizer::new(pacing, app.config.engine.resolve_humanize_probability()),
        }
    }
}

/// Run one application end-to-end. Always returns a result; fatal errors are
/// reported as status `error` with the evidence collected so far.
pub async fn run(app: &AppState, req: ApplicationRequest) -> ApplicationResult {
    let started = Instant::now();
    let mut ctx = RunContext::new(app);

    // Precondition gate — terminal, and no browser session is created.
    let missing = req.missing_fields();
    if !missing.is_empty() {
        ctx.evidence
            .log(format!("missing mandatory fields: {}", missing.join(", ")));
        ctx.evidence.count_error("precondition");
        return finish(ctx, ApplicationStatus::MissingFields, started, None);
    }

    let opts = SessionOptions {
        ws_url: req
            .browser_ws_url
            .clone()
            .or_else(|| app.config.browser.resolve_ws_url()),
        proxy_url: req
            .proxy_url
            .clone()
            .or_else(|| app.config.browser.resolve_proxy_url()),
    };

    let session = match BrowserSession::acquire(&opts).await {
        Ok(s) => s,
        Err(e) => {
            ctx.evidence.count_error(e.category());
            ctx.evidence.log(format!("browser acquisition failed: {}", e));
            return finish(ctx, ApplicationStatus::Error, started, Some(e.to_string()));
        }
    };

    let outcome = drive(app, &req, &session, &mut ctx).await;

    // The session is released on every terminal path, success or failure.
    session.close().await;
    ctx.evidence.log("browser session released");

    match outcome {
        Ok(status) => finish(ctx, status, started, None),
        Err(e) => {
            ctx.evidence.count_error(e.category());
            ctx.evidence.log(format!("run aborted: {}", e));
            finish(ctx, ApplicationStatus::Error, started, Some(e.to_string()))
        }
    }
}

fn finish(
    ctx: RunContext,
    status: ApplicationStatus,
    started: Instant,
    error: Option<String>,
) -> ApplicationResult {
    let ok = matches!(
        status,
        ApplicationStatus::Submitted
            | ApplicationStatus::PlannedOnly
            | ApplicationStatus::AwaitingConsent
    );
    ApplicationResult {
        ok,
        status,
        platform: ctx.state.platform.clone(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        log: ctx.evidence.transcript.clone(),
        state: ctx.state,
        evidence: ctx.evidence,
        error,
    }
}

async fn drive(
    app: &AppState,
    req: &ApplicationRequest,
    session: &BrowserSession,
    ctx: &mut RunContext,
) -> EngineResult<ApplicationStatus> {
    let page = session.page();

    // ── Navigate ────────────────────────────────────────────────────────────
    let t = Instant::now();
    session.navigate(&req.job_url).await?;
    ctx.evidence.record_latency("navigate", t);
    ctx.state.advance(Step::PageLoaded);
    ctx.evidence.log(format!("page loaded: {}", req.job_url));

    // Résumé extraction feeds the field chain and the vision excerpt.
    let resume = crate::services::resume::extract(
        &app.http_client,
        req.resume_url.as_deref(),
        req.resume_base64.as_deref(),
    )
    .await;

    let text = session.page_text().await;
    ctx.humanizer
        .read_page(page, text.split_whitespace().count())
        .await;

    // ── Classify platform (cached per host) ─────────────────────────────────
    let t = Instant::now();
    let final_url = session.current_url().await;
    let host = Url::parse(&final_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let detected = if let Some(hit) = app.ats_cache.get(&host).await {
        hit
    } else {
        let html = session.page_html().await;
        let m = platform::detect(&final_url, &html);
        if !host.is_empty() {
            app.ats_cache.insert(host, m.clone()).await;
        }
        m
    };
    ctx.state.platform = Some(detected.ats.name().to_string());
    ctx.evidence.record_latency("detect_platform", t);
    ctx.evidence.log(format!(
        "platform: {} (confidence {:?})",
        detected.ats.name(),
        detected.confidence
    ));

    // Some boards hide the form behind an "Apply" button.
    open_application_form(session, ctx).await;
    ctx.state.advance(Step::FormOpened);

    // ── Fill ────────────────────────────────────────────────────────────────
    ctx.state.advance(Step::FillingForm);
    let t = Instant::now();
    let specs = fields::specs_for(req, &resume.fields);
    let filled = fields::fill_all(
        page,
        &ctx.humanizer,
        detected.ats,
        &specs,
        &mut ctx.state,
        &mut ctx.evidence,
    )
    .await;
    ctx.evidence.record_latency("fill_form", t);
    ctx.evidence.log(format!("filled {} fields", filled));

    platform::apply_extras(page, detected.ats, req, &mut ctx.evidence).await;
    autofix::run(page, &ctx.humanizer, &mut ctx.evidence).await;

    if req.plan_only {
        ctx.evidence.log("plan_only set: skipping submission loop");
        ctx.state.advance(Step::Done);
        return Ok(ApplicationStatus::PlannedOnly);
    }

    // Collaborators for the loop.
    let solver = SolvingServiceClient::from_config(
        app.http_client.clone(),
        &app.config.solver,
        req.solver_api_key.clone(),
    );
    let solver_ref: Option<&dyn TokenSolver> = solver.as_ref().map(|s| s as &dyn TokenSolver);
    let vision = VisionClient::from_config(
        app.http_client.clone(),
        &app.config.vision,
        req.vision_api_key.clone(),
    );
    let known_fields = known_fields_for(req);
    let excerpt_len = app.config.vision.resolve_resume_excerpt_chars();
    let resume_excerpt: String = resume.raw_text.chars().take(excerpt_len).collect();

    // ── Submit / verify / correct loop ──────────────────────────────────────
    for attempt in 0..MAX_RETRIES {
        ctx.evidence
            .log(format!("submission attempt {}/{}", attempt + 1, MAX_RETRIES));

        expand_collapsed_sections(session, ctx).await;
        autofix::run(page, &ctx.humanizer, &mut ctx.evidence).await;

        let t = Instant::now();
        let challenge = captcha::resolve(
            page,
            session.is_remote,
            solver_ref,
            &final_url,
            &ctx.policy,
            &mut ctx.evidence,
        )
        .await;
        ctx.evidence.record_latency("captcha", t);
        if challenge.outcome == CaptchaOutcome::Solved {
            ctx.state.captcha_solved = true;
        }

        trigger_native_validation(page).await;
        advance_wizard(session, ctx).await;

        if !req.allow_submit {
            ctx.evidence
                .log("allow_submit not set: halting before submit click");
            return Ok(ApplicationStatus::AwaitingConsent);
        }

        // Screenshots bracket the submit click. Capture failure aborts this
        // iteration, not the run.
        match session.capture_screenshot().await {
            Ok(shot) => ctx.evidence.pre_submit_screenshot = Some(shot),
            Err(e) => {
                ctx.evidence.count_error(e.category());
                ctx.evidence
                    .log(format!("pre-submit screenshot failed: {}", e));
                continue;
            }
        }

        let t = Instant::now();
        if click_submit(session, ctx).await {
            ctx.state.advance(Step::Submitted);
        } else {
            ctx.state.record_issue("submit control not found");
            ctx.evidence.log("submit control not found");
        }
        ctx.humanizer.think(Think::Review).await;
        session.wait_until_stable(1_000, 6_000).await;
        ctx.evidence.record_latency("submit", t);

        match session.capture_screenshot().await {
            Ok(shot) => ctx.evidence.post_submit_screenshot = Some(shot),
            Err(e) => {
                ctx.evidence.count_error(e.category());
                ctx.evidence
                    .log(format!("post-submit screenshot failed: {}", e));
                continue;
            }
        }

        // ── Outcome: heuristic OR vision ────────────────────────────────────
        let t = Instant::now();
        if outcome::heuristic(session, &mut ctx.evidence).await {
            ctx.evidence.record_latency("outcome", t);
            ctx.state.advance(Step::Done);
            return Ok(ApplicationStatus::Submitted);
        }

        let shot = ctx.evidence.post_submit_screenshot.clone().unwrap_or_default();
        let verdict = vision.assess(&shot, &resume_excerpt, &known_fields).await;
        ctx.evidence.record_latency("outcome", t);
        ctx.evidence.log(format!(
            "vision verdict: success={} reason={} instructions={}",
            verdict.success,
            verdict.reason,
            verdict.instructions.len()
        ));

        if verdict.success {
            ctx.state.advance(Step::Done);
            return Ok(ApplicationStatus::Submitted);
        }

        let attempts_remain = attempt + 1 < MAX_RETRIES;
        if !verdict.instructions.is_empty() && attempts_remain {
            let acted = interpreter::run_instructions(
                page,
                &ctx.humanizer,
                &verdict.instructions,
                &mut ctx.evidence,
            )
            .await;
            if !acted {
                ctx.evidence.log("no corrective action took effect");
            }
            continue;
        }
        if verdict.instructions.is_empty() && vision.is_configured() {
            // A real model looked and had nothing left to suggest.
            ctx.evidence.log("no corrective instructions available");
            return Ok(ApplicationStatus::NotConfirmed);
        }
        // Vision unavailable: keep retrying on the chance that autofix or
        // captcha clearance unblocks the next attempt.
    }

    ctx.evidence.log("retry budget exhausted");
    Ok(ApplicationStatus::MaxRetriesReached)
}

fn known_fields_for(req: &ApplicationRequest) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("email".to_string(), req.email.clone());
    for (key, value) in [
        ("full_name", &req.full_name),
        ("phone", &req.phone),
        ("location", &req.location),
        ("current_company", &req.current_company),
        ("salary_expectation", &req.salary_expectation),
        ("notice_period", &req.notice_period),
    ] {
        if let Some(v) = value {
            if !v.trim().is_empty() {
                map.insert(key.to_string(), v.clone());
            }
        }
    }
    map
}

/// Reveal the form when it sits behind an "Apply" button. One hop only.
async fn open_application_form(session: &BrowserSession, ctx: &mut RunContext) {
    let page = session.page();
    let has_form = locator::eval_bool(
        page,
        r#"!!document.querySelector('form input, form textarea, form select')"#.to_string(),
    )
    .await;
    if has_form {
        return;
    }
    for label in ["apply now", "apply for this job", "apply"] {
        if locator::mark_clickable_by_text(page, label).await {
            if let Some(rect) = locator::marked_rect(page).await {
                ctx.humanizer.think(Think::Decision).await;
                ctx.humanizer.click_rect(page, rect).await;
                session.wait_until_stable(1_000, 6_000).await;
                ctx.evidence.log(format!("opened application form via '{}'", label));
            }
            locator::clear_mark(page).await;
            return;
        }
    }
}

/// Re-open collapsed sections so hidden required fields become fillable.
async fn expand_collapsed_sections(session: &BrowserSession, ctx: &mut RunContext) {
    let expanded = eval_u64(
        session.page(),
        r#"(() => {
    let expanded = 0;
    for (const d of document.querySelectorAll('details:not([open])')) {
        d.setAttribute('open', '');
        expanded++;
    }
    for (const el of document.querySelectorAll('[aria-expanded="false"]')) {
        if (expanded >= 5) break;
        if (el.tagName === 'BUTTON' || el.getAttribute('role') === 'button') {
            el.click();
            expanded++;
        }
    }
    return expanded;
})()"#
            .to_string(),
    )
    .await;
    if expanded > 0 {
        ctx.evidence
            .log(format!("expanded {} collapsed sections", expanded));
    }
}

/// Surface native validation messages so the autofixer and the vision model
/// can see them.
async fn trigger_native_validation(page: &chromiumoxide::Page) {
    let _ = page
        .evaluate(
            r#"Array.from(document.forms).forEach(f => { if (f.reportValidity) { try { f.reportValidity(); } catch (e) {} } })"#,
        )
        .await;
}

const WIZARD_LABELS: &[&str] = &["next", "continue", "weiter", "suivant", "continuar"];
const SUBMIT_LABELS: &[&str] = &[
    "submit application",
    "submit",
    "send application",
    "apply now",
    "apply",
];

/// Advance a multi-step wizard by clicking recognized next/continue labels,
/// bounded to `WIZARD_MAX_HOPS`.
async fn advance_wizard(session: &BrowserSession, ctx: &mut RunContext) {
    let page = session.page();
    for _hop in 0..WIZARD_MAX_HOPS {
        // A visible submit control means we are on the final step.
        let mut submit_visible = false;
        for label in SUBMIT_LABELS {
            if locator::mark_clickable_by_text(page, label).await {
                submit_visible = true;
                break;
            }
        }
        locator::clear_mark(page).await;
        if submit_visible {
            return;
        }

        let mut advanced = false;
        for label in WIZARD_LABELS {
            if locator::mark_clickable_by_text(page, label).await {
                if let Some(rect) = locator::marked_rect(page).await {
                    ctx.humanizer.click_rect(page, rect).await;
                    session.wait_until_stable(1_000, 5_000).await;
                    ctx.evidence.log(format!("wizard advanced via '{}'", label));
                    advanced = true;
                }
                locator::clear_mark(page).await;
                break;
            }
        }
        if !advanced {
            return;
        }
        autofix::run(page, &ctx.humanizer, &mut ctx.evidence).await;
    }
}

/// Click the submit control. The transcript line `submit_click` is the
/// auditable record that a submission was actually attempted.
async fn click_submit(session: &BrowserSession, ctx: &mut RunContext) -> bool {
    let page = session.page();
    for label in SUBMIT_LABELS {
        if locator::mark_clickable_by_text(page, label).await {
            if let Some(rect) = locator::marked_rect(page).await {
                ctx.humanizer.think(Think::Decision).await;
                ctx.humanizer.click_rect(page, rect).await;
                locator::clear_mark(page).await;
                ctx.evidence.log(format!("submit_click via '{}'", label));
                return true;
            }
            locator::clear_mark(page).await;
        }
    }
    if locator::mark_by_selector(page, r#"button[type="submit"], input[type="submit"]"#).await {
        if let Some(rect) = locator::marked_rect(page).await {
            ctx.humanizer.click_rect(page, rect).await;
            locator::clear_mark(page).await;
            ctx.evidence.log("submit_click via submit selector");
            return true;
        }
        locator::clear_mark(page).await;
    }
    false
}
