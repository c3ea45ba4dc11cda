//! Required-field autofixer.
//!
//! Sweeps the page for controls that would fail native validation and
//! supplies defaults: placeholder selects, ARIA comboboxes, unchecked
//! required checkboxes, untouched required radio groups, empty required
//! text controls. Each sweep is independent and best-effort; the returned
//! count is telemetry only.

use chromiumoxide::Page;
use std::time::Duration;

use crate::engine::evidence::EvidenceBundle;
use crate::engine::humanize::Humanizer;
use crate::engine::locator::{self, eval_u64};

/// Neutral filler for required free-text controls we know nothing about.
const NEUTRAL_TEXT: &str = "N/A";

/// Select the first real option on every `<select>` still sitting on a
/// "choose…" placeholder.
async fn fix_placeholder_selects(page: &Page) -> u64 {
    let js = r#"(() => {
    let fixed = 0;
    const placeholder = t => !t || /^(select|choose|please|pick|--|—|\.\.\.)/i.test(t.trim());
    for (const sel of document.querySelectorAll('select')) {
        if (sel.disabled || !sel.options.length) continue;
        const cur = sel.options[sel.selectedIndex];
        const stuck = !cur || (cur.value === '' || placeholder(cur.text));
        if (!stuck) continue;
        let idx = -1;
        for (let i = 0; i < sel.options.length; i++) {
            const o = sel.options[i];
            if (o.value !== '' && !placeholder(o.text)) { idx = i; break; }
        }
        if (idx < 0) continue;
        sel.selectedIndex = idx;
        sel.dispatchEvent(new Event('input', {bubbles: true}));
        sel.dispatchEvent(new Event('change', {bubbles: true}));
        fixed++;
    }
    return fixed;
})()"#;
    eval_u64(page, js.to_string()).await
}

/// Open each empty ARIA combobox, move to the first option, confirm.
/// Driven from Rust because option lists render asynchronously.
async fn fix_aria_comboboxes(page: &Page, humanizer: &Humanizer) -> u64 {
    let combos = eval_u64(
        page,
        r#"(() => {
    let n = 0;
    for (const el of document.querySelectorAll('[role="combobox"]')) {
        const val = el.value || el.textContent || '';
        const required = el.required || el.getAttribute('aria-required') === 'true';
        if (required && !val.trim()) n++;
    }
    return n;
})()"#
            .to_string(),
    )
    .await;

    let mut fixed = 0u64;
    for idx in 0..combos.min(4) {
        let marked = locator::eval_bool(
            page,
            format!(
                r#"(() => {{
    document.querySelectorAll('[data-fp-target]').forEach(el => el.removeAttribute('data-fp-target'));
    const empties = [];
    for (const el of document.querySelectorAll('[role="combobox"]')) {{
        const val = el.value || el.textContent || '';
        const required = el.required || el.getAttribute('aria-required') === 'true';
        if (required && !val.trim()) empties.push(el);
    }}
    if (empties.length <= {idx}) return false;
    empties[{idx}].setAttribute('data-fp-target', '1');
    return true;
}})()"#,
                idx = idx
            ),
        )
        .await;
        if !marked {
            break;
        }

        if let Some(rect) = locator::marked_rect(page).await {
            humanizer.click_rect(page, rect).await;
        }
        tokio::time::sleep(Duration::from_millis(350)).await;

        if locator::mark_by_selector(page, r#"[role="listbox"] [role="option"], [role="option"]"#)
            .await
        {
            if let Some(rect) = locator::marked_rect(page).await {
                humanizer.click_rect(page, rect).await;
                fixed += 1;
            }
        }
        locator::clear_mark(page).await;
    }
    fixed
}

/// Check every required checkbox still unchecked.
async fn fix_required_checkboxes(page: &Page) -> u64 {
    let js = r#"(() => {
    let fixed = 0;
    for (const box of document.querySelectorAll('input[type="checkbox"]')) {
        const required = box.required || box.getAttribute('aria-required') === 'true';
        if (!required || box.checked || box.disabled) continue;
        box.click();
        if (!box.checked) {
            box.checked = true;
            box.dispatchEvent(new Event('change', {bubbles: true}));
        }
        fixed++;
    }
    return fixed;
})()"#;
    eval_u64(page, js.to_string()).await
}

/// Select one radio per required group with nothing selected, deduplicated
/// by group name.
async fn fix_required_radios(page: &Page) -> u64 {
    let js = r#"(() => {
    const groups = new Map();
    for (const radio of document.querySelectorAll('input[type="radio"]')) {
        const name = radio.name || '';
        if (!name) continue;
        if (!groups.has(name)) groups.set(name, []);
        groups.get(name).push(radio);
    }
    let fixed = 0;
    for (const [, radios] of groups) {
        const required = radios.some(r => r.required || r.getAttribute('aria-required') === 'true');
        if (!required) continue;
        if (radios.some(r => r.checked)) continue;
        const pick = radios.find(r => !r.disabled);
        if (!pick) continue;
        pick.click();
        if (!pick.checked) {
            pick.checked = true;
            pick.dispatchEvent(new Event('change', {bubbles: true}));
        }
        fixed++;
    }
    return fixed;
})()"#;
    eval_u64(page, js.to_string()).await
}

/// Fill empty required text/textarea controls with a neutral value.
async fn fix_required_texts(page: &Page) -> u64 {
    let js = format!(
        r#"(() => {{
    let fixed = 0;
    const filler = {filler};
    const selector = 'input[type="text"], input[type="email"], input[type="tel"], input[type="url"], input:not([type]), textarea';
    for (const el of document.querySelectorAll(selector)) {{
        const required = el.required || el.getAttribute('aria-required') === 'true';
        if (!required || el.disabled || el.value.trim()) continue;
        const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
        const desc = Object.getOwnPropertyDescriptor(proto, 'value');
        if (desc && desc.set) {{ desc.set.call(el, filler); }} else {{ el.value = filler; }}
        el.dispatchEvent(new Event('input', {{bubbles: true}}));
        el.dispatchEvent(new Event('change', {{bubbles: true}}));
        fixed++;
    }}
    return fixed;
}})()"#,
        filler = serde_json::to_string(NEUTRAL_TEXT).unwrap_or_else(|_| "\"N/A\"".into()),
    );
    eval_u64(page, js).await
}

/// Count required controls that would still fail native validation.
pub async fn remaining_required_violations(page: &Page) -> u64 {
    let js = r#"(() => {
    let violations = 0;
    for (const el of document.querySelectorAll('input, select, textarea')) {
        if (!el.required || el.disabled) continue;
        if (typeof el.checkValidity === 'function' && !el.checkValidity()) violations++;
    }
    return violations;
})()"#;
    eval_u64(page, js.to_string()).await
}

/// Run every sweep in order. Returns the total number of fixes applied.
pub async fn run(page: &Page, humanizer: &Humanizer, evidence: &mut EvidenceBundle) -> u64 {
    let mut total = 0u64;

    let selects = fix_placeholder_selects(page).await;
    let combos = fix_aria_comboboxes(page, humanizer).await;
    let checkboxes = fix_required_checkboxes(page).await;
    let radios = fix_required_radios(page).await;
    let texts = fix_required_texts(page).await;
    total += selects + combos + checkboxes + radios + texts;

    if total > 0 {
        evidence.log(format!(
            "autofixer applied {} fixes (selects={}, comboboxes={}, checkboxes={}, radios={}, texts={})",
            total, selects, combos, checkboxes, radios, texts
        ));
    }
    total
}
