//! Shared element location.
//!
//! Locating happens in page JS (label walk, attribute patterns, visible
//! text), which tags the winning control with a marker attribute; acting
//! happens from Rust through CDP against the marked element. Every lookup
//! clears the previous mark first, so at most one control is ever marked.

use chromiumoxide::{Element, Page};
use serde::Deserialize;

pub const MARK_SELECTOR: &str = "[data-fp-target]";

/// Evaluate a JS expression expected to produce a boolean.
pub async fn eval_bool(page: &Page, js: String) -> bool {
    page.evaluate(js)
        .await
        .ok()
        .and_then(|v| v.into_value::<bool>().ok())
        .unwrap_or(false)
}

/// Evaluate a JS expression expected to produce a number.
pub async fn eval_u64(page: &Page, js: String) -> u64 {
    page.evaluate(js)
        .await
        .ok()
        .and_then(|v| v.into_value::<serde_json::Value>().ok())
        .and_then(|j| j.as_u64())
        .unwrap_or(0)
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

const VISIBLE_FN: &str = r#"
const visible = el => {
    if (!el) return false;
    if (el.offsetParent !== null) return true;
    const r = el.getClientRects();
    return r && r.length > 0;
};"#;

/// Mark the form control whose visible `<label>` (or aria-label/placeholder)
/// contains `label`, case-insensitive. Returns whether anything matched.
pub async fn mark_by_label(page: &Page, label: &str) -> bool {
    let js = format!(
        r#"(() => {{
    const needle = {needle}.trim().toLowerCase();
    if (!needle) return false;
    document.querySelectorAll('[data-fp-target]').forEach(el => el.removeAttribute('data-fp-target'));
    {visible}
    const controlFor = lab => {{
        if (lab.htmlFor) {{
            const c = document.getElementById(lab.htmlFor);
            if (c) return c;
        }}
        return lab.querySelector('input, select, textarea, [role="combobox"]');
    }};
    for (const lab of document.querySelectorAll('label')) {{
        const text = (lab.innerText || lab.textContent || '').trim().toLowerCase();
        if (!text || !text.includes(needle)) continue;
        const ctl = controlFor(lab);
        if (ctl && visible(ctl)) {{
            ctl.setAttribute('data-fp-target', '1');
            return true;
        }}
    }}
    for (const ctl of document.querySelectorAll('input, select, textarea, [role="combobox"], [contenteditable="true"]')) {{
        const aria = (ctl.getAttribute('aria-label') || '').toLowerCase();
        const ph = (ctl.getAttribute('placeholder') || '').toLowerCase();
        if ((aria.includes(needle) || ph.includes(needle)) && visible(ctl)) {{
            ctl.setAttribute('data-fp-target', '1');
            return true;
        }}
    }}
    return false;
}})()"#,
        needle = js_str(label),
        visible = VISIBLE_FN,
    );
    eval_bool(page, js).await
}

/// Mark the first visible control whose name/id/aria-label/placeholder/
/// autocomplete contains any of `patterns` (case-insensitive substring).
pub async fn mark_by_attr_patterns(page: &Page, patterns: &[&str]) -> bool {
    let pats = serde_json::to_string(patterns).unwrap_or_else(|_| "[]".to_string());
    let js = format!(
        r#"(() => {{
    const pats = {pats}.map(p => p.toLowerCase());
    if (!pats.length) return false;
    document.querySelectorAll('[data-fp-target]').forEach(el => el.removeAttribute('data-fp-target'));
    {visible}
    for (const ctl of document.querySelectorAll('input, select, textarea, [role="combobox"], [contenteditable="true"]')) {{
        if (!visible(ctl)) continue;
        const type = (ctl.getAttribute('type') || '').toLowerCase();
        if (['hidden', 'submit', 'button', 'file'].includes(type)) continue;
        const hay = [
            ctl.getAttribute('name'), ctl.id, ctl.getAttribute('aria-label'),
            ctl.getAttribute('placeholder'), ctl.getAttribute('autocomplete'),
            ctl.getAttribute('data-qa'), ctl.getAttribute('data-automation-id'),
        ].filter(Boolean).join(' ').toLowerCase();
        if (pats.some(p => hay.includes(p))) {{
            ctl.setAttribute('data-fp-target', '1');
            return true;
        }}
    }}
    return false;
}})()"#,
        pats = pats,
        visible = VISIBLE_FN,
    );
    eval_bool(page, js).await
}

/// Treat `selector` as a raw CSS selector and mark the first visible match.
/// Invalid selectors simply return false.
pub async fn mark_by_selector(page: &Page, selector: &str) -> bool {
    let js = format!(
        r#"(() => {{
    document.querySelectorAll('[data-fp-target]').forEach(el => el.removeAttribute('data-fp-target'));
    {visible}
    let matches;
    try {{ matches = document.querySelectorAll({sel}); }} catch (e) {{ return false; }}
    for (const el of matches) {{
        if (visible(el)) {{
            el.setAttribute('data-fp-target', '1');
            return true;
        }}
    }}
    return false;
}})()"#,
        sel = js_str(selector),
        visible = VISIBLE_FN,
    );
    eval_bool(page, js).await
}

/// Mark a clickable element (button, link, input button, role=button) whose
/// visible text matches `text`. Exact (case-insensitive) match wins over
/// substring match.
pub async fn mark_clickable_by_text(page: &Page, text: &str) -> bool {
    let js = format!(
        r#"(() => {{
    const needle = {needle}.trim().toLowerCase();
    if (!needle) return false;
    document.querySelectorAll('[data-fp-target]').forEach(el => el.removeAttribute('data-fp-target'));
    {visible}
    const candidates = [];
    for (const el of document.querySelectorAll('button, a, [role="button"], input[type="submit"], input[type="button"]')) {{
        if (!visible(el)) continue;
        const t = (el.innerText || el.value || el.getAttribute('aria-label') || '').trim().toLowerCase();
        if (!t) continue;
        if (t === needle) {{ el.setAttribute('data-fp-target', '1'); return true; }}
        if (t.includes(needle)) candidates.push(el);
    }}
    if (candidates.length) {{
        candidates[0].setAttribute('data-fp-target', '1');
        return true;
    }}
    return false;
}})()"#,
        needle = js_str(text),
        visible = VISIBLE_FN,
    );
    eval_bool(page, js).await
}

/// The currently marked element, if any.
pub async fn marked_element(page: &Page) -> Option<Element> {
    page.find_element(MARK_SELECTOR).await.ok()
}

/// Viewport rectangle of the marked element.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub async fn marked_rect(page: &Page) -> Option<Rect> {
    let js = r#"(() => {
    const el = document.querySelector('[data-fp-target]');
    if (!el) return null;
    el.scrollIntoView({block: 'center', inline: 'nearest'});
    const r = el.getBoundingClientRect();
    return {x: r.x, y: r.y, width: r.width, height: r.height};
})()"#;
    page.evaluate(js)
        .await
        .ok()
        .and_then(|v| v.into_value::<Option<Rect>>().ok())
        .flatten()
}

/// Set the marked element's value directly, through the native value setter
/// so framework-controlled inputs (React et al.) observe the change, then
/// fire input/change.
pub async fn set_marked_value(page: &Page, value: &str) -> bool {
    let js = format!(
        r#"(() => {{
    const el = document.querySelector('[data-fp-target]');
    if (!el) return false;
    const v = {value};
    if (el.isContentEditable) {{
        el.innerText = v;
    }} else if (el.tagName === 'SELECT') {{
        return false;
    }} else {{
        const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
        const desc = Object.getOwnPropertyDescriptor(proto, 'value');
        if (desc && desc.set) {{ desc.set.call(el, v); }} else {{ el.value = v; }}
    }}
    el.dispatchEvent(new Event('input', {{bubbles: true}}));
    el.dispatchEvent(new Event('change', {{bubbles: true}}));
    return true;
}})()"#,
        value = js_str(value),
    );
    eval_bool(page, js).await
}

/// For a marked `<select>`: choose the first option whose text or value
/// contains `wanted` (case-insensitive); with an empty `wanted`, choose the
/// first non-placeholder option.
pub async fn select_marked_option(page: &Page, wanted: &str) -> bool {
    let js = format!(
        r#"(() => {{
    const el = document.querySelector('[data-fp-target]');
    if (!el || el.tagName !== 'SELECT') return false;
    const wanted = {wanted}.trim().toLowerCase();
    const placeholder = t => !t || /^(select|choose|please|pick|--|—)/.test(t);
    let idx = -1;
    for (let i = 0; i < el.options.length; i++) {{
        const o = el.options[i];
        const t = (o.text || '').trim().toLowerCase();
        const v = (o.value || '').trim().toLowerCase();
        if (wanted) {{
            if (t.includes(wanted) || v.includes(wanted)) {{ idx = i; break; }}
        }} else if (o.value !== '' && !placeholder(t)) {{
            idx = i;
            break;
        }}
    }}
    if (idx < 0) return false;
    el.selectedIndex = idx;
    el.dispatchEvent(new Event('input', {{bubbles: true}}));
    el.dispatchEvent(new Event('change', {{bubbles: true}}));
    return true;
}})()"#,
        wanted = js_str(wanted),
    );
    eval_bool(page, js).await
}

/// Tag name (lowercase) of the marked element, empty when none.
pub async fn marked_tag(page: &Page) -> String {
    page.evaluate(
        r#"(() => {
    const el = document.querySelector('[data-fp-target]');
    return el ? el.tagName.toLowerCase() : '';
})()"#,
    )
    .await
    .ok()
    .and_then(|v| v.into_value::<String>().ok())
    .unwrap_or_default()
}

/// Remove any lingering marker.
pub async fn clear_mark(page: &Page) {
    let _ = page
        .evaluate(
            "document.querySelectorAll('[data-fp-target]').forEach(el => el.removeAttribute('data-fp-target'))",
        )
        .await;
}
