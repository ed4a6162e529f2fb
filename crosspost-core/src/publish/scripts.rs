//! Builders for the expressions evaluated through the bridge. Each builder
//! embeds the profile's ordered lookup expressions as a JSON array; the
//! fallback walk happens inside the page so the engine stays
//! platform-agnostic.

use serde::Deserialize;

use super::content::MediaPayload;

/// Shared prelude: resolve the first live element out of an ordered
/// selector list. `requireVisible` is off for file inputs, which platforms
/// routinely keep hidden behind styled drop zones.
const RESOLVE_PRELUDE: &str = r#"
    const resolve = (selectors, requireVisible) => {
        for (const sel of selectors) {
            let node = null;
            try { node = document.querySelector(sel); } catch (_) { continue; }
            if (!node) continue;
            if (requireVisible) {
                const style = window.getComputedStyle(node);
                if (style && (style.display === 'none' || style.visibility === 'hidden')) {
                    continue;
                }
            }
            return node;
        }
        return null;
    };
"#;

fn encode(selectors: &[String]) -> String {
    serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string())
}

fn encode_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeResult {
    pub found: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingState {
    pub failed: bool,
    pub ready: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishReadyState {
    pub found: bool,
    pub enabled: bool,
    pub label_matches: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyState {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// `document.readyState === 'complete'`.
pub fn page_ready() -> String {
    "document.readyState === 'complete'".to_string()
}

pub fn probe_element(selectors: &[String]) -> String {
    format!(
        r#"(() => {{
    {RESOLVE_PRELUDE}
    const node = resolve({selectors}, true);
    if (!node) return {{ found: false, enabled: false, label: null }};
    const label = (node.innerText || node.textContent || '').trim();
    return {{ found: true, enabled: !node.disabled, label: label || null }};
}})()"#,
        selectors = encode(selectors)
    )
}

/// Build a `File` from the base64 payload, attach it to the first matching
/// file input via `DataTransfer`, and fire the framework events. Inputs
/// whose `accept` matches the media kind win over earlier generic matches.
pub fn attach_media(selectors: &[String], payload: &MediaPayload) -> String {
    format!(
        r#"(() => {{
    try {{
        const selectors = {selectors};
        const accept_hint = {accept};
        const candidates = [];
        for (const sel of selectors) {{
            let nodes = [];
            try {{ nodes = document.querySelectorAll(sel); }} catch (_) {{ continue; }}
            for (const node of nodes) {{
                if (node.tagName === 'INPUT' && node.type === 'file') candidates.push(node);
            }}
        }}
        if (candidates.length === 0) {{
            return {{ success: false, error: 'file input not found' }};
        }}
        let input = candidates.find(node => (node.accept || '').includes(accept_hint));
        if (!input) input = candidates[0];
        const bytes = atob({data});
        const buffer = new Uint8Array(bytes.length);
        for (let i = 0; i < bytes.length; i++) buffer[i] = bytes.charCodeAt(i);
        const file = new File([buffer], {file_name}, {{ type: {mime} }});
        const transfer = new DataTransfer();
        transfer.items.add(file);
        Object.defineProperty(input, 'files', {{ value: transfer.files, configurable: true }});
        input.dispatchEvent(new Event('change', {{ bubbles: true }}));
        input.dispatchEvent(new Event('input', {{ bubbles: true }}));
        return {{ success: true, error: null }};
    }} catch (err) {{
        return {{ success: false, error: String(err && err.message || err) }};
    }}
}})()"#,
        selectors = encode(selectors),
        accept = encode_str(payload.kind.accept_fragment()),
        data = encode_str(&payload.data_base64),
        file_name = encode_str(&payload.file_name),
        mime = encode_str(&payload.mime_type),
    )
}

/// Write a value into the first matching control, handling both plain
/// inputs and contenteditable editors.
pub fn set_field_value(selectors: &[String], value: &str) -> String {
    format!(
        r#"(() => {{
    {RESOLVE_PRELUDE}
    const node = resolve({selectors}, true);
    if (!node) return {{ success: false, error: 'element not found' }};
    try {{
        node.focus();
        if (node.isContentEditable) {{
            node.textContent = {value};
        }} else {{
            node.value = {value};
        }}
        node.dispatchEvent(new Event('input', {{ bubbles: true }}));
        node.dispatchEvent(new Event('change', {{ bubbles: true }}));
        return {{ success: true, error: null }};
    }} catch (err) {{
        return {{ success: false, error: String(err && err.message || err) }};
    }}
}})()"#,
        selectors = encode(selectors),
        value = encode_str(value),
    )
}

pub fn click_element(selectors: &[String]) -> String {
    format!(
        r#"(() => {{
    {RESOLVE_PRELUDE}
    const node = resolve({selectors}, true);
    if (!node) return {{ success: false, error: 'element not found' }};
    try {{
        node.click();
        return {{ success: true, error: null }};
    }} catch (err) {{
        return {{ success: false, error: String(err && err.message || err) }};
    }}
}})()"#,
        selectors = encode(selectors)
    )
}

/// Post-upload processing/review state: an explicit failure marker beats a
/// readiness marker.
pub fn processing_state(ready: &[String], failed: &[String]) -> String {
    format!(
        r#"(() => {{
    {RESOLVE_PRELUDE}
    const failedNode = resolve({failed}, true);
    if (failedNode) return {{ failed: true, ready: false }};
    const readyNode = resolve({ready}, true);
    return {{ failed: false, ready: !!readyNode }};
}})()"#,
        ready = encode(ready),
        failed = encode(failed),
    )
}

/// Publish-button readiness: exists, enabled, and (when an expected label
/// is configured) label text matches.
pub fn publish_ready(selectors: &[String], expected_label: Option<&str>) -> String {
    format!(
        r#"(() => {{
    {RESOLVE_PRELUDE}
    const expected = {expected};
    const node = resolve({selectors}, true);
    if (!node) return {{ found: false, enabled: false, label_matches: false }};
    const enabled = !node.disabled && !node.classList.contains('disabled');
    const label = (node.innerText || node.textContent || '').trim();
    const label_matches = expected === null || label.includes(expected);
    return {{ found: true, enabled, label_matches }};
}})()"#,
        selectors = encode(selectors),
        expected = expected_label
            .map(encode_str)
            .unwrap_or_else(|| "null".to_string()),
    )
}

/// One-shot page inspection after the publish click.
pub fn verify_status(success: &[String], error: &[String]) -> String {
    format!(
        r#"(() => {{
    {RESOLVE_PRELUDE}
    const errorNode = resolve({error}, true);
    if (errorNode) {{
        const message = (errorNode.innerText || errorNode.textContent || '').trim();
        return {{ status: 'error', message: message || null }};
    }}
    const successNode = resolve({success}, true);
    if (successNode) {{
        const message = (successNode.innerText || successNode.textContent || '').trim();
        return {{ status: 'success', message: message || null }};
    }}
    return {{ status: 'unknown', message: null }};
}})()"#,
        success = encode(success),
        error = encode(error),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::content::MediaKind;

    #[test]
    fn selector_lists_are_json_encoded() {
        let script = probe_element(&["button.publish".to_string(), "b'quote".to_string()]);
        assert!(script.contains(r#"["button.publish","b'quote"]"#));
    }

    #[test]
    fn field_values_are_escaped() {
        let script = set_field_value(&["input".to_string()], "it's \"quoted\"\nline");
        assert!(script.contains(r#""it's \"quoted\"\nline""#));
    }

    #[test]
    fn attach_media_embeds_payload() {
        let payload = MediaPayload::from_bytes(
            "clip.mp4".to_string(),
            "video/mp4".to_string(),
            MediaKind::Video,
            b"data",
        );
        let script = attach_media(&["input[type=file]".to_string()], &payload);
        assert!(script.contains("\"clip.mp4\""));
        assert!(script.contains("\"video/mp4\""));
        assert!(script.contains(&payload.data_base64));
    }

    #[test]
    fn publish_ready_handles_missing_label() {
        let script = publish_ready(&["button".to_string()], None);
        assert!(script.contains("const expected = null;"));
        let script = publish_ready(&["button".to_string()], Some("Post"));
        assert!(script.contains("const expected = \"Post\";"));
    }
}
