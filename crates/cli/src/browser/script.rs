//! JavaScript snippets evaluated by the Chromium page driver.

use serde_json::Value;

/// JSON string literal for embedding `raw` in a script.
pub fn literal(raw: &str) -> String {
	Value::from(raw).to_string()
}

/// Wraps `body` in an IIFE where `el` is the first match for `selector` (or null).
pub fn with_element(selector: &str, body: &str) -> String {
	format!("(() => {{ const el = document.querySelector({}); {body} }})()", literal(selector))
}

pub fn exists(selector: &str) -> String {
	with_element(selector, "return el !== null;")
}

pub fn is_visible(selector: &str) -> String {
	with_element(
		selector,
		"if (!el) return false; \
		 const style = window.getComputedStyle(el); \
		 const rect = el.getBoundingClientRect(); \
		 return style.visibility !== 'hidden' && style.display !== 'none' && (rect.width > 0 || rect.height > 0);",
	)
}

/// `null` when missing, otherwise the current `checked` state.
pub fn checked_state(selector: &str) -> String {
	with_element(selector, "return el ? !!el.checked : null;")
}

pub fn select_value(selector: &str, value: &str) -> String {
	with_element(
		selector,
		&format!(
			"if (!el) return false; \
			 el.value = {}; \
			 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
			 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
			 return true;",
			literal(value)
		),
	)
}

/// `{found, value}`; `value` reads the live property for inputs.
pub fn attribute(selector: &str, name: &str) -> String {
	with_element(
		selector,
		&format!(
			"if (!el) return {{ found: false }}; \
			 const name = {}; \
			 const value = name === 'value' && 'value' in el ? el.value : el.getAttribute(name); \
			 return {{ found: true, value }};",
			literal(name)
		),
	)
}

pub fn text_content(selector: &str) -> String {
	with_element(selector, "return el ? { found: true, value: el.textContent } : { found: false };")
}

pub fn replace_document(html: &str) -> String {
	format!("(() => {{ document.open(); document.write({}); document.close(); return true; }})()", literal(html))
}

/// Snapshot of the page's origin and localStorage entries.
pub const LOCAL_STORAGE: &str = "(() => { \
	try { return { origin: window.location.origin, entries: Object.entries(window.localStorage) }; } \
	catch (e) { return { origin: window.location.origin, entries: [] }; } \
})()";

/// Runs before any page script and restores `entries` when the origin matches.
pub fn seed_local_storage(origin: &str, entries: &[(String, String)]) -> String {
	let pairs = Value::from(
		entries
			.iter()
			.map(|(k, v)| Value::from(vec![Value::from(k.as_str()), Value::from(v.as_str())]))
			.collect::<Vec<_>>(),
	);
	format!(
		"(() => {{ if (window.location.origin !== {}) return; \
		 try {{ for (const [k, v] of {pairs}) {{ if (window.localStorage.getItem(k) === null) window.localStorage.setItem(k, v); }} }} \
		 catch (e) {{}} }})()",
		literal(origin)
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn selectors_are_escaped() {
		let script = exists(r#"input[name="label"]"#);
		assert!(script.contains(r#"document.querySelector("input[name=\"label\"]")"#));
	}

	#[test]
	fn document_html_is_a_string_literal() {
		let script = replace_document("<p>\"hi\"</p>\n</script>");
		assert!(script.contains(r#"document.write("<p>\"hi\"</p>\n</script>")"#));
	}

	#[test]
	fn local_storage_seed_is_origin_guarded() {
		let script = seed_local_storage("https://app.slack.com", &[("k".into(), "v\"".into())]);
		assert!(script.contains(r#"window.location.origin !== "https://app.slack.com""#));
		assert!(script.contains(r#"[["k","v\""]]"#));
	}
}
