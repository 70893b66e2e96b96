use std::fmt::Display;

use wasm_bindgen::JsValue;

/// Readable text for a thrown JS value
pub fn describe_js(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

pub fn to_js_error(e: impl Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Join a base URL and an absolute API path without doubling the slash
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
