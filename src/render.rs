//! SQL template rendering.
//! Expands `{{ name }}` macros from the request's template parameters before
//! anything is persisted or executed. Rendering is all-or-nothing: the first
//! unknown variable or malformed macro aborts with a render error and no
//! partial output escapes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, AppResult};

static MACRO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

fn value_to_sql_text(name: &str, value: &Value) -> AppResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("NULL".to_string()),
        Value::Array(_) | Value::Object(_) => Err(AppError::render(
            "template_render_error".to_string(),
            format!("template parameter '{}' must be a scalar", name),
        )),
    }
}

/// Render `sql` by substituting every `{{ name }}` macro from `params`.
pub fn render(sql: &str, params: &serde_json::Map<String, Value>) -> AppResult<String> {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0usize;
    for caps in MACRO_RE.captures_iter(sql) {
        let whole = caps.get(0).expect("regex capture 0 always present");
        let name = &caps[1];
        let value = params.get(name).ok_or_else(|| {
            AppError::render(
                "template_render_error".to_string(),
                format!("undefined template parameter '{}'", name),
            )
        })?;
        out.push_str(&sql[last..whole.start()]);
        out.push_str(&value_to_sql_text(name, value)?);
        last = whole.end();
    }
    out.push_str(&sql[last..]);

    // Any brace pair surviving substitution is malformed macro syntax
    // (unclosed, nested, or a non-identifier body).
    if out.contains("{{") || out.contains("}}") {
        return Err(AppError::render(
            "template_render_error",
            "malformed template macro syntax",
        ));
    }
    Ok(out)
}
