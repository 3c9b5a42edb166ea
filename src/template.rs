//! Template engine for dynamic responses.
//!
//! Uses Handlebars for template rendering with the request snapshot as
//! context. Field references may be written Go-style with a leading dot
//! (`{{.Path}}`, `{{index .Headers "X-Id"}}`); the dot is dropped before the
//! template is compiled.

use crate::snapshot::RequestSnapshot;
use handlebars::Handlebars;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Context for template rendering.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateContext<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query_params: &'a BTreeMap<String, Vec<String>>,
    pub headers: &'a BTreeMap<String, Vec<String>>,
    pub body: &'a str,
    pub remote_addr: &'a str,
    pub host: &'a str,
    pub protocol: &'a str,
    /// Request body as JSON (if parseable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl<'a> TemplateContext<'a> {
    fn from_snapshot(snapshot: &'a RequestSnapshot) -> Self {
        Self {
            method: &snapshot.method,
            path: &snapshot.path,
            query_params: &snapshot.query_params,
            headers: &snapshot.headers,
            body: &snapshot.body,
            remote_addr: &snapshot.remote_addr,
            host: &snapshot.host,
            protocol: &snapshot.protocol,
            json: serde_json::from_str(&snapshot.body).ok(),
        }
    }
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("index", Box::new(index_helper));
        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));
        handlebars.register_helper("base64", Box::new(base64_helper));

        // Bodies are JSON or text, never HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string against a request snapshot.
    pub fn render(
        &self,
        template: &str,
        snapshot: &RequestSnapshot,
    ) -> Result<String, handlebars::RenderError> {
        let source = strip_field_dots(template);
        let ctx = TemplateContext::from_snapshot(snapshot);
        self.handlebars.render_template(&source, &ctx)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop the leading dot of Go-style field references inside `{{ }}` tags.
fn strip_field_dots(source: &str) -> Cow<'_, str> {
    if !source.contains("{{") {
        return Cow::Borrowed(source);
    }

    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tag_and_rest = &rest[start..];
        let Some(end) = tag_and_rest.find("}}") else {
            out.push_str(tag_and_rest);
            return Cow::Owned(out);
        };
        rewrite_tag(&tag_and_rest[..end + 2], &mut out);
        rest = &tag_and_rest[end + 2..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn rewrite_tag(tag: &str, out: &mut String) {
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut chars = tag.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                out.push(ch);
            }
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                out.push(ch);
            }
            None if ch == '.' => {
                let after_boundary =
                    matches!(prev, Some('{' | '(' | '~')) || prev.is_some_and(char::is_whitespace);
                let before_field = chars
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_');
                if !(after_boundary && before_field) {
                    out.push(ch);
                }
            }
            None => out.push(ch),
        }
        prev = Some(ch);
    }
}

// Custom Handlebars helpers

fn index_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let container = h.param(0).map(|v| v.value());
    let key = h.param(1).map(|v| v.value());

    let found = match (container, key) {
        (Some(serde_json::Value::Object(map)), Some(serde_json::Value::String(k))) => map
            .get(k)
            .or_else(|| {
                map.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(k))
                    .map(|(_, v)| v)
            }),
        (Some(serde_json::Value::Array(arr)), Some(serde_json::Value::Number(n))) => {
            n.as_u64().and_then(|i| arr.get(i as usize))
        }
        _ => None,
    };

    // Multi-valued entries (headers, query params) yield their first value
    let value = match found {
        Some(serde_json::Value::Array(values)) => values.first(),
        other => other,
    };

    match value {
        Some(serde_json::Value::String(s)) => out.write(s)?,
        Some(serde_json::Value::Null) | None => {}
        Some(other) => out.write(&other.to_string())?,
    }
    Ok(())
}

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    // Strings are JSON-quoted, structured values serialized compactly
    let value = h
        .param(0)
        .map(|v| v.value().clone())
        .unwrap_or(serde_json::Value::Null);
    out.write(&serde_json::to_string(&value).unwrap_or_default())?;
    Ok(())
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let uuid = format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffffffffffff,
    );
    out.write(&uuid)?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    out.write(&Utc::now().format(format).to_string())?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);
    let (low, high) = if min <= max { (min, max) } else { (max, min) };

    let value = rand::thread_rng().gen_range(low..=high);
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let default = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(v) if !v.is_null() && !v.is_string() => out.write(&v.to_string())?,
        _ => out.write(default)?,
    }
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}

fn base64_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use base64::Engine;
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&base64::engine::general_purpose::STANDARD.encode(value))?;
    Ok(())
}
