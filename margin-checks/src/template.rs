//! Output row templating
//!
//! Template values are literals or placeholders:
//!
//! - `new:<column>` / `old:<column>` as the whole value substitute the typed
//!   value of the column.
//! - `[#~new:<column>#]` / `[#~old:<column>#]` embedded in text are rendered
//!   as text.
//!
//! Everything else is copied through unchanged.

use crate::predicate::RowScope;
use margin_core::{identity_key, FieldRef, MarginResult, Row, TemplateError, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static WHOLE_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:new|old):\S+$").expect("Invalid whole-value placeholder regex"));

static EMBEDDED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[#~([^#]*)#\]").expect("Invalid embedded placeholder regex"));

const EMBEDDED_OPEN: &str = "[#~";

/// Render one row template against a matched source row.
pub fn render_row(template: &BTreeMap<String, Value>, scope: &RowScope<'_>) -> MarginResult<Row> {
    let mut row = Row::new();
    for (column, value) in template {
        row.set(column.clone(), render_value(value, scope)?);
    }
    Ok(row)
}

/// Render one template value.
pub fn render_value(value: &Value, scope: &RowScope<'_>) -> MarginResult<Value> {
    let Value::String(text) = value else {
        return Ok(value.clone());
    };

    if WHOLE_VALUE.is_match(text) {
        let reference = FieldRef::parse(text);
        return scope
            .lookup(&reference)?
            .cloned()
            .ok_or_else(|| missing(text, scope));
    }

    if text.contains(EMBEDDED_OPEN) {
        return render_embedded(text, scope).map(Value::String);
    }

    Ok(value.clone())
}

fn render_embedded(text: &str, scope: &RowScope<'_>) -> MarginResult<String> {
    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;
    for captures in EMBEDDED.captures_iter(text) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let reference = parse_embedded(inner.as_str(), text)?;
        let value = scope
            .lookup(&reference)?
            .ok_or_else(|| missing(&reference.to_string(), scope))?;

        push_literal(&mut rendered, &text[last..whole.start()], text)?;
        rendered.push_str(&identity_key(value));
        last = whole.end();
    }
    push_literal(&mut rendered, &text[last..], text)?;
    Ok(rendered)
}

/// Copy text between placeholders. An unterminated opener is malformed.
fn push_literal(rendered: &mut String, literal: &str, template: &str) -> MarginResult<()> {
    if literal.contains(EMBEDDED_OPEN) {
        return Err(TemplateError::MalformedPlaceholder {
            template: template.to_string(),
        }
        .into());
    }
    rendered.push_str(literal);
    Ok(())
}

fn parse_embedded(inner: &str, template: &str) -> MarginResult<FieldRef> {
    let inner = inner.trim();
    let column = inner
        .strip_prefix("new:")
        .or_else(|| inner.strip_prefix("old:"))
        .map(str::trim)
        .unwrap_or_default();
    if column.is_empty() {
        return Err(TemplateError::MalformedPlaceholder {
            template: template.to_string(),
        }
        .into());
    }
    Ok(FieldRef::parse(inner))
}

fn missing(reference: &str, scope: &RowScope<'_>) -> margin_core::MarginError {
    TemplateError::MissingReference {
        reference: reference.to_string(),
        identity: scope.identity.to_string(),
    }
    .into()
}

/// Column references used by a template value, malformed ones skipped.
pub fn field_refs(value: &Value) -> Vec<FieldRef> {
    let Value::String(text) = value else {
        return Vec::new();
    };
    if WHOLE_VALUE.is_match(text) {
        return vec![FieldRef::parse(text)];
    }
    EMBEDDED
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|inner| parse_embedded(inner.as_str(), text).ok())
        .collect()
}
