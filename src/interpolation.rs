//! Template resolution and nested-value lookup
//!
//! Step configuration payloads may reference prior step outputs with
//! `{{path}}` placeholders. Resolution walks the nested template structure,
//! substituting placeholders from the run's variable store:
//!
//! - a string that is exactly one placeholder resolves to the referenced
//!   value itself, preserving its type
//! - mixed strings interpolate each placeholder's display form in place
//! - unresolvable placeholders are left verbatim; resolution never fails
//! - non-string values pass through unchanged
//!
//! The nested path syntax (`a.b`, `items[0].name`) is shared with tool
//! output mapping, transform input mapping, and the expression evaluator.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// Resolves `{{path}}` placeholders in nested template structures
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    pattern: Regex,
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("invalid placeholder pattern"),
        }
    }

    /// Resolve every placeholder in `template` against `variables`
    ///
    /// A template containing no placeholders resolves deep-equal to itself.
    pub fn resolve(&self, template: &Value, variables: &HashMap<String, Value>) -> Value {
        match template {
            Value::String(s) => self.resolve_str(s, variables),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve(v, variables)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v, variables)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve a single string, preserving the referenced value's type when
    /// the string is exactly one placeholder
    fn resolve_str(&self, input: &str, variables: &HashMap<String, Value>) -> Value {
        if let Some(caps) = self.pattern.captures(input.trim()) {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            if whole == input.trim() {
                return match lookup_path(variables, &caps[1]) {
                    Some(value) => value,
                    None => Value::String(input.to_string()),
                };
            }
        }

        let replaced = self.pattern.replace_all(input, |caps: &regex::Captures| {
            match lookup_path(variables, &caps[1]) {
                Some(value) => value_display(&value),
                // leave unresolved placeholders as-is
                None => caps[0].to_string(),
            }
        });
        Value::String(replaced.into_owned())
    }
}

/// Split a path into segments, treating `[n]` as its own segment
fn parse_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();

    for ch in path.chars() {
        match ch {
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                current.push(ch);
            }
            ']' => {
                current.push(ch);
                segments.push(std::mem::take(&mut current));
            }
            '.' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Look up a dotted path in a variable map
///
/// An exact key match wins before nested descent, so mapped output names
/// that contain dots (`"build.status"`) stay addressable.
pub fn lookup_path(variables: &HashMap<String, Value>, path: &str) -> Option<Value> {
    if let Some(value) = variables.get(path.trim()) {
        return Some(value.clone());
    }
    let segments = parse_path(path.trim());
    let (root, rest) = segments.split_first()?;
    let base = variables.get(root)?;
    descend(base, rest)
}

/// Look up a dotted path inside a single JSON value
pub fn lookup_in_value(root: &Value, path: &str) -> Option<Value> {
    descend(root, &parse_path(path.trim()))
}

fn descend(root: &Value, segments: &[String]) -> Option<Value> {
    let mut current = root;
    for segment in segments {
        if let Some(index) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let index: usize = index.parse().ok()?;
            current = current.as_array()?.get(index)?;
        } else {
            current = current.as_object()?.get(segment)?;
        }
    }
    Some(current.clone())
}

/// Display form used when a value is spliced into a larger string
pub fn value_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}
