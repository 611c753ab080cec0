//! `{{variable}}` substitution and dotted-path lookup.
//!
//! Placeholders name a key of the merged context, optionally as a dotted
//! path into nested objects/arrays (`{{user.emails.0}}`). Unresolved
//! placeholders are left in place verbatim.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use queue::Payload;

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_$\-]+(?:\.[A-Za-z0-9_$\-]+)*)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Resolve a dotted `path` against `context`.
///
/// An exact top-level key wins over path splitting, so keys that themselves
/// contain dots stay addressable.
pub fn resolve_path<'a>(context: &'a Payload, path: &str) -> Option<&'a Value> {
    if let Some(v) = context.get(path) {
        return Some(v);
    }

    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a JSON value for inclusion in a string: strings verbatim,
/// everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute every resolvable placeholder in `template`.
pub fn substitute(template: &str, context: &Payload) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| match resolve_path(context, &caps[1]) {
            Some(v) => render(v),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Apply [`substitute`] to every string inside `value`, recursively.
///
/// A string that is exactly one placeholder is replaced by the referenced
/// value itself, keeping its JSON type.
pub fn substitute_value(value: &Value, context: &Payload) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = placeholder().captures(s) {
                if caps[0].len() == s.len() {
                    if let Some(v) = resolve_path(context, &caps[1]) {
                        return v.clone();
                    }
                }
            }
            Value::String(substitute(s, context))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (substitute(k, context), substitute_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Look up a string field of a node's config and template it.
pub fn config_str(config: &Value, field: &str, context: &Payload) -> Option<String> {
    config
        .get(field)
        .and_then(Value::as_str)
        .map(|s| substitute(s, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::messages::into_payload;
    use serde_json::json;

    fn ctx() -> Payload {
        into_payload(json!({
            "name": "Ada",
            "count": 3,
            "user": { "email": "ada@example.com", "tags": ["x", "y"] },
            "dotted.key": "kept"
        }))
    }

    #[test]
    fn substitutes_known_variables() {
        assert_eq!(substitute("Hello {{name}}, you have {{ count }} items", &ctx()), "Hello Ada, you have 3 items");
    }

    #[test]
    fn unresolved_placeholders_pass_through() {
        assert_eq!(substitute("Hi {{missing}} / {{user.nope}}", &ctx()), "Hi {{missing}} / {{user.nope}}");
    }

    #[test]
    fn dotted_paths_reach_nested_values() {
        let c = ctx();
        assert_eq!(substitute("{{user.email}}", &c), "ada@example.com");
        assert_eq!(resolve_path(&c, "user.tags.1"), Some(&json!("y")));
        assert_eq!(resolve_path(&c, "dotted.key"), Some(&json!("kept")));
        assert_eq!(resolve_path(&c, "count.inner"), None);
    }

    #[test]
    fn whole_value_placeholders_keep_their_type() {
        let rendered = substitute_value(&json!({ "n": "{{count}}", "s": "n={{count}}", "u": "{{user}}" }), &ctx());
        assert_eq!(rendered["n"], json!(3));
        assert_eq!(rendered["s"], json!("n=3"));
        assert_eq!(rendered["u"]["email"], "ada@example.com");
    }
}
