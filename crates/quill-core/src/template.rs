//! `{{placeholder}}` interpolation against a resolved binding set.
//!
//! Placeholders name a binding (`{{item}}`) or a dotted path into a
//! structured binding (`{{item.characterName}}`). Unknown binding names are
//! left in place so a half-edited template stays visible as written.

use crate::bindings::BindingSet;
use crate::value::{Value, display_opt};

/// Interpolate every `{{name}}` and `{{name.path…}}` placeholder in
/// `content` against `binding`.
pub fn interpolate(content: &str, binding: &BindingSet) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("{{") {
        let Some(end_rel) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + end_rel;
        out.push_str(&rest[..start]);

        let key = rest[start + 2..end].trim();
        match resolve(key, binding) {
            Some(text) => out.push_str(&text),
            None => out.push_str(&rest[start..end + 2]),
        }
        rest = &rest[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Resolve one placeholder key; `None` means the binding name is unknown.
fn resolve(key: &str, binding: &BindingSet) -> Option<String> {
    let (name, path) = match key.split_once('.') {
        Some((name, path)) => (name, Some(path)),
        None => (key, None),
    };
    let value = binding.get(name)?;

    match path {
        None => Some(display_opt(value.as_ref())),
        Some(path) => Some(
            value
                .as_ref()
                .and_then(|v| navigate(&v.to_native(), path))
                .unwrap_or_default(),
        ),
    }
}

/// Walk a dotted path through a native JSON value and render the leaf.
fn navigate(native: &serde_json::Value, path: &str) -> Option<String> {
    let mut current = native;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(match current {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// True when the content still carries unexpanded placeholders.
pub fn has_placeholders(content: &str) -> bool {
    content
        .find("{{")
        .is_some_and(|i| content[i..].contains("}}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn binding(entries: &[(&str, Option<Value>)]) -> BindingSet {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<IndexMap<_, _>>()
    }

    #[test]
    fn test_simple_substitution() {
        let b = binding(&[("x", Some(Value::Markdown { content: "hello".into() }))]);
        assert_eq!(interpolate("{{x}}!", &b), "hello!");
    }

    #[test]
    fn test_every_occurrence_replaced() {
        let b = binding(&[("x", Some(Value::Number { value: 2.0 }))]);
        assert_eq!(interpolate("{{x}}+{{x}}", &b), "2+2");
    }

    #[test]
    fn test_unknown_name_left_in_place() {
        let b = binding(&[]);
        assert_eq!(interpolate("keep {{missing}}", &b), "keep {{missing}}");
    }

    #[test]
    fn test_absent_binding_renders_empty() {
        let b = binding(&[("gone", None)]);
        assert_eq!(interpolate("[{{gone}}]", &b), "[]");
    }

    #[test]
    fn test_dotted_path_into_json() {
        let b = binding(&[(
            "item",
            Some(Value::Json {
                value: r#"{"characterName":"Rex","age":3}"#.into(),
            }),
        )]);
        assert_eq!(interpolate("{{item.characterName}}", &b), "Rex");
        assert_eq!(interpolate("{{item.age}}", &b), "3");
        assert_eq!(interpolate("{{item.nope}}", &b), "");
    }

    #[test]
    fn test_dotted_path_through_array_index() {
        let b = binding(&[(
            "rows",
            Some(Value::Json {
                value: r#"[{"name":"a"},{"name":"b"}]"#.into(),
            }),
        )]);
        assert_eq!(interpolate("{{rows.1.name}}", &b), "b");
    }

    #[test]
    fn test_has_placeholders() {
        assert!(has_placeholders("a {{b}} c"));
        assert!(!has_placeholders("no braces"));
        assert!(!has_placeholders("open {{ only"));
    }
}
