//! `${...}` placeholder resolution

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;
use tracing::trace;

use crate::bag::VariableBag;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"))
}

/// One step of an accessor chain
#[derive(Debug, PartialEq)]
enum Accessor<'a> {
    Key(&'a str),
    Index(i64),
}

/// Split `name.key[0]` into its base name and accessor chain
///
/// Returns `None` for malformed paths (empty segments, unclosed or
/// non-integer brackets).
fn parse_path(expr: &str) -> Option<(&str, Vec<Accessor<'_>>)> {
    let expr = expr.trim();
    let split = expr.find(['.', '[']).unwrap_or(expr.len());
    let (base, mut rest) = expr.split_at(split);
    if base.is_empty() {
        return None;
    }

    let mut chain = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            if end == 0 {
                return None;
            }
            chain.push(Accessor::Key(&after[..end]));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']')?;
            let index = after[..end].trim().parse::<i64>().ok()?;
            chain.push(Accessor::Index(index));
            rest = &after[end + 1..];
        } else {
            return None;
        }
    }

    Some((base, chain))
}

fn access<'v>(value: &'v Value, accessor: &Accessor<'_>) -> Option<&'v Value> {
    match (value, accessor) {
        (Value::Object(map), Accessor::Key(key)) => map.get(*key),
        (Value::Array(items), Accessor::Index(index)) => {
            let len = items.len() as i64;
            let index = if *index < 0 { len + index } else { *index };
            if (0..len).contains(&index) {
                items.get(index as usize)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Render a resolved value the way it is spliced into text
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read-only view over a [`VariableBag`] that expands placeholders
#[derive(Debug, Clone, Copy)]
pub struct VariableResolver<'a> {
    bag: &'a VariableBag,
}

impl<'a> VariableResolver<'a> {
    pub fn new(bag: &'a VariableBag) -> Self {
        Self { bag }
    }

    /// Whether `text` contains at least one placeholder
    pub fn is_template(text: &str) -> bool {
        placeholder().is_match(text)
    }

    /// Raw value at a path such as `pos.x` or `items[1]`
    pub fn lookup(&self, expr: &str) -> Option<&'a Value> {
        let (base, chain) = parse_path(expr)?;
        let root = self.bag.get(base)?;
        chain
            .iter()
            .try_fold(root, |value, accessor| access(value, accessor))
    }

    /// Expand every placeholder in `text`
    ///
    /// Unresolvable placeholders keep their original text.
    pub fn resolve_str(&self, text: &str) -> String {
        if !text.contains("${") {
            return text.to_string();
        }

        placeholder()
            .replace_all(text, |caps: &Captures<'_>| match self.lookup(&caps[1]) {
                Some(value) => stringify(value),
                None => {
                    trace!("Unresolved placeholder: {}", &caps[0]);
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// Resolve a parameter value
    ///
    /// Strings are expanded; every other value is returned unchanged.
    pub fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolve_str(s)),
            other => other.clone(),
        }
    }

    /// Resolve strings nested anywhere inside lists and maps
    pub fn resolve_deep(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolve_str(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_deep(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_deep(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag() -> VariableBag {
        let mut bag = VariableBag::new();
        bag.set("a", json!({"b": 5, "name": "ada"}));
        bag.set("list", json!([10, 20, 30]));
        bag.set("pos", json!({"points": [{"x": 1, "y": 2}]}));
        bag.set("flag", json!(true));
        bag.set("nothing", Value::Null);
        bag
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("a.b[1]"),
            Some(("a", vec![Accessor::Key("b"), Accessor::Index(1)]))
        );
        assert_eq!(parse_path("a[x]"), None);
        assert_eq!(parse_path("a[1"), None);
        assert_eq!(parse_path("a..b"), None);
        assert_eq!(parse_path(".b"), None);
    }

    #[test]
    fn test_key_and_index_access() {
        let bag = bag();
        let resolver = VariableResolver::new(&bag);

        assert_eq!(resolver.resolve(&json!("${a.b}")), json!("5"));
        assert_eq!(resolver.resolve(&json!("${list[1]}")), json!("20"));
        assert_eq!(resolver.resolve(&json!("${list[-1]}")), json!("30"));
        assert_eq!(resolver.resolve_str("${pos.points[0].y}"), "2");
    }

    #[test]
    fn test_missing_names_stay_literal() {
        let bag = bag();
        let resolver = VariableResolver::new(&bag);

        assert_eq!(resolver.resolve_str("${missing}"), "${missing}");
        assert_eq!(resolver.resolve_str("${a.nope}"), "${a.nope}");
        assert_eq!(resolver.resolve_str("${list[7]}"), "${list[7]}");
        assert_eq!(resolver.resolve_str("${list[x]}"), "${list[x]}");
        assert_eq!(resolver.resolve_str("${flag.x}"), "${flag.x}");
    }

    #[test]
    fn test_mixed_text() {
        let bag = bag();
        let resolver = VariableResolver::new(&bag);

        assert_eq!(
            resolver.resolve_str("hi ${a.name}, ${missing} and ${list[0]}"),
            "hi ada, ${missing} and 10"
        );
    }

    #[test]
    fn test_stringify_non_strings() {
        let bag = bag();
        let resolver = VariableResolver::new(&bag);

        assert_eq!(resolver.resolve_str("${flag}"), "true");
        assert_eq!(resolver.resolve_str("${nothing}"), "null");
        assert_eq!(resolver.resolve_str("${list}"), "[10,20,30]");
        assert_eq!(resolver.resolve_str("${a}"), r#"{"b":5,"name":"ada"}"#);
    }

    #[test]
    fn test_non_strings_unchanged() {
        let bag = bag();
        let resolver = VariableResolver::new(&bag);

        assert_eq!(resolver.resolve(&json!(42)), json!(42));
        assert_eq!(resolver.resolve(&json!(["${a.b}"])), json!(["${a.b}"]));
    }

    #[test]
    fn test_resolve_deep() {
        let bag = bag();
        let resolver = VariableResolver::new(&bag);

        let value = json!({"name": "${a.name}", "ids": ["${list[0]}", 3], "n": null});
        assert_eq!(
            resolver.resolve_deep(&value),
            json!({"name": "ada", "ids": ["10", 3], "n": null})
        );
    }

    #[test]
    fn test_lookup_returns_raw_value() {
        let bag = bag();
        let resolver = VariableResolver::new(&bag);

        assert_eq!(resolver.lookup("a.b"), Some(&json!(5)));
        assert_eq!(resolver.lookup("list"), Some(&json!([10, 20, 30])));
        assert_eq!(resolver.lookup("missing"), None);
    }

    #[test]
    fn test_resolution_does_not_mutate_bag() {
        let bag = bag();
        let before = bag.clone();
        let resolver = VariableResolver::new(&bag);
        resolver.resolve_str("${a.b} ${missing}");
        assert_eq!(bag, before);
    }

    #[test]
    fn test_is_template() {
        assert!(VariableResolver::is_template("x=${x}"));
        assert!(!VariableResolver::is_template("plain $text {braces}"));
    }
}
