//! Structured data extraction from free-text model output.
//!
//! Model responses arrive fenced, prefixed with prose, as a bare object, keyed
//! by collection name, or grouped per source post. [`normalize`] resolves all
//! of these once into a [`ResponseShape`] and flattens it into artifacts.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::Artifact;
use crate::error::truncate_diagnostic;

/// Longest synthesized name, in characters
pub const MAX_SYNTHESIZED_NAME: usize = 60;

/// Model output contained no usable JSON structure
#[derive(Debug, Clone, Error, PartialEq)]
#[error("no usable JSON structure in model output: {snippet}")]
pub struct ParseError {
    /// First 200 characters of the raw input
    pub snippet: String,
}

impl ParseError {
    fn new(raw: &str) -> Self {
        Self {
            snippet: truncate_diagnostic(raw),
        }
    }
}

/// What a caller expects a response to contain
#[derive(Debug, Clone)]
pub struct ExpectedShape {
    /// Keys that hold the item list when the response is a single object
    pub collection_keys: &'static [&'static str],
    /// Key holding per-group nested items (e.g. several ideas per post)
    pub nested_key: Option<&'static str>,
    /// Prefix of group keys in a keyed-by-group object (e.g. `post_1`)
    pub group_key_prefix: Option<&'static str>,
    /// Fields nested items inherit from their group when missing
    pub inherited_fields: &'static [&'static str],
    /// Field on the group copied to nested items as `source_post_id`
    pub parent_id_field: &'static str,
    /// Fields tried in order when an item has no name
    pub name_sources: &'static [&'static str],
    /// Label for `<label> N` when no name source is present
    pub fallback_label: &'static str,
}

impl ExpectedShape {
    /// App ideas, possibly nested per analyzed post
    pub fn ideas() -> Self {
        Self {
            collection_keys: &["app_ideas", "ideas"],
            nested_key: Some("app_ideas"),
            group_key_prefix: Some("post"),
            inherited_fields: &[
                "problem",
                "target_audience",
                "confidence",
                "reasoning",
                "market_signals",
            ],
            parent_id_field: "id",
            name_sources: &["description", "problem"],
            fallback_label: "Idea",
        }
    }

    /// Product niches
    pub fn niches() -> Self {
        Self {
            collection_keys: &["niches", "items"],
            nested_key: None,
            group_key_prefix: None,
            inherited_fields: &[],
            parent_id_field: "id",
            name_sources: &["niche", "description", "category"],
            fallback_label: "Niche",
        }
    }
}

/// A response resolved into one of the shapes models actually produce
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    /// Top-level array
    List(Vec<Value>),
    /// Lone object that is itself one item
    Single(Map<String, Value>),
    /// Object wrapping the list under a collection key
    Keyed { key: String, items: Vec<Value> },
    /// Object whose keys are group keys; values are groups, in key order
    Grouped(Vec<(String, Value)>),
}

impl ResponseShape {
    /// Resolve parsed JSON against the expected shape
    pub fn resolve(value: Value, shape: &ExpectedShape) -> Self {
        match value {
            Value::Array(items) => Self::List(items),
            Value::Object(map) => {
                if let Some(prefix) = shape.group_key_prefix {
                    if !map.is_empty() && map.keys().any(|k| k.starts_with(prefix)) {
                        return Self::Grouped(map.into_iter().collect());
                    }
                }
                for key in shape.collection_keys {
                    if let Some(Value::Array(items)) = map.get(*key) {
                        return Self::Keyed {
                            key: key.to_string(),
                            items: items.clone(),
                        };
                    }
                }
                Self::Single(map)
            }
            other => Self::List(vec![other]),
        }
    }

    /// Flatten into item objects, nested entries inheriting group fields
    fn into_items(self, shape: &ExpectedShape) -> Vec<Map<String, Value>> {
        let groups: Vec<(Option<String>, Value)> = match self {
            Self::List(items) | Self::Keyed { items, .. } => {
                items.into_iter().map(|v| (None, v)).collect()
            }
            Self::Single(map) => vec![(None, Value::Object(map))],
            Self::Grouped(entries) => entries.into_iter().map(|(k, v)| (Some(k), v)).collect(),
        };

        let mut items = Vec::new();
        for (group_key, value) in groups {
            let Value::Object(group) = value else {
                continue;
            };

            let nested = shape
                .nested_key
                .and_then(|key| group.get(key))
                .and_then(Value::as_array)
                .filter(|nested| !nested.is_empty());

            match nested {
                Some(nested) => {
                    for entry in nested {
                        if let Value::Object(entry) = entry {
                            items.push(inherit(entry.clone(), &group, group_key.as_deref(), shape));
                        }
                    }
                }
                None => items.push(group),
            }
        }
        items
    }
}

fn inherit(
    mut entry: Map<String, Value>,
    group: &Map<String, Value>,
    group_key: Option<&str>,
    shape: &ExpectedShape,
) -> Map<String, Value> {
    for field in shape.inherited_fields {
        let missing = entry.get(*field).map_or(true, Value::is_null);
        if missing {
            if let Some(value) = group.get(*field) {
                entry.insert(field.to_string(), value.clone());
            }
        }
    }

    if entry.get("source_post_id").map_or(true, Value::is_null) {
        let parent_id = group
            .get(shape.parent_id_field)
            .cloned()
            .or_else(|| group_key.map(|k| Value::String(k.to_string())));
        if let Some(id) = parent_id {
            entry.insert("source_post_id".to_string(), id);
        }
    }
    entry
}

/// Remove markdown code fences (with an optional language tag)
pub fn strip_code_fences(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];

        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let after_tag = &rest[tag_len..];
        if tag_len > 0 && (after_tag.is_empty() || after_tag.starts_with(char::is_whitespace)) {
            rest = after_tag;
        }
        rest = rest.trim_start();
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Span from the first `open` to the last `close`, if ordered
fn outer_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse the first usable JSON structure out of raw model output
pub fn extract_value(raw: &str) -> Result<Value, ParseError> {
    let text = strip_code_fences(raw);

    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        // A bare scalar is not structure
        if value.is_array() || value.is_object() {
            return Ok(value);
        }
    }

    [('[', ']'), ('{', '}')]
        .iter()
        .filter_map(|(open, close)| outer_span(&text, *open, *close))
        .find_map(|span| serde_json::from_str::<Value>(span).ok())
        .ok_or_else(|| ParseError::new(raw))
}

/// Extract artifacts from raw model output
pub fn normalize(raw: &str, shape: &ExpectedShape) -> Result<Vec<Artifact>, ParseError> {
    let value = extract_value(raw)?;
    let items = ResponseShape::resolve(value, shape).into_items(shape);

    Ok(items
        .into_iter()
        .enumerate()
        .map(|(i, mut item)| {
            let has_name = item
                .get("name")
                .and_then(Value::as_str)
                .map_or(false, |n| !n.trim().is_empty());
            if !has_name {
                item.insert(
                    "name".to_string(),
                    Value::String(synthesize_name(&item, shape, i)),
                );
            }
            Artifact::from_fields(item)
        })
        .collect())
}

fn synthesize_name(item: &Map<String, Value>, shape: &ExpectedShape, index: usize) -> String {
    shape
        .name_sources
        .iter()
        .filter_map(|field| item.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(|s| {
            s.chars()
                .take(MAX_SYNTHESIZED_NAME)
                .collect::<String>()
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| format!("{} {}", shape.fallback_label, index + 1))
}
