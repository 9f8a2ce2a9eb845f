//! Data-path walking and preview rendering.

use serde_json::Value;

/// Ellipsis appended to truncated previews.
pub const ELLIPSIS: &str = "...";

/// Why a path walk stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Array segment that is not a non-negative integer.
    NotAnIndex(String),
    IndexOutOfRange { index: usize, len: usize },
    MissingKey(String),
    /// A scalar was reached with segments left over.
    NotTraversable(String),
}

/// Walk `path` (dot-separated) into `value`. An empty path returns `value` itself.
pub fn walk<'a>(value: &'a Value, path: &str) -> Result<&'a Value, PathError> {
    if path.is_empty() {
        return Ok(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| PathError::NotAnIndex(segment.to_string()))?;
                items.get(index).ok_or(PathError::IndexOutOfRange {
                    index,
                    len: items.len(),
                })?
            }
            Value::Object(map) => map
                .get(segment)
                .ok_or_else(|| PathError::MissingKey(segment.to_string()))?,
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                return Err(PathError::NotTraversable(segment.to_string()));
            }
        };
    }
    Ok(current)
}

/// Display text for a value: strings verbatim, everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cap `text` at `max_chars` characters. Longer text keeps `max_chars - 3` characters
/// followed by [`ELLIPSIS`].
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walk_objects_and_arrays() {
        let v = json!({ "items": [{ "id": 7 }], "meta": { "0": "zero" } });
        assert_eq!(walk(&v, "items.0.id"), Ok(&json!(7)));
        assert_eq!(walk(&v, "meta.0"), Ok(&json!("zero")));
        assert_eq!(walk(&v, ""), Ok(&v));
    }

    #[test]
    fn walk_failures() {
        let v = json!({ "items": [{ "id": 7 }], "name": "x" });
        assert_eq!(
            walk(&v, "items.1.id"),
            Err(PathError::IndexOutOfRange { index: 1, len: 1 })
        );
        assert_eq!(
            walk(&v, "items.first"),
            Err(PathError::NotAnIndex("first".into()))
        );
        assert_eq!(
            walk(&v, "items.-1"),
            Err(PathError::NotAnIndex("-1".into()))
        );
        assert_eq!(walk(&v, "missing"), Err(PathError::MissingKey("missing".into())));
        assert_eq!(
            walk(&v, "name.length"),
            Err(PathError::NotTraversable("length".into()))
        );
    }

    #[test]
    fn render_strings_verbatim_and_json_compact() {
        assert_eq!(render(&json!("hello")), "hello");
        assert_eq!(render(&json!({ "a": [1, 2] })), r#"{"a":[1,2]}"#);
        assert_eq!(render(&json!(7)), "7");
    }

    #[test]
    fn truncate_at_exact_points() {
        let long = "x".repeat(130);
        let out = truncate_preview(&long, 120);
        assert_eq!(out.chars().count(), 120);
        assert!(out.ends_with("..."));
        assert_eq!(&out[..117], &long[..117]);

        let exact = "y".repeat(120);
        assert_eq!(truncate_preview(&exact, 120), exact);
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let text = "é".repeat(10);
        let out = truncate_preview(&text, 5);
        assert_eq!(out, "éé...");
    }
}
