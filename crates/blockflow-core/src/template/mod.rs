//! # Template resolver
//!
//! Block configs reference other blocks' runtime output with `{{ref.path}}` tokens, where `ref`
//! is a block `normalized_id` (or the literal `input`) and `path` is a dot-separated walk into
//! that block's output. Resolution never fails: every token resolves to a preview value or to an
//! [`Resolution::Unresolved`] marker.
//!
//! Grammar: `{{identifier(.segment)*}}`. Tokens are matched non-greedily and cannot contain `}}`;
//! nested braces are not supported.

mod path;
mod validate;

use std::collections::HashMap;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::execution::BlockStates;
use crate::graph::{BlockId, Workflow};

pub use path::{ELLIPSIS, PathError, render, truncate_preview, walk};
pub use validate::{RUNTIME_KEYS, TemplateWarning, validate_references};

/// Last known output value per block.
pub type OutputCache = HashMap<BlockId, Value>;

/// Reference reserved for the workflow-level input supplied at run time.
pub const WORKFLOW_INPUT_REF: &str = "input";

/// Default preview cap in characters.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 120;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("token pattern is a valid regex"));

/// One `{{...}}` span found in a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateToken {
    /// Full matched text including braces.
    pub raw: String,
    /// Trimmed text between the braces.
    pub expression: String,
    /// Segment before the first `.`.
    pub block_ref: String,
    /// Everything after the first `.`; may be empty.
    pub data_path: String,
    /// Byte range of `raw` within the source string.
    pub span: Range<usize>,
}

/// Extract every token in `text`, in order of appearance.
pub fn extract_tokens(text: &str) -> Vec<TemplateToken> {
    TOKEN_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = caps.get(1)?.as_str().trim();
            let (block_ref, data_path) = match inner.split_once('.') {
                Some((head, rest)) => (head.trim(), rest.trim()),
                None => (inner, ""),
            };
            Some(TemplateToken {
                raw: whole.as_str().to_string(),
                expression: inner.to_string(),
                block_ref: block_ref.to_string(),
                data_path: data_path.to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// `{{input...}}` is bound at run time, never previewed.
    WorkflowInput,
    UnknownBlock { block_ref: String },
    /// The block exists but has produced no output yet.
    NoOutput { block_id: BlockId },
    PathNotFound { detail: String },
}

impl From<PathError> for UnresolvedReason {
    fn from(err: PathError) -> Self {
        let detail = match err {
            PathError::NotAnIndex(seg) => format!("'{seg}' is not an array index"),
            PathError::IndexOutOfRange { index, len } => {
                format!("index {index} out of range (len {len})")
            }
            PathError::MissingKey(key) => format!("no key '{key}'"),
            PathError::NotTraversable(seg) => format!("cannot read '{seg}' of a scalar"),
        };
        UnresolvedReason::PathNotFound { detail }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Resolution {
    Resolved {
        value: Value,
        /// Display text, truncated to the preview cap.
        preview: String,
    },
    Unresolved(UnresolvedReason),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Resolution::Resolved { value, .. } => Some(value),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn preview(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { preview, .. } => Some(preview),
            Resolution::Unresolved(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedToken {
    pub token: TemplateToken,
    pub resolution: Resolution,
}

/// Resolves tokens against a workflow's id mapping, the live output cache and, as a fallback,
/// execution-state outputs.
#[derive(Debug, Clone, Copy)]
pub struct TemplateResolver<'a> {
    workflow: &'a Workflow,
    live_outputs: &'a OutputCache,
    block_states: Option<&'a BlockStates>,
    preview_max_chars: usize,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(workflow: &'a Workflow, live_outputs: &'a OutputCache) -> Self {
        Self {
            workflow,
            live_outputs,
            block_states: None,
            preview_max_chars: DEFAULT_PREVIEW_MAX_CHARS,
        }
    }

    pub fn with_block_states(mut self, states: &'a BlockStates) -> Self {
        self.block_states = Some(states);
        self
    }

    pub fn with_preview_max_chars(mut self, max_chars: usize) -> Self {
        self.preview_max_chars = max_chars;
        self
    }

    /// Resolve every token in `text`.
    pub fn resolve(&self, text: &str) -> Vec<ResolvedToken> {
        extract_tokens(text)
            .into_iter()
            .map(|token| {
                let resolution = self.resolve_token(&token);
                ResolvedToken { token, resolution }
            })
            .collect()
    }

    pub fn resolve_token(&self, token: &TemplateToken) -> Resolution {
        if token.block_ref == WORKFLOW_INPUT_REF {
            return Resolution::Unresolved(UnresolvedReason::WorkflowInput);
        }
        let Some(block) = self.workflow.block_by_normalized_id(&token.block_ref) else {
            return Resolution::Unresolved(UnresolvedReason::UnknownBlock {
                block_ref: token.block_ref.clone(),
            });
        };
        let Some(output) = self.output_of(block.id) else {
            return Resolution::Unresolved(UnresolvedReason::NoOutput { block_id: block.id });
        };
        match walk(output, &token.data_path) {
            Ok(value) => Resolution::Resolved {
                preview: truncate_preview(&render(value), self.preview_max_chars),
                value: value.clone(),
            },
            Err(err) => Resolution::Unresolved(err.into()),
        }
    }

    fn output_of(&self, block_id: BlockId) -> Option<&'a Value> {
        self.live_outputs.get(&block_id).or_else(|| {
            self.block_states
                .and_then(|states| states.get(&block_id))
                .and_then(|state| state.outputs.as_ref())
        })
    }

    /// Substitute resolved previews into `text`; unresolved tokens are left as written.
    pub fn render_preview(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for resolved in self.resolve(text) {
            out.push_str(&text[cursor..resolved.token.span.start]);
            match resolved.resolution.preview() {
                Some(preview) => out.push_str(preview),
                None => out.push_str(&resolved.token.raw),
            }
            cursor = resolved.token.span.end;
        }
        out.push_str(&text[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{BlockExecutionState, BlockStatus};
    use crate::graph::{BlockConfig, MergeConfig, Position};
    use serde_json::json;

    fn fetch_workflow() -> (Workflow, BlockId) {
        let mut wf = Workflow::new();
        let id = wf.add_block("fetch", BlockConfig::Merge(MergeConfig::default()), Position::default());
        (wf, id)
    }

    #[test]
    fn extract_splits_on_first_dot() {
        let tokens = extract_tokens("a {{ fetch.items.0.id }} b {{input}} {{x.}}");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].block_ref, "fetch");
        assert_eq!(tokens[0].data_path, "items.0.id");
        assert_eq!(tokens[0].raw, "{{ fetch.items.0.id }}");
        assert_eq!(tokens[1].block_ref, "input");
        assert_eq!(tokens[1].data_path, "");
        assert_eq!(tokens[2].data_path, "");
    }

    #[test]
    fn extract_is_non_greedy() {
        let tokens = extract_tokens("{{a.b}} and {{c}}");
        let refs: Vec<&str> = tokens.iter().map(|t| t.expression.as_str()).collect();
        assert_eq!(refs, vec!["a.b", "c"]);
        assert!(extract_tokens("no tokens {here}").is_empty());
    }

    #[test]
    fn resolves_nested_path() {
        let (wf, id) = fetch_workflow();
        let cache = OutputCache::from([(id, json!({ "items": [{ "id": 7 }] }))]);
        let resolver = TemplateResolver::new(&wf, &cache);
        let out = resolver.resolve("{{fetch.items.0.id}}");
        assert_eq!(out[0].resolution.value(), Some(&json!(7)));
        assert_eq!(out[0].resolution.preview(), Some("7"));

        let out = resolver.resolve("{{fetch.items.1.id}}");
        assert!(!out[0].resolution.is_resolved());
    }

    #[test]
    fn input_is_always_unresolved() {
        let mut wf = Workflow::new();
        let id = wf.add_block("input", BlockConfig::Merge(MergeConfig::default()), Position::default());
        let cache = OutputCache::from([(id, json!({ "foo": 1 }))]);
        let resolver = TemplateResolver::new(&wf, &cache);
        for text in ["{{input}}", "{{input.foo}}"] {
            assert_eq!(
                resolver.resolve(text)[0].resolution,
                Resolution::Unresolved(UnresolvedReason::WorkflowInput)
            );
        }
    }

    #[test]
    fn unknown_block_and_missing_output() {
        let (wf, id) = fetch_workflow();
        let cache = OutputCache::new();
        let resolver = TemplateResolver::new(&wf, &cache);
        assert_eq!(
            resolver.resolve("{{nope.x}}")[0].resolution,
            Resolution::Unresolved(UnresolvedReason::UnknownBlock { block_ref: "nope".into() })
        );
        assert_eq!(
            resolver.resolve("{{fetch.x}}")[0].resolution,
            Resolution::Unresolved(UnresolvedReason::NoOutput { block_id: id })
        );
    }

    #[test]
    fn falls_back_to_execution_state_outputs() {
        let (wf, id) = fetch_workflow();
        let cache = OutputCache::new();
        let mut state = BlockExecutionState::pending();
        state.status = BlockStatus::Completed;
        state.outputs = Some(json!({ "response": "hi" }));
        let states = BlockStates::from([(id, state)]);
        let resolver = TemplateResolver::new(&wf, &cache).with_block_states(&states);
        assert_eq!(resolver.resolve("{{fetch.response}}")[0].resolution.preview(), Some("hi"));

        let live = OutputCache::from([(id, json!({ "response": "live" }))]);
        let resolver = TemplateResolver::new(&wf, &live).with_block_states(&states);
        assert_eq!(resolver.resolve("{{fetch.response}}")[0].resolution.preview(), Some("live"));
    }

    #[test]
    fn long_values_are_truncated_for_preview() {
        let (wf, id) = fetch_workflow();
        let text = "a".repeat(130);
        let cache = OutputCache::from([(id, json!({ "text": text }))]);
        let resolver = TemplateResolver::new(&wf, &cache);
        let resolved = resolver.resolve("{{fetch.text}}");
        let preview = resolved[0].resolution.preview().unwrap();
        assert_eq!(preview.chars().count(), 120);
        assert_eq!(preview, format!("{}...", "a".repeat(117)));
        assert_eq!(resolved[0].resolution.value(), Some(&json!(text)));
    }

    #[test]
    fn resolution_is_idempotent() {
        let (wf, id) = fetch_workflow();
        let cache = OutputCache::from([(id, json!({ "items": [1, 2, 3] }))]);
        let resolver = TemplateResolver::new(&wf, &cache);
        let text = "{{fetch.items}} {{fetch.items.2}} {{input.q}} {{ghost}}";
        assert_eq!(resolver.resolve(text), resolver.resolve(text));
    }

    #[test]
    fn render_preview_substitutes_resolved_only() {
        let (wf, id) = fetch_workflow();
        let cache = OutputCache::from([(id, json!({ "name": "Ada" }))]);
        let resolver = TemplateResolver::new(&wf, &cache);
        assert_eq!(
            resolver.render_preview("Hi {{fetch.name}}, {{input.greeting}}!"),
            "Hi Ada, {{input.greeting}}!"
        );
    }
}
