//! Static check of template references before a run: flags tokens whose top-level name
//! matches nothing the runner could bind.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use super::extract_tokens;
use crate::graph::{BlockId, Workflow};

/// Top-level names bound by the runner rather than by a block.
pub const RUNTIME_KEYS: &[&str] = &[
    "input",
    "value",
    "response",
    "data",
    "result",
    "output",
    "item",
    "index",
    "__user_id__",
    "_workflowModelId",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateWarning {
    pub block_id: BlockId,
    pub block_name: String,
    /// The full `{{...}}` reference.
    pub reference: String,
    pub reason: String,
}

/// Report every token whose top-level segment is not a block normalized id, block id,
/// lowercased block name, workflow variable or runtime key.
pub fn validate_references(workflow: &Workflow) -> Vec<TemplateWarning> {
    let mut valid: HashSet<String> = HashSet::new();
    for block in workflow.blocks() {
        valid.insert(block.id.to_string());
        valid.insert(block.normalized_id.clone());
        valid.insert(block.name.to_lowercase());
    }
    for variable in workflow.variables() {
        valid.insert(variable.name.clone());
    }

    let mut warnings = Vec::new();
    for block in workflow.blocks() {
        for field in block.config.template_fields() {
            for token in extract_tokens(field) {
                let top = token.block_ref.as_str();
                if RUNTIME_KEYS.contains(&top) || valid.contains(top) {
                    continue;
                }
                warn!(block = %block.name, reference = %token.raw, "unresolvable template reference");
                warnings.push(TemplateWarning {
                    block_id: block.id,
                    block_name: block.name.clone(),
                    reference: token.raw.clone(),
                    reason: format!(
                        "'{top}' does not match any block ID, normalized ID, or workflow variable"
                    ),
                });
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        BlockConfig, LlmInferenceConfig, Position, Variable, VariableType, WebhookConfig,
    };

    #[test]
    fn flags_only_unknown_references() {
        let mut wf = Workflow::new();
        wf.add_block(
            "Search News",
            BlockConfig::Webhook(WebhookConfig {
                url: "https://hooks.example/{{topic}}".into(),
                method: "POST".into(),
                body_template: "{{input.query}}".into(),
            }),
            Position::default(),
        );
        wf.add_block(
            "Summarize",
            BlockConfig::LlmInference(LlmInferenceConfig {
                user_prompt: "Summarize {{search-news.response}} and {{serch-news.response}}".into(),
                ..Default::default()
            }),
            Position::default(),
        );
        wf.set_variable(Variable {
            name: "topic".into(),
            var_type: VariableType::String,
            default_value: None,
        });

        let warnings = validate_references(&wf);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].block_name, "Summarize");
        assert_eq!(warnings[0].reference, "{{serch-news.response}}");
        assert!(warnings[0].reason.contains("serch-news"));
    }

    #[test]
    fn clean_workflow_has_no_warnings() {
        let wf = Workflow::new();
        assert!(validate_references(&wf).is_empty());
    }
}
