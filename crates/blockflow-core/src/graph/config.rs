//! Strongly-typed block configuration. The `type` tag selects the variant and always travels
//! with the payload so a serialized block round-trips without losing its shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default output port for blocks that do not branch.
pub const DEFAULT_OUTPUT_PORT: &str = "output";
/// Default input port on every block.
pub const DEFAULT_INPUT_PORT: &str = "input";

/// Coarse category of a block type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Trigger,
    Logic,
    Data,
    Ai,
    Action,
}

/// Typed config per block type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockConfig {
    Variable(VariableConfig),
    WebhookTrigger(WebhookTriggerConfig),
    ScheduleTrigger(ScheduleTriggerConfig),
    IfCondition(IfConditionConfig),
    Switch(SwitchConfig),
    ForEach(ForEachConfig),
    Wait(WaitConfig),
    Transform(TransformConfig),
    Filter(FilterConfig),
    Merge(MergeConfig),
    LlmInference(LlmInferenceConfig),
    CodeBlock(CodeBlockConfig),
    HttpRequest(HttpRequestConfig),
    Webhook(WebhookConfig),
}

impl BlockConfig {
    /// Wire name of the block type (the serde tag).
    pub fn block_type(&self) -> &'static str {
        match self {
            BlockConfig::Variable(_) => "variable",
            BlockConfig::WebhookTrigger(_) => "webhook_trigger",
            BlockConfig::ScheduleTrigger(_) => "schedule_trigger",
            BlockConfig::IfCondition(_) => "if_condition",
            BlockConfig::Switch(_) => "switch",
            BlockConfig::ForEach(_) => "for_each",
            BlockConfig::Wait(_) => "wait",
            BlockConfig::Transform(_) => "transform",
            BlockConfig::Filter(_) => "filter",
            BlockConfig::Merge(_) => "merge",
            BlockConfig::LlmInference(_) => "llm_inference",
            BlockConfig::CodeBlock(_) => "code_block",
            BlockConfig::HttpRequest(_) => "http_request",
            BlockConfig::Webhook(_) => "webhook",
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            BlockConfig::Variable(_)
            | BlockConfig::WebhookTrigger(_)
            | BlockConfig::ScheduleTrigger(_) => BlockKind::Trigger,
            BlockConfig::IfCondition(_)
            | BlockConfig::Switch(_)
            | BlockConfig::ForEach(_)
            | BlockConfig::Wait(_) => BlockKind::Logic,
            BlockConfig::Transform(_) | BlockConfig::Filter(_) | BlockConfig::Merge(_) => {
                BlockKind::Data
            }
            BlockConfig::LlmInference(_) => BlockKind::Ai,
            BlockConfig::CodeBlock(_) | BlockConfig::HttpRequest(_) | BlockConfig::Webhook(_) => {
                BlockKind::Action
            }
        }
    }

    pub fn is_for_each(&self) -> bool {
        matches!(self, BlockConfig::ForEach(_))
    }

    /// Named output ports. Branching blocks expose one port per branch.
    pub fn output_ports(&self) -> Vec<String> {
        match self {
            BlockConfig::IfCondition(_) => vec!["true".to_string(), "false".to_string()],
            BlockConfig::Switch(c) => c
                .cases
                .iter()
                .map(|case| case.label.clone())
                .chain(std::iter::once(SWITCH_DEFAULT_PORT.to_string()))
                .collect(),
            BlockConfig::Variable(_)
            | BlockConfig::WebhookTrigger(_)
            | BlockConfig::ScheduleTrigger(_)
            | BlockConfig::ForEach(_)
            | BlockConfig::Wait(_)
            | BlockConfig::Transform(_)
            | BlockConfig::Filter(_)
            | BlockConfig::Merge(_)
            | BlockConfig::LlmInference(_)
            | BlockConfig::CodeBlock(_)
            | BlockConfig::HttpRequest(_)
            | BlockConfig::Webhook(_) => vec![DEFAULT_OUTPUT_PORT.to_string()],
        }
    }

    /// Every string in the config that may carry `{{...}}` tokens.
    pub fn template_fields(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        match self {
            BlockConfig::Variable(c) => {
                if let Some(Value::String(s)) = &c.default_value {
                    out.push(s);
                }
            }
            BlockConfig::WebhookTrigger(_) | BlockConfig::ScheduleTrigger(_) => {}
            BlockConfig::IfCondition(c) => {
                out.push(&c.field);
                collect_value_strings(&c.value, &mut out);
            }
            BlockConfig::Switch(c) => {
                out.push(&c.field);
                for case in &c.cases {
                    collect_value_strings(&case.value, &mut out);
                }
            }
            BlockConfig::ForEach(c) => out.push(&c.array_field),
            BlockConfig::Wait(_) => {}
            BlockConfig::Transform(c) => {
                for expr in c.operations.values() {
                    collect_value_strings(expr, &mut out);
                }
            }
            BlockConfig::Filter(c) => {
                out.push(&c.field);
                collect_value_strings(&c.value, &mut out);
            }
            BlockConfig::Merge(_) => {}
            BlockConfig::LlmInference(c) => {
                out.push(&c.system_prompt);
                out.push(&c.user_prompt);
            }
            BlockConfig::CodeBlock(c) => {
                for arg in c.arguments.values() {
                    collect_value_strings(arg, &mut out);
                }
            }
            BlockConfig::HttpRequest(c) => {
                out.push(&c.url);
                out.extend(c.headers.values().filter_map(Value::as_str));
                if let Some(body) = &c.body {
                    collect_value_strings(body, &mut out);
                }
            }
            BlockConfig::Webhook(c) => {
                out.push(&c.url);
                out.push(&c.body_template);
            }
        }
        out.retain(|s| !s.is_empty());
        out
    }
}

fn collect_value_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_value_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_value_strings(v, out)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Port taken by a switch block when no case matches.
pub const SWITCH_DEFAULT_PORT: &str = "default";

/// Workflow input variable exposed as a block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableConfig {
    pub variable_name: String,
    #[serde(default = "default_input_type")]
    pub input_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

fn default_input_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTriggerConfig {
    #[serde(default = "default_webhook_path")]
    pub path: String,
    #[serde(default = "default_post")]
    pub method: String,
}

impl Default for WebhookTriggerConfig {
    fn default() -> Self {
        Self {
            path: default_webhook_path(),
            method: default_post(),
        }
    }
}

fn default_webhook_path() -> String {
    "/".to_string()
}
fn default_post() -> String {
    "POST".to_string()
}
fn default_get() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTriggerConfig {
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Comparison applied by condition, switch and filter blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    IsTrue,
    IsFalse,
    IsEmpty,
    IsNotEmpty,
}

/// Routes to the `true` or `false` port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfConditionConfig {
    #[serde(default = "default_response_field")]
    pub field: String,
    #[serde(default = "default_is_true")]
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

fn default_response_field() -> String {
    "response".to_string()
}
const fn default_is_true() -> ConditionOperator {
    ConditionOperator::IsTrue
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchCase {
    pub label: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

/// Routes to the port named by the first matching case label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchConfig {
    #[serde(default = "default_response_field")]
    pub field: String,
    #[serde(default)]
    pub cases: Vec<SwitchCase>,
}

/// Iterates over an array; the runner reports per-item progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForEachConfig {
    #[serde(default = "default_response_field")]
    pub array_field: String,
    #[serde(default = "default_item_variable")]
    pub item_variable: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_item_variable() -> String {
    "item".to_string()
}
const fn default_max_iterations() -> u32 {
    100
}

impl Default for ForEachConfig {
    fn default() -> Self {
        Self {
            array_field: default_response_field(),
            item_variable: default_item_variable(),
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUnit {
    Milliseconds,
    Seconds,
    Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    pub duration: u64,
    #[serde(default = "default_wait_unit")]
    pub unit: WaitUnit,
}

const fn default_wait_unit() -> WaitUnit {
    WaitUnit::Seconds
}

/// Output field name -> expression (usually a template string).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfig {
    #[serde(default)]
    pub operations: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    #[default]
    Append,
    Combine,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    #[serde(default)]
    pub mode: MergeMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// LLM call. `model_id` falls back to the workflow's shared model when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmInferenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_tools: Vec<String>,
}

/// Direct tool invocation through an integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBlockConfig {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    #[serde(default = "default_get")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl HttpRequestConfig {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: default_get(),
            url: url.into(),
            headers: Map::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_post")]
    pub method: String,
    #[serde(default)]
    pub body_template: String,
}
