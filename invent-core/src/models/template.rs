//! Generated flow templates and trigger definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of prompt characters echoed into the fallback display name.
pub const PROMPT_ECHO_CHARS: usize = 50;

/// Trigger kinds known to the flow builder. Unrecognised values are kept
/// verbatim in `Other` so a trigger round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TriggerType {
    Empty,
    PieceTrigger,
    Webhook,
    Other(String),
}

impl From<String> for TriggerType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "EMPTY" => TriggerType::Empty,
            "PIECE_TRIGGER" => TriggerType::PieceTrigger,
            "WEBHOOK" => TriggerType::Webhook,
            _ => TriggerType::Other(value),
        }
    }
}

impl From<TriggerType> for String {
    fn from(value: TriggerType) -> Self {
        match value {
            TriggerType::Empty => "EMPTY".to_string(),
            TriggerType::PieceTrigger => "PIECE_TRIGGER".to_string(),
            TriggerType::Webhook => "WEBHOOK".to_string(),
            TriggerType::Other(s) => s,
        }
    }
}

/// Entry point of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TriggerType,
    pub display_name: String,
    #[serde(default)]
    pub valid: bool,
    #[serde(default = "empty_object")]
    pub settings: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<serde_json::Value>,
    /// Fields this crate does not model, preserved as received.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TriggerDefinition {
    /// The placeholder trigger every freshly created flow starts with.
    pub fn empty() -> Self {
        Self {
            name: "trigger".to_string(),
            kind: TriggerType::Empty,
            display_name: "Select Trigger".to_string(),
            valid: false,
            settings: empty_object(),
            next_action: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Template schema version. The backend emits either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaVersion {
    Number(u64),
    Text(String),
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersion::Number(n) => write!(f, "{}", n),
            SchemaVersion::Text(s) => f.write_str(s),
        }
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        SchemaVersion::Number(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowTemplate {
    #[serde(default)]
    pub display_name: String,
    pub trigger: TriggerDefinition,
    pub schema_version: SchemaVersion,
}

/// Payload returned by the generation endpoint on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFlow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub template: FlowTemplate,
}

impl GeneratedFlow {
    /// Display name for the persisted flow: `name`, then the template's
    /// display name, then an echo of the prompt. Blank values are skipped.
    pub fn display_name_for(&self, prompt: &str) -> String {
        non_blank(self.name.as_deref())
            .or_else(|| non_blank(Some(&self.template.display_name)))
            .map(str::to_string)
            .unwrap_or_else(|| prompt_fallback_name(prompt))
    }

    /// The template to import, carrying the resolved display name so the
    /// import does not overwrite the name chosen at creation.
    pub fn resolved_template(&self, prompt: &str) -> FlowTemplate {
        FlowTemplate {
            display_name: self.display_name_for(prompt),
            ..self.template.clone()
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// `"AI Generated: <first 50 chars of the prompt>..."`
pub fn prompt_fallback_name(prompt: &str) -> String {
    let trimmed = prompt.trim();
    let echo: String = trimmed.chars().take(PROMPT_ECHO_CHARS).collect();
    if trimmed.chars().count() > PROMPT_ECHO_CHARS {
        format!("AI Generated: {}...", echo)
    } else {
        format!("AI Generated: {}", echo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn generated(name: Option<&str>, display_name: &str) -> GeneratedFlow {
        GeneratedFlow {
            name: name.map(str::to_string),
            template: FlowTemplate {
                display_name: display_name.to_string(),
                trigger: TriggerDefinition::empty(),
                schema_version: SchemaVersion::Number(1),
            },
        }
    }

    #[test]
    fn test_display_name_prefers_name_over_template() {
        let g = generated(Some("Named"), "Template Name");
        assert_eq!(g.display_name_for("whatever"), "Named");
    }

    #[test]
    fn test_display_name_falls_back_to_template_display_name() {
        let g = generated(None, "Daily Report Bot");
        assert_eq!(g.display_name_for("send me a daily report"), "Daily Report Bot");

        let blank_name = generated(Some("   "), "Daily Report Bot");
        assert_eq!(blank_name.display_name_for("x"), "Daily Report Bot");
    }

    #[test]
    fn test_display_name_falls_back_to_prompt_echo() {
        let g = generated(None, "");
        assert_eq!(
            g.display_name_for("  send me a daily report "),
            "AI Generated: send me a daily report"
        );
    }

    #[test]
    fn test_prompt_fallback_truncates_long_prompts() {
        let prompt = "a".repeat(80);
        let name = prompt_fallback_name(&prompt);
        assert_eq!(name, format!("AI Generated: {}...", "a".repeat(50)));
    }

    #[test]
    fn test_prompt_fallback_counts_chars_not_bytes() {
        let prompt = "é".repeat(51);
        let name = prompt_fallback_name(&prompt);
        assert!(name.ends_with("..."));
        assert_eq!(name.chars().filter(|c| *c == 'é').count(), 50);
    }

    #[test]
    fn test_resolved_template_carries_resolved_name() {
        let g = generated(Some("Named"), "Template Name");
        let t = g.resolved_template("p");
        assert_eq!(t.display_name, "Named");
        assert_eq!(t.trigger, g.template.trigger);
    }

    #[test]
    fn test_trigger_preserves_unknown_type_and_fields() {
        let raw = json!({
            "name": "trigger",
            "type": "SCHEDULE",
            "displayName": "Every day",
            "valid": true,
            "settings": { "cron": "0 9 * * *" },
            "pieceName": "@invent/schedule"
        });
        let trigger: TriggerDefinition = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(trigger.kind, TriggerType::Other("SCHEDULE".to_string()));
        assert_eq!(trigger.extra["pieceName"], "@invent/schedule");
        assert_eq!(serde_json::to_value(&trigger).unwrap(), raw);
    }

    #[test]
    fn test_schema_version_accepts_number_or_string() {
        let n: SchemaVersion = serde_json::from_value(json!(1)).unwrap();
        let s: SchemaVersion = serde_json::from_value(json!("7")).unwrap();
        assert_eq!(n, SchemaVersion::Number(1));
        assert_eq!(s.to_string(), "7");
    }
}
