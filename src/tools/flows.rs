//! Published record-replay flows and their tool definitions.

use serde::{Deserialize, Serialize};

use super::types::{ParameterBuilder, ToolDefinition};
use crate::error::{RelayError, Result};

/// Name prefix marking a tool as a published flow alias.
pub const FLOW_TOOL_PREFIX: &str = "flow.";

/// Tool the extension exposes for running a flow by id.
pub const FLOW_RUN_TOOL: &str = "record_replay_flow_run";

const FALLBACK_DESCRIPTION: &str = "Recorded flow";

/// A flow published by the extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedFlow {
    pub id: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<FlowMeta>,
    #[serde(default)]
    pub variables: Vec<FlowVariable>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<FlowToolMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowToolMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An input variable declared by a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowVariable {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<VariableRules>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableRules {
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<serde_json::Value>>,
}

impl PublishedFlow {
    /// Tool name this flow is listed under.
    pub fn tool_name(&self) -> String {
        format!("{FLOW_TOOL_PREFIX}{}", self.slug)
    }

    /// Tool description, else flow description, else a generic fallback.
    pub fn tool_description(&self) -> &str {
        self.meta
            .as_ref()
            .and_then(|m| m.tool.as_ref())
            .and_then(|t| t.description.as_deref())
            .filter(|d| !d.is_empty())
            .or_else(|| self.description.as_deref().filter(|d| !d.is_empty()))
            .unwrap_or(FALLBACK_DESCRIPTION)
    }

    /// Tool definition exposing this flow, with its variables followed by
    /// the run options every flow accepts.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        let mut builder = ParameterBuilder::new();
        for variable in &self.variables {
            let required = variable.rules.as_ref().is_some_and(|r| r.required);
            builder = builder.property(variable.key.clone(), variable.schema(), required);
        }
        let schema = with_run_options(builder).build();
        ToolDefinition::new(self.tool_name(), self.tool_description(), schema)
    }
}

impl FlowVariable {
    fn schema(&self) -> serde_json::Value {
        let description = self.label.as_deref().unwrap_or(&self.key);
        let kind = self
            .kind
            .as_deref()
            .unwrap_or("string")
            .to_ascii_lowercase();

        let mut prop = serde_json::Map::new();
        prop.insert("description".into(), description.into());
        match kind.as_str() {
            "boolean" => {
                prop.insert("type".into(), "boolean".into());
            }
            "number" => {
                prop.insert("type".into(), "number".into());
            }
            "enum" => {
                prop.insert("type".into(), "string".into());
                if let Some(choices) = self.rules.as_ref().and_then(|r| r.choices.clone()) {
                    prop.insert("enum".into(), choices.into());
                }
            }
            "array" => {
                prop.insert("type".into(), "array".into());
                prop.insert("items".into(), serde_json::json!({"type": "string"}));
            }
            _ => {
                prop.insert("type".into(), "string".into());
            }
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), default.clone());
        }
        serde_json::Value::Object(prop)
    }
}

fn with_run_options(builder: ParameterBuilder) -> ParameterBuilder {
    builder
        .property(
            "tabTarget",
            serde_json::json!({"type": "string", "enum": ["current", "new"], "default": "current"}),
            false,
        )
        .property("refresh", serde_json::json!({"type": "boolean", "default": false}), false)
        .property(
            "captureNetwork",
            serde_json::json!({"type": "boolean", "default": false}),
            false,
        )
        .property("returnLogs", serde_json::json!({"type": "boolean", "default": false}), false)
        .property("timeoutMs", serde_json::json!({"type": "number", "minimum": 0}), false)
}

/// Slug addressed by a `flow.`-prefixed tool name.
pub fn flow_slug(tool_name: &str) -> Option<&str> {
    tool_name.strip_prefix(FLOW_TOOL_PREFIX)
}

/// Parse the peer's reply to a flow listing request.
///
/// Items that do not parse as a flow are skipped with a warning.
pub fn parse_flow_listing(response: serde_json::Value) -> Result<Vec<PublishedFlow>> {
    let status = response.get("status").and_then(|s| s.as_str());
    if status != Some("success") {
        let error = response
            .get("error")
            .and_then(|e| e.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("flow listing returned status {}", status.unwrap_or("<none>")));
        return Err(RelayError::Upstream(error));
    }

    let items = match response.get("items") {
        Some(serde_json::Value::Array(items)) => items.clone(),
        _ => return Ok(Vec::new()),
    };

    let mut flows = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<PublishedFlow>(item) {
            Ok(flow) => flows.push(flow),
            Err(err) => tracing::warn!(error = %err, "skipping malformed published flow"),
        }
    }
    Ok(flows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn flow(value: serde_json::Value) -> PublishedFlow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn description_prefers_tool_meta_then_flow_then_fallback() {
        let with_meta = flow(json!({
            "id": "1", "slug": "a", "description": "flow desc",
            "meta": {"tool": {"description": "tool desc"}}
        }));
        assert_eq!(with_meta.tool_description(), "tool desc");

        let plain = flow(json!({"id": "1", "slug": "a", "description": "flow desc"}));
        assert_eq!(plain.tool_description(), "flow desc");

        let bare = flow(json!({"id": "1", "slug": "a"}));
        assert_eq!(bare.tool_description(), "Recorded flow");
    }

    #[test]
    fn variable_types_map_to_schema_types() {
        let def = flow(json!({
            "id": "f1",
            "slug": "checkout",
            "variables": [
                {"key": "express", "type": "Boolean", "default": true},
                {"key": "qty", "type": "number"},
                {"key": "size", "type": "enum", "rules": {"enum": ["s", "m"]}},
                {"key": "tags", "type": "array"},
                {"key": "note", "label": "Order note", "type": "date"},
                {"key": "coupon"}
            ]
        }))
        .to_tool_definition();

        assert_eq!(def.name, "flow.checkout");
        assert_eq!(
            def.property("express").unwrap(),
            &json!({"type": "boolean", "description": "express", "default": true})
        );
        assert_eq!(def.property("qty").unwrap()["type"], "number");
        assert_eq!(
            def.property("size").unwrap(),
            &json!({"type": "string", "description": "size", "enum": ["s", "m"]})
        );
        assert_eq!(def.property("tags").unwrap()["items"], json!({"type": "string"}));
        assert_eq!(
            def.property("note").unwrap(),
            &json!({"type": "string", "description": "Order note"})
        );
        assert_eq!(def.property("coupon").unwrap()["type"], "string");
        assert!(def.required_fields().is_empty());
    }

    #[test]
    fn run_options_are_appended() {
        let def = flow(json!({
            "id": "f1",
            "slug": "login",
            "variables": [{"key": "user", "type": "string", "rules": {"required": true}}]
        }))
        .to_tool_definition();

        assert_eq!(def.required_fields(), vec!["user"]);
        assert_eq!(
            def.property("tabTarget").unwrap(),
            &json!({"type": "string", "enum": ["current", "new"], "default": "current"})
        );
        for flag in ["refresh", "captureNetwork", "returnLogs"] {
            assert_eq!(def.property(flag).unwrap(), &json!({"type": "boolean", "default": false}));
        }
        assert_eq!(def.property("timeoutMs").unwrap(), &json!({"type": "number", "minimum": 0}));
    }

    #[test]
    fn listing_skips_malformed_items() {
        let flows = parse_flow_listing(json!({
            "status": "success",
            "items": [{"id": "1", "slug": "ok"}, {"slug": "no-id"}]
        }))
        .unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].slug, "ok");
    }

    #[test]
    fn listing_with_error_status_fails() {
        let err = parse_flow_listing(json!({"status": "error", "error": "storage locked"})).unwrap_err();
        assert!(matches!(err, RelayError::Upstream(msg) if msg == "storage locked"));
    }

    #[test]
    fn listing_without_items_is_empty() {
        assert!(parse_flow_listing(json!({"status": "success"})).unwrap().is_empty());
    }

    #[test]
    fn slug_is_stripped_from_alias() {
        assert_eq!(flow_slug("flow.login"), Some("login"));
        assert_eq!(flow_slug("chrome_navigate"), None);
    }
}
