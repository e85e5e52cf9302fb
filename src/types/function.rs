use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionParam {
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: String,
}

/// A callable function as reported by the backend, plus the local `enabled` toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, FunctionParam>,
    #[serde(default)]
    pub enabled: bool,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        FunctionDefinition {
            name: name.into(),
            description: Some(description.into()),
            parameters: BTreeMap::new(),
            enabled: false,
        }
    }

    pub fn with_param(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.insert(
            name.into(),
            FunctionParam {
                description: description.into(),
                param_type: param_type.into(),
            },
        );
        self
    }

    /// JSON-schema tool entry in the shape chat servers expect.
    pub fn to_tool(&self) -> Tool {
        let properties = self
            .parameters
            .iter()
            .map(|(key, param)| {
                (
                    key.clone(),
                    serde_json::json!({
                        "type": param.param_type,
                        "description": param.description,
                    }),
                )
            })
            .collect::<serde_json::Map<_, _>>();
        let required = self.parameters.keys().cloned().collect::<Vec<_>>();

        Tool {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: self.name.clone(),
                description: self.description.clone().unwrap_or_default(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    pub function: FunctionCall,
}

impl ToolCall {
    /// Identifier used to key the tool result in the transcript.
    ///
    /// Some servers never assign call ids; the function name stands in then.
    /// Two id-less calls to the same function in one round therefore share a
    /// key, and the later result replaces the earlier one in the transcript.
    pub fn call_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.function.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_schema_lists_every_parameter_as_required() {
        let def = FunctionDefinition::new("read_web_page", "Fetch a page")
            .with_param("url", "string", "Page address");
        let tool = def.to_tool();

        assert_eq!(tool.tool_type, "function");
        assert_eq!(tool.function.name, "read_web_page");
        assert_eq!(
            tool.function.parameters["properties"]["url"]["type"],
            serde_json::json!("string")
        );
        assert_eq!(
            tool.function.parameters["required"],
            serde_json::json!(["url"])
        );
    }

    #[test]
    fn enabled_defaults_to_false_when_absent() {
        let def: FunctionDefinition =
            serde_json::from_str(r#"{"name":"get_unix_time","parameters":{}}"#).unwrap();
        assert!(!def.enabled);
        assert!(def.description.is_none());
    }

    #[test]
    fn call_id_falls_back_to_function_name() {
        let call: ToolCall = serde_json::from_str(
            r#"{"function":{"name":"get_unix_time","arguments":{}}}"#,
        )
        .unwrap();
        assert_eq!(call.call_id(), "get_unix_time");
    }

    #[test]
    fn id_less_calls_to_one_function_share_a_key() {
        let calls: Vec<ToolCall> = serde_json::from_str(
            r#"[{"function":{"name":"read_web_page","arguments":{"url":"a"}}},
                {"function":{"name":"read_web_page","arguments":{"url":"b"}}},
                {"id":"c1","function":{"name":"read_web_page","arguments":{"url":"c"}}}]"#,
        )
        .unwrap();
        assert_eq!(calls[0].call_id(), calls[1].call_id());
        assert_eq!(calls[2].call_id(), "c1");
    }
}
