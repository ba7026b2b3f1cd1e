//! Static tool metadata shown to the workflow editor.

use serde::{Deserialize, Serialize};

/// Widget kind for a configurable tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Text,
    Number,
    Boolean,
    #[serde(rename = "fileupload")]
    FileUpload,
    #[serde(rename = "textarea")]
    TextArea,
    Select,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub label: String,
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<String>,
}

impl ParamSchema {
    pub fn new(name: &str, kind: ParamType, label: &str, required: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            label: label.to_string(),
            required,
            default: None,
            description: description.to_string(),
            options: None,
            accept: None,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|o| o.to_string()).collect());
        self
    }

    pub fn with_accept(mut self, accept: &str) -> Self {
        self.accept = Some(accept.to_string());
        self
    }
}

/// One entry of the tool catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// 1-based position of `id` in the sorted id list.
    pub alias: u32,
    pub id: String,
    pub name: String,
    pub description: String,
    /// Human-readable constructor shape, e.g. `configurable(website_url)`.
    pub constructor: String,
    pub parameters_schema: Option<Vec<ParamSchema>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn param_types_use_ui_names() {
        assert_eq!(serde_json::to_value(ParamType::FileUpload).unwrap(), json!("fileupload"));
        assert_eq!(serde_json::to_value(ParamType::TextArea).unwrap(), json!("textarea"));
        assert_eq!(serde_json::to_value(ParamType::Select).unwrap(), json!("select"));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let p = ParamSchema::new("query", ParamType::Text, "Query", true, "what to search");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["type"], "text");
        assert!(v.get("options").is_none());
        assert_eq!(v["default"], json!(null));
    }
}
