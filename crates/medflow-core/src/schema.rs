//! Output schema for structured model responses
//!
//! Declares the shape a remote-model response must conform to. The model is
//! instructed to produce JSON matching the schema; `validate` performs the
//! structural check on what comes back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MedflowError, MedflowResult};

/// Expected structure of a structured model response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    /// JSON Schema definition
    pub schema: Value,

    /// Optional description of what this schema represents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether to enforce the schema on responses
    #[serde(default = "default_strict")]
    pub strict: bool,
}

fn default_strict() -> bool {
    true
}

impl OutputSchema {
    /// Create from a JSON Schema definition
    pub fn from_json_schema(schema: Value) -> Self {
        Self {
            schema,
            description: None,
            strict: true,
        }
    }

    /// Create with description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set strict mode
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Validate a response value against this schema
    ///
    /// Checks the top-level type and walks `required` properties one level
    /// into objects and array items. A mismatch on a strict schema is a
    /// validation error, which the agent contract treats as critical.
    pub fn validate(&self, output: &Value) -> MedflowResult<()> {
        if !self.strict {
            return Ok(());
        }
        validate_value(&self.schema, output, "$")
    }

    /// System-prompt instructions for structured output
    pub fn to_system_instructions(&self) -> String {
        let mut instructions =
            String::from("You MUST format your response as structured JSON matching this schema:\n\n");

        if let Some(desc) = &self.description {
            instructions.push_str(&format!("Description: {}\n\n", desc));
        }

        instructions.push_str(&format!(
            "Schema:\n{}\n\n",
            serde_json::to_string_pretty(&self.schema).unwrap_or_default()
        ));

        instructions.push_str(
            "Respond ONLY with valid JSON matching this schema. Do not include any explanation or markdown formatting.",
        );

        instructions
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn validate_value(schema: &Value, output: &Value, path: &str) -> MedflowResult<()> {
    let Some(expected) = schema.get("type").and_then(|t| t.as_str()) else {
        return Ok(());
    };

    let actual = json_type_name(output);

    // Nullable fields are expressed as ["string", "null"] in the schema
    // source; a bare type string with a null value is a mismatch.
    let type_ok = match expected {
        "integer" => matches!(output, Value::Number(n) if n.is_i64() || n.is_u64()),
        other => other == actual,
    };
    if !type_ok && !matches!(output, Value::Null if nullable(schema)) {
        return Err(MedflowError::validation(format!(
            "schema mismatch at {}: expected type '{}', got '{}'",
            path, expected, actual
        )));
    }

    if let (Value::Object(map), Some(props)) = (output, schema.get("properties")) {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for key in required.iter().filter_map(|k| k.as_str()) {
                if !map.contains_key(key) {
                    return Err(MedflowError::validation(format!(
                        "schema mismatch at {}: missing required property '{}'",
                        path, key
                    )));
                }
            }
        }
        if let Some(props) = props.as_object() {
            for (key, prop_schema) in props {
                if let Some(value) = map.get(key) {
                    validate_value(prop_schema, value, &format!("{}.{}", path, key))?;
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (output, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_value(item_schema, item, &format!("{}[{}]", path, i))?;
        }
    }

    Ok(())
}

fn nullable(schema: &Value) -> bool {
    schema
        .get("nullable")
        .and_then(|n| n.as_bool())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_type_match() {
        let schema = OutputSchema::from_json_schema(json!({"type": "object"}));
        assert!(schema.validate(&json!({"name": "test"})).is_ok());
        assert!(schema.validate(&json!("not an object")).is_err());
    }

    #[test]
    fn test_required_properties() {
        let schema = OutputSchema::from_json_schema(json!({
            "type": "object",
            "properties": {
                "code": {"type": "string"},
                "units": {"type": "integer"}
            },
            "required": ["code", "units"]
        }));

        assert!(schema.validate(&json!({"code": "49616", "units": 1})).is_ok());
        assert!(schema.validate(&json!({"code": "49616"})).is_err());
        assert!(schema.validate(&json!({"code": "49616", "units": "one"})).is_err());
    }

    #[test]
    fn test_array_items() {
        let schema = OutputSchema::from_json_schema(json!({
            "type": "object",
            "properties": {
                "codes": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["codes"]
        }));

        assert!(schema.validate(&json!({"codes": ["49616"]})).is_ok());
        assert!(schema.validate(&json!({"codes": [42]})).is_err());
    }

    #[test]
    fn test_nullable_field() {
        let schema = OutputSchema::from_json_schema(json!({
            "type": "object",
            "properties": {
                "modifier": {"type": "string", "nullable": true}
            },
            "required": ["modifier"]
        }));

        assert!(schema.validate(&json!({"modifier": null})).is_ok());
        assert!(schema.validate(&json!({"modifier": "59"})).is_ok());
    }

    #[test]
    fn test_non_strict_accepts_anything() {
        let schema = OutputSchema::from_json_schema(json!({"type": "object"})).with_strict(false);
        assert!(schema.validate(&json!(42)).is_ok());
    }
}
