//! Generic JSON-Schema subset used for tool input declarations, plus a small
//! validator so malformed arguments become structured tool errors before a
//! handler ever runs.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
    Boolean {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    #[serde(alias = "integer")]
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        items: Box<JsonSchema>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Object {
        properties: BTreeMap<String, JsonSchema>,
        #[serde(skip_serializing_if = "Option::is_none")]
        required: Option<Vec<String>>,
        #[serde(
            rename = "additionalProperties",
            skip_serializing_if = "Option::is_none"
        )]
        additional_properties: Option<bool>,
    },
}

impl JsonSchema {
    /// Checks `value` against the schema. Returns a human-readable reason on
    /// the first mismatch; the agent loop reports it as a tool error so the
    /// model can re-sample.
    pub fn validate(&self, value: &JsonValue) -> std::result::Result<(), String> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &JsonValue, path: &str) -> std::result::Result<(), String> {
        match self {
            JsonSchema::Boolean { .. } => match value {
                JsonValue::Bool(_) => Ok(()),
                other => Err(type_error(path, "boolean", other)),
            },
            JsonSchema::String { .. } => match value {
                JsonValue::String(_) => Ok(()),
                other => Err(type_error(path, "string", other)),
            },
            JsonSchema::Number { .. } => match value {
                JsonValue::Number(_) => Ok(()),
                other => Err(type_error(path, "number", other)),
            },
            JsonSchema::Array { items, .. } => match value {
                JsonValue::Array(elements) => {
                    for (idx, element) in elements.iter().enumerate() {
                        items.validate_at(element, &format!("{path}[{idx}]"))?;
                    }
                    Ok(())
                }
                other => Err(type_error(path, "array", other)),
            },
            JsonSchema::Object {
                properties,
                required,
                additional_properties,
            } => match value {
                JsonValue::Object(map) => {
                    if let Some(required) = required {
                        for key in required {
                            if !map.contains_key(key) {
                                return Err(format!("{path}.{key} is required"));
                            }
                        }
                    }
                    for (key, entry) in map {
                        match properties.get(key) {
                            Some(schema) => {
                                schema.validate_at(entry, &format!("{path}.{key}"))?
                            }
                            None => {
                                if *additional_properties == Some(false) {
                                    return Err(format!("{path}.{key} is not a known field"));
                                }
                            }
                        }
                    }
                    Ok(())
                }
                other => Err(type_error(path, "object", other)),
            },
        }
    }
}

fn type_error(path: &str, expected: &str, got: &JsonValue) -> String {
    let got = match got {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    };
    format!("{path}: expected {expected}, got {got}")
}

/// Chat-completions function descriptor for one tool.
pub fn function_descriptor(name: &str, description: &str, parameters: &JsonSchema) -> JsonValue {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> JsonSchema {
        let mut properties = BTreeMap::new();
        properties.insert(
            "path".to_string(),
            JsonSchema::String { description: None },
        );
        properties.insert(
            "depth".to_string(),
            JsonSchema::Number { description: None },
        );
        JsonSchema::Object {
            properties,
            required: Some(vec!["path".to_string()]),
            additional_properties: Some(false),
        }
    }

    #[test]
    fn accepts_matching_payload() {
        sample()
            .validate(&json!({ "path": "src", "depth": 2 }))
            .unwrap();
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = sample().validate(&json!({ "depth": 2 })).unwrap_err();
        assert_eq!(err, "$.path is required");
    }

    #[test]
    fn rejects_wrong_types_with_a_path() {
        let err = sample()
            .validate(&json!({ "path": 42 }))
            .unwrap_err();
        assert_eq!(err, "$.path: expected string, got number");
    }

    #[test]
    fn rejects_unknown_fields_when_closed() {
        let err = sample()
            .validate(&json!({ "path": "src", "mode": "fast" }))
            .unwrap_err();
        assert_eq!(err, "$.mode is not a known field");
    }

    #[test]
    fn descriptor_matches_chat_completions_shape() {
        let descriptor = function_descriptor("fs_read", "Read a file", &sample());
        assert_eq!(descriptor["type"], "function");
        assert_eq!(descriptor["function"]["name"], "fs_read");
        assert_eq!(
            descriptor["function"]["parameters"]["type"],
            "object"
        );
    }
}
