//! Tool input-schema normalization.
//!
//! Provider servers reject otherwise valid JSON Schema documents, so every
//! adapter runs tool schemas through this module before sending:
//!
//! 1. `format` annotations are stripped recursively.
//! 2. `type: "array"` properties without `items` gain `items: {"type": "object"}`.
//! 3. Strict (Responses-style) providers additionally promote every property
//!    into `required`, give originally-optional properties a null-type
//!    alternative, and close the object with `additionalProperties: false`.
//!
//! `serde_json::Map` keeps keys in BTree order, so output is deterministic
//! and both entry points are fixed points: applying them twice yields the
//! same document.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

/// Normalize a tool input schema for lenient providers (rules 1 and 2).
pub fn normalize(schema: &Value) -> Value {
    walk(schema, false)
}

/// Normalize a tool input schema for strict providers (rules 1 through 3).
pub fn normalize_strict(schema: &Value) -> Value {
    walk(schema, true)
}

fn walk(schema: &Value, strict: bool) -> Value {
    let Value::Object(object) = schema else {
        return schema.clone();
    };

    let mut out = Map::new();

    for (key, value) in object {
        match key.as_str() {
            "format" => continue,
            // Maps whose keys are names, not schema keywords.
            "properties" | "$defs" | "definitions" => {
                out.insert(key.clone(), walk_named_schemas(value, strict));
            }
            "items" | "additionalProperties" | "not" => {
                out.insert(key.clone(), walk(value, strict));
            }
            "anyOf" | "oneOf" | "allOf" => {
                out.insert(key.clone(), walk_schema_list(value, strict));
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    if out.get("type").and_then(Value::as_str) == Some("array") && !out.contains_key("items") {
        out.insert("items".to_string(), json!({ "type": "object" }));
    }

    if strict {
        promote_required(&mut out);
    }

    Value::Object(out)
}

fn walk_named_schemas(value: &Value, strict: bool) -> Value {
    let Value::Object(entries) = value else {
        return value.clone();
    };

    let converted = entries
        .iter()
        .map(|(name, schema)| (name.clone(), walk(schema, strict)))
        .collect();

    Value::Object(converted)
}

fn walk_schema_list(value: &Value, strict: bool) -> Value {
    let Value::Array(schemas) = value else {
        return value.clone();
    };

    Value::Array(schemas.iter().map(|schema| walk(schema, strict)).collect())
}

/// Rule 3: every property becomes required; originally-optional properties
/// get a null-type alternative so the model can still omit a value.
fn promote_required(out: &mut Map<String, Value>) {
    let Some(Value::Object(properties)) = out.get("properties") else {
        return;
    };

    let originally_required: BTreeSet<String> = out
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let mut properties = properties.clone();
    let names: Vec<String> = properties.keys().cloned().collect();

    for name in &names {
        if originally_required.contains(name) {
            continue;
        }
        if let Some(Value::Object(property)) = properties.get_mut(name) {
            add_null_alternative(property);
        }
    }

    out.insert("properties".to_string(), Value::Object(properties));
    out.insert(
        "required".to_string(),
        Value::Array(names.into_iter().map(Value::String).collect()),
    );
    out.insert("additionalProperties".to_string(), Value::Bool(false));
}

fn add_null_alternative(property: &mut Map<String, Value>) {
    match property.get_mut("type") {
        Some(Value::String(ty)) => {
            let ty = ty.clone();
            property.insert("type".to_string(), json!([ty, "null"]));
        }
        Some(Value::Array(types)) => {
            if !types.iter().any(|ty| ty == "null") {
                types.push(Value::String("null".to_string()));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "format": "uri" },
                "lines": { "type": "array" },
                "limit": { "type": "integer" }
            },
            "required": ["path"]
        })
    }

    #[test]
    fn strips_format_recursively() {
        let normalized = normalize(&sample());

        assert_eq!(
            normalized["properties"]["path"],
            json!({ "type": "string" })
        );
    }

    #[test]
    fn arrays_without_items_get_object_items() {
        let normalized = normalize(&sample());

        assert_eq!(
            normalized["properties"]["lines"],
            json!({ "type": "array", "items": { "type": "object" } })
        );
    }

    #[test]
    fn strict_promotes_all_properties_to_required() {
        let normalized = normalize_strict(&sample());

        assert_eq!(normalized["required"], json!(["limit", "lines", "path"]));
        assert_eq!(normalized["additionalProperties"], json!(false));
        // Originally optional: gains a null alternative.
        assert_eq!(
            normalized["properties"]["limit"]["type"],
            json!(["integer", "null"])
        );
        // Originally required: type untouched.
        assert_eq!(normalized["properties"]["path"]["type"], json!("string"));
    }

    #[test]
    fn strict_normalization_snapshot() {
        insta::assert_json_snapshot!(normalize_strict(&sample()), @r#"
        {
          "additionalProperties": false,
          "properties": {
            "limit": {
              "type": [
                "integer",
                "null"
              ]
            },
            "lines": {
              "items": {
                "type": "object"
              },
              "type": [
                "array",
                "null"
              ]
            },
            "path": {
              "type": "string"
            }
          },
          "required": [
            "limit",
            "lines",
            "path"
          ],
          "type": "object"
        }
        "#);
    }

    #[test]
    fn normalize_is_a_fixed_point() {
        let once = normalize(&sample());
        assert_eq!(normalize(&once), once);

        let strict_once = normalize_strict(&sample());
        assert_eq!(normalize_strict(&strict_once), strict_once);
    }

    #[test]
    fn nested_schemas_are_normalized() {
        let schema = json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": {
                        "since": { "type": "string", "format": "date-time" }
                    }
                }
            }
        });

        let normalized = normalize(&schema);

        assert_eq!(
            normalized["properties"]["filter"]["properties"]["since"],
            json!({ "type": "string" })
        );
    }
}
