use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::warn;

/// Built-in alias pairs applied when the schema declares the canonical name.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("cmd", "command"),
    ("dir", "directory"),
    ("filepath", "file_path"),
    ("filename", "file_name"),
    ("msg", "message"),
    ("qry", "query"),
];

/// Normalize every function tool call in a response payload against the
/// request's tool schemas. Failures leave the payload untouched.
pub fn normalize_tool_arguments(payload: Value, tools: &Value) -> Value {
    let schemas = collect_schemas(tools);
    if schemas.is_empty() {
        return payload;
    }

    let mut out = payload;
    let Some(choices) = out.get_mut("choices").and_then(Value::as_array_mut) else {
        return out;
    };
    for choice in choices {
        let Some(calls) = choice
            .get_mut("message")
            .and_then(|message| message.get_mut("tool_calls"))
            .and_then(Value::as_array_mut)
        else {
            continue;
        };
        for call in calls {
            let Some(function) = call.get_mut("function").and_then(Value::as_object_mut) else {
                continue;
            };
            let Some(name) = function.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(schema) = schemas.get(name) else {
                continue;
            };
            let Some(arguments) = function.get("arguments").and_then(Value::as_str) else {
                continue;
            };
            match normalize_arguments(arguments, schema) {
                Some(normalized) => {
                    function.insert("arguments".to_string(), Value::String(normalized));
                }
                None => {
                    warn!(tool = name, "tool argument normalization failed; keeping original");
                }
            }
        }
    }
    out
}

fn collect_schemas(tools: &Value) -> BTreeMap<String, Value> {
    let mut schemas = BTreeMap::new();
    if let Some(tools) = tools.as_array() {
        for tool in tools {
            let function = tool.get("function").unwrap_or(tool);
            if let (Some(name), Some(parameters)) = (
                function.get("name").and_then(Value::as_str),
                function.get("parameters"),
            ) {
                schemas.insert(name.to_string(), parameters.clone());
            }
        }
    }
    schemas
}

/// Core normalization for one call: key normalization, alias expansion,
/// light type coercion, required-empty removal.
pub(crate) fn normalize_arguments(arguments: &str, schema: &Value) -> Option<String> {
    let parsed: Value = serde_json::from_str(arguments).unwrap_or(Value::Object(Map::new()));
    let Value::Object(args) = parsed else {
        return None;
    };
    let properties = schema.get("properties").and_then(Value::as_object);

    let mut normalized = Map::new();
    for (key, value) in args {
        let target_key = match properties {
            Some(props) if !props.contains_key(&key) => resolve_key(&key, props),
            _ => key.clone(),
        };
        let coerced = match properties.and_then(|props| props.get(&target_key)) {
            Some(prop_schema) => coerce(value, prop_schema),
            None => value,
        };
        normalized.insert(target_key, coerced);
    }

    // Empty string/array/object on a required field reads as missing.
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required {
            let Some(field) = field.as_str() else { continue };
            if normalized.get(field).is_some_and(is_empty_value) {
                normalized.remove(field);
            }
        }
    }

    serde_json::to_string(&Value::Object(normalized)).ok()
}

/// Match an unknown key to a schema property by normalized form, then by
/// alias (built-ins plus the schema's `x-aliases`).
fn resolve_key(key: &str, properties: &Map<String, Value>) -> String {
    let wanted = fold_key(key);
    for prop in properties.keys() {
        if fold_key(prop) == wanted {
            return prop.clone();
        }
    }

    for (alias, canonical) in BUILTIN_ALIASES {
        if fold_key(alias) == wanted && properties.contains_key(*canonical) {
            return (*canonical).to_string();
        }
    }

    for (prop, prop_schema) in properties {
        if let Some(aliases) = prop_schema.get("x-aliases").and_then(Value::as_array)
            && aliases
                .iter()
                .filter_map(Value::as_str)
                .any(|alias| fold_key(alias) == wanted)
        {
            return prop.clone();
        }
    }

    key.to_string()
}

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn coerce(value: Value, prop_schema: &Value) -> Value {
    let Some(kind) = prop_schema.get("type").and_then(Value::as_str) else {
        return value;
    };
    match (kind, value) {
        ("string", Value::Number(n)) => Value::String(n.to_string()),
        ("string", Value::Bool(b)) => Value::String(b.to_string()),
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(s)),
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or(Value::String(s)),
        ("integer", Value::Number(n)) if n.is_f64() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| Value::Number((f as i64).into()))
            .unwrap_or(Value::Number(n)),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => Value::String(s),
        },
        ("array", Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Array(items)) => Value::Array(items),
            _ => Value::Array(vec![Value::String(s)]),
        },
        ("array", scalar @ (Value::Number(_) | Value::Bool(_))) => Value::Array(vec![scalar]),
        ("object", Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(object @ Value::Object(_)) => object,
            _ => Value::String(s),
        },
        (_, value) => value,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
