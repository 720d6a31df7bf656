//! Declared parameter schemas and boundary coercion.
//!
//! Every plugin declares the parameters it understands. Raw parameter maps
//! coming from configuration are coerced (defaults, string-to-number,
//! comma lists) and then checked against a JSON Schema generated from the
//! declaration, so plugins never parse loosely-typed input themselves.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

/// Opaque key/value parameters as stored on a configuration.
pub type ParamMap = Map<String, JsonValue>;

/// Type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Integer,
    Number,
    String,
    Boolean,
    StringList,
}

impl ParamKind {
    fn json_schema(&self) -> JsonValue {
        match self {
            Self::Integer => serde_json::json!({ "type": "integer" }),
            Self::Number => serde_json::json!({ "type": "number" }),
            Self::String => serde_json::json!({ "type": "string" }),
            Self::Boolean => serde_json::json!({ "type": "boolean" }),
            Self::StringList => serde_json::json!({
                "type": "array",
                "items": { "type": "string" }
            }),
        }
    }

    /// Best-effort conversion of loosely typed input.
    ///
    /// Values that cannot be converted are returned unchanged so that
    /// schema validation reports them.
    fn coerce(&self, value: JsonValue) -> JsonValue {
        match (self, value) {
            (Self::Integer, JsonValue::String(s)) => match s.trim().parse::<i64>() {
                Ok(n) => JsonValue::from(n),
                Err(_) => JsonValue::String(s),
            },
            (Self::Integer, JsonValue::Number(n)) => match n.as_f64() {
                Some(f) if n.as_i64().is_none() && f.fract() == 0.0 && fits_i64(f) => {
                    JsonValue::from(f as i64)
                }
                _ => JsonValue::Number(n),
            },
            (Self::Number, JsonValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::String(s)),
            (Self::Boolean, JsonValue::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => JsonValue::Bool(true),
                "false" | "no" | "0" => JsonValue::Bool(false),
                _ => JsonValue::String(s),
            },
            (Self::String, JsonValue::Number(n)) => JsonValue::String(n.to_string()),
            (Self::String, JsonValue::Bool(b)) => JsonValue::String(b.to_string()),
            (Self::StringList, JsonValue::String(s)) => JsonValue::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| JsonValue::String(item.to_string()))
                    .collect(),
            ),
            (_, other) => other,
        }
    }
}

// `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive
fn fits_i64(f: f64) -> bool {
    f >= i64::MIN as f64 && f < i64::MAX as f64
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<JsonValue>,

    #[serde(default)]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<JsonValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The full parameter declaration of a plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    fields: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: ParamSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[ParamSpec] {
        &self.fields
    }

    /// JSON Schema equivalent of this declaration. Undeclared keys are rejected.
    pub fn to_json_schema(&self) -> JsonValue {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for spec in &self.fields {
            let mut property = spec.kind.json_schema();
            if let (Some(description), JsonValue::Object(obj)) = (&spec.description, &mut property)
            {
                obj.insert(
                    "description".to_string(),
                    JsonValue::String(description.clone()),
                );
            }
            properties.insert(spec.name.clone(), property);

            if spec.required {
                required.push(JsonValue::String(spec.name.clone()));
            }
        }

        let mut schema = serde_json::json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false
        });
        if !required.is_empty() {
            schema["required"] = JsonValue::Array(required);
        }
        schema
    }

    /// Apply defaults and coerce declared values. `null` counts as absent.
    pub fn coerce(&self, raw: &ParamMap) -> ParamMap {
        let mut out = ParamMap::new();

        for (key, value) in raw {
            if value.is_null() {
                continue;
            }
            let coerced = match self.fields.iter().find(|spec| &spec.name == key) {
                Some(spec) => spec.kind.coerce(value.clone()),
                None => value.clone(),
            };
            out.insert(key.clone(), coerced);
        }

        for spec in &self.fields {
            if let (false, Some(default)) = (out.contains_key(&spec.name), &spec.default) {
                out.insert(spec.name.clone(), default.clone());
            }
        }

        out
    }
}

/// Coerced, validated parameters handed to a plugin factory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(ParamMap);

impl Params {
    pub(crate) fn new(map: ParamMap) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.0.get(name)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(JsonValue::as_i64)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(JsonValue::as_f64)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(JsonValue::as_str)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(JsonValue::as_bool)
    }

    /// List parameter; absent or mistyped yields an empty list.
    pub fn string_list(&self, name: &str) -> Vec<String> {
        self.0
            .get(name)
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn as_map(&self) -> &ParamMap {
        &self.0
    }
}
