//! Declarative tool parameter schemas and the generic argument validator.
//!
//! Every tool describes its input as a table of [`ParamSpec`]s. A single
//! [`validate`] routine consults that table, substitutes defaults and rejects
//! malformed input before any handler runs. The same table renders the JSON
//! Schema advertised through `tools/list`.

use serde_json::{json, Map, Value};

/// Argument validation failures. Both variants name the offending field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required parameter '{field}'")]
    MissingParameter { field: String },

    #[error("invalid parameter '{field}': {reason}")]
    InvalidParameter { field: String, reason: String },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            ValidationError::MissingParameter { field }
            | ValidationError::InvalidParameter { field, .. } => field,
        }
    }
}

/// Shape a parameter value must have.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Enum(Vec<&'static str>),
    Object(Vec<ParamSpec>),
}

impl ParamType {
    fn describe(&self) -> String {
        match self {
            ParamType::String => "a string".to_string(),
            ParamType::Number => "a number".to_string(),
            ParamType::Boolean => "a boolean".to_string(),
            ParamType::Enum(values) => format!("one of [{}]", values.join(", ")),
            ParamType::Object(_) => "an object".to_string(),
        }
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub default: Option<Value>,
    pub optional: bool,
}

impl ParamSpec {
    fn new(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
            default: None,
            optional: false,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::String, description)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number, description)
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean, description)
    }

    pub fn one_of(
        name: impl Into<String>,
        values: &[&'static str],
        description: impl Into<String>,
    ) -> Self {
        Self::new(name, ParamType::Enum(values.to_vec()), description)
    }

    pub fn object(
        name: impl Into<String>,
        fields: Vec<ParamSpec>,
        description: impl Into<String>,
    ) -> Self {
        Self::new(name, ParamType::Object(fields), description)
    }

    /// Value substituted when the caller omits the parameter.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Allow the parameter to be omitted without a default.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && !self.optional
    }

    fn json_schema(&self) -> Value {
        let mut schema = match &self.ty {
            ParamType::String => json!({ "type": "string" }),
            ParamType::Number => json!({ "type": "number" }),
            ParamType::Boolean => json!({ "type": "boolean" }),
            ParamType::Enum(values) => json!({ "type": "string", "enum": values }),
            ParamType::Object(fields) => object_schema(fields),
        };
        if let Value::Object(map) = &mut schema {
            map.insert("description".into(), Value::String(self.description.clone()));
            if let Some(default) = &self.default {
                map.insert("default".into(), default.clone());
            }
        }
        schema
    }
}

/// Full input schema of a tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSchema {
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    /// Schema of a tool that takes no arguments.
    pub fn empty() -> Self {
        Self::default()
    }

    /// JSON Schema advertised to MCP clients.
    pub fn json_schema(&self) -> Value {
        object_schema(&self.params)
    }
}

fn object_schema(fields: &[ParamSpec]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|spec| (spec.name.clone(), spec.json_schema()))
        .collect();
    let required: Vec<&str> = fields
        .iter()
        .filter(|spec| spec.is_required())
        .map(|spec| spec.name.as_str())
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Arguments that passed validation. Only constructed by [`validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Validate raw call arguments against a schema.
///
/// Absent parameters take their declared default; absent required parameters
/// fail with [`ValidationError::MissingParameter`]. Explicit `null` counts as
/// absent. Undeclared fields are dropped.
pub fn validate(schema: &ToolSchema, raw: &Value) -> Result<ToolArgs, ValidationError> {
    let empty = Map::new();
    let object = match raw {
        Value::Null => &empty,
        Value::Object(map) => map,
        _ => {
            return Err(ValidationError::InvalidParameter {
                field: "arguments".to_string(),
                reason: "expected an object".to_string(),
            })
        }
    };
    validate_fields(&schema.params, object, "").map(ToolArgs)
}

fn validate_fields(
    specs: &[ParamSpec],
    object: &Map<String, Value>,
    prefix: &str,
) -> Result<Map<String, Value>, ValidationError> {
    let mut typed = Map::new();
    for spec in specs {
        let path = if prefix.is_empty() {
            spec.name.clone()
        } else {
            format!("{prefix}.{}", spec.name)
        };
        match object.get(&spec.name).filter(|value| !value.is_null()) {
            Some(value) => {
                typed.insert(spec.name.clone(), check_value(spec, value, &path)?);
            }
            None => {
                if let Some(default) = &spec.default {
                    typed.insert(spec.name.clone(), default.clone());
                } else if !spec.optional {
                    return Err(ValidationError::MissingParameter { field: path });
                }
            }
        }
    }
    Ok(typed)
}

fn check_value(spec: &ParamSpec, value: &Value, path: &str) -> Result<Value, ValidationError> {
    let mismatch = || ValidationError::InvalidParameter {
        field: path.to_string(),
        reason: format!("expected {}", spec.ty.describe()),
    };
    match &spec.ty {
        ParamType::String if value.is_string() => Ok(value.clone()),
        ParamType::Number if value.is_number() => Ok(value.clone()),
        ParamType::Boolean if value.is_boolean() => Ok(value.clone()),
        ParamType::Enum(allowed) => match value.as_str() {
            Some(candidate) if allowed.contains(&candidate) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        ParamType::Object(fields) => match value {
            Value::Object(map) => validate_fields(fields, map, path).map(Value::Object),
            _ => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn navigate_schema() -> ToolSchema {
        ToolSchema::new(vec![
            ParamSpec::string("url", "URL to navigate to"),
            ParamSpec::one_of("browserType", &["chromium", "firefox", "webkit"], "Browser")
                .with_default(json!("chromium")),
            ParamSpec::number("width", "Viewport width").with_default(json!(1280)),
            ParamSpec::boolean("headless", "Headless mode").with_default(json!(false)),
        ])
    }

    #[test]
    fn substitutes_defaults_for_absent_parameters() {
        let args = validate(&navigate_schema(), &json!({"url": "https://example.com"})).unwrap();
        assert_eq!(args.get_str("browserType"), Some("chromium"));
        assert_eq!(args.get_f64("width"), Some(1280.0));
        assert_eq!(args.get_bool("headless"), Some(false));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let args = validate(
            &navigate_schema(),
            &json!({"url": "https://example.com", "browserType": "webkit", "width": 640}),
        )
        .unwrap();
        assert_eq!(args.get_str("browserType"), Some("webkit"));
        assert_eq!(args.get_f64("width"), Some(640.0));
    }

    #[test]
    fn missing_required_parameter_is_named() {
        let err = validate(&navigate_schema(), &json!({})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingParameter {
                field: "url".into()
            }
        );
    }

    #[test]
    fn null_counts_as_absent() {
        let args = validate(
            &navigate_schema(),
            &json!({"url": "https://example.com", "width": null}),
        )
        .unwrap();
        assert_eq!(args.get_f64("width"), Some(1280.0));
    }

    #[test]
    fn rejects_values_outside_enumeration() {
        let err = validate(
            &navigate_schema(),
            &json!({"url": "https://example.com", "browserType": "netscape"}),
        )
        .unwrap_err();
        assert_eq!(err.field(), "browserType");
        assert!(err.to_string().contains("chromium"));
    }

    #[test]
    fn rejects_numeric_strings_for_numbers() {
        let err = validate(
            &navigate_schema(),
            &json!({"url": "https://example.com", "width": "800"}),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { ref field, .. } if field == "width"));
    }

    #[test]
    fn nested_objects_report_dotted_paths() {
        let schema = ToolSchema::new(vec![ParamSpec::object(
            "margin",
            vec![
                ParamSpec::string("top", "top"),
                ParamSpec::string("bottom", "bottom"),
            ],
            "Page margins",
        )]);

        let err = validate(&schema, &json!({"margin": {"top": "1cm"}})).unwrap_err();
        assert_eq!(err.field(), "margin.bottom");

        let args = validate(&schema, &json!({"margin": {"top": "1cm", "bottom": "2cm"}})).unwrap();
        assert_eq!(args.get("margin").unwrap()["bottom"], "2cm");
    }

    #[test]
    fn optional_parameters_may_be_omitted() {
        let schema = ToolSchema::new(vec![
            ParamSpec::string("key", "Key to press"),
            ParamSpec::string("selector", "Focus target").optional(),
        ]);
        let args = validate(&schema, &json!({"key": "Enter"})).unwrap();
        assert!(args.get("selector").is_none());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = validate(&navigate_schema(), &json!([1, 2])).unwrap_err();
        assert_eq!(err.field(), "arguments");
    }

    #[test]
    fn empty_schema_accepts_missing_arguments() {
        let args = validate(&ToolSchema::empty(), &Value::Null).unwrap();
        assert!(args.as_map().is_empty());
    }

    #[test]
    fn undeclared_fields_are_dropped() {
        let args = validate(
            &navigate_schema(),
            &json!({"url": "https://example.com", "extra": true}),
        )
        .unwrap();
        assert!(args.get("extra").is_none());
    }

    #[test]
    fn json_schema_lists_only_parameters_without_defaults_as_required() {
        let schema = navigate_schema().json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["url"]));
        assert_eq!(schema["properties"]["browserType"]["enum"], json!(["chromium", "firefox", "webkit"]));
        assert_eq!(schema["properties"]["width"]["default"], json!(1280));
    }
}
