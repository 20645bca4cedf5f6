//! Declared parameter schemas.
//!
//! Each endpoint declares its parameters once at registration. Validation
//! collects every failing field rather than stopping at the first, applies
//! defaults for absent optional fields, and drops undeclared fields so
//! handlers only see what they asked for.

use crate::domain::error::FieldError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// JSON type a parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Integer,
    Number,
    String,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Rule {
    Min(f64),
    Max(f64),
    MinLength(usize),
    MaxLength(usize),
    OneOf(Vec<Value>),
}

impl Rule {
    fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            Rule::Min(min) => match value.as_f64() {
                Some(n) if n < *min => Err(format!("must be at least {min}")),
                _ => Ok(()),
            },
            Rule::Max(max) => match value.as_f64() {
                Some(n) if n > *max => Err(format!("must be at most {max}")),
                _ => Ok(()),
            },
            Rule::MinLength(min) => match length(value) {
                Some(len) if len < *min => Err(format!("length must be at least {min}")),
                _ => Ok(()),
            },
            Rule::MaxLength(max) => match length(value) {
                Some(len) if len > *max => Err(format!("length must be at most {max}")),
                _ => Ok(()),
            },
            Rule::OneOf(allowed) => {
                if allowed.contains(value) {
                    Ok(())
                } else {
                    Err(format!("must be one of {}", Value::Array(allowed.clone())))
                }
            }
        }
    }
}

/// Characters for strings, elements for arrays.
fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}

/// One declared parameter. Required unless a default is given or
/// [`ParamSpec::optional`] is called.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    name: String,
    ty: ParamType,
    required: bool,
    default: Option<Value>,
    rules: Vec<Rule>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            rules: Vec::new(),
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Array)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Object)
    }

    /// Absent values are simply left out of the validated params.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Absent values are replaced by `value`.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(value.into());
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.rules.push(Rule::Min(min));
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.rules.push(Rule::Max(max));
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.rules.push(Rule::MinLength(min));
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.rules.push(Rule::MaxLength(max));
        self
    }

    pub fn one_of<I, V>(mut self, allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.rules
            .push(Rule::OneOf(allowed.into_iter().map(Into::into).collect()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    fn validate(&self, value: &Value) -> Result<(), String> {
        if !self.ty.matches(value) {
            return Err(format!("expected {}, got {}", self.ty.name(), json_type(value)));
        }
        self.rules.iter().try_for_each(|rule| rule.check(value))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parameter schema of one endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    fields: Vec<ParamSpec>,
}

impl ParamSchema {
    /// Schema with no declared params.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[ParamSpec] {
        &self.fields
    }

    /// Validate raw params, collecting every failing field.
    ///
    /// `null` counts as absent.
    pub fn validate(&self, raw: &Map<String, Value>) -> Result<Params, Vec<FieldError>> {
        let mut values = Map::new();
        let mut errors = Vec::new();

        for spec in &self.fields {
            match raw.get(&spec.name).filter(|v| !v.is_null()) {
                Some(value) => match spec.validate(value) {
                    Ok(()) => {
                        values.insert(spec.name.clone(), value.clone());
                    }
                    Err(reason) => errors.push(FieldError::new(&spec.name, reason)),
                },
                None => {
                    if let Some(default) = &spec.default {
                        values.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        errors.push(FieldError::new(&spec.name, "missing required field"));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(Params { values })
        } else {
            Err(errors)
        }
    }
}

/// Validated parameters handed to a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Map<String, Value>,
}

impl Params {
    /// Typed accessor. Fails if the field is absent or does not deserialize.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("parameter {name} not present"))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Typed accessor for optional fields.
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.values.get(name) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Deserialize all params into one struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(Value::Object(self.values.clone()))?)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_default_applied_when_absent() {
        let schema = ParamSchema::empty().param(ParamSpec::integer("awesomness").default(43));
        let params = schema.validate(&Map::new()).unwrap();
        assert_eq!(params.get::<i64>("awesomness").unwrap(), 43);

        let params = schema.validate(&obj(json!({"awesomness": 61}))).unwrap();
        assert_eq!(params.get::<i64>("awesomness").unwrap(), 61);
    }

    #[test]
    fn test_all_failures_collected() {
        let schema = ParamSchema::empty()
            .param(ParamSpec::string("message").min_length(1))
            .param(ParamSpec::integer("count"))
            .param(ParamSpec::boolean("loud").optional());

        let errors = schema
            .validate(&obj(json!({"count": "three", "loud": 1})))
            .unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["message", "count", "loud"]);
        assert_eq!(errors[0].reason, "missing required field");
        assert_eq!(errors[1].reason, "expected integer, got string");
    }

    #[test]
    fn test_integer_rejects_float() {
        let schema = ParamSchema::empty().param(ParamSpec::integer("n"));
        let errors = schema.validate(&obj(json!({"n": 1.5}))).unwrap_err();
        assert_eq!(errors[0].reason, "expected integer, got number");

        let schema = ParamSchema::empty().param(ParamSpec::number("n"));
        assert!(schema.validate(&obj(json!({"n": 2}))).is_ok());
    }

    #[test]
    fn test_range_and_length_rules() {
        let schema = ParamSchema::empty()
            .param(ParamSpec::integer("n").min(0.0).max(10.0))
            .param(ParamSpec::string("s").max_length(3));

        assert!(schema.validate(&obj(json!({"n": 10, "s": "abc"}))).is_ok());
        let errors = schema
            .validate(&obj(json!({"n": 11, "s": "abcd"})))
            .unwrap_err();
        assert_eq!(errors[0].reason, "must be at most 10");
        assert_eq!(errors[1].reason, "length must be at most 3");

        // Characters, not bytes
        assert!(schema.validate(&obj(json!({"n": 0, "s": "ééé"}))).is_ok());
    }

    #[test]
    fn test_one_of() {
        let schema =
            ParamSchema::empty().param(ParamSpec::string("mode").one_of(["fast", "slow"]));
        assert!(schema.validate(&obj(json!({"mode": "fast"}))).is_ok());
        assert!(schema.validate(&obj(json!({"mode": "medium"}))).is_err());
    }

    #[test]
    fn test_null_is_absent_and_extras_dropped() {
        let schema = ParamSchema::empty()
            .param(ParamSpec::string("a").optional())
            .param(ParamSpec::string("b"));
        let errors = schema.validate(&obj(json!({"a": null, "b": null}))).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "b");

        let params = schema.validate(&obj(json!({"b": "x", "extra": 1}))).unwrap();
        assert!(params.value("extra").is_none());
        assert_eq!(params.get_opt::<String>("a").unwrap(), None);
    }

    #[test]
    fn test_deserialize_into_struct() {
        #[derive(serde::Deserialize)]
        struct Args {
            message: String,
            count: u32,
        }
        let schema = ParamSchema::empty()
            .param(ParamSpec::string("message"))
            .param(ParamSpec::integer("count").default(1));
        let args: Args = schema
            .validate(&obj(json!({"message": "hi"})))
            .unwrap()
            .deserialize()
            .unwrap();
        assert_eq!(args.message, "hi");
        assert_eq!(args.count, 1);
    }
}
