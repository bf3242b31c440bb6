//! Path patterns and typed request fields.
//!
//! Engines declare the fields each path accepts as a list of
//! [`FieldSchema`]s; [`FieldData`] validates a raw request body against it
//! and performs the host's usual weak typing (numbers as strings, comma
//! separated lists, duration strings).

use crate::error::{SdkError, SdkResult};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Regex fragment matching identifier-like path segments.
pub const GENERIC_NAME_REGEX: &str = r"\w(([\w.-]+)?\w)?";

/// Type of a request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Any scalar rendered as a string
    String,
    /// Signed integer
    Int,
    /// Boolean
    Bool,
    /// Duration given as seconds or a duration string
    DurationSecond,
    /// List of strings, or a comma-separated string
    CommaStringSlice,
    /// JSON object
    Map,
    /// String matching [`GENERIC_NAME_REGEX`]
    NameString,
}

/// A declared request field.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    /// Field name
    pub name: &'static str,
    /// Field type
    pub field_type: FieldType,
    /// Whether the field must be present on create/update
    pub required: bool,
    /// Value used when the field is absent
    pub default: Option<Value>,
}

impl FieldSchema {
    /// An optional field with no default.
    #[must_use]
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
            default: None,
        }
    }

    /// Mark the field required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set a default.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A request body paired with its schema.
#[derive(Debug, Clone)]
pub struct FieldData {
    raw: Map<String, Value>,
    schema: HashMap<&'static str, FieldSchema>,
}

impl FieldData {
    /// Pair `raw` with `schema`.
    #[must_use]
    pub fn new(raw: Map<String, Value>, schema: &[FieldSchema]) -> Self {
        Self {
            raw,
            schema: schema.iter().map(|f| (f.name, f.clone())).collect(),
        }
    }

    /// The unprocessed body.
    #[must_use]
    pub const fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Whether the caller supplied `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.raw.contains_key(name)
    }

    /// Check that every supplied declared field has a valid value.
    ///
    /// When `check_required` is set, missing required fields are errors too.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::InvalidRequest`] naming the first bad field.
    pub fn validate(&self, check_required: bool) -> SdkResult<()> {
        let mut fields: Vec<&FieldSchema> = self.schema.values().collect();
        fields.sort_by_key(|f| f.name);
        for field in fields {
            match self.raw.get(field.name) {
                None | Some(Value::Null) => {
                    if check_required && field.required {
                        return Err(SdkError::invalid_request(format!("missing {}", field.name)));
                    }
                }
                Some(value) => {
                    coerce(field.name, field.field_type, value)?;
                }
            }
        }
        Ok(())
    }

    fn value(&self, name: &str) -> Option<(FieldType, &Value)> {
        let schema = self.schema.get(name);
        let field_type = schema.map_or(FieldType::String, |s| s.field_type);
        match self.raw.get(name) {
            Some(Value::Null) | None => schema.and_then(|s| s.default.as_ref()).map(|v| (field_type, v)),
            Some(v) => Some((field_type, v)),
        }
    }

    fn get_as(&self, name: &str, as_type: FieldType) -> SdkResult<Option<Value>> {
        self.value(name)
            .map(|(_, v)| coerce(name, as_type, v))
            .transpose()
    }

    /// String value of a field or its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be rendered as a string.
    pub fn get_string(&self, name: &str) -> SdkResult<Option<String>> {
        let ty = match self.value(name) {
            Some((FieldType::NameString, _)) => FieldType::NameString,
            _ => FieldType::String,
        };
        Ok(self.get_as(name, ty)?.and_then(|v| v.as_str().map(str::to_string)))
    }

    /// Boolean value of a field or its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a boolean.
    pub fn get_bool(&self, name: &str) -> SdkResult<Option<bool>> {
        Ok(self.get_as(name, FieldType::Bool)?.and_then(|v| v.as_bool()))
    }

    /// Integer value of a field or its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an integer.
    pub fn get_i64(&self, name: &str) -> SdkResult<Option<i64>> {
        Ok(self.get_as(name, FieldType::Int)?.and_then(|v| v.as_i64()))
    }

    /// Duration value of a field or its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid duration.
    pub fn get_duration(&self, name: &str) -> SdkResult<Option<Duration>> {
        Ok(self
            .get_as(name, FieldType::DurationSecond)?
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs))
    }

    /// String list value of a field or its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a list or a string.
    pub fn get_strings(&self, name: &str) -> SdkResult<Option<Vec<String>>> {
        Ok(self.get_as(name, FieldType::CommaStringSlice)?.map(|v| {
            v.as_array()
                .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default()
        }))
    }

    /// Object value of a field or its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object.
    pub fn get_map(&self, name: &str) -> SdkResult<Option<Map<String, Value>>> {
        Ok(self.get_as(name, FieldType::Map)?.and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        }))
    }
}

fn coerce(name: &str, field_type: FieldType, value: &Value) -> SdkResult<Value> {
    let invalid = |expected: &str| {
        SdkError::invalid_request(format!("error converting input {value} for field {name:?}: expected {expected}"))
    };
    match field_type {
        FieldType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(invalid("string")),
        },
        FieldType::NameString => {
            let s = value.as_str().ok_or_else(|| invalid("string"))?;
            let re = Regex::new(&format!("^{GENERIC_NAME_REGEX}$"))
                .map_err(|e| SdkError::invalid_request(e.to_string()))?;
            if re.is_match(s) {
                Ok(value.clone())
            } else {
                Err(invalid("a name made of word characters, '.' or '-'"))
            }
        }
        FieldType::Int => match value {
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid("integer")),
            _ => Err(invalid("integer")),
        },
        FieldType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "t" => Ok(Value::Bool(true)),
                "false" | "0" | "f" => Ok(Value::Bool(false)),
                _ => Err(invalid("bool")),
            },
            Value::Number(n) => match n.as_u64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid("bool")),
            },
            _ => Err(invalid("bool")),
        },
        FieldType::DurationSecond => parse_duration_second(value)
            .map(|d| Value::from(d.as_secs()))
            .map_err(|_| invalid("duration")),
        FieldType::CommaStringSlice => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(Value::String(s.trim().to_string())),
                    Value::Number(n) => Ok(Value::String(n.to_string())),
                    _ => Err(invalid("list of strings")),
                })
                .collect::<SdkResult<Vec<_>>>()
                .map(Value::Array),
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            )),
            _ => Err(invalid("list of strings")),
        },
        FieldType::Map => match value {
            Value::Object(_) => Ok(value.clone()),
            Value::String(s) => serde_json::from_str::<Map<String, Value>>(s)
                .map(Value::Object)
                .map_err(|_| invalid("object")),
            _ => Err(invalid("object")),
        },
    }
}

/// Parse seconds or a duration string such as `90`, `"90"`, `"1h30m"`,
/// `"500ms"`, or `"2d"`.
///
/// # Errors
///
/// Returns an error on negative, fractional-second, or malformed input.
pub fn parse_duration_second(value: &Value) -> SdkResult<Duration> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(Duration::from_secs)
            .ok_or_else(|| SdkError::invalid_request(format!("invalid duration {n}"))),
        Value::String(s) => parse_duration_str(s),
        _ => Err(SdkError::invalid_request(format!("invalid duration {value}"))),
    }
}

fn parse_duration_str(input: &str) -> SdkResult<Duration> {
    let s = input.trim();
    let invalid = || SdkError::invalid_request(format!("invalid duration {input:?}"));
    if s.is_empty() {
        return Ok(Duration::ZERO);
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount * 60),
            "h" => Duration::from_secs(amount * 3600),
            "d" => Duration::from_secs(amount * 86_400),
            _ => return Err(invalid()),
        };
        total += unit;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

/// A path made of a literal prefix and an optional named segment.
#[derive(Debug, Clone)]
pub struct PathPattern {
    regex: Regex,
    capture: Option<&'static str>,
}

impl PathPattern {
    /// Pattern matching exactly `prefix`, or `prefix` followed by a
    /// [`GENERIC_NAME_REGEX`] segment captured as `capture`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting regex is invalid.
    pub fn new(prefix: &str, capture: Option<&'static str>) -> SdkResult<Self> {
        let pattern = match capture {
            Some(name) => format!("^{}(?P<{name}>{GENERIC_NAME_REGEX})$", regex::escape(prefix)),
            None => format!("^{}$", regex::escape(prefix)),
        };
        let regex = Regex::new(&pattern).map_err(|e| SdkError::invalid_request(e.to_string()))?;
        Ok(Self { regex, capture })
    }

    /// Captured segments when `path` matches.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Map<String, Value>> {
        let caps = self.regex.captures(path)?;
        let mut out = Map::new();
        if let Some(name) = self.capture {
            let value = caps.name(name)?.as_str();
            out.insert(name.to_string(), Value::String(value.to_string()));
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Vec<FieldSchema> {
        vec![
            FieldSchema::new("name", FieldType::NameString).required(),
            FieldSchema::new("ttl", FieldType::DurationSecond),
            FieldSchema::new("verify", FieldType::Bool).with_default(json!(true)),
            FieldSchema::new("roles", FieldType::CommaStringSlice),
            FieldSchema::new("count", FieldType::Int),
            FieldSchema::new("config", FieldType::Map),
        ]
    }

    fn data(raw: Value) -> FieldData {
        FieldData::new(raw.as_object().cloned().unwrap_or_default(), &schema())
    }

    #[test]
    fn test_defaults_and_coercion() {
        let d = data(json!({"name": "pg", "ttl": "1h", "roles": "a, b,,c", "count": "3"}));
        d.validate(true).unwrap();
        assert_eq!(d.get_string("name").unwrap().as_deref(), Some("pg"));
        assert_eq!(d.get_duration("ttl").unwrap(), Some(Duration::from_secs(3600)));
        assert_eq!(d.get_bool("verify").unwrap(), Some(true));
        assert_eq!(d.get_strings("roles").unwrap().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(d.get_i64("count").unwrap(), Some(3));
        assert_eq!(d.get_map("config").unwrap(), None);
    }

    #[test]
    fn test_required_field() {
        let d = data(json!({"ttl": 5}));
        assert!(d.validate(true).is_err());
        assert!(d.validate(false).is_ok());
    }

    #[test]
    fn test_invalid_values() {
        assert!(data(json!({"name": "pg", "ttl": "forever"})).validate(true).is_err());
        assert!(data(json!({"name": "pg", "verify": "maybe"})).validate(true).is_err());
        assert!(data(json!({"name": "bad name"})).validate(true).is_err());
        assert!(data(json!({"name": "pg", "count": 1.5})).validate(true).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_second(&json!(90)).unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration_second(&json!("90")).unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration_second(&json!("1h30m")).unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration_second(&json!("2d")).unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration_second(&json!("1500ms")).unwrap(), Duration::from_millis(1500));
        assert!(parse_duration_second(&json!(-5)).is_err());
        assert!(parse_duration_second(&json!("5x")).is_err());
        assert!(parse_duration_second(&json!("h")).is_err());
    }

    #[test]
    fn test_path_pattern() {
        let p = PathPattern::new("config/", Some("name")).unwrap();
        assert_eq!(p.matches("config/my-db.1").unwrap()["name"], "my-db.1");
        assert!(p.matches("config/").is_none());
        assert!(p.matches("config/a/b").is_none());
        assert!(p.matches("roles/x").is_none());

        let list = PathPattern::new("config/", None).unwrap();
        assert!(list.matches("config/").is_some());

        let ca = PathPattern::new("ca", None).unwrap();
        assert!(ca.matches("ca").is_some());
        assert!(ca.matches("ca/rotate").is_none());
    }
}
