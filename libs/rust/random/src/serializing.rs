//! JSON encoding of policies.
//!
//! A generator serializes as
//! `{"length": 20, "rules": [{"type": "charset", "data": {...}}]}`.
//! Rules are rebuilt through the default [`Registry`] on the way back in.

use crate::generator::StringGenerator;
use crate::registry::Registry;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Serialize, Deserialize)]
struct RawRule {
    #[serde(rename = "type")]
    kind: String,
    data: Map<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct RawPolicy {
    length: usize,
    #[serde(default)]
    rules: Vec<RawRule>,
}

impl Serialize for StringGenerator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rules = self
            .rules()
            .iter()
            .map(|rule| RawRule {
                kind: rule.kind().to_string(),
                data: match rule.data() {
                    Value::Object(map) => map,
                    _ => Map::new(),
                },
            })
            .collect();
        RawPolicy {
            length: self.length(),
            rules,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StringGenerator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawPolicy::deserialize(deserializer)?;
        let registry = Registry::default();
        let rules = raw
            .rules
            .iter()
            .map(|r| registry.parse_rule(&r.kind, &r.data))
            .collect::<Result<Vec<_>, _>>()
            .map_err(D::Error::custom)?;
        Self::new(raw.length, rules).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use crate::generator::StringGenerator;
    use serde_json::json;

    #[test]
    fn test_json_shape() {
        let generator = StringGenerator::default_password().unwrap();
        let value = serde_json::to_value(&generator).unwrap();
        assert_eq!(value["length"], 20);
        assert_eq!(value["rules"].as_array().unwrap().len(), 4);
        assert_eq!(value["rules"][0]["type"], "charset");
        assert_eq!(value["rules"][3]["data"], json!({"charset": "-", "min-chars": 1}));
    }

    #[test]
    fn test_deserialize_rejects_unknown_rule() {
        let raw = json!({"length": 20, "rules": [{"type": "nope", "data": {}}]});
        assert!(serde_json::from_value::<StringGenerator>(raw).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let raw = json!({"length": 3, "rules": [{"type": "charset", "data": {"charset": "ab"}}]});
        let err = serde_json::from_value::<StringGenerator>(raw).unwrap_err();
        assert!(err.to_string().contains("length must be >= 10"));
    }
}
