//! HCL password policy parser.
//!
//! A policy looks like:
//!
//! ```hcl
//! length = 20
//! rule "charset" {
//!   charset   = "abcdefghijklmnopqrstuvwxyz"
//!   min-chars = 1
//! }
//! ```

use crate::error::{PolicyError, PolicyResult};
use crate::generator::StringGenerator;
use crate::registry::Registry;
use hcl::{Body, Expression};
use serde_json::{Map, Number, Value};

/// Parses HCL policies into [`StringGenerator`]s.
#[derive(Debug, Clone, Default)]
pub struct PolicyParser {
    registry: Registry,
}

impl PolicyParser {
    /// Parser backed by a custom registry.
    #[must_use]
    pub const fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Parse a policy document.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed HCL, a missing or non-integer `length`,
    /// unknown rule kinds, or a policy the generator rejects.
    pub fn parse_policy(&self, raw: &str) -> PolicyResult<StringGenerator> {
        let body: Body = hcl::parse(raw).map_err(|e| PolicyError::Parse(e.to_string()))?;

        let mut length = None;
        for attr in body.attributes() {
            match attr.key() {
                "length" => length = Some(expect_length(attr.expr())?),
                other => return Err(PolicyError::Parse(format!("unexpected attribute {other:?}"))),
            }
        }
        let length = length.ok_or_else(|| PolicyError::Parse("missing length".to_string()))?;

        let mut rules = Vec::new();
        for block in body.blocks() {
            if block.identifier() != "rule" {
                return Err(PolicyError::Parse(format!(
                    "unexpected block {:?}",
                    block.identifier()
                )));
            }
            let [label] = block.labels() else {
                return Err(PolicyError::Parse("rule block requires exactly one label".to_string()));
            };

            let mut data = Map::new();
            for attr in block.body().attributes() {
                data.insert(attr.key().to_string(), expr_to_json(attr.expr())?);
            }
            rules.push(self.registry.parse_rule(label.as_str(), &data)?);
        }

        StringGenerator::new(length, rules)
    }
}

/// Parse a policy with the default registry.
///
/// # Errors
///
/// See [`PolicyParser::parse_policy`].
pub fn parse_policy(raw: &str) -> PolicyResult<StringGenerator> {
    PolicyParser::default().parse_policy(raw)
}

fn expect_length(expr: &Expression) -> PolicyResult<usize> {
    match expr {
        Expression::Number(n) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| PolicyError::Parse(format!("length must be a non-negative integer, got {n}"))),
        _ => Err(PolicyError::Parse("length must be a number".to_string())),
    }
}

fn expr_to_json(expr: &Expression) -> PolicyResult<Value> {
    Ok(match expr {
        Expression::Null => Value::Null,
        Expression::Bool(b) => Value::Bool(*b),
        Expression::String(s) => Value::String(s.clone()),
        Expression::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map_or(Value::Null, Value::Number)
            }
        }
        Expression::Array(items) => {
            Value::Array(items.iter().map(expr_to_json).collect::<PolicyResult<_>>()?)
        }
        _ => return Err(PolicyError::Parse("unsupported expression in rule".to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;

    const POLICY: &str = r#"
length = 20

rule "charset" {
  charset = "abcdefghijklmnopqrstuvwxyz"
  min-chars = 1
}

rule "charset" {
  charset = "0123456789"
  min-chars = 4
}
"#;

    #[test]
    fn test_parse_policy() {
        let generator = parse_policy(POLICY).unwrap();
        assert_eq!(generator.length(), 20);
        assert_eq!(generator.rules().len(), 2);
        assert_eq!(generator.rules()[1].min_length(), 4);
        assert_eq!(generator.charset().len(), 36);

        let value = generator.generate().unwrap();
        assert_eq!(value.len(), 20);
        assert!(value.chars().filter(char::is_ascii_digit).count() >= 4);
    }

    #[test]
    fn test_unknown_rule_kind() {
        let err = parse_policy("length = 20\nrule \"symbols\" {\n  charset = \"!@\"\n}\n").unwrap_err();
        assert!(matches!(err, PolicyError::UnknownRule(kind) if kind == "symbols"));
    }

    #[test]
    fn test_missing_length() {
        let err = parse_policy("rule \"charset\" {\n  charset = \"abc\"\n}\n").unwrap_err();
        assert!(matches!(err, PolicyError::Parse(_)));
    }

    #[test]
    fn test_length_below_minimum() {
        let err = parse_policy("length = 5\nrule \"charset\" {\n  charset = \"abc\"\n}\n").unwrap_err();
        assert!(matches!(err, PolicyError::LengthTooShort { .. }));
    }

    #[test]
    fn test_malformed_hcl() {
        assert!(matches!(parse_policy("length = "), Err(PolicyError::Parse(_))));
    }

    #[test]
    fn test_custom_registry() {
        let parser = PolicyParser::new(Registry::empty());
        assert!(matches!(
            parser.parse_policy(POLICY),
            Err(PolicyError::UnknownRule(_))
        ));
    }
}
