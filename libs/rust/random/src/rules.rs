//! Rules a generated string must satisfy.

use crate::error::{PolicyError, PolicyResult};
use serde_json::{json, Map, Value};
use std::fmt;

/// Kind tag of [`CharsetRule`].
pub const CHARSET_RULE_KIND: &str = "charset";

/// A constraint on generated strings.
///
/// Rules also contribute characters: the generator draws from the
/// deduplicated union of every rule's [`Rule::chars`].
pub trait Rule: Send + Sync + fmt::Debug {
    /// Whether the candidate satisfies this rule.
    fn pass(&self, value: &[char]) -> bool;

    /// Characters this rule contributes to the aggregate charset.
    fn chars(&self) -> &[char];

    /// The kind tag used in policy documents.
    fn kind(&self) -> &'static str;

    /// Minimum number of characters this rule requires, if any.
    fn min_length(&self) -> usize {
        0
    }

    /// The rule's configuration as it appears inside a policy.
    fn data(&self) -> Value;
}

/// Requires at least `min_chars` runes of the candidate to come from `charset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetRule {
    charset: Vec<char>,
    min_chars: usize,
}

impl CharsetRule {
    /// Build a rule from a charset string and a minimum count.
    ///
    /// # Errors
    ///
    /// Returns an error if the charset is empty.
    pub fn new(charset: &str, min_chars: usize) -> PolicyResult<Self> {
        if charset.is_empty() {
            return Err(PolicyError::invalid_rule(CHARSET_RULE_KIND, "charset must not be empty"));
        }
        Ok(Self {
            charset: charset.chars().collect(),
            min_chars,
        })
    }

    /// Build a rule from the body of a `rule "charset" { ... }` block.
    ///
    /// # Errors
    ///
    /// Returns an error if `charset` is missing or `min-chars` is not a
    /// non-negative integer.
    pub fn from_map(data: &Map<String, Value>) -> PolicyResult<Self> {
        let charset = data
            .get("charset")
            .and_then(Value::as_str)
            .ok_or_else(|| PolicyError::invalid_rule(CHARSET_RULE_KIND, "missing charset"))?;

        let min_chars = match data.get("min-chars") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| {
                    PolicyError::invalid_rule(CHARSET_RULE_KIND, "min-chars must be a non-negative integer")
                })?,
        };

        if let Some(key) = data.keys().find(|k| *k != "charset" && *k != "min-chars") {
            return Err(PolicyError::invalid_rule(
                CHARSET_RULE_KIND,
                format!("unexpected field {key:?}"),
            ));
        }

        Self::new(charset, min_chars)
    }

    /// Minimum number of matching runes.
    #[must_use]
    pub const fn min_chars(&self) -> usize {
        self.min_chars
    }
}

impl Rule for CharsetRule {
    fn pass(&self, value: &[char]) -> bool {
        if self.min_chars == 0 {
            return true;
        }
        let count = value.iter().filter(|c| self.charset.contains(c)).count();
        count >= self.min_chars
    }

    fn chars(&self) -> &[char] {
        &self.charset
    }

    fn kind(&self) -> &'static str {
        CHARSET_RULE_KIND
    }

    fn min_length(&self) -> usize {
        self.min_chars
    }

    fn data(&self) -> Value {
        json!({
            "charset": self.charset.iter().collect::<String>(),
            "min-chars": self.min_chars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_charset_rule_pass() {
        let rule = CharsetRule::new("abc", 2).unwrap();
        assert!(rule.pass(&chars("aXbY")));
        assert!(!rule.pass(&chars("aXYZ")));
        assert!(!rule.pass(&chars("")));
    }

    #[test]
    fn test_zero_min_always_passes() {
        let rule = CharsetRule::new("abc", 0).unwrap();
        assert!(rule.pass(&chars("XYZ")));
    }

    #[test]
    fn test_multibyte_runes_count_once() {
        let rule = CharsetRule::new("äöü", 2).unwrap();
        assert!(rule.pass(&chars("ä-ü")));
        assert_eq!(rule.chars().len(), 3);
    }

    #[test]
    fn test_from_map() {
        let data = json!({"charset": "0123456789", "min-chars": 3});
        let rule = CharsetRule::from_map(data.as_object().unwrap()).unwrap();
        assert_eq!(rule.min_chars(), 3);
        assert_eq!(rule.data(), data);
    }

    #[test]
    fn test_from_map_defaults_min_chars() {
        let data = json!({"charset": "ab"});
        let rule = CharsetRule::from_map(data.as_object().unwrap()).unwrap();
        assert_eq!(rule.min_chars(), 0);
    }

    #[test]
    fn test_from_map_rejects_bad_input() {
        for data in [
            json!({}),
            json!({"charset": ""}),
            json!({"charset": "ab", "min-chars": -1}),
            json!({"charset": "ab", "min-chars": "two"}),
            json!({"charset": "ab", "max-chars": 2}),
        ] {
            assert!(
                CharsetRule::from_map(data.as_object().unwrap()).is_err(),
                "{data} should be rejected"
            );
        }
    }
}
