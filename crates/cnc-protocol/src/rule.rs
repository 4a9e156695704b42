//! Filtering rules and their label selectors.
//!
//! A rule's selector is an ordered list of matchers. The hub treats the
//! selector as opaque data: matchers are validated when decoded but never
//! evaluated here.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// What a consumer does with series matching a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Action {
    #[default]
    Undefined,
    Keep,
    Drop,
    Continue,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Keep => "keep",
            Self::Drop => "drop",
            Self::Continue => "continue",
        }
    }

    /// Lenient lookup: anything unrecognized maps to `Undefined`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "keep" => Self::Keep,
            "drop" => Self::Drop,
            "continue" => Self::Continue,
            _ => Self::Undefined,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// Label match operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOp {
    Equal,
    NotEqual,
    RegexMatch,
    RegexNotMatch,
}

impl MatchOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::RegexMatch => "=~",
            Self::RegexNotMatch => "!~",
        }
    }

    pub fn is_regex(self) -> bool {
        matches!(self, Self::RegexMatch | Self::RegexNotMatch)
    }
}

impl FromStr for MatchOp {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            "=~" => Ok(Self::RegexMatch),
            "!~" => Ok(Self::RegexNotMatch),
            other => Err(ProtocolError::UnknownOperator(other.to_string())),
        }
    }
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single label predicate. Wire form: `[name, operator, value]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Matcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl Matcher {
    /// Build a matcher, checking that regex operands compile.
    ///
    /// Patterns are anchored on both ends, the way label matchers are
    /// evaluated downstream.
    pub fn new(
        op: MatchOp,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let name = name.into();
        let value = value.into();
        if op.is_regex() {
            Regex::new(&format!("^(?:{value})$"))
                .map_err(|source| ProtocolError::InvalidRegex {
                    name: name.clone(),
                    source,
                })?;
        }
        Ok(Self { name, op, value })
    }

    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal,
            value: value.into(),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

impl Serialize for Matcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.name)?;
        tuple.serialize_element(self.op.symbol())?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Matcher {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [name, op, value] = <[String; 3]>::deserialize(deserializer)?;
        let op = op.parse::<MatchOp>().map_err(de::Error::custom)?;
        Matcher::new(op, name, value).map_err(de::Error::custom)
    }
}

/// Ordered list of matchers attached to a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(pub Vec<Matcher>);

impl Selector {
    pub fn matchers(&self) -> &[Matcher] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Matcher>> for Selector {
    fn from(matchers: Vec<Matcher>) -> Self {
        Self(matchers)
    }
}

/// A filtering rule. Rules are immutable once stored; a change is a delete
/// followed by an insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Assigned by the rule store; ignored on insert.
    #[serde(default)]
    pub id: i64,

    #[serde(default, deserialize_with = "crate::message::null_as_default")]
    pub selector: Selector,

    #[serde(default)]
    pub action: Action,
}

impl Rule {
    pub fn new(selector: impl Into<Selector>, action: Action) -> Self {
        Self {
            id: 0,
            selector: selector.into(),
            action,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn test_rule() -> Rule {
        Rule::new(vec![Matcher::equal("namespace", "dev")], Action::Drop).with_id(1234)
    }

    #[test]
    fn test_json_round_trip() {
        let rule = test_rule();
        let encoded = serde_json::to_string(&rule).unwrap();

        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 1234,
                "action": "drop",
                "selector": [["namespace", "=", "dev"]]
            })
        );

        let decoded: Rule = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, rule.id);
        assert_eq!(decoded.action, rule.action);
        assert_eq!(decoded.selector.len(), 1);
        assert_eq!(decoded.selector, rule.selector);
        assert_eq!(decoded.selector.0[0].to_string(), r#"namespace="dev""#);
    }

    #[test]
    fn test_unknown_action_is_undefined() {
        let rule: Rule = serde_json::from_str(r#"{"id":1,"action":"explode"}"#).unwrap();
        assert_eq!(rule.action, Action::Undefined);
        assert!(rule.selector.is_empty());
    }

    #[test]
    fn test_null_selector_decodes_empty() {
        let rule: Rule =
            serde_json::from_str(r#"{"id":5678,"selector":null,"action":"keep"}"#).unwrap();
        assert_eq!(rule.action, Action::Keep);
        assert!(rule.selector.is_empty());
    }

    #[test]
    fn test_all_operators_parse() {
        let rule: Rule = serde_json::from_str(
            r#"{"selector":[["a","=","1"],["b","!=","2"],["c","=~","x.*"],["d","!~","y|z"]]}"#,
        )
        .unwrap();
        let ops: Vec<MatchOp> = rule.selector.matchers().iter().map(|m| m.op).collect();
        assert_eq!(
            ops,
            vec![
                MatchOp::Equal,
                MatchOp::NotEqual,
                MatchOp::RegexMatch,
                MatchOp::RegexNotMatch
            ]
        );
        assert_eq!(rule.id, 0);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = serde_json::from_str::<Rule>(r#"{"selector":[["a","==","1"]]}"#).unwrap_err();
        assert!(err.to_string().contains("unknown match operator"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = Matcher::new(MatchOp::RegexMatch, "pod", "(unclosed").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRegex { .. }));

        // Equality operands are taken literally.
        assert!(Matcher::new(MatchOp::Equal, "pod", "(unclosed").is_ok());
    }

    #[test]
    fn test_matcher_display() {
        let m = Matcher::new(MatchOp::RegexNotMatch, "job", "api.*").unwrap();
        assert_eq!(m.to_string(), r#"job!~"api.*""#);
    }
}
