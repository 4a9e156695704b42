//! Message envelopes.
//!
//! Envelopes are decoded from their `type` discriminant into a closed set of
//! variants; each variant carries only its own payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::agent::Agent;
use crate::error::ProtocolError;
use crate::rule::Rule;
use crate::TOPIC_AGENTS;

/// Decode `null` the same as a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPayload {
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub rules: Vec<Rule>,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub agents: Vec<Agent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInsertPayload {
    pub rule: Rule,

    /// Insert directly after the rule with this id; head of the list otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDeletePayload {
    #[serde(default)]
    pub id: Option<i64>,
}

/// Envelopes a peer sends to the hub.
///
/// Also the shape of everything the hub sends back, so peers can decode
/// hub output with the same type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe(SubscribePayload),

    #[serde(rename = "data")]
    Data(DataPayload),

    #[serde(rename = "rule.insert")]
    RuleInsert(RuleInsertPayload),

    #[serde(rename = "rule.delete")]
    RuleDelete(RuleDeletePayload),
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Discriminant as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Data(_) => "data",
            Self::RuleInsert(_) => "rule.insert",
            Self::RuleDelete(_) => "rule.delete",
        }
    }
}

/// Envelopes the hub sends to peers.
///
/// `Data` embeds each topic's cached JSON verbatim, keyed by topic name.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage<'a> {
    #[serde(rename = "subscribe")]
    Subscribe(SubscribePayload),

    #[serde(rename = "data")]
    Data(BTreeMap<&'a str, &'a RawValue>),
}

impl ServerMessage<'_> {
    /// Control message telling an agent to start or stop reporting targets.
    pub fn agent_publishing(enabled: bool) -> Self {
        let topics = if enabled {
            vec![TOPIC_AGENTS.to_string()]
        } else {
            Vec::new()
        };
        ServerMessage::Subscribe(SubscribePayload { topics })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
