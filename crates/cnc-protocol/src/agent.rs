//! Collection agent inventory entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::null_as_default;

/// Labels of a single scrape target. Ordered so encoding is deterministic.
pub type LabelSet = BTreeMap<String, String>;

/// The latest target report of one collection agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub targets: Vec<LabelSet>,

    /// Stamped by the hub when the report is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, targets: Vec<LabelSet>) -> Self {
        Self {
            name: name.into(),
            targets,
            last_updated: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_empty_fields_omitted() {
        let encoded = serde_json::to_value(Agent::default()).unwrap();
        assert_eq!(encoded, json!({}));
    }

    #[test]
    fn test_encodes_rfc3339_timestamp() {
        let mut labels = LabelSet::new();
        labels.insert("job".to_string(), "node".to_string());
        labels.insert("instance".to_string(), "10.0.0.1:9100".to_string());

        let mut agent = Agent::new("node1", vec![labels]);
        agent.last_updated = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());

        let encoded = serde_json::to_string(&agent).unwrap();
        assert_eq!(
            encoded,
            r#"{"name":"node1","targets":[{"instance":"10.0.0.1:9100","job":"node"}],"last_updated":"2024-03-01T12:00:00Z"}"#
        );

        let decoded: Agent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, agent);
    }

    #[test]
    fn test_decodes_null_targets() {
        let agent: Agent = serde_json::from_str(r#"{"name":"a","targets":null}"#).unwrap();
        assert_eq!(agent.name, "a");
        assert!(agent.targets.is_empty());
        assert!(agent.last_updated.is_none());
    }
}
