//! Latest target report per collection agent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cnc_protocol::Agent;

/// Agents keyed by name. Entries are replaced wholesale and never removed.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a report, stamped with the current time.
    ///
    /// Returns false when the agent's targets are unchanged; the stored entry
    /// (including its timestamp) is then left alone so identical reports do
    /// not produce new topic content.
    pub fn report(&mut self, agent: Agent) -> bool {
        self.report_at(agent, Utc::now())
    }

    pub fn report_at(&mut self, mut agent: Agent, now: DateTime<Utc>) -> bool {
        if let Some(existing) = self.agents.get(&agent.name)
            && existing.targets == agent.targets
        {
            return false;
        }

        agent.last_updated = Some(now);
        self.agents.insert(agent.name.clone(), agent);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// All agents sorted by name.
    pub fn snapshot(&self) -> Vec<Agent> {
        self.agents.values().cloned().collect()
    }

    /// Encode the sorted snapshot; identical data always encodes identically.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.agents.values().collect::<Vec<_>>())
    }
}
