//! Events consumed by the hub loop.

use cnc_protocol::{Agent, Rule};
use serde::Serialize;
use tokio::sync::oneshot;

use super::session::{SessionId, SessionRegistration};

/// A rule mutation, interpreted by the hub against the rule store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCommand {
    Insert { rule: Rule, after: Option<i64> },
    Delete { id: i64 },
}

#[derive(Debug)]
pub enum HubEvent {
    /// Add a session, or extend an existing one with more topics.
    Register(SessionRegistration),
    Unregister(SessionId),
    AgentReport(Agent),
    RuleMutation(RuleCommand),
    /// Read-only snapshot of hub counters.
    Stats(oneshot::Sender<HubStats>),
}

/// Hub counters reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub sessions: usize,
    pub agent_sessions: usize,
    pub agents: usize,
    pub agents_publishing: bool,
}
