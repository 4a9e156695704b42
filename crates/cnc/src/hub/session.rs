//! Session identity and the hub's per-session bookkeeping.

use std::collections::BTreeSet;
use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Queue of pre-serialized messages drained by a connection's writer task.
pub type Outbound = mpsc::Sender<String>;

/// Opaque handle identifying one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who is on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Browser UI: may edit rules and watch topics.
    Ui,
    /// Collection agent: reports targets, never edits rules.
    Agent,
}

impl Role {
    /// Role implied by the WebSocket path; only `.../grafana-agent` is an agent.
    pub fn from_path(path: &str) -> Self {
        match path.trim_end_matches('/').rsplit('/').next() {
            Some("grafana-agent") => Self::Agent,
            _ => Self::Ui,
        }
    }

    pub fn is_agent(self) -> bool {
        self == Self::Agent
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the hub needs to (re-)register a session.
#[derive(Debug, Clone)]
pub struct SessionRegistration {
    pub id: SessionId,
    pub role: Role,
    pub topics: Vec<String>,
    pub outbound: Outbound,
}

/// Hub-side state of a registered session.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub role: Role,
    pub outbound: Outbound,
    /// Topics the session holds in the registry.
    pub topics: BTreeSet<String>,
    /// Publishing state last sent to an agent session; `None` for UI sessions.
    pub agent_ack: Option<bool>,
}

impl SessionState {
    pub fn new(role: Role, outbound: Outbound) -> Self {
        Self {
            role,
            outbound,
            topics: BTreeSet::new(),
            agent_ack: role.is_agent().then_some(false),
        }
    }
}
