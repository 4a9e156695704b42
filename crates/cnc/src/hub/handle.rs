use cnc_protocol::{Agent, Rule};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::event::{HubEvent, HubStats, RuleCommand};
use super::session::{SessionId, SessionRegistration};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub is not running")]
    Unavailable,
}

/// Cloneable sender side of the hub's event channel.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    pub(crate) fn new(tx: mpsc::Sender<HubEvent>) -> Self {
        Self { tx }
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.tx.send(event).await.map_err(|_| HubError::Unavailable)
    }

    pub async fn register(&self, registration: SessionRegistration) -> Result<(), HubError> {
        self.send(HubEvent::Register(registration)).await
    }

    pub async fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.send(HubEvent::Unregister(id)).await
    }

    pub async fn report_agent(&self, agent: Agent) -> Result<(), HubError> {
        self.send(HubEvent::AgentReport(agent)).await
    }

    pub async fn insert_rule(&self, rule: Rule, after: Option<i64>) -> Result<(), HubError> {
        self.send(HubEvent::RuleMutation(RuleCommand::Insert { rule, after }))
            .await
    }

    pub async fn delete_rule(&self, id: i64) -> Result<(), HubError> {
        self.send(HubEvent::RuleMutation(RuleCommand::Delete { id }))
            .await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Stats(reply)).await?;
        rx.await.map_err(|_| HubError::Unavailable)
    }
}
