//! The broadcast coordinator.
//!
//! A single task owns the topic registry, the agent registry and all session
//! bookkeeping, and processes one [`HubEvent`] at a time. Connection tasks
//! talk to it through a [`HubHandle`]; the hub talks back by pushing
//! pre-serialized messages onto each session's outbound queue.
//!
//! ```text
//!  reader tasks ──HubEvent──▶ Hub loop ──String──▶ outbound queues ──▶ writer tasks
//!                              │   ▲
//!                              ▼   │
//!                           RuleStore ◀── GET / (read lock, bypasses the hub)
//! ```

mod agents;
mod event;
mod handle;
mod session;
mod topic;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use cnc_protocol::{Agent, ServerMessage, TOPIC_AGENTS, TOPIC_RULES};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::rules::RuleStore;

pub use agents::AgentRegistry;
pub use event::{HubEvent, HubStats, RuleCommand};
pub use handle::{HubError, HubHandle};
pub use session::{Outbound, Role, SessionId, SessionRegistration};
pub use topic::{Producer, Snapshot, Topic, TopicInputs, TopicRegistry};

use session::SessionState;

/// What the hub does when a session's outbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Wait for room. A stalled peer stalls the whole hub.
    #[default]
    Block,
    /// Drop the message and resend full content on the session's next update.
    DropAndResync,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HubOptions {
    pub delivery: DeliveryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Dropped,
    Closed,
}

pub struct Hub {
    rules: Arc<RuleStore>,
    agents: AgentRegistry,
    topics: TopicRegistry,
    sessions: HashMap<SessionId, SessionState>,
    /// Whether agents are currently asked to publish their targets.
    agents_publishing: bool,
    /// Sessions that had a message dropped and are owed a retry.
    pending_resync: BTreeSet<SessionId>,
    options: HubOptions,
    span: Span,
}

impl Hub {
    pub fn new(
        rules: Arc<RuleStore>,
        topics: TopicRegistry,
        options: HubOptions,
        span: Span,
    ) -> Self {
        Self {
            rules,
            agents: AgentRegistry::new(),
            topics,
            sessions: HashMap::new(),
            agents_publishing: false,
            pending_resync: BTreeSet::new(),
            options,
            span,
        }
    }

    /// Spawn the event loop. It stops when `cancel` fires or every handle is dropped.
    pub fn start(
        self,
        event_buffer: usize,
        cancel: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(event_buffer);
        let span = self.span.clone();
        let task = tokio::spawn(self.run(rx, cancel).instrument(span));
        (HubHandle::new(tx), task)
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>, cancel: CancellationToken) {
        info!("hub started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        info!(sessions = self.sessions.len(), "hub stopped");
    }

    /// Process a single event to completion.
    ///
    /// Sessions left behind by a dropped message are retried first, whatever
    /// the event is.
    pub async fn handle(&mut self, event: HubEvent) {
        self.retry_pending().await;
        match event {
            HubEvent::Register(registration) => self.register(registration).await,
            HubEvent::Unregister(id) => self.unregister(id).await,
            HubEvent::AgentReport(agent) => self.agent_report(agent).await,
            HubEvent::RuleMutation(command) => self.rule_mutation(command).await,
            HubEvent::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.sessions.len(),
            agent_sessions: self
                .sessions
                .values()
                .filter(|s| s.role.is_agent())
                .count(),
            agents: self.agents.len(),
            agents_publishing: self.agents_publishing,
        }
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    async fn register(&mut self, registration: SessionRegistration) {
        let SessionRegistration {
            id,
            role,
            topics,
            outbound,
        } = registration;

        let state = self
            .sessions
            .entry(id)
            .or_insert_with(|| SessionState::new(role, outbound.clone()));
        state.outbound = outbound;

        for name in topics {
            match self.topics.get_mut(&name) {
                Some(topic) => {
                    topic.subscribe(id);
                    state.topics.insert(name);
                }
                None => debug!(session = %id, topic = %name, "ignoring unknown topic"),
            }
        }
        debug!(session = %id, %role, topics = ?state.topics, "session registered");

        self.refresh_agents_publishing().await;
        self.update_session(id).await;
    }

    async fn unregister(&mut self, id: SessionId) {
        self.pending_resync.remove(&id);
        if let Some(state) = self.sessions.remove(&id) {
            for name in &state.topics {
                if let Some(topic) = self.topics.get_mut(name) {
                    topic.unsubscribe(id);
                }
            }
            debug!(session = %id, topics = ?state.topics, "session unregistered");
        }
        self.refresh_agents_publishing().await;
    }

    async fn agent_report(&mut self, agent: Agent) {
        let name = agent.name.clone();
        let targets = agent.targets.len();
        if !self.agents.report(agent) {
            debug!(agent = %name, targets, "agent targets unchanged");
            return;
        }
        debug!(agent = %name, targets, "agent targets updated");

        self.invalidate_and_update(TOPIC_AGENTS).await;
    }

    async fn rule_mutation(&mut self, command: RuleCommand) {
        match command {
            RuleCommand::Insert { rule, after } => {
                let rule = match self.rules.insert(rule, after) {
                    Ok(rule) => rule,
                    Err(err) => {
                        warn!(?after, error = %err, "rule insert rejected");
                        return;
                    }
                };
                info!(id = rule.id, ?after, action = %rule.action, "rule inserted");
            }
            RuleCommand::Delete { id } => {
                if self.rules.delete(id) {
                    info!(id, "rule deleted");
                } else {
                    debug!(id, "rule to delete not found");
                }
            }
        }

        self.invalidate_and_update(TOPIC_RULES).await;
    }

    async fn invalidate_and_update(&mut self, name: &str) {
        let Some(topic) = self.topics.get_mut(name) else {
            return;
        };
        topic.invalidate();
        let subscribers: Vec<SessionId> = topic.subscribers().collect();
        for id in subscribers {
            self.update_session(id).await;
        }
    }

    /// Agents should publish while at least one UI session watches `agents`.
    fn agents_publishing_requested(&self) -> bool {
        self.topics.get(TOPIC_AGENTS).is_some_and(|topic| {
            topic.subscribers().any(|id| {
                self.sessions
                    .get(&id)
                    .is_some_and(|session| !session.role.is_agent())
            })
        })
    }

    async fn refresh_agents_publishing(&mut self) {
        let requested = self.agents_publishing_requested();
        if requested == self.agents_publishing {
            return;
        }
        if requested {
            info!("agent publishing enabled");
        } else {
            info!("agent publishing disabled");
        }
        self.agents_publishing = requested;

        let agent_sessions: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.agent_ack.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in agent_sessions {
            self.update_session(id).await;
        }
    }

    async fn retry_pending(&mut self) {
        if self.pending_resync.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_resync);
        for id in pending {
            debug!(session = %id, "retrying dropped update");
            self.update_session(id).await;
        }
    }

    /// Send `id` every topic diff it is owed, then fix up its publishing state.
    ///
    /// A dropped message puts `id` on the retry list.
    async fn update_session(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let outbound = session.outbound.clone();
        let agent_ack = session.agent_ack;

        if let Some(message) = self.collect_diffs(id)
            && self.deliver(id, &outbound, message).await == Delivery::Dropped
        {
            warn!(session = %id, "outbound queue full, dropped update; will resync");
            for topic in self.topics.iter_mut() {
                topic.reset_delivered(id);
            }
            self.pending_resync.insert(id);
        }

        let Some(acked) = agent_ack else {
            return;
        };
        if acked == self.agents_publishing {
            return;
        }
        let message = match ServerMessage::agent_publishing(self.agents_publishing).to_json() {
            Ok(message) => message,
            Err(err) => {
                error!(session = %id, error = %err, "encoding publishing request");
                return;
            }
        };
        debug!(session = %id, enabled = self.agents_publishing, "requesting agent publishing");
        if self.deliver(id, &outbound, message).await == Delivery::Dropped {
            warn!(session = %id, "outbound queue full, publishing request deferred");
            self.pending_resync.insert(id);
            return;
        }
        if let Some(session) = self.sessions.get_mut(&id) {
            session.agent_ack = Some(self.agents_publishing);
        }
    }

    /// Build one data message holding every topic whose content `id` has not seen.
    fn collect_diffs(&mut self, id: SessionId) -> Option<String> {
        let inputs = TopicInputs {
            rules: &self.rules,
            agents: &self.agents,
        };

        let mut payload = BTreeMap::new();
        for topic in self.topics.iter_mut() {
            if !topic.is_subscribed(id) {
                continue;
            }
            if let Err(err) = topic.ensure_fresh(&inputs) {
                warn!(topic = topic.name(), error = %format!("{err:#}"), "topic refresh failed");
            }
            if let Some((name, content)) = topic.take_diff(id) {
                payload.insert(name, content);
            }
        }

        if payload.is_empty() {
            return None;
        }
        let topics: Vec<&str> = payload.keys().copied().collect();
        match ServerMessage::Data(payload).to_json() {
            Ok(message) => {
                debug!(session = %id, ?topics, "sending topic update");
                Some(message)
            }
            Err(err) => {
                error!(session = %id, error = %err, "encoding topic update");
                None
            }
        }
    }

    async fn deliver(&self, id: SessionId, outbound: &Outbound, message: String) -> Delivery {
        let delivery = match self.options.delivery {
            DeliveryPolicy::Block => match outbound.send(message).await {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Closed,
            },
            DeliveryPolicy::DropAndResync => match outbound.try_send(message) {
                Ok(()) => Delivery::Sent,
                Err(TrySendError::Full(_)) => Delivery::Dropped,
                Err(TrySendError::Closed(_)) => Delivery::Closed,
            },
        };
        if delivery == Delivery::Closed {
            debug!(session = %id, "outbound queue closed");
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cnc_protocol::{Action, ClientMessage, LabelSet, Matcher, Rule};

    use super::*;

    struct TestSession {
        id: SessionId,
        role: Role,
        tx: Outbound,
        rx: mpsc::Receiver<String>,
    }

    impl TestSession {
        fn new(role: Role) -> Self {
            Self::with_capacity(role, 64)
        }

        fn with_capacity(role: Role, capacity: usize) -> Self {
            let (tx, rx) = mpsc::channel(capacity);
            Self {
                id: SessionId::new(),
                role,
                tx,
                rx,
            }
        }

        fn registration(&self, topics: &[&str]) -> HubEvent {
            HubEvent::Register(SessionRegistration {
                id: self.id,
                role: self.role,
                topics: topics.iter().map(|t| t.to_string()).collect(),
                outbound: self.tx.clone(),
            })
        }

        fn drain(&mut self) -> Vec<ClientMessage> {
            let mut messages = Vec::new();
            while let Ok(text) = self.rx.try_recv() {
                messages.push(ClientMessage::from_json(&text).unwrap());
            }
            messages
        }
    }

    fn hub() -> Hub {
        hub_with(Arc::new(RuleStore::new()), DeliveryPolicy::Block)
    }

    fn hub_with(rules: Arc<RuleStore>, delivery: DeliveryPolicy) -> Hub {
        Hub::new(
            rules,
            TopicRegistry::standard(),
            HubOptions { delivery },
            Span::none(),
        )
    }

    fn data(messages: &[ClientMessage]) -> Vec<&cnc_protocol::DataPayload> {
        messages
            .iter()
            .filter_map(|m| match m {
                ClientMessage::Data(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    fn publishing(messages: &[ClientMessage]) -> Vec<bool> {
        messages
            .iter()
            .filter_map(|m| match m {
                ClientMessage::Subscribe(payload) => Some(!payload.topics.is_empty()),
                _ => None,
            })
            .collect()
    }

    fn report(name: &str, job: &str) -> HubEvent {
        HubEvent::AgentReport(Agent::new(
            name,
            vec![LabelSet::from([("job".to_string(), job.to_string())])],
        ))
    }

    fn insert(action: Action, after: Option<i64>) -> HubEvent {
        HubEvent::RuleMutation(RuleCommand::Insert {
            rule: Rule::new(vec![Matcher::equal("namespace", "dev")], action),
            after,
        })
    }

    #[tokio::test]
    async fn test_empty_subscription_sends_nothing() {
        let mut hub = hub();
        let mut ui = TestSession::new(Role::Ui);
        hub.handle(ui.registration(&[])).await;
        assert!(ui.drain().is_empty());
    }

    #[tokio::test]
    async fn test_register_sends_full_content() {
        let rules = Arc::new(RuleStore::with_rules(vec![
            Rule::new(vec![], Action::Keep).with_id(7),
        ]));
        let mut hub = hub_with(rules, DeliveryPolicy::Block);
        let mut ui = TestSession::new(Role::Ui);

        hub.handle(ui.registration(&[TOPIC_RULES, "bogus"])).await;
        let messages = ui.drain();
        let data = data(&messages);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].rules.len(), 1);
        assert_eq!(data[0].rules[0].id, 7);

        // Subscribing again to the same topic resends nothing.
        hub.handle(ui.registration(&[TOPIC_RULES])).await;
        assert!(ui.drain().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_topics_in_one_message() {
        let mut hub = hub();
        let mut ui = TestSession::new(Role::Ui);
        hub.handle(report("node1", "a")).await;
        hub.handle(ui.registration(&[TOPIC_RULES, TOPIC_AGENTS])).await;

        let messages = ui.drain();
        let data = data(&messages);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].agents.len(), 1);
    }

    #[tokio::test]
    async fn test_rule_mutation_updates_subscribers_only() {
        let mut hub = hub();
        let mut watcher = TestSession::new(Role::Ui);
        let mut bystander = TestSession::new(Role::Ui);
        hub.handle(watcher.registration(&[TOPIC_RULES])).await;
        hub.handle(bystander.registration(&[TOPIC_AGENTS])).await;
        watcher.drain();
        bystander.drain();

        hub.handle(insert(Action::Drop, None)).await;
        let messages = watcher.drain();
        let data = data(&messages);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].rules.len(), 1);
        assert_eq!(data[0].rules[0].action, Action::Drop);
        assert!(bystander.drain().is_empty());
    }

    #[tokio::test]
    async fn test_rule_ordering_through_hub() {
        let rules = Arc::new(RuleStore::new());
        let mut hub = hub_with(rules.clone(), DeliveryPolicy::Block);

        hub.handle(insert(Action::Keep, None)).await;
        let a = rules.list()[0].id;
        hub.handle(insert(Action::Drop, Some(a))).await;
        let b = rules.list()[1].id;
        assert_eq!(rules.list().iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);

        hub.handle(HubEvent::RuleMutation(RuleCommand::Delete { id: a }))
            .await;
        assert_eq!(rules.list().iter().map(|r| r.id).collect::<Vec<_>>(), vec![b]);

        hub.handle(insert(Action::Keep, None)).await;
        assert!(rules.list().iter().all(|r| r.id != a));
    }

    #[tokio::test]
    async fn test_delete_missing_rule_sends_nothing() {
        let mut hub = hub();
        let mut ui = TestSession::new(Role::Ui);
        hub.handle(ui.registration(&[TOPIC_RULES])).await;
        ui.drain();

        hub.handle(HubEvent::RuleMutation(RuleCommand::Delete { id: 99 }))
            .await;
        assert!(ui.drain().is_empty());
    }

    #[tokio::test]
    async fn test_agent_report_diffed_once() {
        let mut hub = hub();
        let mut first = TestSession::new(Role::Ui);
        let mut second = TestSession::new(Role::Ui);
        hub.handle(first.registration(&[TOPIC_AGENTS])).await;
        hub.handle(second.registration(&[TOPIC_AGENTS])).await;
        first.drain();
        second.drain();

        hub.handle(report("node1", "a")).await;
        for session in [&mut first, &mut second] {
            let messages = session.drain();
            let data = data(&messages);
            assert_eq!(data.len(), 1);
            assert_eq!(data[0].agents[0].name, "node1");
            assert!(data[0].agents[0].last_updated.is_some());
        }

        hub.handle(report("node1", "a")).await;
        assert!(first.drain().is_empty());
        assert!(second.drain().is_empty());

        hub.handle(report("node1", "b")).await;
        assert_eq!(data(&first.drain()).len(), 1);
    }

    #[tokio::test]
    async fn test_agent_publishing_toggles_once_per_transition() {
        let mut hub = hub();
        let mut agent_a = TestSession::new(Role::Agent);
        let mut agent_b = TestSession::new(Role::Agent);
        hub.handle(agent_a.registration(&[])).await;
        hub.handle(agent_b.registration(&[])).await;
        assert!(agent_a.drain().is_empty());

        let mut ui_1 = TestSession::new(Role::Ui);
        let mut ui_2 = TestSession::new(Role::Ui);
        hub.handle(ui_1.registration(&[TOPIC_AGENTS])).await;
        assert!(hub.stats().agents_publishing);
        assert_eq!(publishing(&agent_a.drain()), vec![true]);
        assert_eq!(publishing(&agent_b.drain()), vec![true]);

        hub.handle(ui_2.registration(&[TOPIC_AGENTS])).await;
        assert!(agent_a.drain().is_empty());

        hub.handle(HubEvent::Unregister(ui_1.id)).await;
        assert!(agent_a.drain().is_empty());

        hub.handle(HubEvent::Unregister(ui_2.id)).await;
        assert!(!hub.stats().agents_publishing);
        assert_eq!(publishing(&agent_a.drain()), vec![false]);
        assert_eq!(publishing(&agent_b.drain()), vec![false]);

        ui_1.drain();
        ui_2.drain();
    }

    #[tokio::test]
    async fn test_late_agent_told_to_publish() {
        let mut hub = hub();
        let mut ui = TestSession::new(Role::Ui);
        hub.handle(ui.registration(&[TOPIC_AGENTS])).await;

        let mut agent = TestSession::new(Role::Agent);
        hub.handle(agent.registration(&[])).await;
        assert_eq!(publishing(&agent.drain()), vec![true]);

        // Re-registering keeps the ack, so no duplicate request.
        hub.handle(agent.registration(&[])).await;
        assert!(agent.drain().is_empty());
    }

    #[tokio::test]
    async fn test_agent_subscriber_does_not_request_publishing() {
        let mut hub = hub();
        let mut agent = TestSession::new(Role::Agent);
        hub.handle(agent.registration(&[TOPIC_AGENTS])).await;
        assert!(!hub.stats().agents_publishing);
        assert!(publishing(&agent.drain()).is_empty());
    }

    #[tokio::test]
    async fn test_unregister_removes_session_everywhere() {
        let mut hub = hub();
        let mut ui = TestSession::new(Role::Ui);
        hub.handle(ui.registration(&[TOPIC_RULES, TOPIC_AGENTS])).await;
        ui.drain();

        hub.handle(HubEvent::Unregister(ui.id)).await;
        assert_eq!(hub.stats().sessions, 0);
        assert_eq!(hub.topics().get(TOPIC_RULES).unwrap().subscriber_count(), 0);
        assert_eq!(hub.topics().get(TOPIC_AGENTS).unwrap().subscriber_count(), 0);

        hub.handle(insert(Action::Keep, None)).await;
        assert!(ui.drain().is_empty());
    }

    #[tokio::test]
    async fn test_failing_topic_omitted_from_diff() {
        let rules = Arc::new(RuleStore::new());
        let topics = TopicRegistry::new([
            Topic::new(TOPIC_RULES, |i: &TopicInputs<'_>| Ok(i.rules.to_json()?)),
            Topic::new("broken", |_: &TopicInputs<'_>| anyhow::bail!("no data")),
        ]);
        let mut hub = Hub::new(rules, topics, HubOptions::default(), Span::none());
        let mut ui = TestSession::new(Role::Ui);

        hub.handle(ui.registration(&[TOPIC_RULES, "broken"])).await;
        let messages = ui.drain();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            hub.topics().get("broken").unwrap().last_error(),
            Some("rendering topic broken: no data")
        );
    }

    #[tokio::test]
    async fn test_closed_queue_does_not_stall_hub() {
        let mut hub = hub();
        let gone = TestSession::new(Role::Ui);
        let registration = gone.registration(&[TOPIC_RULES]);
        drop(gone);

        let mut ui = TestSession::new(Role::Ui);
        hub.handle(registration).await;
        hub.handle(ui.registration(&[TOPIC_RULES])).await;
        assert_eq!(data(&ui.drain()).len(), 1);
    }

    #[tokio::test]
    async fn test_drop_and_resync_on_full_queue() {
        let mut hub = hub_with(Arc::new(RuleStore::new()), DeliveryPolicy::DropAndResync);
        let mut slow = TestSession::with_capacity(Role::Ui, 1);

        hub.handle(slow.registration(&[TOPIC_RULES])).await;
        // Queue now full: this update is dropped.
        hub.handle(insert(Action::Keep, None)).await;

        let messages = slow.drain();
        assert_eq!(data(&messages).len(), 1);
        assert_eq!(data(&messages)[0].rules.len(), 0);

        // Any later event resends the full current list, even one that does
        // not touch the session's topics.
        hub.handle(report("node1", "a")).await;
        let messages = slow.drain();
        assert_eq!(data(&messages).len(), 1);
        assert_eq!(data(&messages)[0].rules.len(), 1);

        hub.handle(insert(Action::Drop, None)).await;
        let messages = slow.drain();
        assert_eq!(data(&messages).len(), 1);
        assert_eq!(data(&messages)[0].rules.len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_stop_request_retried_on_next_event() {
        let mut hub = hub_with(Arc::new(RuleStore::new()), DeliveryPolicy::DropAndResync);
        let mut agent = TestSession::with_capacity(Role::Agent, 1);
        hub.handle(agent.registration(&[])).await;

        let mut ui = TestSession::new(Role::Ui);
        hub.handle(ui.registration(&[TOPIC_AGENTS])).await;
        // The start request fills the agent's queue, so the stop is dropped.
        hub.handle(HubEvent::Unregister(ui.id)).await;
        assert!(!hub.stats().agents_publishing);
        assert_eq!(publishing(&agent.drain()), vec![true]);

        hub.handle(insert(Action::Keep, None)).await;
        let messages = agent.drain();
        assert_eq!(publishing(&messages), vec![false]);
        assert!(matches!(
            &messages[..],
            [ClientMessage::Subscribe(payload)] if payload.topics.is_empty()
        ));

        // Delivered once; later events do not repeat it.
        hub.handle(report("node1", "a")).await;
        assert!(agent.drain().is_empty());
        ui.drain();
    }

    #[tokio::test]
    async fn test_unregister_clears_pending_retry() {
        let mut hub = hub_with(Arc::new(RuleStore::new()), DeliveryPolicy::DropAndResync);
        let mut slow = TestSession::with_capacity(Role::Ui, 1);
        hub.handle(slow.registration(&[TOPIC_RULES])).await;
        hub.handle(insert(Action::Keep, None)).await;
        slow.drain();

        hub.handle(HubEvent::Unregister(slow.id)).await;
        hub.handle(report("node1", "a")).await;
        assert!(slow.drain().is_empty());
        assert_eq!(hub.stats().sessions, 0);
    }

    #[tokio::test]
    async fn test_insert_rejected_when_ids_exhausted() {
        let rules = Arc::new(RuleStore::with_rules(vec![
            Rule::new(vec![], Action::Keep).with_id(i64::MAX),
        ]));
        let mut hub = hub_with(rules.clone(), DeliveryPolicy::Block);
        let mut ui = TestSession::new(Role::Ui);
        hub.handle(ui.registration(&[TOPIC_RULES])).await;
        ui.drain();

        hub.handle(insert(Action::Drop, None)).await;
        assert!(ui.drain().is_empty());
        assert_eq!(rules.len(), 1);

        // The hub keeps serving other mutations.
        hub.handle(HubEvent::RuleMutation(RuleCommand::Delete { id: i64::MAX }))
            .await;
        let messages = ui.drain();
        assert_eq!(data(&messages).len(), 1);
        assert!(data(&messages)[0].rules.is_empty());
    }

    #[tokio::test]
    async fn test_run_processes_events_until_cancelled() {
        let hub = hub();
        let cancel = CancellationToken::new();
        let (handle, task) = hub.start(8, cancel.clone());

        let mut ui = TestSession::new(Role::Ui);
        handle
            .register(SessionRegistration {
                id: ui.id,
                role: Role::Ui,
                topics: vec![TOPIC_RULES.to_string()],
                outbound: ui.tx.clone(),
            })
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), ui.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(first.starts_with(r#"{"type":"data""#));

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.agent_sessions, 0);

        cancel.cancel();
        task.await.unwrap();
        assert!(matches!(handle.stats().await, Err(HubError::Unavailable)));
    }
}
