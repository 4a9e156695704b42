//! Named, lazily computed, hash-versioned content snapshots.
//!
//! A topic wraps a producer that renders its content as JSON. The last good
//! rendering is cached together with a 64-bit hash; each subscribed session
//! records the hash it was last sent, so a session is only sent content it
//! has not seen.

use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hasher};

use anyhow::Context;
use cnc_protocol::{TOPIC_AGENTS, TOPIC_RULES};
use serde_json::value::RawValue;

use super::agents::AgentRegistry;
use super::session::SessionId;
use crate::rules::RuleStore;

/// State a producer may read while rendering.
pub struct TopicInputs<'a> {
    pub rules: &'a RuleStore,
    pub agents: &'a AgentRegistry,
}

/// Renders a topic's content as JSON bytes.
pub type Producer = Box<dyn Fn(&TopicInputs<'_>) -> anyhow::Result<Vec<u8>> + Send + Sync>;

/// A successfully rendered topic.
#[derive(Debug)]
pub struct Snapshot {
    content: Box<RawValue>,
    hash: u64,
}

impl Snapshot {
    fn new(bytes: Vec<u8>) -> anyhow::Result<Self> {
        let text = String::from_utf8(bytes).context("topic content is not UTF-8")?;
        let content = RawValue::from_string(text).context("topic content is not JSON")?;
        let hash = content_hash(content.get().as_bytes());
        Ok(Self { content, hash })
    }

    pub fn content(&self) -> &RawValue {
        &self.content
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

pub struct Topic {
    name: String,
    producer: Producer,
    snapshot: Option<Snapshot>,
    stale: bool,
    last_error: Option<String>,
    /// Hash last delivered to each subscribed session; `None` until the
    /// first delivery.
    delivered: HashMap<SessionId, Option<u64>>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("hash", &self.hash())
            .field("stale", &self.stale)
            .field("subscribers", &self.delivered.len())
            .finish_non_exhaustive()
    }
}

impl Topic {
    pub fn new<F>(name: impl Into<String>, producer: F) -> Self
    where
        F: Fn(&TopicInputs<'_>) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            producer: Box::new(producer),
            snapshot: None,
            stale: false,
            last_error: None,
            delivered: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the producer and replace the cached snapshot.
    ///
    /// On failure the previous snapshot stays authoritative and the error is
    /// kept for inspection.
    pub fn get(&mut self, inputs: &TopicInputs<'_>) -> anyhow::Result<&Snapshot> {
        let rendered = (self.producer)(inputs).and_then(Snapshot::new);
        match rendered {
            Ok(snapshot) => {
                self.last_error = None;
                Ok(self.snapshot.insert(snapshot))
            }
            Err(err) => {
                let err = err.context(format!("rendering topic {}", self.name));
                self.last_error = Some(format!("{err:#}"));
                Err(err)
            }
        }
    }

    /// Mark the cached content out of date; the next `ensure_fresh` re-renders.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Render if never rendered or invalidated. The stale mark is cleared
    /// whatever the outcome, so a failing producer runs once per change.
    pub fn ensure_fresh(&mut self, inputs: &TopicInputs<'_>) -> anyhow::Result<()> {
        if self.snapshot.is_some() && !self.stale {
            return Ok(());
        }
        self.stale = false;
        self.get(inputs).map(|_| ())
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn hash(&self) -> Option<u64> {
        self.snapshot.as_ref().map(Snapshot::hash)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Add a session with nothing delivered yet. Returns false if the session
    /// was already subscribed; its delivery state is then kept.
    pub fn subscribe(&mut self, session: SessionId) -> bool {
        if self.delivered.contains_key(&session) {
            return false;
        }
        self.delivered.insert(session, None);
        true
    }

    pub fn unsubscribe(&mut self, session: SessionId) -> bool {
        self.delivered.remove(&session).is_some()
    }

    pub fn is_subscribed(&self, session: SessionId) -> bool {
        self.delivered.contains_key(&session)
    }

    pub fn subscribers(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.delivered.keys().copied()
    }

    pub fn subscriber_count(&self) -> usize {
        self.delivered.len()
    }

    /// Content owed to `session`, if its last delivered hash differs from the
    /// cached one. The session is recorded as up to date.
    pub fn take_diff(&mut self, session: SessionId) -> Option<(&str, &RawValue)> {
        let snapshot = self.snapshot.as_ref()?;
        let delivered = self.delivered.get_mut(&session)?;
        if *delivered == Some(snapshot.hash) {
            return None;
        }
        *delivered = Some(snapshot.hash);
        Some((self.name.as_str(), snapshot.content()))
    }

    /// Forget what was delivered to `session` so the next diff resends everything.
    pub fn reset_delivered(&mut self, session: SessionId) {
        if let Some(delivered) = self.delivered.get_mut(&session) {
            *delivered = None;
        }
    }
}

/// Fixed name -> topic mapping built at startup.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: BTreeMap<String, Topic>,
}

impl TopicRegistry {
    pub fn new(topics: impl IntoIterator<Item = Topic>) -> Self {
        Self {
            topics: topics
                .into_iter()
                .map(|topic| (topic.name.clone(), topic))
                .collect(),
        }
    }

    /// The `rules` and `agents` topics.
    pub fn standard() -> Self {
        Self::new([
            Topic::new(TOPIC_RULES, |inputs: &TopicInputs<'_>| {
                inputs.rules.to_json().context("encoding rules")
            }),
            Topic::new(TOPIC_AGENTS, |inputs: &TopicInputs<'_>| {
                inputs.agents.to_json().context("encoding agents")
            }),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&Topic> {
        self.topics.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Topic> {
        self.topics.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.topics.keys().map(String::as_str)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Topic> + '_ {
        self.topics.values_mut()
    }
}
