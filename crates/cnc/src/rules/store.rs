use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cnc_protocol::Rule;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuleStoreError {
    #[error("no rule ids left to assign")]
    IdsExhausted,
}

#[derive(Debug, Default)]
struct RuleList {
    rules: Vec<Rule>,
    /// Next id to hand out. Lazily set to `max(existing ids) + 1` on the
    /// first insert, then only ever incremented.
    next_id: Option<i64>,
}

impl RuleList {
    /// The counter must stay representable, so `i64::MAX` is never handed out.
    fn allocate_id(&mut self) -> Result<i64, RuleStoreError> {
        let id = match self.next_id {
            Some(id) => id,
            None => self
                .rules
                .iter()
                .map(|r| r.id)
                .max()
                .unwrap_or(0)
                .max(0)
                .checked_add(1)
                .ok_or(RuleStoreError::IdsExhausted)?,
        };
        let next = id.checked_add(1).ok_or(RuleStoreError::IdsExhausted)?;
        self.next_id = Some(next);
        Ok(id)
    }
}

/// Thread-safe ordered rule list with positional insert/delete.
///
/// Reads take shared access; inserts and deletes take exclusive access.
#[derive(Debug, Default)]
pub struct RuleStore {
    inner: RwLock<RuleList>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with rules, keeping their ids.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            inner: RwLock::new(RuleList {
                rules,
                next_id: None,
            }),
        }
    }

    // A panic while holding the lock cannot leave the Vec half-updated, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, RuleList> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RuleList> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the rules in evaluation order.
    pub fn list(&self) -> Vec<Rule> {
        self.read().rules.clone()
    }

    pub fn len(&self) -> usize {
        self.read().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().rules.is_empty()
    }

    /// Insert a rule and return it with its assigned id.
    ///
    /// With `after` naming an existing rule at position `i` the new rule lands
    /// at `i + 1`. Without `after`, or when `after` matches nothing, it lands
    /// at the head of the list.
    ///
    /// Fails without touching the list once the id space is used up.
    pub fn insert(&self, rule: Rule, after: Option<i64>) -> Result<Rule, RuleStoreError> {
        let mut list = self.write();

        let pos = after
            .and_then(|after| list.rules.iter().position(|r| r.id == after))
            .map_or(0, |i| i + 1);

        let rule = Rule {
            id: list.allocate_id()?,
            ..rule
        };
        list.rules.insert(pos, rule.clone());
        Ok(rule)
    }

    /// Remove the rule with `id`. Returns false when no such rule exists.
    pub fn delete(&self, id: i64) -> bool {
        let mut list = self.write();
        match list.rules.iter().position(|r| r.id == id) {
            Some(pos) => {
                list.rules.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Encode the current list as a JSON array under a single read lock.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.read().rules)
    }
}
