//! AgentRegistry: register/heartbeat/list/unregister with collision
//! resolution over the store's `agents` hash.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use crate::errors::CoordinatorError;
use crate::models::{Agent, AgentView};
use crate::store::Store;

const MAX_SUFFIX: u32 = 99;
/// How long an offline agent with an empty inbox is kept around before the
/// scavenger reclaims its slot. Independent of heartbeat_ttl: heartbeat_ttl
/// governs online/offline status, this governs record deletion.
pub const STALE_AGENT_GRACE: StdDuration = StdDuration::from_secs(24 * 3600);

const HASH: &str = "agents";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    Reconnected,
    TookOver,
    Suffixed,
}

pub struct AgentRegistry {
    store: Arc<Store>,
    heartbeat_ttl: Duration,
}

impl AgentRegistry {
    pub fn new(store: Arc<Store>, heartbeat_ttl: StdDuration) -> Self {
        AgentRegistry {
            store,
            heartbeat_ttl: Duration::from_std(heartbeat_ttl).unwrap_or(Duration::seconds(300)),
        }
    }

    pub fn get(&self, agent_id: &str) -> Result<Option<Agent>, CoordinatorError> {
        match self.store.hash_get(HASH, agent_id)? {
            Some(v) => Ok(serde_json::from_value(v).ok()),
            None => Ok(None),
        }
    }

    fn put(&self, agent: &Agent) -> Result<(), CoordinatorError> {
        let v = serde_json::to_value(agent)?;
        self.store.hash_set(HASH, &agent.id, &v)
    }

    fn is_offline(&self, agent: &Agent, now: DateTime<Utc>) -> bool {
        now - agent.last_seen > self.heartbeat_ttl
    }

    /// Register `requested_id`, resolving collisions per the state machine:
    /// absent -> create; present + matching session -> reconnect;
    /// present + different session + offline -> take over;
    /// present + different session + online -> probe `-2`.."-99" for a free slot.
    pub fn register(
        &self,
        requested_id: &str,
        session_id: Option<String>,
    ) -> Result<(String, RegisterOutcome), CoordinatorError> {
        if !requested_id.contains('/') {
            return Err(CoordinatorError::InvalidRequest(
                "agent id must be of the form machine/project".to_string(),
            ));
        }
        let now = Utc::now();

        if let Some(existing) = self.get(requested_id)? {
            let session_matches = match (&existing.session_id, &session_id) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            if session_matches {
                let mut updated = existing;
                updated.last_seen = now;
                self.put(&updated)?;
                return Ok((requested_id.to_string(), RegisterOutcome::Reconnected));
            }
            if self.is_offline(&existing, now) {
                let agent = Agent {
                    id: requested_id.to_string(),
                    session_id,
                    display_name: existing.display_name,
                    description: existing.description,
                    capabilities: existing.capabilities,
                    registered_at: existing.registered_at,
                    last_seen: now,
                };
                self.put(&agent)?;
                return Ok((requested_id.to_string(), RegisterOutcome::TookOver));
            }
            // live collision: probe suffixes for a genuinely free slot
            for n in 2..=MAX_SUFFIX {
                let candidate = format!("{requested_id}-{n}");
                if self.get(&candidate)?.is_none() {
                    let agent = Agent {
                        id: candidate.clone(),
                        session_id,
                        display_name: None,
                        description: None,
                        capabilities: Vec::new(),
                        registered_at: now,
                        last_seen: now,
                    };
                    self.put(&agent)?;
                    return Ok((candidate, RegisterOutcome::Suffixed));
                }
            }
            return Err(CoordinatorError::RegistrationExhausted);
        }

        let agent = Agent {
            id: requested_id.to_string(),
            session_id,
            display_name: None,
            description: None,
            capabilities: Vec::new(),
            registered_at: now,
            last_seen: now,
        };
        self.put(&agent)?;
        Ok((requested_id.to_string(), RegisterOutcome::Created))
    }

    /// Register-or-heartbeat: used by the identity middleware, which doesn't
    /// care about collision outcomes, only that the canonical id ends up
    /// present and fresh.
    pub fn ensure_registered(&self, agent_id: &str, session_id: Option<String>) -> Result<String, CoordinatorError> {
        if self.get(agent_id)?.is_some() {
            self.heartbeat(agent_id)?;
            Ok(agent_id.to_string())
        } else {
            let (canonical, _) = self.register(agent_id, session_id)?;
            Ok(canonical)
        }
    }

    pub fn heartbeat(&self, agent_id: &str) -> Result<(), CoordinatorError> {
        if let Some(mut agent) = self.get(agent_id)? {
            agent.last_seen = Utc::now();
            self.put(&agent)?;
            Ok(())
        } else {
            Err(CoordinatorError::AgentNotFound(agent_id.to_string()))
        }
    }

    pub fn set_description(&self, agent_id: &str, description: String) -> Result<Agent, CoordinatorError> {
        let mut agent = self
            .get(agent_id)?
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.to_string()))?;
        agent.description = Some(description);
        self.put(&agent)?;
        Ok(agent)
    }

    pub fn update_profile(
        &self,
        agent_id: &str,
        display_name: Option<String>,
        capabilities: Option<Vec<String>>,
        description: Option<String>,
    ) -> Result<Agent, CoordinatorError> {
        let mut agent = self
            .get(agent_id)?
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.to_string()))?;
        if let Some(name) = display_name {
            agent.display_name = Some(name);
        }
        if let Some(caps) = capabilities {
            agent.capabilities = caps;
        }
        if let Some(desc) = description {
            agent.description = Some(desc);
        }
        self.put(&agent)?;
        Ok(agent)
    }

    pub fn list(&self) -> Result<Vec<AgentView>, CoordinatorError> {
        let now = Utc::now();
        let mut out: Vec<AgentView> = self
            .store
            .hash_all(HASH)?
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value::<Agent>(v).ok())
            .map(|a| AgentView::from_agent(&a, self.heartbeat_ttl, now))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Unregister behaviors: `keep_if_pending` always retains the record
    /// offline; otherwise an empty inbox means outright deletion, a
    /// non-empty inbox means retain-offline so pending messages survive.
    pub fn unregister(&self, agent_id: &str, keep_if_pending: bool) -> Result<&'static str, CoordinatorError> {
        let mut agent = self
            .get(agent_id)?
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.to_string()))?;
        let inbox_key = format!("inbox:{agent_id}");
        let inbox_len = self.store.list_len(&inbox_key)?;

        if !keep_if_pending && inbox_len == 0 {
            self.store.hash_del(HASH, agent_id)?;
            self.store.list_delete(&inbox_key)?;
            self.store.list_delete(&format!("notify:{agent_id}"))?;
            return Ok("deleted");
        }

        agent.last_seen = Utc::now() - self.heartbeat_ttl - Duration::seconds(1);
        self.put(&agent)?;
        Ok("kept_offline")
    }

    /// Scavenger pass: delete agent records that are offline, have an empty
    /// inbox, and have been untouched for longer than `STALE_AGENT_GRACE`.
    pub fn scavenge_stale(&self) -> Result<usize, CoordinatorError> {
        let now = Utc::now();
        let grace = Duration::from_std(STALE_AGENT_GRACE).unwrap_or(Duration::seconds(86400));
        let mut pruned = 0usize;
        for (id, v) in self.store.hash_all(HASH)? {
            let Some(agent) = serde_json::from_value::<Agent>(v).ok() else { continue };
            if now - agent.last_seen <= grace {
                continue;
            }
            let inbox_key = format!("inbox:{id}");
            if self.store.list_len(&inbox_key)? == 0 {
                self.store.hash_del(HASH, &id)?;
                self.store.list_delete(&inbox_key)?;
                self.store.list_delete(&format!("notify:{id}"))?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        self.heartbeat_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::thread::sleep;

    fn registry(ttl: StdDuration) -> AgentRegistry {
        let store = Arc::new(Store::new(":memory:"));
        AgentRegistry::new(store, ttl)
    }

    #[test]
    fn fresh_id_is_created() {
        let reg = registry(StdDuration::from_secs(300));
        let (id, outcome) = reg.register("laptop/demo", Some("s1".into())).unwrap();
        assert_eq!(id, "laptop/demo");
        assert_eq!(outcome, RegisterOutcome::Created);
    }

    #[test]
    fn matching_session_reconnects() {
        let reg = registry(StdDuration::from_secs(300));
        reg.register("laptop/demo", Some("s1".into())).unwrap();
        let (id, outcome) = reg.register("laptop/demo", Some("s1".into())).unwrap();
        assert_eq!(id, "laptop/demo");
        assert_eq!(outcome, RegisterOutcome::Reconnected);
    }

    #[test]
    fn live_collision_probes_suffix() {
        let reg = registry(StdDuration::from_secs(300));
        reg.register("laptop/demo", Some("s1".into())).unwrap();
        let (id, outcome) = reg.register("laptop/demo", Some("s2".into())).unwrap();
        assert_eq!(id, "laptop/demo-2");
        assert_eq!(outcome, RegisterOutcome::Suffixed);
    }

    #[test]
    fn offline_collision_is_taken_over() {
        let reg = registry(StdDuration::from_millis(1));
        reg.register("laptop/demo", Some("s1".into())).unwrap();
        sleep(StdDuration::from_millis(20));
        let (id, outcome) = reg.register("laptop/demo", Some("s2".into())).unwrap();
        assert_eq!(id, "laptop/demo");
        assert_eq!(outcome, RegisterOutcome::TookOver);
    }

    #[test]
    fn rejects_id_without_slash() {
        let reg = registry(StdDuration::from_secs(300));
        let err = reg.register("no-slash-here", None).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidRequest(_)));
    }

    #[test]
    fn unregister_with_empty_inbox_deletes() {
        let reg = registry(StdDuration::from_secs(300));
        reg.register("laptop/demo", Some("s1".into())).unwrap();
        let outcome = reg.unregister("laptop/demo", false).unwrap();
        assert_eq!(outcome, "deleted");
        assert!(reg.get("laptop/demo").unwrap().is_none());
    }

    #[test]
    fn unregister_keep_if_pending_retains_offline() {
        let reg = registry(StdDuration::from_secs(300));
        reg.register("laptop/demo", Some("s1".into())).unwrap();
        let outcome = reg.unregister("laptop/demo", true).unwrap();
        assert_eq!(outcome, "kept_offline");
        assert!(reg.get("laptop/demo").unwrap().is_some());
    }
}
