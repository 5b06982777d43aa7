//! MessageEngine: FIFO per-recipient inboxes, at-least-once delivery,
//! explicit ack, and blocking waits woken by the store's notify tokens.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::CoordinatorError;
use crate::models::{Message, MessageType};
use crate::registry::AgentRegistry;
use crate::store::Store;

const MAX_MESSAGE_BYTES: usize = 50 * 1024;
const MESSAGE_TTL: Duration = Duration::from_secs(24 * 3600);

pub enum WaitOutcome {
    Messages(Vec<Message>),
    Message(Message),
    Timeout,
}

pub struct MessageEngine {
    store: Arc<Store>,
    registry: Arc<AgentRegistry>,
}

impl MessageEngine {
    pub fn new(store: Arc<Store>, registry: Arc<AgentRegistry>) -> Self {
        MessageEngine { store, registry }
    }

    fn inbox_key(agent_id: &str) -> String {
        format!("inbox:{agent_id}")
    }

    fn notify_key(agent_id: &str) -> String {
        format!("notify:{agent_id}")
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send(
        &self,
        from: &str,
        to: &str,
        body: String,
        context: Option<serde_json::Value>,
        kind: MessageType,
        reply_to: Option<String>,
        deliver_offline: bool,
    ) -> Result<Message, CoordinatorError> {
        if body.is_empty() {
            return Err(CoordinatorError::InvalidRequest("message body must not be empty".into()));
        }
        if body.len() > MAX_MESSAGE_BYTES {
            return Err(CoordinatorError::InvalidRequest(format!(
                "message body exceeds {MAX_MESSAGE_BYTES} bytes"
            )));
        }
        if let Some(ctx) = &context {
            let ctx_len = serde_json::to_vec(ctx)?.len();
            if ctx_len > MAX_MESSAGE_BYTES {
                return Err(CoordinatorError::InvalidRequest(format!(
                    "message context exceeds {MAX_MESSAGE_BYTES} bytes"
                )));
            }
        }
        if kind == MessageType::Reply {
            let Some(ref_id) = &reply_to else {
                return Err(CoordinatorError::InvalidRequest(
                    "reply_to is required for a reply".into(),
                ));
            };
            let parts: Vec<&str> = ref_id.splitn(3, "::").collect();
            if parts.len() != 3 || parts[1] != from {
                return Err(CoordinatorError::InvalidRequest(
                    "reply_to must name a message whose recipient segment matches the caller".into(),
                ));
            }
        }

        if self.registry.get(to)?.is_none() {
            if !deliver_offline {
                return Err(CoordinatorError::AgentNotFound(to.to_string()));
            }
            // deliver_offline: create a placeholder record so the inbox has
            // somewhere durable to live until the real agent registers.
            self.registry.register(to, None)?;
        }

        let id = format!("{from}::{to}::{}", &Uuid::new_v4().simple().to_string()[..8]);
        let message = Message {
            id,
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            kind,
            message: body,
            context,
            reply_to,
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&message)?;
        self.store.list_push(&Self::inbox_key(to), &value, MESSAGE_TTL)?;
        self.store.notify_push(&Self::notify_key(to))?;
        Ok(message)
    }

    pub fn get(&self, recipient: &str) -> Result<Vec<Message>, CoordinatorError> {
        let raw = self.store.list_range(&Self::inbox_key(recipient))?;
        Ok(raw.into_iter().filter_map(|v| serde_json::from_value(v).ok()).collect())
    }

    pub fn ack(&self, recipient: &str, ids: &[String]) -> Result<usize, CoordinatorError> {
        self.store.list_remove_matching(&Self::inbox_key(recipient), |v| {
            v.get("id").and_then(|i| i.as_str()).map(|i| ids.iter().any(|id| id == i)).unwrap_or(false)
        })
    }

    /// Returns immediately once any notify token arrives (or one is already
    /// queued), tolerating a spurious/empty wake by handing back whatever
    /// snapshot the inbox holds at that moment rather than looping.
    pub async fn wait_any(&self, recipient: &str, timeout: Duration) -> Result<WaitOutcome, CoordinatorError> {
        let existing = self.get(recipient)?;
        if !existing.is_empty() {
            self.store.try_consume_notify(&Self::notify_key(recipient))?;
            return Ok(WaitOutcome::Messages(existing));
        }
        let got = self.store.blocking_consume_notify(&Self::notify_key(recipient), timeout).await?;
        if !got {
            return Ok(WaitOutcome::Timeout);
        }
        Ok(WaitOutcome::Messages(self.get(recipient)?))
    }

    /// Loops internally until a reply matching `reply_to_id` shows up or the
    /// timeout elapses — unlike `wait_any`, a non-matching wake must not
    /// return early, since the contract is "a specific reply or nothing".
    pub async fn wait_for(
        &self,
        recipient: &str,
        reply_to_id: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome, CoordinatorError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msgs = self.get(recipient)?;
            if let Some(m) = msgs.into_iter().find(|m| m.reply_to.as_deref() == Some(reply_to_id)) {
                return Ok(WaitOutcome::Message(m));
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(WaitOutcome::Timeout);
            }
            let got = self
                .store
                .blocking_consume_notify(&Self::notify_key(recipient), remaining)
                .await?;
            if !got {
                return Ok(WaitOutcome::Timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentRegistry;
    use crate::store::Store;

    fn engine() -> (MessageEngine, Arc<AgentRegistry>) {
        let store = Arc::new(Store::new(":memory:"));
        let registry = Arc::new(AgentRegistry::new(store.clone(), Duration::from_secs(300)));
        registry.register("laptop/alice", None).unwrap();
        registry.register("laptop/bob", None).unwrap();
        (MessageEngine::new(store, registry.clone()), registry)
    }

    #[test]
    fn send_and_get_round_trip() {
        let (engine, _) = engine();
        let sent = engine
            .send("laptop/alice", "laptop/bob", "hi".into(), None, MessageType::Message, None, false)
            .unwrap();
        let inbox = engine.get("laptop/bob").unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].id, sent.id);
    }

    #[test]
    fn send_to_unknown_agent_without_deliver_offline_fails() {
        let (engine, _) = engine();
        let err = engine
            .send("laptop/alice", "laptop/ghost", "hi".into(), None, MessageType::Message, None, false)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AgentNotFound(_)));
    }

    #[test]
    fn send_to_unknown_agent_with_deliver_offline_creates_placeholder() {
        let (engine, registry) = engine();
        engine
            .send("laptop/alice", "laptop/ghost", "hi".into(), None, MessageType::Message, None, true)
            .unwrap();
        assert!(registry.get("laptop/ghost").unwrap().is_some());
        assert_eq!(engine.get("laptop/ghost").unwrap().len(), 1);
    }

    #[test]
    fn ack_is_idempotent() {
        let (engine, _) = engine();
        let sent = engine
            .send("laptop/alice", "laptop/bob", "hi".into(), None, MessageType::Message, None, false)
            .unwrap();
        assert_eq!(engine.ack("laptop/bob", &[sent.id.clone()]).unwrap(), 1);
        assert_eq!(engine.ack("laptop/bob", &[sent.id]).unwrap(), 0);
        assert!(engine.get("laptop/bob").unwrap().is_empty());
    }

    #[test]
    fn reply_must_target_caller_as_recipient_segment() {
        let (engine, _) = engine();
        let sent = engine
            .send("laptop/alice", "laptop/bob", "hi".into(), None, MessageType::Message, None, false)
            .unwrap();
        // bob replying to alice's message is valid: bob is the recipient segment.
        let reply = engine
            .send("laptop/bob", "laptop/alice", "hey".into(), None, MessageType::Reply, Some(sent.id.clone()), false)
            .unwrap();
        assert_eq!(reply.reply_to, Some(sent.id.clone()));

        // alice pretending to reply to her own message is rejected.
        let err = engine
            .send("laptop/alice", "laptop/bob", "hey".into(), None, MessageType::Reply, Some(sent.id), false)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidRequest(_)));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let (engine, _) = engine();
        let body = "x".repeat(51 * 1024);
        let err = engine
            .send("laptop/alice", "laptop/bob", body, None, MessageType::Message, None, false)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn wait_any_returns_immediately_when_messages_already_pending() {
        let (engine, _) = engine();
        engine
            .send("laptop/alice", "laptop/bob", "hi".into(), None, MessageType::Message, None, false)
            .unwrap();
        let outcome = engine.wait_any("laptop/bob", Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, WaitOutcome::Messages(ref m) if m.len() == 1));
    }

    #[tokio::test]
    async fn wait_any_times_out_with_no_messages() {
        let (engine, _) = engine();
        let outcome = engine.wait_any("laptop/bob", Duration::from_millis(50)).await.unwrap();
        assert!(matches!(outcome, WaitOutcome::Timeout));
    }

    #[tokio::test]
    async fn wait_for_ignores_non_matching_replies() {
        let (engine, _) = engine();
        let sent = engine
            .send("laptop/alice", "laptop/bob", "hi".into(), None, MessageType::Message, None, false)
            .unwrap();
        engine
            .send("laptop/carol", "laptop/alice", "unrelated".into(), None, MessageType::Message, None, true)
            .unwrap();
        let wait = tokio::spawn({
            let engine2 = engine;
            let msg_id = sent.id.clone();
            async move { engine2.wait_for("laptop/alice", &msg_id, Duration::from_millis(300)).await }
        });
        let outcome = wait.await.unwrap().unwrap();
        assert!(matches!(outcome, WaitOutcome::Timeout));
    }
}
