//! Domain records and the request/response DTOs the transport layer moves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub session_id: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    pub id: String,
    pub status: AgentStatus,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub capabilities: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl AgentView {
    pub fn from_agent(agent: &Agent, heartbeat_ttl: chrono::Duration, now: DateTime<Utc>) -> Self {
        let status = if now - agent.last_seen > heartbeat_ttl {
            AgentStatus::Offline
        } else {
            AgentStatus::Online
        };
        AgentView {
            id: agent.id.clone(),
            status,
            display_name: agent.display_name.clone(),
            description: agent.description.clone(),
            capabilities: agent.capabilities.clone(),
            registered_at: agent.registered_at,
            last_seen: agent.last_seen,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Message,
    Reply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: String,
    pub bcrypt_hash: String,
    pub agent_pattern: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyView {
    pub key_id: String,
    pub agent_pattern: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl From<&ApiKeyRecord> for ApiKeyView {
    fn from(r: &ApiKeyRecord) -> Self {
        ApiKeyView {
            key_id: r.key_id.clone(),
            agent_pattern: r.agent_pattern.clone(),
            description: r.description.clone(),
            created_at: r.created_at,
            revoked_at: r.revoked_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub outcome: String,
    pub detail: serde_json::Value,
}

// --- RPC tool dispatch ---

#[derive(Debug, Deserialize)]
#[serde(tag = "tool", content = "params", rename_all = "snake_case")]
pub enum RpcCall {
    Ping,
    ListAgents,
    RegisterAgent {
        #[serde(default, rename = "name")]
        display_name: Option<String>,
        #[serde(default)]
        capabilities: Option<Vec<String>>,
        #[serde(default)]
        description: Option<String>,
    },
    SetDescription {
        description: String,
    },
    SendMessage {
        target: String,
        message: String,
        #[serde(default)]
        context: Option<serde_json::Value>,
        #[serde(default)]
        deliver_offline: Option<bool>,
    },
    Reply {
        message_id: String,
        response: String,
        #[serde(default)]
        status: Option<String>,
    },
    GetMessages,
    AckMessages {
        ids: Vec<String>,
    },
    WaitForMessage {
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        reply_to: Option<String>,
    },
}

// --- REST DTOs ---

#[derive(Debug, Deserialize)]
pub struct RestRegisterRequest {
    pub machine: String,
    pub project: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RestRegisterResponse {
    pub agent_id: String,
    pub outcome: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub agent_pattern: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    pub key_id: String,
    pub token: String,
}
