//! MCP-style tool dispatch, mounted under both `/agent/mcp` (api-key trust
//! domain) and `/oauth/mcp` (proxy trust domain). Which trust domain
//! applies is resolved by `RequestContext` from the request path, so both
//! routes share one dispatch function.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rocket::serde::json::Json;
use rocket::{post, State};
use serde_json::{json, Value};

use crate::audit::AuditLog;
use crate::errors::CoordinatorError;
use crate::identity::{rate_identity, ClientIp, RequestContext};
use crate::messaging::{MessageEngine, WaitOutcome};
use crate::models::{MessageType, RpcCall};
use crate::rate_limit::RateLimiter;
use crate::registry::AgentRegistry;

const MIN_WAIT_SECS: u64 = 1;
const MAX_WAIT_SECS: u64 = 3600;
const DEFAULT_WAIT_SECS: u64 = 30;

#[post("/agent/mcp", data = "<body>")]
pub async fn agent_mcp(
    ctx: RequestContext,
    ip: ClientIp,
    body: Json<RpcCall>,
    registry: &State<Arc<AgentRegistry>>,
    messaging: &State<Arc<MessageEngine>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    audit: &State<Arc<AuditLog>>,
) -> Result<Json<Value>, CoordinatorError> {
    dispatch(ctx, ip, body.into_inner(), registry, messaging, rate_limiter, audit).await
}

#[post("/oauth/mcp", data = "<body>")]
pub async fn oauth_mcp(
    ctx: RequestContext,
    ip: ClientIp,
    body: Json<RpcCall>,
    registry: &State<Arc<AgentRegistry>>,
    messaging: &State<Arc<MessageEngine>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    audit: &State<Arc<AuditLog>>,
) -> Result<Json<Value>, CoordinatorError> {
    dispatch(ctx, ip, body.into_inner(), registry, messaging, rate_limiter, audit).await
}

async fn dispatch(
    ctx: RequestContext,
    ip: ClientIp,
    call: RpcCall,
    registry: &State<Arc<AgentRegistry>>,
    messaging: &State<Arc<MessageEngine>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    audit: &State<Arc<AuditLog>>,
) -> Result<Json<Value>, CoordinatorError> {
    let operation = operation_name(&call);
    let identity = rate_identity(&ctx.principal, &ctx.agent_id, &ip);
    rate_limiter.check(operation, &identity, Utc::now())?;

    let result = match call {
        RpcCall::Ping => Ok(json!({"ok": true, "timestamp": Utc::now().to_rfc3339()})),

        RpcCall::ListAgents => {
            let agents = registry.list()?;
            Ok(json!(agents))
        }

        RpcCall::RegisterAgent { display_name, capabilities, description } => {
            let agent = registry.update_profile(&ctx.agent_id, display_name, capabilities, description)?;
            Ok(json!(agent))
        }

        RpcCall::SetDescription { description } => {
            let agent = registry.set_description(&ctx.agent_id, description)?;
            Ok(json!(agent))
        }

        RpcCall::SendMessage { target, message, context, deliver_offline } => {
            let msg = messaging.send(
                &ctx.agent_id,
                &target,
                message,
                context,
                MessageType::Message,
                None,
                deliver_offline.unwrap_or(false),
            )?;
            audit.record(&ctx.agent_id, "send_message", &msg.id, "sent", json!({"to": target}));
            Ok(json!(msg))
        }

        RpcCall::Reply { message_id, response, status } => {
            let parts: Vec<&str> = message_id.splitn(3, "::").collect();
            if parts.len() != 3 {
                return Err(CoordinatorError::InvalidRequest("malformed message_id".into()));
            }
            let to = parts[0].to_string();
            let context = status.map(|s| json!({"status": s}));
            let msg = messaging.send(
                &ctx.agent_id,
                &to,
                response,
                context,
                MessageType::Reply,
                Some(message_id),
                false,
            )?;
            Ok(json!(msg))
        }

        RpcCall::GetMessages => {
            let msgs = messaging.get(&ctx.agent_id)?;
            Ok(json!(msgs))
        }

        RpcCall::AckMessages { ids } => {
            let n = messaging.ack(&ctx.agent_id, &ids)?;
            Ok(json!({"acked": n}))
        }

        RpcCall::WaitForMessage { timeout, reply_to } => {
            let secs = timeout.unwrap_or(DEFAULT_WAIT_SECS);
            if !(MIN_WAIT_SECS..=MAX_WAIT_SECS).contains(&secs) {
                return Err(CoordinatorError::InvalidRequest(format!(
                    "timeout must be between {MIN_WAIT_SECS} and {MAX_WAIT_SECS} seconds"
                )));
            }
            let outcome = match &reply_to {
                Some(id) => messaging.wait_for(&ctx.agent_id, id, Duration::from_secs(secs)).await?,
                None => messaging.wait_any(&ctx.agent_id, Duration::from_secs(secs)).await?,
            };
            Ok(match outcome {
                WaitOutcome::Messages(msgs) => json!({"status": "ok", "messages": msgs}),
                WaitOutcome::Message(msg) => json!({"status": "ok", "messages": [msg]}),
                WaitOutcome::Timeout => json!({"status": "timeout", "messages": []}),
            })
        }
    };

    result.map(Json)
}

fn operation_name(call: &RpcCall) -> &'static str {
    match call {
        RpcCall::Ping => "ping",
        RpcCall::ListAgents => "list_agents",
        RpcCall::RegisterAgent { .. } => "register_agent",
        RpcCall::SetDescription { .. } => "set_description",
        RpcCall::SendMessage { .. } => "send_message",
        RpcCall::Reply { .. } => "reply",
        RpcCall::GetMessages => "get_messages",
        RpcCall::AckMessages { .. } => "ack_messages",
        RpcCall::WaitForMessage { .. } => "wait_for_message",
    }
}
