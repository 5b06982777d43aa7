//! REST surface: explicit registration, inbox polling, a heartbeat-free
//! long-poll wait for external watcher processes, and unregistration.
//!
//! `wait` deliberately uses `WatcherIdentity` instead of `RequestContext`:
//! per the transport-layer invariant, a watcher observing another agent's
//! inbox must not refresh that agent's heartbeat just by polling it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use serde_json::{json, Value};

use crate::audit::AuditLog;
use crate::errors::CoordinatorError;
use crate::identity::{rate_identity, ApiKeyPrincipal, ClientIp, RequestContext, WatcherIdentity};
use crate::messaging::{MessageEngine, WaitOutcome};
use crate::models::{Message, RestRegisterRequest, RestRegisterResponse};
use crate::rate_limit::RateLimiter;
use crate::registry::{AgentRegistry, RegisterOutcome};

const MIN_WAIT_SECS: u64 = 1;
const MAX_WAIT_SECS: u64 = 3600;
const DEFAULT_WAIT_SECS: u64 = 30;

#[post("/agent/api/register", data = "<body>")]
pub fn register(
    principal: ApiKeyPrincipal,
    ip: ClientIp,
    body: Json<RestRegisterRequest>,
    registry: &State<Arc<AgentRegistry>>,
    auth: &State<Arc<crate::auth::AuthManager>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    audit: &State<Arc<AuditLog>>,
) -> Result<Json<RestRegisterResponse>, CoordinatorError> {
    let requested_id = format!("{}/{}", body.machine, body.project);
    let identity = rate_identity(&principal.0, &requested_id, &ip);
    rate_limiter.check("rest_register", &identity, Utc::now())?;
    auth.check_scope(&principal.0, &requested_id)?;

    let (agent_id, outcome) = registry.register(&requested_id, body.session_id.clone())?;
    if body.display_name.is_some() || body.capabilities.is_some() || body.description.is_some() {
        registry.update_profile(
            &agent_id,
            body.display_name.clone(),
            body.capabilities.clone(),
            body.description.clone(),
        )?;
    }
    audit.record(&agent_id, "rest_register", &agent_id, outcome_label(outcome), json!({}));

    Ok(Json(RestRegisterResponse { agent_id, outcome: outcome_label(outcome) }))
}

fn outcome_label(outcome: RegisterOutcome) -> &'static str {
    match outcome {
        RegisterOutcome::Created => "created",
        RegisterOutcome::Reconnected => "reconnected",
        RegisterOutcome::TookOver => "took_over",
        RegisterOutcome::Suffixed => "suffixed",
    }
}

#[get("/agent/api/pending")]
pub fn pending(
    ctx: RequestContext,
    ip: ClientIp,
    messaging: &State<Arc<MessageEngine>>,
    rate_limiter: &State<Arc<RateLimiter>>,
) -> Result<Json<Vec<Message>>, CoordinatorError> {
    let identity = rate_identity(&ctx.principal, &ctx.agent_id, &ip);
    rate_limiter.check("rest_pending", &identity, Utc::now())?;
    Ok(Json(messaging.get(&ctx.agent_id)?))
}

#[get("/agent/api/wait?<timeout>")]
pub async fn wait(
    watcher: WatcherIdentity,
    ip: ClientIp,
    timeout: Option<u64>,
    registry: &State<Arc<AgentRegistry>>,
    messaging: &State<Arc<MessageEngine>>,
    rate_limiter: &State<Arc<RateLimiter>>,
) -> Result<Json<Value>, CoordinatorError> {
    let identity = rate_identity(&crate::auth::Principal::Anonymous, &watcher.agent_id, &ip);
    rate_limiter.check("rest_wait", &identity, Utc::now())?;

    let secs = timeout.unwrap_or(DEFAULT_WAIT_SECS);
    if !(MIN_WAIT_SECS..=MAX_WAIT_SECS).contains(&secs) {
        return Err(CoordinatorError::InvalidRequest(format!(
            "timeout must be between {MIN_WAIT_SECS} and {MAX_WAIT_SECS} seconds"
        )));
    }
    if registry.get(&watcher.agent_id)?.is_none() {
        return Err(CoordinatorError::AgentNotFound(watcher.agent_id.clone()));
    }

    let outcome = messaging.wait_any(&watcher.agent_id, Duration::from_secs(secs)).await?;
    Ok(Json(match outcome {
        WaitOutcome::Messages(msgs) => json!({"status": "ok", "messages": msgs}),
        WaitOutcome::Message(msg) => json!({"status": "ok", "messages": [msg]}),
        WaitOutcome::Timeout => json!({"status": "timeout", "messages": []}),
    }))
}

#[post("/agent/api/unregister?<keep>")]
pub fn unregister(
    ctx: RequestContext,
    ip: ClientIp,
    keep: Option<bool>,
    registry: &State<Arc<AgentRegistry>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    audit: &State<Arc<AuditLog>>,
) -> Result<Json<Value>, CoordinatorError> {
    let identity = rate_identity(&ctx.principal, &ctx.agent_id, &ip);
    rate_limiter.check("rest_unregister", &identity, Utc::now())?;
    let outcome = registry.unregister(&ctx.agent_id, keep.unwrap_or(false))?;
    audit.record(&ctx.agent_id, "unregister", &ctx.agent_id, outcome, json!({}));
    Ok(Json(json!({"outcome": outcome})))
}
