//! Public, unauthenticated health surface.

use std::sync::Arc;

use rocket::get;
use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use crate::registry::AgentRegistry;
use crate::models::AgentStatus;

#[get("/api/health")]
pub fn health(registry: &State<Arc<AgentRegistry>>) -> Json<Value> {
    let online = registry
        .list()
        .map(|agents| agents.iter().filter(|a| a.status == AgentStatus::Online).count())
        .unwrap_or(0);
    Json(json!({"status": "ok", "agents_online": online}))
}
