//! Admin-scoped REST surface: API key lifecycle and audit listing.

use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use serde_json::{json, Value};

use crate::auth::AuthManager;
use crate::audit::AuditLog;
use crate::errors::CoordinatorError;
use crate::identity::AdminPrincipal;
use crate::models::{ApiKeyView, AuditEntry, CreateKeyRequest, CreateKeyResponse};

#[post("/admin/api/keys", data = "<body>")]
pub fn create_key(
    _admin: AdminPrincipal,
    body: Json<CreateKeyRequest>,
    auth: &State<Arc<AuthManager>>,
) -> Result<Json<CreateKeyResponse>, CoordinatorError> {
    let (key_id, token) = auth.create_key(&body.agent_pattern, body.description.as_deref().unwrap_or(""))?;
    Ok(Json(CreateKeyResponse { key_id, token }))
}

#[get("/admin/api/keys")]
pub fn list_keys(_admin: AdminPrincipal, auth: &State<Arc<AuthManager>>) -> Result<Json<Vec<ApiKeyView>>, CoordinatorError> {
    let keys = auth.list_keys()?;
    Ok(Json(keys.iter().map(ApiKeyView::from).collect()))
}

#[delete("/admin/api/keys/<key_id>")]
pub fn revoke_key(_admin: AdminPrincipal, key_id: &str, auth: &State<Arc<AuthManager>>) -> Result<Json<Value>, CoordinatorError> {
    auth.revoke_key(key_id)?;
    Ok(Json(json!({"ok": true})))
}

#[get("/admin/api/audit?<limit>")]
pub fn get_audit(_admin: AdminPrincipal, limit: Option<usize>, audit: &State<Arc<AuditLog>>) -> Result<Json<Vec<AuditEntry>>, CoordinatorError> {
    audit.list(limit.unwrap_or(100)).map(Json)
}
