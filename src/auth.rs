//! AuthManager: trust-domain resolution, composite bearer tokens, API key
//! lifecycle, and glob-based scope enforcement.
//!
//! Constant-time secret comparison follows the same shape as
//! `CloudLLM-ai-cloudllm`'s `AuthConfig::validate()`: hash both sides with
//! SHA-256, then compare digests with `subtle::ConstantTimeEq` so the
//! optimizer can't turn it back into a short-circuiting `==`.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::errors::CoordinatorError;
use crate::models::ApiKeyRecord;
use crate::store::Store;

const KEYS_HASH: &str = "api_keys";
const KEY_IDS_HASH: &str = "key_ids";

#[derive(Debug, Clone)]
pub enum Principal {
    Agent { agent_pattern: String, key_id: String },
    Proxy,
    Admin,
    Anonymous,
}

pub struct AuthManager {
    store: Arc<Store>,
    audit: Arc<AuditLog>,
    config: Arc<Config>,
}

fn ct_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

fn sha256_hex(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl AuthManager {
    pub fn new(store: Arc<Store>, audit: Arc<AuditLog>, config: Arc<Config>) -> Self {
        AuthManager { store, audit, config }
    }

    /// Resolves the trust domain from the request path, then validates the
    /// bearer token against it. Dev mode (all three secrets unset) bypasses
    /// auth entirely and returns `Anonymous`.
    pub fn authenticate(&self, path: &str, auth_header: Option<&str>) -> Result<Principal, CoordinatorError> {
        if self.config.dev_mode {
            // Bypass validation but still grant the trust domain the path asks
            // for, so admin/proxy-scoped routes remain reachable in dev mode.
            return Ok(if path.starts_with("/agent/") {
                Principal::Agent { agent_pattern: "*".to_string(), key_id: "dev".to_string() }
            } else if path.starts_with("/oauth/") {
                Principal::Proxy
            } else if path.starts_with("/admin/") {
                Principal::Admin
            } else {
                Principal::Anonymous
            });
        }
        if path.starts_with("/agent/") {
            self.authenticate_agent(auth_header)
        } else if path.starts_with("/oauth/") {
            self.authenticate_proxy(auth_header)
        } else if path.starts_with("/admin/") {
            self.authenticate_admin(auth_header)
        } else {
            Ok(Principal::Anonymous)
        }
    }

    fn bearer_token<'a>(header: Option<&'a str>) -> Result<&'a str, CoordinatorError> {
        header
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or_else(|| CoordinatorError::Unauthenticated("missing or malformed Authorization header".into()))
    }

    fn authenticate_agent(&self, header: Option<&str>) -> Result<Principal, CoordinatorError> {
        let token = Self::bearer_token(header)?;
        let (secret_part, api_key) = token
            .split_once('.')
            .ok_or_else(|| CoordinatorError::Unauthenticated("expected {server_secret}.{api_key}".into()))?;
        let expected_secret = self.config.server_secret.as_deref().unwrap_or("");
        if !ct_eq(secret_part, expected_secret) {
            return Err(CoordinatorError::Unauthenticated("server secret mismatch".into()));
        }
        let idx = sha256_hex(api_key);
        let record = self
            .store
            .hash_get(KEYS_HASH, &idx)?
            .and_then(|v| serde_json::from_value::<ApiKeyRecord>(v).ok())
            .ok_or_else(|| CoordinatorError::Unauthenticated("unknown api key".into()))?;
        if record.revoked_at.is_some() {
            return Err(CoordinatorError::Unauthenticated("api key revoked".into()));
        }
        if !bcrypt::verify(api_key, &record.bcrypt_hash).unwrap_or(false) {
            return Err(CoordinatorError::Unauthenticated("api key mismatch".into()));
        }
        Ok(Principal::Agent {
            agent_pattern: record.agent_pattern,
            key_id: record.key_id,
        })
    }

    fn authenticate_proxy(&self, header: Option<&str>) -> Result<Principal, CoordinatorError> {
        let token = Self::bearer_token(header)?;
        let expected = self.config.proxy_bearer_token.as_deref().unwrap_or("");
        if ct_eq(token, expected) {
            Ok(Principal::Proxy)
        } else {
            Err(CoordinatorError::Unauthenticated("proxy bearer token mismatch".into()))
        }
    }

    fn authenticate_admin(&self, header: Option<&str>) -> Result<Principal, CoordinatorError> {
        let token = Self::bearer_token(header)?;
        let admin_key = self.config.admin_key.as_deref().unwrap_or("");
        if let Some((secret_part, rest)) = token.split_once('.') {
            let expected_secret = self.config.server_secret.as_deref().unwrap_or("");
            if ct_eq(secret_part, expected_secret) && ct_eq(rest, admin_key) {
                return Ok(Principal::Admin);
            }
        }
        // Legacy format: `Bearer {admin_key}` with no server-secret prefix.
        if ct_eq(token, admin_key) {
            self.audit.record(
                "admin",
                "admin_auth_legacy_format",
                "auth",
                "accepted",
                serde_json::json!({}),
            );
            return Ok(Principal::Admin);
        }
        Err(CoordinatorError::Unauthenticated("admin key mismatch".into()))
    }

    /// Enforces `agent_pattern` scope for agent principals. Proxy, admin,
    /// and anonymous (dev mode) principals are unscoped.
    pub fn check_scope(&self, principal: &Principal, agent_id: &str) -> Result<(), CoordinatorError> {
        if let Principal::Agent { agent_pattern, .. } = principal {
            let matches = glob::Pattern::new(agent_pattern)
                .map(|p| p.matches(agent_id))
                .unwrap_or(false);
            if !matches {
                return Err(CoordinatorError::ForbiddenScope(format!(
                    "api key scope {agent_pattern} does not cover {agent_id}"
                )));
            }
        }
        Ok(())
    }

    pub fn create_key(&self, agent_pattern: &str, description: &str) -> Result<(String, String), CoordinatorError> {
        if glob::Pattern::new(agent_pattern).is_err() {
            return Err(CoordinatorError::InvalidRequest("agent_pattern is not a valid glob".into()));
        }
        let mut raw = [0u8; 32];
        rand::rng().fill(&mut raw);
        let raw_key = URL_SAFE_NO_PAD.encode(raw);
        let bcrypt_hash = bcrypt::hash(&raw_key, bcrypt::DEFAULT_COST)
            .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;
        let key_id = uuid::Uuid::new_v4().to_string();
        let record = ApiKeyRecord {
            key_id: key_id.clone(),
            bcrypt_hash,
            agent_pattern: agent_pattern.to_string(),
            description: description.to_string(),
            created_at: chrono::Utc::now(),
            revoked_at: None,
        };
        let idx = sha256_hex(&raw_key);
        self.store.hash_set(KEYS_HASH, &idx, &serde_json::to_value(&record)?)?;
        self.store.hash_set(KEY_IDS_HASH, &key_id, &serde_json::Value::String(idx))?;
        self.audit.record(
            "admin",
            "register_key",
            &key_id,
            "created",
            serde_json::json!({"agent_pattern": agent_pattern}),
        );
        Ok((key_id, raw_key))
    }

    pub fn revoke_key(&self, key_id: &str) -> Result<(), CoordinatorError> {
        let idx = self
            .store
            .hash_get(KEY_IDS_HASH, key_id)?
            .and_then(|v| v.as_str().map(String::from))
            .ok_or_else(|| CoordinatorError::InvalidRequest(format!("unknown key_id {key_id}")))?;
        let mut record: ApiKeyRecord = self
            .store
            .hash_get(KEYS_HASH, &idx)?
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| CoordinatorError::InvalidRequest(format!("unknown key_id {key_id}")))?;
        record.revoked_at = Some(chrono::Utc::now());
        self.store.hash_set(KEYS_HASH, &idx, &serde_json::to_value(&record)?)?;
        self.audit.record("admin", "revoke_key", key_id, "revoked", serde_json::json!({}));
        Ok(())
    }

    pub fn list_keys(&self) -> Result<Vec<ApiKeyRecord>, CoordinatorError> {
        let mut out: Vec<ApiKeyRecord> = self
            .store
            .hash_all(KEYS_HASH)?
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_strings() {
        assert!(ct_eq("same-secret", "same-secret"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatch() {
        assert!(!ct_eq("secret-a", "secret-b"));
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
        assert_ne!(sha256_hex("abc"), sha256_hex("abd"));
    }
}
