//! Identity middleware: derives a canonical agent id from request headers,
//! enforces api-key scope against it, and (except where the transport layer
//! explicitly opts out, e.g. the REST `wait` endpoint) touches the registry
//! so every authenticated call doubles as a heartbeat.

use std::net::IpAddr;
use std::sync::Arc;

use rocket::request::{FromRequest, Outcome, Request};

use crate::auth::{AuthManager, Principal};
use crate::errors::CoordinatorError;
use crate::registry::AgentRegistry;

fn header_identity(req: &Request<'_>) -> Option<String> {
    let machine = req.headers().get_one("X-Machine-Name");
    let project = req.headers().get_one("X-Project-Name");
    if let (Some(m), Some(p)) = (machine, project) {
        return Some(format!("{m}/{p}"));
    }
    req.headers().get_one("X-Agent-Id").map(str::to_string)
}

fn authenticate(req: &Request<'_>) -> Result<Principal, CoordinatorError> {
    let auth = req
        .rocket()
        .state::<Arc<AuthManager>>()
        .expect("AuthManager must be managed state");
    auth.authenticate(req.uri().path().as_str(), req.headers().get_one("Authorization"))
}

/// Full identity resolution: authenticate, derive the canonical agent id,
/// enforce scope, and register-or-heartbeat. Used by every RPC tool and
/// most REST endpoints.
pub struct RequestContext {
    pub principal: Principal,
    pub agent_id: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestContext {
    type Error = CoordinatorError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let principal = match authenticate(req) {
            Ok(p) => p,
            Err(e) => return Outcome::Error((e.status(), e)),
        };

        let Some(agent_id) = header_identity(req) else {
            let e = CoordinatorError::InvalidRequest(
                "missing X-Machine-Name/X-Project-Name (or X-Agent-Id) headers".into(),
            );
            return Outcome::Error((e.status(), e));
        };

        let auth = req.rocket().state::<Arc<AuthManager>>().unwrap();
        if let Err(e) = auth.check_scope(&principal, &agent_id) {
            return Outcome::Error((e.status(), e));
        }

        let registry = req.rocket().state::<Arc<AgentRegistry>>().unwrap();
        let session_id = req.headers().get_one("X-Session-ID").map(String::from);
        let canonical = match registry.ensure_registered(&agent_id, session_id) {
            Ok(c) => c,
            Err(e) => return Outcome::Error((e.status(), e)),
        };

        Outcome::Success(RequestContext { principal, agent_id: canonical })
    }
}

/// Identity resolution without the registry touch — used by the REST
/// `wait` endpoint, which must not refresh the watched agent's heartbeat.
pub struct WatcherIdentity {
    pub agent_id: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for WatcherIdentity {
    type Error = CoordinatorError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let principal = match authenticate(req) {
            Ok(p) => p,
            Err(e) => return Outcome::Error((e.status(), e)),
        };
        let Some(agent_id) = header_identity(req) else {
            let e = CoordinatorError::InvalidRequest(
                "missing X-Machine-Name/X-Project-Name (or X-Agent-Id) headers".into(),
            );
            return Outcome::Error((e.status(), e));
        };
        let auth = req.rocket().state::<Arc<AuthManager>>().unwrap();
        if let Err(e) = auth.check_scope(&principal, &agent_id) {
            return Outcome::Error((e.status(), e));
        }
        Outcome::Success(WatcherIdentity { agent_id })
    }
}

/// Bare authentication with no identity derivation — used for the REST
/// registration endpoint (which supplies machine/project in its body) and
/// for key-scope-exempt internal plumbing.
pub struct ApiKeyPrincipal(pub Principal);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ApiKeyPrincipal {
    type Error = CoordinatorError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match authenticate(req) {
            Ok(p) => Outcome::Success(ApiKeyPrincipal(p)),
            Err(e) => Outcome::Error((e.status(), e)),
        }
    }
}

/// Requires the admin trust domain specifically.
pub struct AdminPrincipal;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminPrincipal {
    type Error = CoordinatorError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match authenticate(req) {
            Ok(Principal::Admin) => Outcome::Success(AdminPrincipal),
            Ok(_) => {
                let e = CoordinatorError::ForbiddenScope("admin trust domain required".into());
                Outcome::Error((e.status(), e))
            }
            Err(e) => Outcome::Error((e.status(), e)),
        }
    }
}

/// Best-effort client IP, honoring `X-Forwarded-For` only when the
/// coordinator is configured to run behind a proxy.
pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = req.rocket().state::<Arc<crate::config::Config>>();
        let behind_proxy = config.map(|c| c.behind_proxy).unwrap_or(false);
        if behind_proxy {
            if let Some(fwd) = req.headers().get_one("X-Forwarded-For") {
                if let Some(first) = fwd.split(',').next() {
                    if let Ok(ip) = first.trim().parse::<IpAddr>() {
                        return Outcome::Success(ClientIp(ip.to_string()));
                    }
                }
            }
        }
        let ip = req.client_ip().map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

pub fn rate_identity(principal: &Principal, agent_id: &str, ip: &ClientIp) -> String {
    match principal {
        Principal::Agent { .. } => agent_id.to_string(),
        Principal::Proxy => "proxy".to_string(),
        Principal::Admin => "admin".to_string(),
        Principal::Anonymous => ip.0.clone(),
    }
}
