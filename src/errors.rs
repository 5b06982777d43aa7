//! Structured error taxonomy shared by every component.
//!
//! Components return `Result<T, CoordinatorError>`; only the transport layer
//! converts a `CoordinatorError` into an HTTP response. The conversion is a
//! hand-rolled `Responder`, the same shape as the teacher's `RateLimitedError`
//! in `rate_limit.rs`: a status code plus a structured JSON body.

use rocket::http::{Header, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum CoordinatorError {
    InvalidRequest(String),
    Unauthenticated(String),
    ForbiddenScope(String),
    AgentNotFound(String),
    RateLimited { retry_after_secs: u64 },
    RegistrationExhausted,
    StoreUnavailable(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    suggestion: &'static str,
}

impl CoordinatorError {
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::InvalidRequest(_) => "INVALID_REQUEST",
            CoordinatorError::Unauthenticated(_) => "UNAUTHENTICATED",
            CoordinatorError::ForbiddenScope(_) => "FORBIDDEN_SCOPE",
            CoordinatorError::AgentNotFound(_) => "AGENT_NOT_FOUND",
            CoordinatorError::RateLimited { .. } => "RATE_LIMITED",
            CoordinatorError::RegistrationExhausted => "REGISTRATION_EXHAUSTED",
            CoordinatorError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            CoordinatorError::InvalidRequest(_) => Status::BadRequest,
            CoordinatorError::Unauthenticated(_) => Status::Unauthorized,
            CoordinatorError::ForbiddenScope(_) => Status::Forbidden,
            CoordinatorError::AgentNotFound(_) => Status::NotFound,
            CoordinatorError::RateLimited { .. } => Status::TooManyRequests,
            CoordinatorError::RegistrationExhausted => Status::Conflict,
            CoordinatorError::StoreUnavailable(_) => Status::ServiceUnavailable,
        }
    }

    fn suggestion(&self) -> &'static str {
        match self {
            CoordinatorError::InvalidRequest(_) => "check the request shape against the tool schema",
            CoordinatorError::Unauthenticated(_) => "supply a valid Authorization header for this path",
            CoordinatorError::ForbiddenScope(_) => "request an api key whose agent_pattern covers this id",
            CoordinatorError::AgentNotFound(_) => "register the agent before addressing it",
            CoordinatorError::RateLimited { .. } => "back off and retry after the window elapses",
            CoordinatorError::RegistrationExhausted => "pick a less contended machine/project id",
            CoordinatorError::StoreUnavailable(_) => "retry shortly; the store is temporarily unreachable",
        }
    }

    fn message(&self) -> String {
        match self {
            CoordinatorError::InvalidRequest(m) => m.clone(),
            CoordinatorError::Unauthenticated(m) => m.clone(),
            CoordinatorError::ForbiddenScope(m) => m.clone(),
            CoordinatorError::AgentNotFound(m) => m.clone(),
            CoordinatorError::RateLimited { retry_after_secs } => {
                format!("rate limit exceeded, retry after {retry_after_secs}s")
            }
            CoordinatorError::RegistrationExhausted => {
                "no free suffix slot under this machine/project id".to_string()
            }
            CoordinatorError::StoreUnavailable(m) => m.clone(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for CoordinatorError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(ErrorBody {
            code: self.code(),
            message: self.message(),
            suggestion: self.suggestion(),
        });
        let retry_after = match &self {
            CoordinatorError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let mut builder = Response::build_from(body.respond_to(req)?);
        builder.status(self.status());
        if let Some(secs) = retry_after {
            builder.header(Header::new("Retry-After", secs.to_string()));
        }
        builder.ok()
    }
}

impl From<rusqlite::Error> for CoordinatorError {
    fn from(e: rusqlite::Error) -> Self {
        CoordinatorError::StoreUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(e: serde_json::Error) -> Self {
        CoordinatorError::InvalidRequest(e.to_string())
    }
}
