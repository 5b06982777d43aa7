//! Sliding-window rate limiting over the store's sorted-set primitive.
//!
//! Same sliding-window shape as the teacher's in-memory `RateLimiter`
//! (prune entries older than the window, compare count against a cap,
//! record the attempt), rebuilt against `Store::zset_*` so limits survive
//! process restarts and are visible to the scavenger for backstop pruning.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::CoordinatorError;
use crate::store::Store;

pub struct Policy {
    pub max: usize,
    pub window_secs: u64,
}

pub fn policy_for(operation: &str) -> Policy {
    match operation {
        "send_message" => Policy { max: 10, window_secs: 60 },
        "list_agents" => Policy { max: 30, window_secs: 60 },
        "rest_register" => Policy { max: 5, window_secs: 60 },
        "register_key" => Policy { max: 5, window_secs: 60 },
        _ => Policy { max: 60, window_secs: 60 },
    }
}

pub struct RateLimiter {
    store: Arc<Store>,
}

impl RateLimiter {
    pub fn new(store: Arc<Store>) -> Self {
        RateLimiter { store }
    }

    /// Checks and records one attempt for `operation` by `identity`.
    /// Fails open (with a logged warning) if the store is unreachable,
    /// matching the design note that a rate-limiter outage must not
    /// become an availability outage for the whole service.
    pub fn check(&self, operation: &str, identity: &str, now: DateTime<Utc>) -> Result<(), CoordinatorError> {
        let policy = policy_for(operation);
        let key = format!("rate:{operation}:{identity}");
        let now_secs = now.timestamp() as f64 + now.timestamp_subsec_millis() as f64 / 1000.0;
        let window_start = now_secs - policy.window_secs as f64;

        let outcome = (|| -> Result<bool, CoordinatorError> {
            self.store.zset_prune(&key, window_start)?;
            let count = self.store.zset_count(&key)?;
            if count >= policy.max {
                return Ok(false);
            }
            let member = format!("{now_secs}-{}", uuid::Uuid::new_v4());
            self.store.zset_add(&key, &member, now_secs)?;
            Ok(true)
        })();

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(CoordinatorError::RateLimited {
                retry_after_secs: policy.window_secs,
            }),
            Err(e) => {
                eprintln!("rate limiter store failure for {key}, failing open: {e:?}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_to_sixty_per_minute() {
        let p = policy_for("get_messages");
        assert_eq!(p.max, 60);
        assert_eq!(p.window_secs, 60);
    }

    #[test]
    fn send_message_policy_is_tighter() {
        let p = policy_for("send_message");
        assert_eq!(p.max, 10);
    }
}
