//! Short-lived authorization flag
//!
//! Set by a presence trigger and valid for a fixed TTL. The clock is a
//! parameter so expiry can be tested without sleeping.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::constants::auth::TOKEN_TTL;

#[derive(Debug)]
pub struct AuthToken {
    ttl: Duration,
    granted_at: Mutex<Option<Instant>>,
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::new(TOKEN_TTL)
    }
}

impl AuthToken {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            granted_at: Mutex::new(None),
        }
    }

    pub fn grant(&self) {
        self.grant_at(Instant::now());
    }

    pub fn grant_at(&self, now: Instant) {
        *self.granted_at.lock() = Some(now);
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.granted_at
            .lock()
            .is_some_and(|t| now.saturating_duration_since(t) < self.ttl)
    }

    pub fn revoke(&self) {
        *self.granted_at.lock() = None;
    }
}
