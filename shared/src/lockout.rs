//! Failed-login throttling.
//!
//! Failures inside a rolling window are counted on the stored record; the
//! fifth one locks the account for thirty minutes. Counters are bumped with
//! an atomic `if_not_exists + 1` update so concurrent failures are never lost.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ApiError, ApiResult};
use crate::store::{Condition, Document, Key, Store, Update};

pub const MAX_FAILED_ATTEMPTS: u32 = 5;
pub const ATTEMPT_WINDOW_MINUTES: i64 = 15;
pub const LOCK_MINUTES: i64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginState {
    #[serde(default)]
    pub login_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

impl LoginState {
    /// The lock expiry if the account is locked at `now`
    pub fn active_lock(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.locked_until.filter(|until| *until > now)
    }

    /// Whether earlier failures no longer count toward a lock
    pub fn window_expired(&self, now: DateTime<Utc>) -> bool {
        let stale = match self.last_failed_at {
            Some(at) => now - at > Duration::minutes(ATTEMPT_WINDOW_MINUTES),
            None => true,
        };
        let lock_lapsed = self.locked_until.is_some_and(|until| until <= now);
        stale || lock_lapsed
    }
}

/// Outcome of recording one failed attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl Failure {
    pub fn remaining_attempts(&self) -> u32 {
        MAX_FAILED_ATTEMPTS.saturating_sub(self.attempts)
    }

    pub fn into_error(self, message: &str) -> ApiError {
        ApiError::Unauthorized {
            message: message.to_string(),
            remaining_attempts: Some(self.remaining_attempts()),
        }
    }
}

/// Location of a set of login counters
#[derive(Debug, Clone)]
pub struct Throttle {
    key: Key,
    prefix: Option<&'static str>,
    condition: Condition,
}

impl Throttle {
    /// Counters nested under `authentication` on a member record
    pub fn for_user(user_id: &str) -> Self {
        Self {
            key: Key::new(format!("USER#{}", user_id), "PROFILE"),
            prefix: Some("authentication"),
            condition: Condition::Exists,
        }
    }

    /// Counters on a standalone item for the configured administrator
    pub fn for_admin(username: &str) -> Self {
        Self {
            key: Key::new(format!("ADMIN#{}", username), "THROTTLE"),
            prefix: None,
            condition: Condition::Always,
        }
    }

    fn path(&self, field: &str) -> String {
        match self.prefix {
            Some(prefix) => format!("{}.{}", prefix, field),
            None => field.to_string(),
        }
    }

    /// Read the counters out of an already loaded document
    pub fn state_of(&self, doc: &Document) -> LoginState {
        let section = match self.prefix {
            Some(prefix) => doc.get(prefix).cloned().unwrap_or(Value::Null),
            None => Value::Object(doc.clone()),
        };
        serde_json::from_value(section).unwrap_or_default()
    }

    pub async fn load(&self, store: &dyn Store) -> ApiResult<LoginState> {
        Ok(store
            .get(&self.key)
            .await?
            .map(|doc| self.state_of(&doc))
            .unwrap_or_default())
    }

    /// Reject the attempt up front while a lock is active
    pub fn ensure_unlocked(&self, state: &LoginState, now: DateTime<Utc>) -> ApiResult<()> {
        match state.active_lock(now) {
            Some(locked_until) => {
                tracing::warn!("Login rejected, {} locked until {}", self.key.pk, locked_until);
                Err(ApiError::Locked { locked_until })
            }
            None => Ok(()),
        }
    }

    pub async fn record_failure(
        &self,
        store: &dyn Store,
        state: &LoginState,
        now: DateTime<Utc>,
    ) -> ApiResult<Failure> {
        let attempts_path = self.path("loginAttempts");
        let update = if state.window_expired(now) {
            Update::new(self.key.clone())
                .set(attempts_path.clone(), 1)
                .remove(self.path("lockedUntil"))
        } else {
            Update::new(self.key.clone()).increment(attempts_path.clone(), 1)
        };

        let doc = store
            .update(
                update
                    .set(self.path("lastFailedAt"), now.to_rfc3339())
                    .when(self.condition),
            )
            .await?;

        let attempts = self.state_of(&doc).login_attempts;
        let mut failure = Failure {
            attempts,
            locked_until: None,
        };

        if attempts >= MAX_FAILED_ATTEMPTS {
            let until = now + Duration::minutes(LOCK_MINUTES);
            store
                .update(
                    Update::new(self.key.clone())
                        .set(self.path("lockedUntil"), until.to_rfc3339())
                        .when(self.condition),
                )
                .await?;
            tracing::warn!("{} locked after {} failed attempts", self.key.pk, attempts);
            failure.locked_until = Some(until);
        }

        Ok(failure)
    }

    /// Update that clears the counters; callers may chain further sets
    pub fn reset(&self) -> Update {
        Update::new(self.key.clone())
            .set(self.path("loginAttempts"), 0)
            .remove(self.path("lockedUntil"))
            .remove(self.path("lastFailedAt"))
            .when(self.condition)
    }
}
