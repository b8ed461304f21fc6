//! Per-user cooldowns for rate-limited commands.
//!
//! One ticket per (command, guild, user). Checking and setting happen under
//! one lock, so two racing invocations cannot both pass.

use crate::platform::{GuildId, UserId};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Cooldown rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CooldownError {
    /// A ticket is still active; the action must not run.
    #[error("cooldown active; retry after {retry_after_secs}s")]
    Active {
        /// Whole seconds until the ticket expires (at least 1).
        retry_after_secs: u64,
    },
}

/// Who a ticket belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub action: String,
    pub guild: Option<GuildId>,
    pub user: UserId,
}

impl CooldownKey {
    pub fn new(action: impl Into<String>, guild: Option<GuildId>, user: UserId) -> Self {
        Self {
            action: action.into(),
            guild,
            user,
        }
    }
}

/// Active tickets keyed by subject, each holding its expiry.
#[derive(Debug)]
pub struct Cooldowns {
    window: Duration,
    tickets: Mutex<HashMap<CooldownKey, Instant>>,
}

impl Cooldowns {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            tickets: Mutex::new(HashMap::new()),
        }
    }

    /// Take a ticket, or report how long the existing one still runs.
    pub fn try_acquire(&self, key: CooldownKey) -> Result<(), CooldownError> {
        if self.window.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        let mut tickets = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
        tickets.retain(|_, expires_at| *expires_at > now);

        if let Some(expires_at) = tickets.get(&key) {
            let remaining = expires_at.duration_since(now);
            let retry_after_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(CooldownError::Active {
                retry_after_secs: retry_after_secs.max(1),
            });
        }
        tickets.insert(key, now + self.window);
        Ok(())
    }

    /// Time left on a ticket, if one is active.
    #[must_use]
    pub fn remaining(&self, key: &CooldownKey) -> Option<Duration> {
        let now = Instant::now();
        self.tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|expires_at| **expires_at > now)
            .map(|expires_at| expires_at.duration_since(now))
    }
}
