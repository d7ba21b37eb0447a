//! Presence tracking.
//!
//! A user is online or offline with a last-seen timestamp.  The columns are
//! persisted through the store but mutated only here, and only from the
//! connection lifecycle (the gateway).

use chrono::{DateTime, Utc};

use huddle_shared::types::{PresenceStatus, UserId};

use crate::error::ServerError;
use crate::SharedDatabase;

/// The record handed to the fan-out after a transition.
#[derive(Debug, Clone, Copy)]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    store: SharedDatabase,
}

impl PresenceTracker {
    pub fn new(store: SharedDatabase) -> Self {
        Self { store }
    }

    pub async fn set_online(&self, user_id: UserId) -> Result<PresenceUpdate, ServerError> {
        self.transition(user_id, PresenceStatus::Online).await
    }

    pub async fn set_offline(&self, user_id: UserId) -> Result<PresenceUpdate, ServerError> {
        self.transition(user_id, PresenceStatus::Offline).await
    }

    async fn transition(
        &self,
        user_id: UserId,
        status: PresenceStatus,
    ) -> Result<PresenceUpdate, ServerError> {
        let last_seen_at = Utc::now();
        self.store
            .lock()
            .await
            .set_presence(user_id, status, last_seen_at)?;

        tracing::debug!(user = %user_id, status = status.as_str(), "presence transition");

        Ok(PresenceUpdate {
            user_id,
            status,
            last_seen_at,
        })
    }
}
