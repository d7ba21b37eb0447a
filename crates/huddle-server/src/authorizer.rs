//! The single membership gate.
//!
//! Both transports resolve authorization through this one implementation: the
//! REST handlers via [`ChatService`], the socket gateway on every explicit
//! `join`.  There is deliberately no second membership check anywhere else.
//!
//! [`ChatService`]: crate::service::ChatService

use huddle_shared::types::{ChatId, ChatMemberRole, UserId};
use huddle_store::{Chat, ChatMember, StoreError};

use crate::error::ServerError;
use crate::SharedDatabase;

/// The resolved `{chat, role, joinedAt}` binding for one caller.
#[derive(Debug, Clone)]
pub struct MembershipRecord {
    pub chat: Chat,
    pub member: ChatMember,
}

impl MembershipRecord {
    pub fn is_admin(&self) -> bool {
        self.member.role == ChatMemberRole::Admin
    }
}

#[derive(Clone)]
pub struct MembershipAuthorizer {
    store: SharedDatabase,
}

impl MembershipAuthorizer {
    pub fn new(store: SharedDatabase) -> Self {
        Self { store }
    }

    /// Load the chat and the caller's membership record.
    ///
    /// Fails `NotFound` when the chat does not exist and `Forbidden` when the
    /// caller is not in its member list.  Always reads current state; room
    /// membership from connect time is never consulted.
    pub async fn resolve_membership(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<MembershipRecord, ServerError> {
        let db = self.store.lock().await;

        let chat = db.get_chat(chat_id).map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound("chat not found".to_string()),
            other => other.into(),
        })?;

        let member = db
            .get_member(chat_id, user_id)?
            .ok_or_else(|| ServerError::Forbidden("not a member of this chat".to_string()))?;

        Ok(MembershipRecord { chat, member })
    }

    /// Resolve membership and additionally require the admin role.
    pub async fn require_admin(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<MembershipRecord, ServerError> {
        let record = self.resolve_membership(chat_id, user_id).await?;
        if !record.is_admin() {
            return Err(ServerError::Forbidden("admin role required".to_string()));
        }
        Ok(record)
    }
}
