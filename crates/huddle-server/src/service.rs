//! Chat orchestration.
//!
//! Every operation re-reads current membership through the
//! [`MembershipAuthorizer`] at call time, mutates the store, and publishes
//! domain events for the real-time layer.  Authorization failures propagate
//! untouched; only unexpected store failures are translated at the boundary.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use huddle_shared::constants::{
    MAX_CHAT_NAME_LEN, MAX_DESCRIPTION_LEN, MAX_MESSAGE_LEN, MIN_CHAT_NAME_LEN,
};
use huddle_shared::protocol::MessageInput;
use huddle_shared::types::{
    ChatId, ChatMemberRole, ChatType, ChatVisibility, MessageId, OrganizationId, ProjectId,
    UserId,
};
use huddle_shared::views::{ChatQuery, ChatSummary, MessageQuery, MessageView, Paginated};
use huddle_store::{Attachment, Chat, ChatMember, ChatSettings, ChatUpdate, Message};

use crate::authorizer::MembershipAuthorizer;
use crate::error::ServerError;
use crate::fanout::{DomainEvent, EventFanout};
use crate::SharedDatabase;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatInput {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    pub visibility: Option<ChatVisibility>,
    pub organization_id: OrganizationId,
    pub project_id: Option<ProjectId>,
    /// Other members; the caller is always included implicitly.
    #[serde(default)]
    pub members: Vec<UserId>,
    pub settings: Option<ChatSettings>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChatInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<ChatVisibility>,
    pub avatar_url: Option<String>,
    pub settings: Option<ChatSettings>,
    pub is_archived: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMembersInput {
    pub user_ids: Vec<UserId>,
    pub role: Option<ChatMemberRole>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageInput {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadInput {
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionInput {
    pub emoji: String,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ChatService {
    store: SharedDatabase,
    authorizer: MembershipAuthorizer,
    fanout: EventFanout,
}

impl ChatService {
    pub fn new(store: SharedDatabase, fanout: EventFanout) -> Self {
        let authorizer = MembershipAuthorizer::new(store.clone());
        Self {
            store,
            authorizer,
            fanout,
        }
    }

    /// The single membership gate, shared with the socket gateway.
    pub fn authorizer(&self) -> &MembershipAuthorizer {
        &self.authorizer
    }

    // ------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------

    /// Create a chat.  Direct chats are idempotent: an existing thread
    /// between the same two users is returned unchanged.
    pub async fn create_chat(
        &self,
        input: CreateChatInput,
        caller: UserId,
    ) -> Result<ChatSummary, ServerError> {
        // Collapse duplicates and the caller's own id.
        let mut member_ids: Vec<UserId> = Vec::new();
        for id in input.members {
            if id != caller && !member_ids.contains(&id) {
                member_ids.push(id);
            }
        }

        let name = match input.chat_type {
            ChatType::Direct => {
                if member_ids.len() != 1 {
                    return Err(ServerError::BadRequest(
                        "a direct chat must have exactly 2 distinct members".to_string(),
                    ));
                }
                None
            }
            ChatType::Group => Some(validate_chat_name(input.name.as_deref())?),
        };
        let description = validate_description(input.description.as_deref())?;

        let mut db = self.store.lock().await;

        if input.chat_type == ChatType::Direct {
            let other = member_ids[0];
            if let Some(existing) =
                db.find_direct_chat(input.organization_id, caller, other)?
            {
                return Ok(db.chat_summary(&existing)?);
            }
        }

        let now = Utc::now();
        let chat = Chat {
            id: ChatId::new(),
            organization_id: input.organization_id,
            project_id: input.project_id,
            name,
            description,
            chat_type: input.chat_type,
            visibility: input.visibility.unwrap_or(ChatVisibility::Public),
            creator_id: caller,
            avatar_url: input.avatar_url,
            settings: input.settings.unwrap_or_default(),
            last_message_id: None,
            is_archived: false,
            created_at: now,
            updated_at: now,
        };

        let mut members = vec![ChatMember {
            chat_id: chat.id,
            user_id: caller,
            role: ChatMemberRole::Admin,
            joined_at: now,
        }];
        for user_id in member_ids {
            members.push(ChatMember {
                chat_id: chat.id,
                user_id,
                role: ChatMemberRole::Member,
                joined_at: now,
            });
        }

        db.create_chat(&chat, &members)?;

        info!(
            chat = %chat.id,
            chat_type = chat.chat_type.as_str(),
            creator = %caller,
            members = members.len(),
            "chat created"
        );

        Ok(db.chat_summary(&chat)?)
    }

    /// Chat detail.  Members may always read; public chats are readable by
    /// any authenticated caller.
    pub async fn get_chat(
        &self,
        chat_id: ChatId,
        caller: UserId,
    ) -> Result<ChatSummary, ServerError> {
        let chat = self.require_read_access(chat_id, caller).await?;
        Ok(self.store.lock().await.chat_summary(&chat)?)
    }

    /// Paginated chat list for a user within an organization.  This is a
    /// reporting query, never an authorization source.
    pub async fn get_user_chats(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        query: &ChatQuery,
    ) -> Result<Paginated<ChatSummary>, ServerError> {
        Ok(self
            .store
            .lock()
            .await
            .list_user_chat_summaries(user_id, organization_id, query)?)
    }

    pub async fn update_chat(
        &self,
        chat_id: ChatId,
        input: UpdateChatInput,
        caller: UserId,
    ) -> Result<ChatSummary, ServerError> {
        self.authorizer.resolve_membership(chat_id, caller).await?;

        let name = match input.name.as_deref() {
            Some(name) => Some(validate_chat_name(Some(name))?),
            None => None,
        };
        let description = validate_description(input.description.as_deref())?;

        let update = ChatUpdate {
            name,
            description,
            visibility: input.visibility,
            avatar_url: input.avatar_url,
            can_members_invite: input.settings.map(|s| s.can_members_invite),
            can_members_message: input.settings.map(|s| s.can_members_message),
            approval_required: input.settings.map(|s| s.approval_required),
            is_archived: input.is_archived,
        };

        let db = self.store.lock().await;
        db.update_chat(chat_id, &update, Utc::now())?;
        let chat = db.get_chat(chat_id)?;
        Ok(db.chat_summary(&chat)?)
    }

    /// Delete a chat.  Admin only; messages and membership cascade.  Terminal.
    pub async fn delete_chat(&self, chat_id: ChatId, caller: UserId) -> Result<(), ServerError> {
        self.authorizer.require_admin(chat_id, caller).await?;
        self.store.lock().await.delete_chat(chat_id)?;
        info!(chat = %chat_id, by = %caller, "chat deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add members.  Admin only.  Users already present are skipped and no
    /// notice is emitted for them; returns the net-new set.
    pub async fn add_members(
        &self,
        chat_id: ChatId,
        input: AddMembersInput,
        caller: UserId,
    ) -> Result<Vec<UserId>, ServerError> {
        self.authorizer.require_admin(chat_id, caller).await?;

        let role = input.role.unwrap_or(ChatMemberRole::Member);
        let now = Utc::now();
        let mut added = Vec::new();

        {
            let db = self.store.lock().await;
            for user_id in input.user_ids {
                if added.contains(&user_id) {
                    continue;
                }
                let inserted = db.add_member(&ChatMember {
                    chat_id,
                    user_id,
                    role,
                    joined_at: now,
                })?;
                if inserted {
                    added.push(user_id);
                }
            }
        }

        if !added.is_empty() {
            info!(chat = %chat_id, added = added.len(), by = %caller, "members added");
            self.fanout.publish(DomainEvent::MembersAdded {
                chat_id,
                user_ids: added.clone(),
                added_by: caller,
            });
        }

        Ok(added)
    }

    /// Remove a member.  Admin only; removing an absent user is a no-op.
    pub async fn remove_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        caller: UserId,
    ) -> Result<(), ServerError> {
        self.authorizer.require_admin(chat_id, caller).await?;
        let removed = self.store.lock().await.remove_member(chat_id, user_id)?;
        if removed {
            info!(chat = %chat_id, user = %user_id, by = %caller, "member removed");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Persist a message, then broadcast.  The last-message pointer update is
    /// best-effort and never fails the send.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        input: MessageInput,
        caller: UserId,
    ) -> Result<MessageView, ServerError> {
        let record = self.authorizer.resolve_membership(chat_id, caller).await?;

        if !record.chat.settings.can_members_message && !record.is_admin() {
            return Err(ServerError::Forbidden(
                "messaging is disabled for members of this chat".to_string(),
            ));
        }

        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(ServerError::BadRequest(
                "message content must not be empty".to_string(),
            ));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(ServerError::BadRequest(format!(
                "message content exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }

        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            chat_id,
            sender_id: caller,
            content,
            message_type: input.message_type,
            reply_to_id: input.reply_to,
            is_edited: false,
            edited_at: None,
            created_at: now,
            updated_at: now,
        };
        let attachments: Vec<Attachment> = input
            .attachments
            .into_iter()
            .map(|a| Attachment {
                message_id: message.id,
                url: a.url,
                name: a.name,
                mime_type: a.mime_type,
                size_bytes: a.size_bytes,
            })
            .collect();

        let view = {
            let mut db = self.store.lock().await;
            db.insert_message(&message, &attachments, &input.mentions)?;

            // Read-model denormalization; staleness is acceptable.
            if let Err(e) = db.set_last_message(chat_id, message.id, now) {
                warn!(chat = %chat_id, error = %e, "failed to update last-message pointer");
            }

            db.message_view(&message)?
        };

        info!(chat = %chat_id, message = %message.id, sender = %caller, "message sent");

        self.fanout.publish(DomainEvent::MessageCreated {
            chat_id,
            message: view.clone(),
        });

        Ok(view)
    }

    /// Paginated message history.  Members may always read; public chats are
    /// readable by any authenticated caller.
    pub async fn get_chat_messages(
        &self,
        chat_id: ChatId,
        query: &MessageQuery,
        caller: UserId,
    ) -> Result<Paginated<MessageView>, ServerError> {
        self.require_read_access(chat_id, caller).await?;
        Ok(self.store.lock().await.list_message_views(chat_id, query)?)
    }

    /// Edit a message.  Sender only.
    pub async fn update_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        input: UpdateMessageInput,
        caller: UserId,
    ) -> Result<MessageView, ServerError> {
        self.authorizer.resolve_membership(chat_id, caller).await?;

        let content = input.content.trim().to_string();
        if content.is_empty() || content.chars().count() > MAX_MESSAGE_LEN {
            return Err(ServerError::BadRequest(
                "invalid message content".to_string(),
            ));
        }

        let db = self.store.lock().await;
        let message = db.get_message(chat_id, message_id).map_err(not_found_message)?;
        if message.sender_id != caller {
            return Err(ServerError::Forbidden(
                "only the sender can update the message".to_string(),
            ));
        }

        db.update_message_content(chat_id, message_id, &content, Utc::now())?;
        let updated = db.get_message(chat_id, message_id)?;
        Ok(db.message_view(&updated)?)
    }

    /// Delete a message.  Sender only, never a silent no-op.
    pub async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        caller: UserId,
    ) -> Result<(), ServerError> {
        self.authorizer.resolve_membership(chat_id, caller).await?;

        let db = self.store.lock().await;
        let message = db.get_message(chat_id, message_id).map_err(not_found_message)?;
        if message.sender_id != caller {
            return Err(ServerError::Forbidden(
                "only the sender can delete the message".to_string(),
            ));
        }

        db.delete_message(chat_id, message_id)?;
        info!(chat = %chat_id, message = %message_id, "message deleted");
        Ok(())
    }

    /// Mark messages read.  Any member; ids outside the chat are ignored so
    /// racing clients stay idempotent.  Emits only when something was newly
    /// marked.
    pub async fn mark_messages_read(
        &self,
        chat_id: ChatId,
        message_ids: &[MessageId],
        caller: UserId,
    ) -> Result<Vec<MessageId>, ServerError> {
        self.authorizer.resolve_membership(chat_id, caller).await?;

        let newly_marked = self
            .store
            .lock()
            .await
            .mark_read(chat_id, caller, message_ids, Utc::now())?;

        if !newly_marked.is_empty() {
            self.fanout.publish(DomainEvent::MessageRead {
                chat_id,
                reader: caller,
                message_ids: newly_marked.clone(),
            });
        }

        Ok(newly_marked)
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    pub async fn add_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        input: ReactionInput,
        caller: UserId,
    ) -> Result<MessageView, ServerError> {
        self.authorizer.resolve_membership(chat_id, caller).await?;
        if input.emoji.trim().is_empty() {
            return Err(ServerError::BadRequest("emoji must not be empty".to_string()));
        }

        let db = self.store.lock().await;
        let message = db.get_message(chat_id, message_id).map_err(not_found_message)?;
        db.add_reaction(message_id, caller, input.emoji.trim(), Utc::now())?;
        Ok(db.message_view(&message)?)
    }

    pub async fn remove_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        input: ReactionInput,
        caller: UserId,
    ) -> Result<MessageView, ServerError> {
        self.authorizer.resolve_membership(chat_id, caller).await?;

        let db = self.store.lock().await;
        let message = db.get_message(chat_id, message_id).map_err(not_found_message)?;
        db.remove_reaction(message_id, caller, input.emoji.trim())?;
        Ok(db.message_view(&message)?)
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    /// Read gate: membership, or public visibility.
    async fn require_read_access(
        &self,
        chat_id: ChatId,
        caller: UserId,
    ) -> Result<Chat, ServerError> {
        match self.authorizer.resolve_membership(chat_id, caller).await {
            Ok(record) => Ok(record.chat),
            Err(ServerError::Forbidden(reason)) => {
                let db = self.store.lock().await;
                let chat = db.get_chat(chat_id)?;
                if chat.visibility == ChatVisibility::Public {
                    Ok(chat)
                } else {
                    Err(ServerError::Forbidden(reason))
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn not_found_message(err: huddle_store::StoreError) -> ServerError {
    match err {
        huddle_store::StoreError::NotFound => {
            ServerError::NotFound("message not found".to_string())
        }
        other => other.into(),
    }
}

fn validate_chat_name(name: Option<&str>) -> Result<String, ServerError> {
    let name = name.unwrap_or("").trim();
    if name.chars().count() < MIN_CHAT_NAME_LEN || name.chars().count() > MAX_CHAT_NAME_LEN {
        return Err(ServerError::BadRequest(format!(
            "chat name must be {MIN_CHAT_NAME_LEN}-{MAX_CHAT_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_description(description: Option<&str>) -> Result<Option<String>, ServerError> {
    match description {
        None => Ok(None),
        Some(d) => {
            let d = d.trim();
            if d.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(ServerError::BadRequest(format!(
                    "description exceeds {MAX_DESCRIPTION_LEN} characters"
                )));
            }
            Ok(Some(d.to_string()))
        }
    }
}
