//! Conversation resolution, message fan-out, seen-state updates and sidebar
//! aggregation.
//!
//! Every operation reads what it needs from the repository first and only
//! then pushes to routing groups, so a storage failure never produces a
//! partial broadcast. Repository work runs through a [`RepositoryPool`] so a
//! slow call never holds up unrelated connections.

use thiserror::Error;
use tracing::{debug, info};

use parley_shared::models::{
    Conversation, ConversationSummary, Message, MessageBody, PresenceProfile, UserProfile,
};
use parley_shared::protocol::ServerEvent;
use parley_shared::types::{ConnectionId, ParticipantPair, UserId};
use parley_store::{ConversationOverview, StoreError};

use crate::presence::PresenceService;
use crate::registry::ConnectionRegistry;
use crate::repo_pool::RepositoryPool;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid event: {0}")]
    Validation(String),

    #[error("Connection is not authenticated")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Clone)]
pub struct ChatService {
    pool: RepositoryPool,
    presence: PresenceService,
    registry: ConnectionRegistry,
}

impl ChatService {
    pub fn new(
        pool: RepositoryPool,
        presence: PresenceService,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            pool,
            presence,
            registry,
        }
    }

    pub fn presence(&self) -> &PresenceService {
        &self.presence
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn user_exists(&self, user: &UserId) -> Result<bool> {
        let user = *user;
        self.pool
            .run(move |repo| Ok(repo.get_user(&user)?.is_some()))
            .await
    }

    /// Insert or refresh a profile in the user mirror.
    pub async fn register_user(&self, profile: UserProfile) -> Result<()> {
        if profile.name.trim().is_empty() {
            return Err(ChatError::Validation("user name is empty".into()));
        }
        let id = profile.id;
        self.pool
            .run(move |repo| Ok(repo.upsert_user(&profile)?))
            .await?;
        info!(user = %id.short(), "User profile registered");
        Ok(())
    }

    /// Find or create the conversation between two distinct users.
    pub async fn resolve_conversation(&self, a: UserId, b: UserId) -> Result<Conversation> {
        let pair = distinct_pair(a, b)?;
        self.pool
            .run(move |repo| Ok(repo.get_or_create_conversation(pair)?))
            .await
    }

    /// Persist a message, then deliver the conversation and both sidebars
    /// to the two participants. The receiver must be in the user mirror.
    pub async fn send_message(
        &self,
        sender: UserId,
        receiver: UserId,
        body: MessageBody,
    ) -> Result<Message> {
        let pair = distinct_pair(sender, receiver)?;
        body.validate().map_err(ChatError::Validation)?;

        let (message, history, sender_rows, receiver_rows) = self
            .pool
            .run(move |repo| {
                if repo.get_user(&receiver)?.is_none() {
                    return Err(ChatError::Validation(format!(
                        "unknown receiver {}",
                        receiver.short()
                    )));
                }
                let conversation = repo.get_or_create_conversation(pair)?;
                let message = repo.append_message(conversation.id, sender, &body)?;
                let history = repo.list_messages(conversation.id)?;
                let sender_rows = repo.list_conversation_overviews(&sender)?;
                let receiver_rows = repo.list_conversation_overviews(&receiver)?;
                Ok((message, history, sender_rows, receiver_rows))
            })
            .await?;

        let sender_sidebar = self.annotate(sender_rows).await;
        let receiver_sidebar = self.annotate(receiver_rows).await;

        let view = ServerEvent::Message(history);
        let reached = self.registry.send_to_user(&sender, &view).await
            + self.registry.send_to_user(&receiver, &view).await;
        self.registry
            .send_to_user(&sender, &ServerEvent::Conversation(sender_sidebar))
            .await;
        self.registry
            .send_to_user(&receiver, &ServerEvent::Conversation(receiver_sidebar))
            .await;

        info!(
            conversation_id = %message.conversation_id,
            sender = %sender.short(),
            receiver = %receiver.short(),
            seq = message.seq,
            reached,
            "Message delivered"
        );

        Ok(message)
    }

    /// Counterpart profile and message history. Never creates a
    /// conversation.
    pub async fn load_conversation(
        &self,
        viewer: UserId,
        counterpart: UserId,
    ) -> Result<(PresenceProfile, Vec<Message>)> {
        let (profile, messages) = self
            .pool
            .run(move |repo| {
                let profile = repo.get_user(&counterpart)?;
                let messages = if viewer == counterpart {
                    Vec::new()
                } else {
                    match repo.find_conversation(ParticipantPair::new(viewer, counterpart))? {
                        Some(conversation) => repo.list_messages(conversation.id)?,
                        None => Vec::new(),
                    }
                };
                Ok((profile, messages))
            })
            .await?;

        let online = self.presence.is_online(&counterpart).await;
        Ok((PresenceProfile::new(counterpart, profile, online), messages))
    }

    pub async fn list_conversations(&self, viewer: UserId) -> Result<Vec<ConversationSummary>> {
        let rows = self
            .pool
            .run(move |repo| Ok(repo.list_conversation_overviews(&viewer)?))
            .await?;
        Ok(self.annotate(rows).await)
    }

    /// Push `message-user` then `message` to the requesting connection.
    pub async fn open_page(
        &self,
        connection: ConnectionId,
        viewer: UserId,
        counterpart: UserId,
    ) -> Result<()> {
        let (profile, messages) = self.load_conversation(viewer, counterpart).await?;
        self.registry
            .send_to_connection(connection, ServerEvent::MessageUser(profile))
            .await;
        self.registry
            .send_to_connection(connection, ServerEvent::Message(messages))
            .await;
        Ok(())
    }

    pub async fn push_sidebar(&self, connection: ConnectionId, viewer: UserId) -> Result<()> {
        let sidebar = self.list_conversations(viewer).await?;
        self.registry
            .send_to_connection(connection, ServerEvent::Conversation(sidebar))
            .await;
        Ok(())
    }

    /// Mark every message the counterpart sent to the viewer as seen, then
    /// refresh both sidebars. A pair without a conversation is a no-op.
    pub async fn mark_seen(&self, viewer: UserId, counterpart: UserId) -> Result<usize> {
        if viewer == counterpart {
            return Ok(0);
        }

        let updated = self
            .pool
            .run(move |repo| {
                let Some(conversation) =
                    repo.find_conversation(ParticipantPair::new(viewer, counterpart))?
                else {
                    return Ok(None);
                };
                let changed = repo.mark_seen(conversation.id, counterpart)?;
                let viewer_rows = repo.list_conversation_overviews(&viewer)?;
                let counterpart_rows = repo.list_conversation_overviews(&counterpart)?;
                Ok(Some((changed, viewer_rows, counterpart_rows)))
            })
            .await?;

        let Some((changed, viewer_rows, counterpart_rows)) = updated else {
            debug!(viewer = %viewer.short(), "Seen without a conversation");
            return Ok(0);
        };

        let viewer_sidebar = self.annotate(viewer_rows).await;
        let counterpart_sidebar = self.annotate(counterpart_rows).await;
        self.registry
            .send_to_user(&viewer, &ServerEvent::Conversation(viewer_sidebar))
            .await;
        self.registry
            .send_to_user(&counterpart, &ServerEvent::Conversation(counterpart_sidebar))
            .await;

        debug!(viewer = %viewer.short(), changed, "Messages marked seen");
        Ok(changed)
    }

    async fn annotate(&self, rows: Vec<ConversationOverview>) -> Vec<ConversationSummary> {
        let mut summaries = Vec::with_capacity(rows.len());
        for overview in rows {
            let online = self.presence.is_online(&overview.counterpart).await;
            summaries.push(ConversationSummary {
                conversation_id: overview.conversation.id,
                counterpart: PresenceProfile::new(
                    overview.counterpart,
                    overview.counterpart_profile,
                    online,
                ),
                last_message: overview.last_message,
                unread_count: overview.unread_count,
                updated_at: overview.conversation.updated_at,
            });
        }
        summaries
    }
}

fn distinct_pair(a: UserId, b: UserId) -> Result<ParticipantPair> {
    let pair = ParticipantPair::new(a, b);
    if pair.is_self_pair() {
        return Err(ChatError::Validation(
            "a conversation needs two distinct participants".into(),
        ));
    }
    Ok(pair)
}
