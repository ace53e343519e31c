//! The storage interface consumed by the chat core.
//!
//! [`Database`] is the production implementation. The server only ever
//! talks to a `dyn ConversationRepository`, so tests can swap in a store
//! that fails on demand.

use parley_shared::models::{Conversation, Message, MessageBody, UserProfile};
use parley_shared::types::{ConversationId, ParticipantPair, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::ConversationOverview;

pub trait ConversationRepository: Send {
    /// Profile lookup in the user mirror.
    fn get_user(&self, id: &UserId) -> Result<Option<UserProfile>>;

    /// Insert or refresh a profile in the user mirror.
    fn upsert_user(&self, user: &UserProfile) -> Result<()>;

    /// Atomic find-or-create by unordered pair. Concurrent callers for the
    /// same pair all receive the same conversation.
    fn get_or_create_conversation(&mut self, pair: ParticipantPair) -> Result<Conversation>;

    /// Lookup by unordered pair without creating.
    fn find_conversation(&self, pair: ParticipantPair) -> Result<Option<Conversation>>;

    /// Append a message and bump the conversation's `updated_at`, atomically.
    fn append_message(
        &mut self,
        conversation: ConversationId,
        author: UserId,
        body: &MessageBody,
    ) -> Result<Message>;

    /// Messages in chronological order.
    fn list_messages(&self, conversation: ConversationId) -> Result<Vec<Message>>;

    /// Mark every unseen message by `author` as seen. Returns how many
    /// changed.
    fn mark_seen(&mut self, conversation: ConversationId, author: UserId) -> Result<usize>;

    /// Per-viewer aggregates with counterpart profiles, most recently
    /// updated first.
    fn list_conversation_overviews(&self, viewer: &UserId) -> Result<Vec<ConversationOverview>>;
}

impl ConversationRepository for Database {
    fn get_user(&self, id: &UserId) -> Result<Option<UserProfile>> {
        Database::get_user(self, id)
    }

    fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        Database::upsert_user(self, user)
    }

    fn get_or_create_conversation(&mut self, pair: ParticipantPair) -> Result<Conversation> {
        Database::get_or_create_conversation(self, pair)
    }

    fn find_conversation(&self, pair: ParticipantPair) -> Result<Option<Conversation>> {
        Database::find_conversation(self, pair)
    }

    fn append_message(
        &mut self,
        conversation: ConversationId,
        author: UserId,
        body: &MessageBody,
    ) -> Result<Message> {
        Database::append_message(self, conversation, author, body)
    }

    fn list_messages(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        Database::list_messages(self, conversation)
    }

    fn mark_seen(&mut self, conversation: ConversationId, author: UserId) -> Result<usize> {
        Database::mark_seen(self, conversation, author)
    }

    fn list_conversation_overviews(&self, viewer: &UserId) -> Result<Vec<ConversationOverview>> {
        Database::list_conversation_overviews(self, viewer)
    }
}
