//! Domain models shared by the store and the server.
//!
//! All structs serialize with camelCase field names since they are handed
//! to browser clients as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_TEXT_LEN, PREVIEW_LEN};
use crate::types::{ConversationId, MessageId, ParticipantPair, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Public profile of a user, owned by the external profile store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// URL or blob reference of the avatar image.
    pub avatar: Option<String>,
}

/// Profile snapshot annotated with the user's current presence.
///
/// When the requested user is unknown only `id` and `online` are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceProfile {
    pub id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub online: bool,
}

impl PresenceProfile {
    pub fn new(id: UserId, profile: Option<UserProfile>, online: bool) -> Self {
        match profile {
            Some(p) => Self {
                id: p.id,
                name: Some(p.name),
                email: Some(p.email),
                avatar: p.avatar,
                online,
            },
            None => Self {
                id,
                name: None,
                email: None,
                avatar: None,
                online,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A direct-message conversation between exactly two users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: ParticipantPair,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Message content. At least one field must be non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        fn blank(field: &Option<String>) -> bool {
            field.as_deref().map_or(true, |s| s.trim().is_empty())
        }
        blank(&self.text) && blank(&self.image_url) && blank(&self.video_url)
    }

    /// Check the body is sendable: non-empty and text within bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("message body is empty".into());
        }
        if let Some(text) = &self.text {
            if text.len() > MAX_TEXT_LEN {
                return Err(format!(
                    "message text too long: {} bytes (max {MAX_TEXT_LEN})",
                    text.len()
                ));
            }
        }
        Ok(())
    }

    /// Short single-line preview for the sidebar. Whitespace runs collapse
    /// to one space and text past [`PREVIEW_LEN`] characters is cut with an
    /// ellipsis.
    pub fn preview(&self) -> String {
        if let Some(text) = self.text.as_deref().filter(|t| !t.trim().is_empty()) {
            let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if flat.chars().count() <= PREVIEW_LEN {
                return flat;
            }
            let mut cut: String = flat.chars().take(PREVIEW_LEN).collect();
            cut.truncate(cut.trim_end().len());
            cut.push('\u{2026}');
            return cut;
        }
        if self.image_url.is_some() {
            return "[image]".to_string();
        }
        if self.video_url.is_some() {
            return "[video]".to_string();
        }
        String::new()
    }
}

/// A single chat message. Only `seen` ever changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Position within the conversation, starting at 1.
    pub seq: i64,
    #[serde(rename = "msgByUserId")]
    pub author: UserId,
    #[serde(flatten)]
    pub body: MessageBody,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sidebar
// ---------------------------------------------------------------------------

/// Preview of the latest message of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: MessageId,
    #[serde(rename = "msgByUserId")]
    pub author: UserId,
    pub preview: String,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

/// One sidebar row, computed per viewer on every request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub counterpart: PresenceProfile,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
    pub updated_at: DateTime<Utc>,
}
