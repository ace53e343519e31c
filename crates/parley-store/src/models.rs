//! Store-side aggregates and column conversions.
//!
//! The persisted entities themselves live in `parley_shared::models` since
//! the server hands them to clients unchanged.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use parley_shared::models::{Conversation, LastMessage};
use parley_shared::types::UserId;

pub use parley_shared::models::{Message, MessageBody, UserProfile};

/// One conversation as seen by a viewer, before presence and profile
/// annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationOverview {
    pub conversation: Conversation,
    pub counterpart: UserId,
    /// `None` when the counterpart is missing from the user mirror.
    pub counterpart_profile: Option<UserProfile>,
    pub last_message: Option<LastMessage>,
    /// Messages authored by the counterpart that are still unseen.
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Fixed-width RFC-3339 so that text ordering matches time ordering.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
