//! Conversation lookup, atomic creation and per-viewer aggregates.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use parley_shared::models::{Conversation, LastMessage};
use parley_shared::types::{ConversationId, MessageId, ParticipantPair, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{fmt_ts, parse_ts, parse_uuid, ConversationOverview, MessageBody, UserProfile};

const SELECT_CONVERSATION: &str = "SELECT id, participant_low, participant_high, created_at, updated_at
     FROM conversations
     WHERE participant_low = ?1 AND participant_high = ?2";

impl Database {
    /// Return the conversation of `pair`, creating it if none exists.
    ///
    /// Insert and re-read run in one `IMMEDIATE` transaction; the unique
    /// index on the normalized pair makes the insert a no-op for every
    /// caller but the first, so all callers observe the same row.
    pub fn get_or_create_conversation(&mut self, pair: ParticipantPair) -> Result<Conversation> {
        if pair.is_self_pair() {
            return Err(StoreError::NotParticipant {
                user: pair.low().to_string(),
                conversation: "<self>".into(),
            });
        }

        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = fmt_ts(&Utc::now());
        let inserted = tx.execute(
            "INSERT INTO conversations (id, participant_low, participant_high, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(participant_low, participant_high) DO NOTHING",
            params![
                ConversationId::new().to_string(),
                pair.low().to_string(),
                pair.high().to_string(),
                now,
            ],
        )?;

        let conversation = tx.query_row(
            SELECT_CONVERSATION,
            params![pair.low().to_string(), pair.high().to_string()],
            row_to_conversation,
        )?;
        tx.commit()?;

        if inserted > 0 {
            tracing::debug!(conversation = %conversation.id, "created conversation");
        }

        Ok(conversation)
    }

    /// Read-only lookup by unordered pair. Never creates.
    pub fn find_conversation(&self, pair: ParticipantPair) -> Result<Option<Conversation>> {
        let conversation = self
            .conn()
            .query_row(
                SELECT_CONVERSATION,
                params![pair.low().to_string(), pair.high().to_string()],
                row_to_conversation,
            )
            .optional()?;
        Ok(conversation)
    }

    /// Every conversation `viewer` takes part in, most recently updated
    /// first, with its last message, the viewer's unread count and the
    /// counterpart's profile when the mirror has one.
    pub fn list_conversation_overviews(&self, viewer: &UserId) -> Result<Vec<ConversationOverview>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.participant_low, c.participant_high, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM messages u
                      WHERE u.conversation_id = c.id AND u.author <> ?1 AND u.seen = 0),
                    m.id, m.author, m.text, m.image_url, m.video_url, m.seen, m.created_at,
                    p.name, p.email, p.avatar
             FROM conversations c
             LEFT JOIN messages m
                    ON m.conversation_id = c.id
                   AND m.seq = (SELECT MAX(seq) FROM messages WHERE conversation_id = c.id)
             LEFT JOIN users p
                    ON p.id = CASE WHEN c.participant_low = ?1
                                   THEN c.participant_high ELSE c.participant_low END
             WHERE c.participant_low = ?1 OR c.participant_high = ?1
             ORDER BY c.updated_at DESC, c.id ASC",
        )?;

        let rows = stmt.query_map(params![viewer.to_string()], |row| {
            let conversation = row_to_conversation(row)?;
            let unread: u32 = row.get(5)?;

            let last_id: Option<String> = row.get(6)?;
            let last_message = match last_id {
                Some(id_str) => {
                    let author_str: String = row.get(7)?;
                    let body = MessageBody {
                        text: row.get(8)?,
                        image_url: row.get(9)?,
                        video_url: row.get(10)?,
                    };
                    let created_str: String = row.get(12)?;
                    Some(LastMessage {
                        id: MessageId(parse_uuid(6, &id_str)?),
                        author: UserId(parse_uuid(7, &author_str)?),
                        preview: body.preview(),
                        seen: row.get(11)?,
                        created_at: parse_ts(12, &created_str)?,
                    })
                }
                None => None,
            };

            let name: Option<String> = row.get(13)?;
            let profile = match name {
                Some(name) => Some((
                    name,
                    row.get::<_, String>(14)?,
                    row.get::<_, Option<String>>(15)?,
                )),
                None => None,
            };

            Ok((conversation, unread, last_message, profile))
        })?;

        let mut overviews = Vec::new();
        for row in rows {
            let (conversation, unread_count, last_message, profile) = row?;
            let Some(counterpart) = conversation.participants.counterpart(viewer) else {
                continue;
            };
            overviews.push(ConversationOverview {
                conversation,
                counterpart,
                counterpart_profile: profile.map(|(name, email, avatar)| UserProfile {
                    id: counterpart,
                    name,
                    email,
                    avatar,
                }),
                last_message,
                unread_count,
            });
        }
        Ok(overviews)
    }
}

/// Map the first five columns of a row to a [`Conversation`].
pub(crate) fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let low_str: String = row.get(1)?;
    let high_str: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let updated_str: String = row.get(4)?;

    Ok(Conversation {
        id: ConversationId(parse_uuid(0, &id_str)?),
        participants: ParticipantPair::new(
            UserId(parse_uuid(1, &low_str)?),
            UserId(parse_uuid(2, &high_str)?),
        ),
        created_at: parse_ts(3, &created_str)?,
        updated_at: parse_ts(4, &updated_str)?,
    })
}
