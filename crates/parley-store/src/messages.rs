use chrono::{SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use parley_shared::types::{ConversationId, MessageId, UserId};

use crate::conversations::row_to_conversation;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{fmt_ts, parse_ts, parse_uuid, Message, MessageBody};

impl Database {
    /// Append a message to a conversation and bump its `updated_at`.
    ///
    /// Sequence assignment, insert and bump are one transaction.
    pub fn append_message(
        &mut self,
        conversation_id: ConversationId,
        author: UserId,
        body: &MessageBody,
    ) -> Result<Message> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let conversation = tx
            .query_row(
                "SELECT id, participant_low, participant_high, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                params![conversation_id.to_string()],
                row_to_conversation,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        if !conversation.participants.contains(&author) {
            return Err(StoreError::NotParticipant {
                user: author.to_string(),
                conversation: conversation_id.to_string(),
            });
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )?;

        let message = Message {
            id: MessageId::new(),
            conversation_id,
            seq,
            author,
            body: body.clone(),
            seen: false,
            // Stored with microsecond precision.
            created_at: Utc::now().trunc_subsecs(6),
        };
        let created = fmt_ts(&message.created_at);

        tx.execute(
            "INSERT INTO messages
                (id, conversation_id, seq, author, text, image_url, video_url, seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![
                message.id.to_string(),
                conversation_id.to_string(),
                seq,
                author.to_string(),
                message.body.text,
                message.body.image_url,
                message.body.video_url,
                created,
            ],
        )?;

        tx.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![created, conversation_id.to_string()],
        )?;

        tx.commit()?;
        Ok(message)
    }

    /// All messages of a conversation in chronological order.
    pub fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, seq, author, text, image_url, video_url, seen, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Flip `seen` to true on every unseen message `author` wrote in the
    /// conversation. Returns the number of messages that changed.
    pub fn mark_seen(&mut self, conversation_id: ConversationId, author: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET seen = 1
             WHERE conversation_id = ?1 AND author = ?2 AND seen = 0",
            params![conversation_id.to_string(), author.to_string()],
        )?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let author_str: String = row.get(3)?;
    let created_str: String = row.get(8)?;

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        conversation_id: ConversationId(parse_uuid(1, &conversation_str)?),
        seq: row.get(2)?,
        author: UserId(parse_uuid(3, &author_str)?),
        body: MessageBody {
            text: row.get(4)?,
            image_url: row.get(5)?,
            video_url: row.get(6)?,
        },
        seen: row.get(7)?,
        created_at: parse_ts(8, &created_str)?,
    })
}
