//! Mirror of the external user-profile store.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parley_shared::types::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::models::{fmt_ts, parse_uuid, UserProfile};

impl Database {
    /// Insert a profile or refresh the existing row with the same id.
    pub fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, email, avatar, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                avatar = excluded.avatar",
            params![
                user.id.to_string(),
                user.name,
                user.email,
                user.avatar,
                fmt_ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &UserId) -> Result<Option<UserProfile>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, name, email, avatar FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    let id_str: String = row.get(0)?;

    Ok(UserProfile {
        id: UserId(parse_uuid(0, &id_str)?),
        name: row.get(1)?,
        email: row.get(2)?,
        avatar: row.get(3)?,
    })
}
