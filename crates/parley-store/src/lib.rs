//! # parley-store
//!
//! SQLite-backed conversation and message storage for the Parley server.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for users,
//! conversations and messages, plus the [`ConversationRepository`] trait the
//! chat core is written against.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use repository::ConversationRepository;
