//! # parley-shared
//!
//! Types shared by the Parley store and server: identifiers, domain models,
//! the WebSocket event protocol and the session-token format.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod token;
pub mod types;
