//! # Database models
//!
//! Rows of the session database, mapped with **Diesel**:
//!
//! - [`ConfigSnapshot`]: model settings in effect for a conversation.
//! - [`Conversation`]: a named chat session.
//! - [`Message`]: one user or assistant turn.
//!
//! The tables are declared in `crate::schema` and created on connect by
//! [`crate::session_store::establish_connection`].
use diesel::prelude::*;

/// Snapshot of the generation settings linked to a [`Conversation`].
///
/// A new row is written whenever the effective settings differ from the last
/// snapshot (see [`crate::config::ParleyConfig::ensure_conversation_and_config`]).
/// The API key is never stored.
#[derive(Queryable, Associations, Insertable, PartialEq, Debug)]
#[diesel(belongs_to(Conversation))]
#[diesel(table_name = crate::schema::config_snapshots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ConfigSnapshot {
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub api_base: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_response_tokens: i32,
    pub context_max_tokens: i32,
    pub assistant_minimum_context_tokens: i32,
    /// Comma-joined list of stop strings.
    pub stop_words: String,
    pub conversation_id: Option<i32>,
}

/// A named chat session.
#[derive(Queryable, Identifiable, Insertable, Debug, Selectable, Clone)]
#[diesel(table_name = crate::schema::conversations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Conversation {
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    /// Unique session name.
    pub session_name: String,
    /// Personality the session was started with.
    pub personality: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// One turn in a conversation.
///
/// `role` is `"user"` or `"assistant"`. `fallback` marks assistant turns that
/// were produced offline instead of by the model.
#[derive(Queryable, Associations, Insertable, Debug, Selectable, Clone)]
#[diesel(belongs_to(Conversation))]
#[diesel(table_name = crate::schema::messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Message {
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub role: String,
    pub content: String,
    pub fallback: bool,
    pub created_at: String,
    pub conversation_id: Option<i32>,
}
