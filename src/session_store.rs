//! # Session store
//!
//! SQLite persistence (via Diesel) for named chat sessions:
//!
//! - bootstrapping the schema on connect,
//! - appending user and assistant turns,
//! - loading a session back for resumption or export,
//! - listing, clearing and importing sessions.
//!
//! A store is bound to one conversation row; create it with
//! [`SessionStore::open`], which also records the settings snapshot.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::{Connection, SqliteConnection};
use tracing::{debug, info};

use crate::config::ParleyConfig;
use crate::error::Result;
use crate::memory::{Role, Turn};
use crate::models::{Conversation, Message};
use crate::schema::{config_snapshots, conversations, messages};
use crate::transcript::{Transcript, TranscriptEntry};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    session_name TEXT NOT NULL UNIQUE,
    personality TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    fallback BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    conversation_id INTEGER REFERENCES conversations(id)
);
CREATE TABLE IF NOT EXISTS config_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    api_base TEXT NOT NULL,
    model TEXT NOT NULL,
    temperature REAL,
    max_response_tokens INTEGER NOT NULL,
    context_max_tokens INTEGER NOT NULL,
    assistant_minimum_context_tokens INTEGER NOT NULL,
    stop_words TEXT NOT NULL,
    conversation_id INTEGER REFERENCES conversations(id)
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
"#;

/// Open `db_url` and make sure the tables exist.
pub fn establish_connection(db_url: &str) -> Result<SqliteConnection> {
    let mut connection = SqliteConnection::establish(db_url)?;
    connection.batch_execute(SCHEMA_SQL)?;
    Ok(connection)
}

/// Summary row for `parley sessions`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_name: String,
    pub personality: String,
    pub created_at: String,
    pub message_count: i64,
}

/// Persistence handle for one conversation.
pub struct SessionStore {
    conversation: Conversation,
    connection: SqliteConnection,
}

impl SessionStore {
    /// Open (creating if needed) the session named `session_name`.
    pub fn open(config: &mut ParleyConfig, session_name: &str, personality: &str) -> Result<Self> {
        let conversation = config.ensure_conversation_and_config(session_name, personality)?;
        let connection = establish_connection(&config.session_db_url)?;
        debug!("Opened session {session_name} ({:?})", conversation.id);
        Ok(Self {
            conversation,
            connection,
        })
    }

    pub fn session_name(&self) -> &str {
        &self.conversation.session_name
    }

    /// Personality recorded when the session was created.
    pub fn personality(&self) -> &str {
        &self.conversation.personality
    }

    /// Persist one turn.
    pub fn append(&mut self, turn: &Turn, fallback: bool) -> Result<Message> {
        let message = Message {
            id: None,
            role: turn.role.to_string(),
            content: turn.content.clone(),
            fallback,
            created_at: chrono::Utc::now().to_rfc3339(),
            conversation_id: self.conversation.id,
        };

        let message = self.connection.transaction(|conn| {
            diesel::insert_into(messages::table)
                .values(&message)
                .returning(Message::as_returning())
                .get_result(conn)
        })?;

        Ok(message)
    }

    /// All messages of the session, oldest first.
    pub fn messages(&mut self) -> Result<Vec<Message>> {
        let rows = messages::table
            .filter(messages::conversation_id.eq(self.conversation.id))
            .order(messages::id.asc())
            .select(Message::as_select())
            .load(&mut self.connection)?;
        Ok(rows)
    }

    /// The session as turns, skipping rows with an unknown role.
    pub fn turns(&mut self) -> Result<Vec<Turn>> {
        Ok(self
            .messages()?
            .into_iter()
            .filter_map(|m| Role::parse(&m.role).map(|role| Turn::new(role, m.content)))
            .collect())
    }

    /// The session as an exportable transcript.
    pub fn transcript(&mut self) -> Result<Transcript> {
        let mut transcript = Transcript::new(
            Some(self.conversation.session_name.clone()),
            self.conversation.personality.clone(),
        );
        for message in self.messages()? {
            let Some(role) = Role::parse(&message.role) else {
                continue;
            };
            let timestamp = chrono::DateTime::parse_from_rfc3339(&message.created_at)
                .map(|t| t.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now());
            transcript.messages.push(TranscriptEntry {
                role,
                content: message.content,
                timestamp,
                fallback: message.fallback,
            });
        }
        Ok(transcript)
    }

    /// Delete every message of the session. The conversation row stays.
    pub fn clear(&mut self) -> Result<usize> {
        let deleted = diesel::delete(
            messages::table.filter(messages::conversation_id.eq(self.conversation.id)),
        )
        .execute(&mut self.connection)?;
        info!("Cleared {deleted} messages from {}", self.session_name());
        Ok(deleted)
    }

    /// Append every entry of `transcript` in one transaction.
    pub fn import(&mut self, transcript: &Transcript) -> Result<usize> {
        let conversation_id = self.conversation.id;
        let rows: Vec<Message> = transcript
            .messages
            .iter()
            .map(|entry| Message {
                id: None,
                role: entry.role.to_string(),
                content: entry.content.clone(),
                fallback: entry.fallback,
                created_at: entry.timestamp.to_rfc3339(),
                conversation_id,
            })
            .collect();

        let inserted = self.connection.transaction(|conn| {
            let mut inserted = 0;
            for row in &rows {
                inserted += diesel::insert_into(messages::table)
                    .values(row)
                    .execute(conn)?;
            }
            Ok::<_, diesel::result::Error>(inserted)
        })?;
        Ok(inserted)
    }
}

/// Every stored session with its message count, by name.
pub fn list_sessions(db_url: &str) -> Result<Vec<SessionSummary>> {
    let mut connection = establish_connection(db_url)?;
    let rows: Vec<Conversation> = conversations::table
        .order(conversations::session_name.asc())
        .select(Conversation::as_select())
        .load(&mut connection)?;

    let mut summaries = Vec::with_capacity(rows.len());
    for conversation in rows {
        let message_count: i64 = messages::table
            .filter(messages::conversation_id.eq(conversation.id))
            .count()
            .get_result(&mut connection)?;
        summaries.push(SessionSummary {
            session_name: conversation.session_name,
            personality: conversation.personality,
            created_at: conversation.created_at,
            message_count,
        });
    }
    Ok(summaries)
}

/// Remove a session entirely. Returns `false` when it did not exist.
pub fn delete_session(db_url: &str, session_name: &str) -> Result<bool> {
    let mut connection = establish_connection(db_url)?;
    let removed = connection.transaction::<_, crate::error::ParleyError, _>(|conn| {
        let conversation: Option<Conversation> = conversations::table
            .filter(conversations::session_name.eq(session_name))
            .select(Conversation::as_select())
            .first(conn)
            .optional()?;
        let Some(id) = conversation.and_then(|c| c.id) else {
            return Ok(false);
        };
        diesel::delete(messages::table.filter(messages::conversation_id.eq(id)))
            .execute(conn)?;
        diesel::delete(config_snapshots::table.filter(config_snapshots::conversation_id.eq(id)))
            .execute(conn)?;
        diesel::delete(conversations::table.filter(conversations::id.eq(id))).execute(conn)?;
        Ok(true)
    })?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config(dir: &TempDir) -> ParleyConfig {
        ParleyConfig {
            session_db_url: dir.path().join("parley.db").to_string_lossy().into_owned(),
            ..ParleyConfig::default()
        }
    }

    #[test]
    fn test_append_and_reload_preserves_order() {
        let dir = TempDir::new().unwrap();
        let mut config = temp_config(&dir);
        let mut store = SessionStore::open(&mut config, "demo", "assistant").unwrap();

        store.append(&Turn::new(Role::User, "hi".into()), false).unwrap();
        store
            .append(&Turn::new(Role::Assistant, "hello!".into()), false)
            .unwrap();
        store.append(&Turn::new(Role::User, "bye".into()), false).unwrap();

        let mut reopened = SessionStore::open(&mut config, "demo", "assistant").unwrap();
        let turns = reopened.turns().unwrap();
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "hello!", "bye"]);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let dir = TempDir::new().unwrap();
        let mut config = temp_config(&dir);
        let mut a = SessionStore::open(&mut config, "a", "assistant").unwrap();
        let mut b = SessionStore::open(&mut config, "b", "tutor").unwrap();

        a.append(&Turn::new(Role::User, "only in a".into()), false)
            .unwrap();
        assert!(b.messages().unwrap().is_empty());
        assert_eq!(b.personality(), "tutor");

        let sessions = list_sessions(&config.session_db_url).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_name, "a");
        assert_eq!(sessions[0].message_count, 1);
        assert_eq!(sessions[1].message_count, 0);
    }

    #[test]
    fn test_clear_and_import() {
        let dir = TempDir::new().unwrap();
        let mut config = temp_config(&dir);
        let mut store = SessionStore::open(&mut config, "demo", "assistant").unwrap();
        store.append(&Turn::new(Role::User, "one".into()), false).unwrap();
        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.messages().unwrap().is_empty());

        let mut transcript = Transcript::new(None, "assistant".into());
        transcript.push(Role::User, "imported question".into());
        transcript.push(Role::Assistant, "imported answer".into());
        assert_eq!(store.import(&transcript).unwrap(), 2);

        let exported = store.transcript().unwrap();
        assert_eq!(exported.session.as_deref(), Some("demo"));
        assert_eq!(exported.messages.len(), 2);
        assert_eq!(exported.messages[1].content, "imported answer");
    }

    #[test]
    fn test_fallback_flag_round_trips_through_export_and_import() {
        let dir = TempDir::new().unwrap();
        let mut config = temp_config(&dir);
        let mut store = SessionStore::open(&mut config, "source", "assistant").unwrap();
        store.append(&Turn::new(Role::User, "hello?".into()), false).unwrap();
        store
            .append(&Turn::new(Role::Assistant, "offline reply".into()), true)
            .unwrap();

        let exported = store.transcript().unwrap();
        assert!(!exported.messages[0].fallback);
        assert!(exported.messages[1].fallback);

        let json = exported.to_json().unwrap();
        let mut target = SessionStore::open(&mut config, "target", "assistant").unwrap();
        target.import(&Transcript::from_json(&json).unwrap()).unwrap();
        let flags: Vec<bool> = target.messages().unwrap().iter().map(|m| m.fallback).collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn test_delete_session() {
        let dir = TempDir::new().unwrap();
        let mut config = temp_config(&dir);
        let mut store = SessionStore::open(&mut config, "gone", "assistant").unwrap();
        store.append(&Turn::new(Role::User, "x".into()), false).unwrap();
        drop(store);

        let mut kept = SessionStore::open(&mut config, "kept", "assistant").unwrap();
        kept.append(&Turn::new(Role::User, "y".into()), false).unwrap();

        assert!(delete_session(&config.session_db_url, "gone").unwrap());
        assert!(!delete_session(&config.session_db_url, "gone").unwrap());
        let sessions = list_sessions(&config.session_db_url).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_name, "kept");
        assert_eq!(kept.messages().unwrap().len(), 1);

        let mut reopened = SessionStore::open(&mut config, "gone", "assistant").unwrap();
        assert!(reopened.messages().unwrap().is_empty());
    }
}
