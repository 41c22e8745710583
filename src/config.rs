//! Loading and validating Parley's configuration.
//!
//! The configuration is a YAML file (by default `<config_dir>/config.yaml`).
//! Every key has a default, so a file containing only `model: gpt-4o` is valid.
//!
//! ```yaml
//! api_base: "https://api.openai.com/v1"
//! model: "gpt-3.5-turbo"
//! temperature: 0.7
//! max_response_tokens: 1024
//! context_max_tokens: 4096
//! assistant_minimum_context_tokens: 1024
//! personality: "assistant"
//! retrieval:
//!   chunk_size: 1000
//!   chunk_overlap: 200
//!   top_k: 3
//!   embedding_backend: minilm
//! ```
//!
//! The API key is usually not stored in the file. [`ParleyConfig::resolve_api_key`]
//! reads `PARLEY_API_KEY` and then `OPENAI_API_KEY`.

use crate::error::{ParleyError, Result};
use crate::models::*;
use crate::session_store::establish_connection;
use diesel::prelude::*;

use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use tracing::*;

/// Environment variables checked, in order, for the API key.
pub const API_KEY_VARS: [&str; 2] = ["PARLEY_API_KEY", "OPENAI_API_KEY"];

/// Which embedding model backs the knowledge base.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// `all-MiniLM-L6-v2` through candle, downloaded from the Hugging Face Hub.
    #[default]
    MiniLm,
    /// Offline feature hashing. No download, weaker recall.
    Hashing,
}

/// Chunking and retrieval parameters for document Q&A.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    pub embedding_backend: EmbeddingBackend,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 3,
            embedding_backend: EmbeddingBackend::MiniLm,
        }
    }
}

/// The application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct ParleyConfig {
    /// API key. Prefer the environment; see [`API_KEY_VARS`].
    pub api_key: String,

    /// Base URL of the OpenAI compatible API.
    pub api_base: String,

    /// Model requested for chat completions.
    pub model: String,

    /// Sampling temperature. `None` uses the personality's preferred value.
    pub temperature: Option<f32>,

    /// Upper bound on tokens generated per reply.
    pub max_response_tokens: u32,

    /// Context window of the model.
    pub context_max_tokens: u32,

    /// Part of the context window kept free for the reply.
    pub assistant_minimum_context_tokens: u32,

    pub stop_words: Vec<String>,

    /// SQLite database holding persisted sessions.
    pub session_db_url: String,

    /// Persist and resume under this name. `None` keeps the chat in memory.
    pub session_name: Option<String>,

    pub should_stream: bool,

    /// Name of the personality preset used by default.
    pub personality: String,

    /// Answer with generic responses when the API cannot be reached.
    pub fallback_enabled: bool,

    pub retrieval: RetrievalConfig,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: None,
            max_response_tokens: 1024,
            context_max_tokens: 4096,
            assistant_minimum_context_tokens: 1024,
            stop_words: Vec::new(),
            session_db_url: "parley.db".to_string(),
            session_name: None,
            should_stream: true,
            personality: "assistant".to_string(),
            fallback_enabled: true,
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl ParleyConfig {
    /// Check the invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<()> {
        let retrieval = &self.retrieval;
        if retrieval.chunk_size == 0 {
            return Err(ParleyError::Config("retrieval.chunk_size must be > 0".into()));
        }
        if retrieval.chunk_overlap >= retrieval.chunk_size {
            return Err(ParleyError::Config(format!(
                "retrieval.chunk_overlap ({}) must be smaller than chunk_size ({})",
                retrieval.chunk_overlap, retrieval.chunk_size
            )));
        }
        if retrieval.top_k == 0 {
            return Err(ParleyError::Config("retrieval.top_k must be > 0".into()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ParleyError::Config(format!(
                    "temperature must be within 0.0..=2.0, got {t}"
                )));
            }
        }
        if self.assistant_minimum_context_tokens >= self.context_max_tokens {
            return Err(ParleyError::Config(
                "assistant_minimum_context_tokens must be smaller than context_max_tokens".into(),
            ));
        }
        Ok(())
    }

    /// Tokens available to the prompt (system prompt, context, memory, question).
    pub fn prompt_budget(&self) -> usize {
        (self.context_max_tokens - self.assistant_minimum_context_tokens) as usize
    }

    /// Fill `api_key` from the environment when a variable is set.
    ///
    /// The first non-empty variable in [`API_KEY_VARS`] wins over the file.
    pub fn resolve_api_key(&mut self) {
        self.resolve_api_key_with(|name| env::var(name).ok());
    }

    fn resolve_api_key_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in API_KEY_VARS {
            if let Some(key) = lookup(name).filter(|k| !k.trim().is_empty()) {
                debug!("Using API key from {name}");
                self.api_key = key;
                return;
            }
        }
    }

    /// `true` when there is a key to send.
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Make sure the conversation row for `a_session_name` exists and that the
    /// latest settings snapshot matches this configuration.
    ///
    /// Sets `session_name` on success.
    pub fn ensure_conversation_and_config(
        &mut self,
        a_session_name: &str,
        personality: &str,
    ) -> Result<Conversation> {
        use crate::schema::{config_snapshots, conversations};

        let mut connection = establish_connection(&self.session_db_url)?;

        let conversation = connection.transaction::<_, ParleyError, _>(|conn| {
            let existing_conversation: Option<Conversation> = conversations::table
                .filter(conversations::session_name.eq(a_session_name))
                .first(conn)
                .optional()?;

            let conversation = match existing_conversation {
                Some(conversation) => conversation,
                None => {
                    info!("Creating conversation {a_session_name}");
                    diesel::insert_into(conversations::table)
                        .values(&Conversation {
                            id: None,
                            session_name: a_session_name.to_string(),
                            personality: personality.to_string(),
                            created_at: chrono::Utc::now().to_rfc3339(),
                        })
                        .returning(Conversation::as_returning())
                        .get_result(conn)?
                }
            };

            let latest: Option<ConfigSnapshot> = config_snapshots::table
                .filter(config_snapshots::conversation_id.eq(conversation.id))
                .order(config_snapshots::id.desc())
                .first(conn)
                .optional()?;

            let snapshot = self.snapshot_for(conversation.id);
            if latest.as_ref().is_none_or(|l| !l.same_settings(&snapshot)) {
                debug!("Recording settings snapshot for {a_session_name}");
                diesel::insert_into(config_snapshots::table)
                    .values(&snapshot)
                    .execute(conn)?;
            }

            Ok(conversation)
        })?;

        self.session_name = Some(a_session_name.to_string());
        Ok(conversation)
    }

    fn snapshot_for(&self, conversation_id: Option<i32>) -> ConfigSnapshot {
        ConfigSnapshot {
            id: None,
            api_base: self.api_base.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_response_tokens: self.max_response_tokens as i32,
            context_max_tokens: self.context_max_tokens as i32,
            assistant_minimum_context_tokens: self.assistant_minimum_context_tokens as i32,
            stop_words: self.stop_words.join(","),
            conversation_id,
        }
    }
}

impl ConfigSnapshot {
    fn same_settings(&self, other: &ConfigSnapshot) -> bool {
        self.api_base == other.api_base
            && self.model == other.model
            && self.temperature == other.temperature
            && self.max_response_tokens == other.max_response_tokens
            && self.context_max_tokens == other.context_max_tokens
            && self.assistant_minimum_context_tokens == other.assistant_minimum_context_tokens
            && self.stop_words == other.stop_words
    }
}

/// Load and validate the configuration at `file`.
pub fn load_config(file: impl AsRef<Path>) -> Result<ParleyConfig> {
    let file = file.as_ref();
    debug!("Loading config from {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: ParleyConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Load `file` if it exists, otherwise fall back to defaults.
pub fn load_config_or_default(file: impl AsRef<Path>) -> Result<ParleyConfig> {
    let file = file.as_ref();
    if file.exists() {
        load_config(file)
    } else {
        warn!("No config at {}, using defaults", file.display());
        Ok(ParleyConfig::default())
    }
}
