//! # Parley
//!
//! A terminal chat client for OpenAI compatible APIs.
//!
//! - **Personalities** ([`personality`]): system prompts with a preferred
//!   temperature and optional example exchanges.
//! - **Memory** ([`memory`]): recent turns kept within a token budget.
//! - **Document Q&A** ([`documents`], [`splitter`], [`embeddings`],
//!   [`vector_store`]): text files chunked, embedded and searched so the
//!   closest passages accompany each question.
//! - **Sessions** ([`session_store`]): named conversations in SQLite, with
//!   text and JSON exports ([`transcript`]).
//! - **Offline fallback** ([`fallback`]): canned replies when the API cannot
//!   be reached.
//!
//! [`chat::ChatSession`] ties them together; [`repl`] and [`commands`] are
//! the terminal front end.

use directories::ProjectDirs;
use std::path::PathBuf;

pub mod api;
pub mod chat;
pub mod commands;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod fallback;
pub mod memory;
pub mod models;
pub mod personality;
pub mod render;
pub mod repl;
pub mod schema;
pub mod session_store;
pub mod splitter;
pub mod transcript;
pub mod vector_store;

use error::{ParleyError, Result};

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "parley", "parley")
        .ok_or_else(|| ParleyError::Config("unable to determine the home directory".into()))
}

/// Platform config directory, e.g. `~/.config/parley` on Linux.
pub fn config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// Platform data directory for the session database and knowledge bases.
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// `<config_dir>/personalities`
pub fn personalities_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("personalities"))
}
