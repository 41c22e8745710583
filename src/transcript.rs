//! Chat transcripts and their exports.
//!
//! A [`Transcript`] is the complete, ordered record of a chat: everything the
//! user said and everything shown back, including fallback replies. Unlike
//! [`ConversationMemory`](crate::memory::ConversationMemory) it is never
//! trimmed.
//!
//! Two export formats exist:
//!
//! - **Text**: a readable log with `You:` / `Assistant:` prefixes.
//! - **JSON**: `chat_history_YYYYMMDD_HHMMSS.json` holding the session name,
//!   personality, export time and the messages with timestamps.
//!
//! Importing accepts the JSON export or a bare array of `{role, content}`
//! objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::error::{ParleyError, Result};
use crate::memory::{Role, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ExportFormat::Text),
            "json" => Ok(ExportFormat::Json),
            other => Err(ParleyError::Config(format!(
                "unknown export format `{other}` (expected text or json)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Generated offline instead of by the model.
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub personality: String,
    #[serde(default = "Utc::now")]
    pub exported_at: DateTime<Utc>,
    pub messages: Vec<TranscriptEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TranscriptFile {
    Full(Transcript),
    Bare(Vec<Turn>),
}

impl Transcript {
    pub fn new(session: Option<String>, personality: String) -> Self {
        Self {
            session,
            personality,
            exported_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, role: Role, content: String) {
        self.messages.push(TranscriptEntry {
            role,
            content,
            timestamp: Utc::now(),
            fallback: false,
        });
    }

    /// Record an assistant reply that was produced offline.
    pub fn push_fallback(&mut self, content: String) {
        self.messages.push(TranscriptEntry {
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
            fallback: true,
        });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.messages
            .iter()
            .map(|m| Turn::new(m.role, m.content.clone()))
            .collect()
    }

    /// Plain-text rendering, one block per message.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let session = self.session.as_deref().unwrap_or("unsaved");
        let _ = writeln!(
            out,
            "Chat transcript (session: {session}, personality: {})",
            self.personality
        );
        let _ = writeln!(out, "Exported: {}", Utc::now().to_rfc3339());
        for message in &self.messages {
            let marker = if message.fallback { " (offline)" } else { "" };
            let _ = write!(
                out,
                "\n{}{marker}: {}\n",
                message.role.label(),
                message.content.trim_end()
            );
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        let mut stamped = self.clone();
        stamped.exported_at = Utc::now();
        Ok(serde_json::to_string_pretty(&stamped)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(match serde_json::from_str::<TranscriptFile>(json)? {
            TranscriptFile::Full(transcript) => transcript,
            TranscriptFile::Bare(turns) => {
                let mut transcript = Transcript::new(None, String::new());
                for turn in turns {
                    transcript.push(turn.role, turn.content);
                }
                transcript
            }
        })
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn render(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Text => Ok(self.to_text()),
            ExportFormat::Json => self.to_json(),
        }
    }

    /// Write the export to `target`.
    ///
    /// A directory (or `None`, meaning the working directory) receives a file
    /// named by [`export_file_name`]; any other path is written as given.
    pub fn write_export(&self, format: ExportFormat, target: Option<&Path>) -> Result<PathBuf> {
        let path = match target {
            Some(p) if !p.is_dir() => p.to_path_buf(),
            Some(dir) => dir.join(export_file_name(format, Utc::now())),
            None => PathBuf::from(export_file_name(format, Utc::now())),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.render(format)?)?;
        tracing::info!("Exported {} messages to {}", self.len(), path.display());
        Ok(path)
    }
}

/// `chat_history_YYYYMMDD_HHMMSS.<ext>`
pub fn export_file_name(format: ExportFormat, now: DateTime<Utc>) -> String {
    format!(
        "chat_history_{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> Transcript {
        let mut t = Transcript::new(Some("demo".into()), "friendly".into());
        t.push(Role::User, "What is Rust?".into());
        t.push(Role::Assistant, "A systems language.\n".into());
        t
    }

    #[test]
    fn test_export_file_name() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            export_file_name(ExportFormat::Json, now),
            "chat_history_20240309_140507.json"
        );
        assert_eq!(
            export_file_name(ExportFormat::Text, now),
            "chat_history_20240309_140507.txt"
        );
    }

    #[test]
    fn test_text_export_labels_roles_in_order() {
        let text = sample().to_text();
        assert!(text.starts_with("Chat transcript (session: demo, personality: friendly)"));
        let you = text.find("You: What is Rust?").unwrap();
        let assistant = text.find("Assistant: A systems language.").unwrap();
        assert!(you < assistant);
    }

    #[test]
    fn test_json_export_can_be_imported() {
        let original = sample();
        let parsed = Transcript::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(parsed.session, original.session);
        assert_eq!(parsed.messages, original.messages);
    }

    #[test]
    fn test_fallback_flag_survives_export() {
        let mut t = sample();
        t.push(Role::User, "Are you there?".into());
        t.push_fallback("I can't reach the model right now.".into());

        let parsed = Transcript::from_json(&t.to_json().unwrap()).unwrap();
        let flags: Vec<bool> = parsed.messages.iter().map(|m| m.fallback).collect();
        assert_eq!(flags, vec![false, false, false, true]);
        assert!(t.to_text().contains("Assistant (offline): I can't reach"));

        // Older exports carry no flag.
        let old = r#"{"messages": [{"role": "assistant", "content": "hi"}]}"#;
        assert!(!Transcript::from_json(old).unwrap().messages[0].fallback);
    }

    #[test]
    fn test_import_bare_array() {
        let json = r#"[
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"}
        ]"#;
        let t = Transcript::from_json(json).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages[1].role, Role::Assistant);
        assert!(t.session.is_none());
    }

    #[test]
    fn test_import_rejects_garbage() {
        assert!(Transcript::from_json("{\"nope\": 1}").is_err());
        assert!(Transcript::from_json("[{\"role\": \"narrator\", \"content\": \"x\"}]").is_err());
    }

    #[test]
    fn test_write_export_into_directory_and_file() {
        let dir = TempDir::new().unwrap();
        let t = sample();

        let path = t.write_export(ExportFormat::Json, Some(dir.path())).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("chat_history_") && name.ends_with(".json"));
        assert_eq!(Transcript::read(&path).unwrap().messages, t.messages);

        let explicit = dir.path().join("out/chat.txt");
        let written = t.write_export(ExportFormat::Text, Some(&explicit)).unwrap();
        assert_eq!(written, explicit);
        assert!(fs::read_to_string(explicit).unwrap().contains("You: What is Rust?"));
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("TXT".parse::<ExportFormat>().unwrap(), ExportFormat::Text);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
