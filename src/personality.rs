//! # Personality presets
//!
//! A personality is a small YAML document that steers the assistant:
//!
//! ```yaml
//! # <config_dir>/personalities/pirate.yaml
//! name: pirate
//! description: "Answers like a ship's captain"
//! system_prompt: "You are a salty but helpful pirate captain."
//! temperature: 0.9
//! examples:
//!   - role: user
//!     content: "Hello"
//!   - role: assistant
//!     content: "Ahoy, matey!"
//! # pre_user_message_content: "Keep it short."
//! # post_user_message_content: "Answer in plain English."
//! ```
//!
//! Five presets are built in (see [`builtin`]). Files in the personalities
//! directory shadow built-ins of the same name.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::{debug, warn};

use crate::error::{ParleyError, Result};
use crate::memory::Turn;

/// A reusable persona.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Personality {
    /// Defaults to the file stem when loaded from disk.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Sent as the first system message of every request.
    pub system_prompt: String,

    /// Preferred sampling temperature, used unless the config sets one.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Example exchanges placed between the system prompt and live turns.
    #[serde(default)]
    pub examples: Vec<Turn>,

    /// Text prepended to each user message at send time.
    #[serde(default)]
    pub pre_user_message_content: Option<String>,

    /// Text appended to each user message at send time.
    #[serde(default)]
    pub post_user_message_content: Option<String>,
}

impl Personality {
    fn preset(name: &str, description: &str, system_prompt: &str, temperature: f32) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            system_prompt: system_prompt.to_string(),
            temperature: Some(temperature),
            examples: Vec::new(),
            pre_user_message_content: None,
            post_user_message_content: None,
        }
    }

    /// Apply the pre/post decorations to a user message.
    pub fn decorate(&self, question: &str) -> String {
        let mut decorated = question.to_string();
        if let Some(prepend) = &self.pre_user_message_content {
            decorated = format!("{prepend} {decorated}");
        }
        if let Some(append) = &self.post_user_message_content {
            decorated = format!("{decorated} {append}");
        }
        decorated
    }
}

/// The built-in presets, in display order.
pub fn builtin() -> Vec<Personality> {
    vec![
        Personality::preset(
            "assistant",
            "Balanced, helpful general assistant",
            "You are a helpful, accurate and concise assistant. When you are unsure, say so.",
            0.7,
        ),
        Personality::preset(
            "creative",
            "Imaginative writer for stories, ideas and wordplay",
            "You are a creative writing partner. Be imaginative, vivid and playful, \
             and offer unexpected angles while staying on the user's topic.",
            1.0,
        ),
        Personality::preset(
            "technical",
            "Precise engineer who answers with details and code",
            "You are a senior software engineer. Give precise, technically rigorous answers, \
             show code in fenced blocks with a language tag, and point out trade-offs.",
            0.2,
        ),
        Personality::preset(
            "friendly",
            "Warm, casual conversational companion",
            "You are a warm and friendly companion. Keep a casual tone, show empathy, \
             and keep answers short unless asked for more.",
            0.8,
        ),
        Personality::preset(
            "tutor",
            "Patient teacher who guides with questions",
            "You are a patient tutor. Explain step by step, check understanding with a short \
             question at the end, and prefer guiding the learner over giving the answer away.",
            0.5,
        ),
    ]
}

/// Load a personality file from `dir/<name>.yaml`.
pub fn load_personality(dir: &Path, name: &str) -> Result<Personality> {
    let path = dir.join(format!("{name}.yaml"));
    debug!("Loading personality: {}", path.display());
    let content = fs::read_to_string(&path)?;
    let mut personality: Personality = serde_yaml::from_str(&content)?;
    if personality.name.is_empty() {
        personality.name = name.to_string();
    }
    Ok(personality)
}

/// Resolve `name`, preferring a file in `dir` over the built-ins.
pub fn find(name: &str, dir: Option<&Path>) -> Result<Personality> {
    if let Some(dir) = dir {
        if dir.join(format!("{name}.yaml")).is_file() {
            return load_personality(dir, name);
        }
    }
    builtin()
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ParleyError::UnknownPersonality(name.to_string()))
}

/// All personalities: built-ins first, then user files (a user file replaces
/// the built-in with the same name in place).
pub fn list(dir: Option<&Path>) -> Vec<Personality> {
    let mut all = builtin();
    let Some(dir) = dir else {
        return all;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return all;
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "yaml"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    names.sort();

    for name in names {
        match load_personality(dir, &name) {
            Ok(personality) => match all.iter_mut().find(|p| p.name == personality.name) {
                Some(existing) => *existing = personality,
                None => all.push(personality),
            },
            Err(err) => warn!("Skipping personality {name}: {err}"),
        }
    }
    all
}

/// Write the built-in presets into `dir` as editable YAML files.
///
/// Existing files are left alone.
pub fn write_builtins(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for personality in builtin() {
        let path = dir.join(format!("{}.yaml", personality.name));
        if path.exists() {
            continue;
        }
        fs::write(&path, serde_yaml::to_string(&personality)?)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use tempfile::TempDir;

    #[test]
    fn test_builtins_are_unique_and_default_exists() {
        let presets = builtin();
        let mut names: Vec<&str> = presets.iter().map(|p| p.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), presets.len());
        assert!(find("assistant", None).is_ok());
    }

    #[test]
    fn test_unknown_personality() {
        let err = find("nope", None).unwrap_err();
        assert!(matches!(err, ParleyError::UnknownPersonality(name) if name == "nope"));
    }

    #[test]
    fn test_user_file_shadows_builtin() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("tutor.yaml"),
            r#"
name: tutor
system_prompt: "Socratic mode only."
examples:
  - role: user
    content: "What is 2+2?"
  - role: assistant
    content: "What do you get when you count two and then two more?"
"#,
        )
        .unwrap();

        let tutor = find("tutor", Some(dir.path())).unwrap();
        assert_eq!(tutor.system_prompt, "Socratic mode only.");
        assert_eq!(tutor.examples.len(), 2);
        assert_eq!(tutor.examples[1].role, Role::Assistant);

        let all = list(Some(dir.path()));
        assert_eq!(all.len(), builtin().len());
        let listed = all.iter().find(|p| p.name == "tutor").unwrap();
        assert_eq!(listed.system_prompt, "Socratic mode only.");
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.yaml"), "invalid: yaml: here").unwrap();
        assert!(find("broken", Some(dir.path())).is_err());
        // list() skips it instead of failing
        assert_eq!(list(Some(dir.path())).len(), builtin().len());
    }

    #[test]
    fn test_decorate() {
        let mut p = find("assistant", None).unwrap();
        assert_eq!(p.decorate("hi"), "hi");
        p.pre_user_message_content = Some("Briefly:".into());
        p.post_user_message_content = Some("Thanks.".into());
        assert_eq!(p.decorate("hi"), "Briefly: hi Thanks.");
    }

    #[test]
    fn test_write_builtins_round_trip() {
        let dir = TempDir::new().unwrap();
        let written = write_builtins(dir.path()).unwrap();
        assert_eq!(written.len(), builtin().len());
        assert!(write_builtins(dir.path()).unwrap().is_empty());
        let creative = load_personality(dir.path(), "creative").unwrap();
        assert_eq!(creative, find("creative", None).unwrap());
    }
}
