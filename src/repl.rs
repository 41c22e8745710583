//! Interactive chat loop.
//!
//! Lines starting with `/` are commands (see [`HELP`]); anything else is sent
//! to the model. Replies are rendered as they stream in.

use console::Term;
use std::{
    io::{self, Write},
    path::PathBuf,
};
use tracing::debug;

use crate::chat::ChatSession;
use crate::error::{ParleyError, Result};
use crate::memory::Role;
use crate::personality;
use crate::render::{self, StreamRenderer};
use crate::transcript::ExportFormat;

pub const HELP: &str = "\
Commands:
  /help                        show this help
  /exit, /quit                 leave the chat
  /clear                       forget the conversation so far
  /export [text|json] [path]   save the transcript
  /personality [name]          list personalities or switch to one
  /ingest <path>               add a text document to the knowledge base
  /docs                        list indexed documents";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Exit,
    Clear,
    Export {
        format: ExportFormat,
        path: Option<PathBuf>,
    },
    Personality(Option<String>),
    Ingest(PathBuf),
    Docs,
}

/// What the loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

impl ReplCommand {
    /// Parse `line` as a command. `Ok(None)` means it is a chat message.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(None);
        };
        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = parts.collect();

        let command = match name.as_str() {
            "help" | "?" => ReplCommand::Help,
            "exit" | "quit" => ReplCommand::Exit,
            "clear" => ReplCommand::Clear,
            "docs" => ReplCommand::Docs,
            "personality" => ReplCommand::Personality(args.first().map(|s| s.to_string())),
            "ingest" => {
                if args.is_empty() {
                    return Err(ParleyError::Usage("/ingest <path>".into()));
                }
                // paths may contain spaces
                ReplCommand::Ingest(PathBuf::from(args.join(" ")))
            }
            "export" => parse_export(&args)?,
            other => {
                return Err(ParleyError::Usage(format!(
                    "unknown command /{other}, try /help"
                )));
            }
        };
        Ok(Some(command))
    }
}

fn parse_export(args: &[&str]) -> Result<ReplCommand> {
    match args {
        [] => Ok(ReplCommand::Export {
            format: ExportFormat::Text,
            path: None,
        }),
        [first, rest @ ..] => match first.parse::<ExportFormat>() {
            Ok(format) => Ok(ReplCommand::Export {
                format,
                path: (!rest.is_empty()).then(|| PathBuf::from(rest.join(" "))),
            }),
            Err(_) => {
                let path = PathBuf::from(args.join(" "));
                let format = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(|ext| ext.parse().ok())
                    .unwrap_or(ExportFormat::Text);
                Ok(ReplCommand::Export {
                    format,
                    path: Some(path),
                })
            }
        },
    }
}

/// Carry out `command`, writing feedback to `out`.
pub fn execute<W: Write>(chat: &mut ChatSession, command: ReplCommand, out: &mut W) -> Result<Flow> {
    match command {
        ReplCommand::Help => writeln!(out, "{HELP}")?,
        ReplCommand::Exit => return Ok(Flow::Exit),
        ReplCommand::Clear => {
            let cleared = chat.clear()?;
            writeln!(out, "Cleared {cleared} messages.")?;
        }
        ReplCommand::Export { format, path } => {
            let written = chat.export(format, path.as_deref())?;
            writeln!(out, "Saved transcript to {}", written.display())?;
        }
        ReplCommand::Personality(None) => {
            let current = chat.personality().name.clone();
            for p in personality::list(chat.personalities_dir()) {
                let marker = if p.name == current { "*" } else { " " };
                writeln!(out, "{marker} {:<12} {}", p.name, p.description)?;
            }
        }
        ReplCommand::Personality(Some(name)) => {
            let p = chat.set_personality(&name)?;
            writeln!(out, "Now chatting with the {} personality.", p.name)?;
        }
        ReplCommand::Ingest(path) => {
            let added = chat.ingest(&path)?;
            if added == 0 {
                writeln!(out, "{} is already indexed.", path.display())?;
            } else {
                writeln!(out, "Indexed {} as {added} chunks.", path.display())?;
            }
        }
        ReplCommand::Docs => {
            let documents = chat.documents();
            if documents.is_empty() {
                writeln!(out, "No documents indexed. Use /ingest <path> to add one.")?;
            }
            for doc in documents {
                writeln!(out, "{} ({} chunks)", doc.source, doc.chunks)?;
            }
        }
    }
    Ok(Flow::Continue)
}

fn read_line(term: &Term) -> io::Result<Option<String>> {
    if term.is_term() {
        return term.read_line().map(Some);
    }
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Ask `question` and render the reply on stdout.
pub async fn ask(chat: &mut ChatSession, question: &str) -> Result<()> {
    let mut stdout = io::stdout();
    render::role_label(Role::Assistant, &mut stdout)?;
    writeln!(stdout)?;

    let reply = if chat.config().should_stream {
        let mut renderer = StreamRenderer::new(io::stdout());
        let result = chat
            .send(question, |delta| {
                if let Err(err) = renderer.push(delta) {
                    debug!("Render failed: {err}");
                }
            })
            .await;
        renderer.finish()?;
        result?
    } else {
        let reply = chat.send(question, |_| {}).await?;
        render::render_markdown(&reply.content, &mut stdout)?;
        reply
    };
    render::sources(&reply.sources, &mut stdout)?;
    Ok(())
}

/// Run the chat loop until `/exit` or end of input.
pub async fn run(chat: &mut ChatSession) -> Result<()> {
    let term = Term::stdout();
    let mut stdout = io::stdout();

    match chat.session_name() {
        Some(name) => writeln!(stdout, "Session: {name} ({})", chat.personality().name)?,
        None => writeln!(stdout, "Personality: {}", chat.personality().name)?,
    }
    if chat.is_offline() {
        render::notice("No API key configured: replies are generated offline.", &mut stdout)?;
    }
    writeln!(stdout, "Type /help for commands.")?;

    loop {
        writeln!(stdout)?;
        render::role_label(Role::User, &mut stdout)?;
        let Some(line) = read_line(&term)? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outcome = match ReplCommand::parse(line) {
            Ok(Some(command)) => execute(chat, command, &mut stdout),
            Ok(None) => ask(chat, line).await.map(|_| Flow::Continue),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(Flow::Exit) => break,
            Ok(Flow::Continue) => {}
            Err(err) => render::notice(&err.to_string(), &mut stdout)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingBackend, ParleyConfig};
    use std::fs;
    use tempfile::TempDir;

    fn offline_chat() -> ChatSession {
        let mut config = ParleyConfig::default();
        config.api_key = String::new();
        config.retrieval.embedding_backend = EmbeddingBackend::Hashing;
        ChatSession::new(config, personality::find("assistant", None).unwrap()).unwrap()
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(ReplCommand::parse("hello /there").unwrap(), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse("/help").unwrap(), Some(ReplCommand::Help));
        assert_eq!(ReplCommand::parse(" /QUIT ").unwrap(), Some(ReplCommand::Exit));
        assert_eq!(
            ReplCommand::parse("/personality tutor").unwrap(),
            Some(ReplCommand::Personality(Some("tutor".into())))
        );
        assert_eq!(
            ReplCommand::parse("/ingest my notes.md").unwrap(),
            Some(ReplCommand::Ingest(PathBuf::from("my notes.md")))
        );
        assert!(ReplCommand::parse("/ingest").is_err());
        assert!(ReplCommand::parse("/dance").is_err());
    }

    #[test]
    fn test_parse_export() {
        assert_eq!(
            ReplCommand::parse("/export").unwrap(),
            Some(ReplCommand::Export {
                format: ExportFormat::Text,
                path: None
            })
        );
        assert_eq!(
            ReplCommand::parse("/export json out").unwrap(),
            Some(ReplCommand::Export {
                format: ExportFormat::Json,
                path: Some(PathBuf::from("out"))
            })
        );
        assert_eq!(
            ReplCommand::parse("/export chat.json").unwrap(),
            Some(ReplCommand::Export {
                format: ExportFormat::Json,
                path: Some(PathBuf::from("chat.json"))
            })
        );
    }

    #[tokio::test]
    async fn test_execute_commands() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("notes.md");
        fs::write(&doc, "Parley keeps notes in markdown.").unwrap();

        let mut chat = offline_chat();
        chat.send("hello", |_| {}).await.unwrap();
        let mut out = Vec::new();

        let flow = execute(&mut chat, ReplCommand::Ingest(doc), &mut out).unwrap();
        assert_eq!(flow, Flow::Continue);
        execute(&mut chat, ReplCommand::Docs, &mut out).unwrap();
        execute(
            &mut chat,
            ReplCommand::Export {
                format: ExportFormat::Json,
                path: Some(dir.path().to_path_buf()),
            },
            &mut out,
        )
        .unwrap();
        execute(&mut chat, ReplCommand::Clear, &mut out).unwrap();
        assert_eq!(execute(&mut chat, ReplCommand::Exit, &mut out).unwrap(), Flow::Exit);

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("as 1 chunks"));
        assert!(out.contains("notes.md (1 chunks)"));
        assert!(out.contains("Saved transcript to"));
        assert!(out.contains("Cleared 2 messages."));
        assert!(chat.transcript().is_empty());
    }

    #[test]
    fn test_personality_listing_uses_the_session_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pirate.yaml"),
            "description: Talks like a captain\nsystem_prompt: Arr.\n",
        )
        .unwrap();
        let mut chat = offline_chat().with_personalities_dir(dir.path());
        let mut out = Vec::new();

        execute(&mut chat, ReplCommand::Personality(None), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("* assistant"));
        assert!(out.contains("pirate"));
        assert!(out.contains("Talks like a captain"));

        let mut out = Vec::new();
        execute(&mut chat, ReplCommand::Personality(Some("pirate".into())), &mut out).unwrap();
        assert_eq!(chat.personality().name, "pirate");
    }

    #[test]
    fn test_switch_to_unknown_personality_fails() {
        let mut chat = offline_chat();
        let mut out = Vec::new();
        let err = execute(&mut chat, ReplCommand::Personality(Some("pirate".into())), &mut out);
        assert!(matches!(err, Err(ParleyError::UnknownPersonality(_))));
    }
}
