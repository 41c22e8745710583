//! # Rendering
//!
//! Terminal output for assistant replies: a small subset of markdown
//! (headers, bold, italic, inline code) styled with `crossterm`, and fenced
//! code blocks highlighted with `syntect` using the `base16-ocean.dark` theme.
//!
//! [`render_markdown`] renders a complete reply. [`StreamRenderer`] renders a
//! reply that arrives in pieces: prose is written line by line, code blocks
//! once their closing fence has arrived.
//!
//! Everything writes to any [`std::io::Write`], so the output can be captured.

use crossterm::{
    QueueableCommand,
    style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{self, Write};
use syntect::{
    easy::HighlightLines,
    highlighting::{Style, Theme, ThemeSet},
    parsing::SyntaxSet,
    util::{LinesWithEndings, as_24_bit_terminal_escaped},
};

use crate::memory::Role;
use crate::vector_store::RetrievedChunk;

static SYNTAXES: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);
static THEME: Lazy<Theme> = Lazy::new(|| {
    let mut themes = ThemeSet::load_defaults().themes;
    themes.remove("base16-ocean.dark").unwrap_or_default()
});

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```([\w+-]*)[^\n]*\n([\s\S]*?)```").expect("static regex"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").expect("static regex"));
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("static regex"));
static ITALIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^*])\*([^*\s][^*]*)\*").expect("static regex"));

const FENCE: &str = "```";

/// Render a complete markdown reply.
pub fn render_markdown<W: Write>(text: &str, out: &mut W) -> io::Result<()> {
    let mut last_end = 0;
    for cap in CODE_BLOCK.captures_iter(text) {
        let Some(block) = cap.get(0) else { continue };
        if block.start() > last_end {
            render_prose(&text[last_end..block.start()], out)?;
        }
        let language = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        let code = cap.get(2).map(|m| m.as_str()).unwrap_or_default();
        render_code_block(code, language, out)?;
        last_end = block.end();
    }
    if last_end < text.len() {
        render_prose(&text[last_end..], out)?;
    }
    out.flush()
}

fn render_prose<W: Write>(text: &str, out: &mut W) -> io::Result<()> {
    for line in text.lines() {
        render_line(line, out)?;
        writeln!(out)?;
    }
    Ok(())
}

fn render_line<W: Write>(line: &str, out: &mut W) -> io::Result<()> {
    let header = ["### ", "## ", "# "]
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix));
    match header {
        Some(title) => {
            out.queue(SetForegroundColor(Color::Cyan))?
                .queue(SetAttribute(Attribute::Bold))?;
            write!(out, "{title}")?;
            out.queue(SetAttribute(Attribute::Reset))?.queue(ResetColor)?;
            Ok(())
        }
        None => write!(out, "{}", style_inline(line)),
    }
}

/// Apply inline code, bold and italic styling as ANSI escapes.
pub fn style_inline(line: &str) -> String {
    let styled = INLINE_CODE.replace_all(line, "\x1b[33m$1\x1b[0m");
    let styled = BOLD.replace_all(&styled, "\x1b[1m$1\x1b[0m");
    ITALIC.replace_all(&styled, "$1\x1b[3m$2\x1b[0m").into_owned()
}

fn render_code_block<W: Write>(code: &str, language: &str, out: &mut W) -> io::Result<()> {
    if !language.is_empty() {
        out.queue(SetForegroundColor(Color::DarkGrey))?
            .queue(SetAttribute(Attribute::Italic))?;
        writeln!(out, "[{language}]")?;
        out.queue(SetAttribute(Attribute::Reset))?.queue(ResetColor)?;
    }

    let syntaxes = &*SYNTAXES;
    let syntax = syntaxes
        .find_syntax_by_token(language)
        .or_else(|| match language.to_lowercase().as_str() {
            "py" => syntaxes.find_syntax_by_extension("py"),
            "rs" => syntaxes.find_syntax_by_extension("rs"),
            "sh" | "bash" | "shell" | "zsh" => syntaxes.find_syntax_by_extension("sh"),
            "yml" => syntaxes.find_syntax_by_extension("yaml"),
            _ => None,
        })
        .unwrap_or_else(|| syntaxes.find_syntax_plain_text());

    let mut highlighter = HighlightLines::new(syntax, &THEME);
    for line in LinesWithEndings::from(code) {
        match highlighter.highlight_line(line, syntaxes) {
            Ok(ranges) => {
                let ranges: Vec<(Style, &str)> = ranges;
                write!(out, "{}", as_24_bit_terminal_escaped(&ranges[..], false))?;
            }
            Err(_) => write!(out, "{line}")?,
        }
    }
    out.queue(SetAttribute(Attribute::Reset))?.queue(ResetColor)?;
    if !code.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}

/// Incremental renderer for streamed replies.
pub struct StreamRenderer<W: Write> {
    out: W,
    buffer: String,
    code: Option<(String, String)>,
}

impl<W: Write> StreamRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            buffer: String::new(),
            code: None,
        }
    }

    /// Feed the next piece of the reply.
    pub fn push(&mut self, delta: &str) -> io::Result<()> {
        self.buffer.push_str(delta);
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            self.line(line.trim_end_matches('\n'))?;
        }
        self.out.flush()
    }

    fn line(&mut self, line: &str) -> io::Result<()> {
        if let Some(info) = line.trim_start().strip_prefix(FENCE) {
            match self.code.take() {
                Some((language, code)) => render_code_block(&code, &language, &mut self.out)?,
                None => {
                    let language = info.split_whitespace().next().unwrap_or_default();
                    self.code = Some((language.to_string(), String::new()));
                }
            }
            return Ok(());
        }

        match self.code.as_mut() {
            Some((_, code)) => {
                code.push_str(line);
                code.push('\n');
                Ok(())
            }
            None => {
                render_line(line, &mut self.out)?;
                writeln!(self.out)
            }
        }
    }

    /// Write out whatever is still buffered, including an unterminated code block.
    pub fn finish(mut self) -> io::Result<W> {
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            self.line(&rest)?;
        }
        if let Some((language, code)) = self.code.take() {
            render_code_block(&code, &language, &mut self.out)?;
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Coloured `You:` / `Assistant:` prefix.
pub fn role_label<W: Write>(role: Role, out: &mut W) -> io::Result<()> {
    let color = match role {
        Role::User => Color::Green,
        Role::Assistant => Color::Blue,
        Role::System => Color::DarkGrey,
    };
    out.queue(SetForegroundColor(color))?
        .queue(SetAttribute(Attribute::Bold))?;
    write!(out, "{}: ", role.label())?;
    out.queue(SetAttribute(Attribute::Reset))?.queue(ResetColor)?;
    out.flush()
}

/// Dimmed list of the documents a reply drew on.
pub fn sources<W: Write>(chunks: &[RetrievedChunk], out: &mut W) -> io::Result<()> {
    if chunks.is_empty() {
        return Ok(());
    }
    out.queue(SetForegroundColor(Color::DarkGrey))?;
    let names: Vec<String> = chunks
        .iter()
        .map(|c| format!("{} (part {})", c.source, c.chunk_index + 1))
        .collect();
    writeln!(out, "sources: {}", names.join(", "))?;
    out.queue(ResetColor)?;
    out.flush()
}

/// A notice in yellow, e.g. for offline mode.
pub fn notice<W: Write>(message: &str, out: &mut W) -> io::Result<()> {
    out.queue(SetForegroundColor(Color::Yellow))?;
    writeln!(out, "{message}")?;
    out.queue(ResetColor)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(text: &str) -> String {
        let mut out = Vec::new();
        render_markdown(text, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn streamed(deltas: &[&str]) -> String {
        let mut renderer = StreamRenderer::new(Vec::new());
        for delta in deltas {
            renderer.push(delta).unwrap();
        }
        String::from_utf8(renderer.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_headers_drop_their_markers() {
        let out = rendered("# Title\n## Sub\nplain");
        assert!(out.contains("Title"));
        assert!(!out.contains("# Title"));
        assert!(!out.contains("## Sub"));
        assert!(out.contains("plain"));
    }

    #[test]
    fn test_style_inline() {
        assert_eq!(style_inline("use `cargo`"), "use \x1b[33mcargo\x1b[0m");
        assert_eq!(style_inline("**bold**"), "\x1b[1mbold\x1b[0m");
        assert_eq!(style_inline("an *emphasis*"), "an \x1b[3memphasis\x1b[0m");
        assert_eq!(style_inline("2 * 3 * 4"), "2 * 3 * 4");
    }

    #[test]
    fn test_code_block_is_highlighted_without_fences() {
        let out = rendered("Look:\n```rust\nfn main() {}\n```\nDone.");
        assert!(out.contains("[rust]"));
        assert!(out.contains("main"));
        assert!(!out.contains("```"));
        assert!(out.contains("Done."));
    }

    #[test]
    fn test_stream_matches_split_points() {
        let out = streamed(&["Hel", "lo\n```py", "\nprint(1)\n`", "``\nbye"]);
        assert!(out.contains("Hello"));
        assert!(out.contains("[py]"));
        assert!(out.contains("print"));
        assert!(!out.contains("```"));
        assert!(out.ends_with("bye\n") || out.contains("bye"));
    }

    #[test]
    fn test_stream_flushes_unterminated_code_block() {
        let out = streamed(&["```\nlet x = 1;"]);
        assert!(out.contains("let x = 1;"));
    }

    #[test]
    fn test_role_label() {
        let mut out = Vec::new();
        role_label(Role::User, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("You: "));
    }
}
