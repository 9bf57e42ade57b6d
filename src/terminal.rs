//! Line-oriented terminal front-end for the `chat` command.

use std::io::{self, Write};
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::conversation::Snapshot;
use crate::models::{FileData, Message, Role};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Prompt(String),
    Search(bool),
    Attach(String),
    Help,
    Quit,
    /// A slash command that could not be understood, with a hint.
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Prompt(line.to_string());
        };
        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));

        match (name, arg) {
            ("quit" | "exit", _) => Self::Quit,
            ("help", _) => Self::Help,
            ("search", "on") => Self::Search(true),
            ("search", "off") => Self::Search(false),
            ("search", _) => Self::Invalid("usage: /search on|off".into()),
            ("attach", "") => Self::Invalid("usage: /attach <path>".into()),
            ("attach", path) => Self::Attach(path.to_string()),
            _ => Self::Invalid(format!("unknown command /{name}, try /help")),
        }
    }
}

pub const HELP: &str = "\
Commands:
    /search on|off     Ground answers with Google Search
    /attach <path>     Send a file with the next prompt
    /quit              Leave the chat";

/// Read a file and encode it for sending. The MIME type comes from the
/// extension.
pub async fn load_attachment(path: &Path) -> io::Result<FileData> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    Ok(FileData {
        name,
        mime_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
        data: STANDARD.encode(bytes),
    })
}

/// Renders snapshots to a terminal incrementally.
///
/// Tracks how much of the log has been written so repeated snapshots only
/// print what is new. User messages are not echoed since the user typed
/// them.
#[derive(Debug, Default)]
pub struct TerminalView {
    /// Messages fully written.
    shown: usize,
    /// Bytes of the in-progress response text already written.
    partial: usize,
}

impl TerminalView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, snapshot: &Snapshot, out: &mut impl Write) -> io::Result<()> {
        while self.shown < snapshot.messages.len() {
            let message = &snapshot.messages[self.shown];
            let is_last = self.shown + 1 == snapshot.messages.len();

            if message.role == Role::User {
                self.shown += 1;
                continue;
            }
            if is_last && snapshot.in_flight {
                if !message.is_error {
                    self.write_new_text(message, out)?;
                }
                break;
            }

            if message.is_error {
                if self.partial > 0 {
                    writeln!(out)?;
                }
                writeln!(out, "{}", message.text())?;
            } else {
                self.write_new_text(message, out)?;
                writeln!(out)?;
                write_sources(message, out)?;
            }
            self.partial = 0;
            self.shown += 1;
        }
        out.flush()
    }

    fn write_new_text(&mut self, message: &Message, out: &mut impl Write) -> io::Result<()> {
        let text = message.text();
        if let Some(new) = text.get(self.partial..) {
            out.write_all(new.as_bytes())?;
            self.partial = text.len();
        }
        Ok(())
    }
}

fn write_sources(message: &Message, out: &mut impl Write) -> io::Result<()> {
    let Some(sources) = &message.sources else {
        return Ok(());
    };
    writeln!(out, "Sources:")?;
    for (i, source) in sources.iter().enumerate() {
        writeln!(out, "  [{}] {} <{}>", i + 1, source.title, source.uri)?;
    }
    Ok(())
}
