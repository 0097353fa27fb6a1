//! Local line input
//!
//! Small seam between the command loop and the operator's terminal so
//! the loop can be driven by a real line editor in the binary and by
//! scripted input in tests.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;

/// Outcome of one blocking line read.
pub enum ReadEvent {
    /// A full line of operator input
    Line(String),
    /// End of input (Ctrl-D or closed stdin)
    Eof,
    /// Interrupt (Ctrl-C); the loop redraws the prompt and keeps going
    Interrupted,
}

/// One blocking read of a line of operator input, displayed against the
/// current inferred prompt.
pub trait PromptReader {
    fn read_line(&mut self, prompt: &str) -> ReadEvent;
}

/// Line-edited reader over the local terminal.
///
/// No completer is installed and nothing is recorded into history: every
/// bit of command intelligence lives on the remote side.
pub struct EditorReader {
    editor: DefaultEditor,
}

impl EditorReader {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl PromptReader for EditorReader {
    fn read_line(&mut self, prompt: &str) -> ReadEvent {
        match self.editor.readline(prompt) {
            Ok(line) => ReadEvent::Line(line),
            Err(ReadlineError::Interrupted) => ReadEvent::Interrupted,
            Err(ReadlineError::Eof) => ReadEvent::Eof,
            Err(e) => {
                debug!("readline failed, treating as end of input: {}", e);
                ReadEvent::Eof
            }
        }
    }
}
