//! Core console functionality
//!
//! This module contains the remote shell REPL adapter and the session
//! plumbing that connects it to a live byte channel:
//! - `repl`: prompt inference, echo suppression, command dispatch
//! - `reader`: local line input seam
//! - `session`: per-connection thread wiring and lifecycle

pub mod reader;
pub mod repl;
pub mod session;

pub use reader::{EditorReader, PromptReader, ReadEvent};
pub use repl::{CmdRepl, Completion, Interpreter, ReplConfig};
pub use session::{Session, SessionConfig, DEFAULT_PROMPT};
