//! Remote shell REPL adapter
//!
//! Bridges a raw, unframed byte stream coming back from a remote
//! interactive shell and a local line-edited prompt. The adapter infers
//! the remote prompt from the output stream, forwards operator lines with
//! the configured terminator, and suppresses the echo produced while it
//! reconfigures the remote prompt itself.
//!
//! Two threads touch the adapter concurrently: whatever delivers remote
//! output calls [`CmdRepl::feed`], while the command loop runs on its own
//! thread via [`CmdRepl::spawn`]. Prompt state lives behind a mutex; the
//! completion flag is the only cancellation mechanism and is polled
//! before each blocking read and after each dispatch.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use encoding_rs::Encoding;
use tracing::{debug, trace, warn};

use super::reader::{PromptReader, ReadEvent};

/// Callback that transmits one rendered line to the remote shell input.
pub type RemoteWriter = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Shared end-of-session signal.
///
/// Monotonic: once set it stays set for the lifetime of the session.
/// Both the output feeder and the command loop observe it.
#[derive(Clone, Default)]
pub struct Completion {
    flag: Arc<AtomicBool>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// Kind of command interpreter running on the remote side.
///
/// Only the two recognized kinds support prompt reassignment; anything
/// else turns [`CmdRepl::set_prompt`] into a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpreter {
    /// Windows command shell (cmd.exe)
    Cmd,
    /// POSIX shell (sh, bash, ...)
    Sh,
    /// Anything else, prompt setting disabled
    Unknown,
}

impl Interpreter {
    /// Map a configured interpreter label to a kind.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("cmd" | "cmd.exe") => Interpreter::Cmd,
            Some("sh" | "bash" | "dash" | "ash") => Interpreter::Sh,
            _ => Interpreter::Unknown,
        }
    }

    /// Render the interpreter-specific command that reassigns the remote
    /// prompt variable. `None` when the interpreter is not recognized.
    fn prompt_command(self, prompt: &str) -> Option<Vec<u8>> {
        match self {
            Interpreter::Cmd => Some(format!("set PROMPT={}", prompt).into_bytes()),
            Interpreter::Sh => Some(format!("export PS1=\"{}\"", prompt).into_bytes()),
            Interpreter::Unknown => None,
        }
    }
}

/// Per-session adapter configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Remote interpreter kind
    pub interpreter: Interpreter,
    /// Terminate forwarded lines with CRLF instead of LF
    pub crlf: bool,
    /// Remote character encoding label (e.g. "windows-1252"); `None`
    /// passes bytes through and decodes prompts as lossy UTF-8
    pub codepage: Option<String>,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            interpreter: Interpreter::Unknown,
            crlf: false,
            codepage: None,
        }
    }
}

/// Prompt-inference state shared across the two adapter threads.
struct PromptState {
    /// Best current guess of the remote prompt, rebuilt from the trailing
    /// partial line of the output stream
    prompt: String,
    /// True while a prompt-assignment command is in flight; all output is
    /// discarded until its echo contains the installed prompt
    setting_prompt: bool,
}

struct ReplShared {
    state: Mutex<PromptState>,
    sink: Mutex<Box<dyn Write + Send>>,
    write_cb: RemoteWriter,
    completion: Completion,
    interpreter: Interpreter,
    terminator: &'static [u8],
    codepage: Option<&'static Encoding>,
}

/// The REPL adapter for one remote shell session.
///
/// Cheap to clone; clones share prompt state, sink, and completion flag.
#[derive(Clone)]
pub struct CmdRepl {
    inner: Arc<ReplShared>,
}

// A poisoned lock only means another thread panicked mid-update; the
// adapter must stay total, so recover the guard instead of propagating.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl CmdRepl {
    /// Create an adapter writing visible output to `sink` and forwarding
    /// command lines through `write_cb`.
    pub fn new(
        sink: Box<dyn Write + Send>,
        write_cb: RemoteWriter,
        completion: Completion,
        config: ReplConfig,
    ) -> Self {
        let codepage = config.codepage.as_deref().and_then(|label| {
            let enc = Encoding::for_label(label.as_bytes());
            if enc.is_none() {
                warn!("unknown codepage label {:?}, passing bytes through", label);
            }
            enc
        });

        Self {
            inner: Arc::new(ReplShared {
                state: Mutex::new(PromptState {
                    prompt: String::new(),
                    setting_prompt: false,
                }),
                sink: Mutex::new(sink),
                write_cb,
                completion,
                interpreter: config.interpreter,
                terminator: if config.crlf { b"\r\n" } else { b"\n" },
                codepage,
            }),
        }
    }

    /// Completion flag shared with this adapter.
    #[allow(dead_code)]
    pub fn completion(&self) -> Completion {
        self.inner.completion.clone()
    }

    /// Current inferred prompt.
    #[allow(dead_code)]
    pub fn prompt(&self) -> String {
        lock(&self.inner.state).prompt.clone()
    }

    fn decode<'a>(&self, chunk: &'a [u8]) -> std::borrow::Cow<'a, str> {
        match self.inner.codepage {
            Some(enc) => enc.decode(chunk).0,
            None => String::from_utf8_lossy(chunk),
        }
    }

    fn encode(&self, line: &str) -> Vec<u8> {
        match self.inner.codepage {
            Some(enc) => enc.encode(line).0.into_owned(),
            None => line.as_bytes().to_vec(),
        }
    }

    /// Handle one chunk of remote output.
    ///
    /// Total over all byte sequences: malformed encoding degrades to
    /// replacement characters, sink failures are swallowed, and nothing
    /// here ever blocks on the remote side.
    pub fn feed(&self, chunk: &[u8]) {
        let mut state = lock(&self.inner.state);

        if state.setting_prompt {
            // Discard everything until the echo of the prompt-assignment
            // command shows the newly installed prompt.
            let text = self.decode(chunk);
            if text.as_ref().contains(state.prompt.as_str()) {
                debug!("prompt installed, leaving suppression window");
                state.setting_prompt = false;
            }
            return;
        }

        if self.inner.completion.is_set() {
            trace!("dropping {} bytes after completion", chunk.len());
            return;
        }

        let text = self.decode(chunk);
        let text: &str = text.as_ref();
        {
            let mut sink = lock(&self.inner.sink);
            let visible: &[u8] = match self.inner.codepage {
                Some(_) => text.as_bytes(),
                None => chunk,
            };
            let _ = sink.write_all(visible);
            let _ = sink.flush();
        }

        // The trailing partial line is the prompt guess. A terminator
        // resets it; otherwise the fragment accumulates.
        match text.rfind('\n') {
            Some(pos) => {
                state.prompt = text[pos + 1..].to_string();
            }
            None => {
                state.prompt.push_str(text);
            }
        }
    }

    /// Forward one operator line to the remote shell and reset the
    /// prompt; it will be rebuilt from whatever the remote echoes back.
    fn forward(&self, line: &str) {
        let mut payload = self.encode(line);
        payload.extend_from_slice(self.inner.terminator);
        (self.inner.write_cb)(&payload);
        lock(&self.inner.state).prompt.clear();
    }

    /// Reconfigure the remote shell's own prompt to a known value so the
    /// output stream parsing can detect command boundaries reliably.
    ///
    /// No-op for an unrecognized interpreter. While the assignment is in
    /// flight, [`feed`](Self::feed) discards all output.
    pub fn set_prompt(&self, prompt: &str) {
        let Some(command) = self.inner.interpreter.prompt_command(prompt) else {
            return;
        };

        {
            let mut state = lock(&self.inner.state);
            state.setting_prompt = true;
            state.prompt = prompt.to_string();
        }
        debug!("installing remote prompt {:?}", prompt);

        let mut payload = command;
        payload.extend_from_slice(self.inner.terminator);
        (self.inner.write_cb)(&payload);
    }

    /// Run the command loop until the operator sends end-of-input or the
    /// completion flag is set. The terminal action sets the flag itself,
    /// so the session ends exactly once whichever side closes first.
    pub fn run_loop(&self, reader: &mut dyn PromptReader) {
        loop {
            // Pre-read check: never block for input on a dead session.
            let event = if self.inner.completion.is_set() {
                ReadEvent::Eof
            } else {
                let prompt = lock(&self.inner.state).prompt.clone();
                reader.read_line(&prompt)
            };

            match event {
                ReadEvent::Eof => break,
                ReadEvent::Interrupted => {}
                ReadEvent::Line(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        // Empty input is a no-op, not an error.
                    } else if line == "EOF" {
                        break;
                    } else if let Some(rest) = line.strip_prefix('?') {
                        // Help hook: rewritten as a remote "help" command;
                        // the console has no command set of its own.
                        let rest = rest.trim_start();
                        if rest.is_empty() {
                            self.forward("help");
                        } else {
                            self.forward(&format!("help {}", rest));
                        }
                    } else {
                        self.forward(line);
                    }
                }
            }

            // Post-dispatch check mirrors the pre-read one.
            if self.inner.completion.is_set() {
                break;
            }
        }

        self.inner.completion.set();
        debug!("command loop finished");
    }

    /// Spawn the command loop on its own thread.
    ///
    /// The thread is effectively a daemon: the handle may be dropped and
    /// the process may exit while the loop is still parked in a read.
    pub fn spawn(&self, mut reader: Box<dyn PromptReader + Send>) -> JoinHandle<()> {
        let repl = self.clone();
        thread::spawn(move || repl.run_loop(reader.as_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Sink whose written bytes stay observable from the test.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Reader producing a fixed script, then end-of-input.
    struct ScriptedReader {
        events: VecDeque<ReadEvent>,
    }

    impl ScriptedReader {
        fn lines(lines: &[&str]) -> Box<Self> {
            Box::new(Self {
                events: lines
                    .iter()
                    .map(|l| ReadEvent::Line(l.to_string()))
                    .collect(),
            })
        }
    }

    impl PromptReader for ScriptedReader {
        fn read_line(&mut self, _prompt: &str) -> ReadEvent {
            self.events.pop_front().unwrap_or(ReadEvent::Eof)
        }
    }

    fn make_repl(config: ReplConfig) -> (CmdRepl, SharedBuf, SharedBuf) {
        let sink = SharedBuf::default();
        let sent = SharedBuf::default();
        let sent_cb = sent.clone();
        let repl = CmdRepl::new(
            Box::new(sink.clone()),
            Box::new(move |data| {
                sent_cb.0.lock().unwrap().extend_from_slice(data);
            }),
            Completion::new(),
            config,
        );
        (repl, sink, sent)
    }

    #[test]
    fn test_passthrough_and_prompt_after_newline() {
        let (repl, sink, _) = make_repl(ReplConfig::default());

        repl.feed(b"hello\nC:\\>");

        assert_eq!(sink.contents(), b"hello\nC:\\>");
        assert_eq!(repl.prompt(), "C:\\>");
    }

    #[test]
    fn test_prompt_accumulates_across_fragments() {
        let (repl, sink, _) = make_repl(ReplConfig::default());

        repl.feed(b"C:\\>");
        repl.feed(b"C:\\> ");

        // No terminator seen, so fragments concatenate.
        assert_eq!(repl.prompt(), "C:\\>C:\\> ");
        assert_eq!(sink.contents(), b"C:\\>C:\\> ");
    }

    #[test]
    fn test_empty_chunk_is_harmless() {
        let (repl, sink, _) = make_repl(ReplConfig::default());

        repl.feed(b"$ ");
        repl.feed(b"");

        assert_eq!(repl.prompt(), "$ ");
        assert_eq!(sink.contents(), b"$ ");
    }

    #[test]
    fn test_feed_after_completion_is_dropped() {
        let (repl, sink, _) = make_repl(ReplConfig::default());

        repl.feed(b"before");
        repl.completion().set();
        repl.feed(b"after");

        assert_eq!(sink.contents(), b"before");
        assert_eq!(repl.prompt(), "before");
    }

    #[test]
    fn test_completion_set_is_idempotent() {
        let completion = Completion::new();
        assert!(!completion.is_set());

        completion.set();
        completion.set();
        assert!(completion.is_set());
    }

    #[test]
    fn test_suppression_discards_until_prompt_seen() {
        let (repl, sink, sent) = make_repl(ReplConfig {
            interpreter: Interpreter::Sh,
            ..ReplConfig::default()
        });

        repl.set_prompt("# ");
        assert_eq!(sent.contents(), b"export PS1=\"# \"\n");

        // Echo of the assignment command, prompt not yet visible.
        repl.feed(b"export PS1=\"");
        assert!(sink.contents().is_empty());

        // Chunk containing the installed prompt clears the window but is
        // still discarded.
        repl.feed(b"\"\n# ");
        assert!(sink.contents().is_empty());

        // Back to normal pass-through.
        repl.feed(b"uname\n");
        assert_eq!(sink.contents(), b"uname\n");
    }

    #[test]
    fn test_set_prompt_unknown_interpreter_is_noop() {
        let (repl, sink, sent) = make_repl(ReplConfig::default());

        repl.feed(b"$ ");
        repl.set_prompt("X");

        assert!(sent.contents().is_empty());
        assert_eq!(repl.prompt(), "$ ");

        // Suppression never engaged, output still flows.
        repl.feed(b"ok");
        assert_eq!(sink.contents(), b"$ ok");
    }

    #[test]
    fn test_cmd_prompt_template() {
        let (repl, _, sent) = make_repl(ReplConfig {
            interpreter: Interpreter::Cmd,
            crlf: true,
            ..ReplConfig::default()
        });

        repl.set_prompt("$ ");
        assert_eq!(sent.contents(), b"set PROMPT=$ \r\n");
        assert_eq!(repl.prompt(), "$ ");
    }

    #[test]
    fn test_dispatch_forwards_with_crlf_and_clears_prompt() {
        let (repl, _, sent) = make_repl(ReplConfig {
            crlf: true,
            ..ReplConfig::default()
        });

        repl.feed(b"C:\\>");
        repl.run_loop(ScriptedReader::lines(&["dir"]).as_mut());

        assert_eq!(sent.contents(), b"dir\r\n");
        assert_eq!(repl.prompt(), "");
        assert!(repl.completion().is_set());
    }

    #[test]
    fn test_empty_lines_dispatch_nothing() {
        let (repl, _, sent) = make_repl(ReplConfig::default());

        repl.run_loop(ScriptedReader::lines(&["", "   "]).as_mut());

        assert!(sent.contents().is_empty());
        assert!(repl.completion().is_set());
    }

    #[test]
    fn test_precommand_check_short_circuits_to_eof() {
        let (repl, _, sent) = make_repl(ReplConfig::default());

        repl.completion().set();
        repl.run_loop(ScriptedReader::lines(&["should-never-dispatch"]).as_mut());

        assert!(sent.contents().is_empty());
        assert!(repl.completion().is_set());
    }

    #[test]
    fn test_help_hook_forwards_to_remote() {
        let (repl, _, sent) = make_repl(ReplConfig::default());

        repl.run_loop(ScriptedReader::lines(&["?", "? ls", "help dir"]).as_mut());

        assert_eq!(sent.contents(), b"help\nhelp ls\nhelp dir\n");
    }

    #[test]
    fn test_eof_sentinel_terminates_without_dispatch() {
        let (repl, _, sent) = make_repl(ReplConfig::default());

        repl.run_loop(ScriptedReader::lines(&["EOF", "never-sent"]).as_mut());

        assert!(sent.contents().is_empty());
        assert!(repl.completion().is_set());
    }

    #[test]
    fn test_codepage_encode_on_dispatch() {
        let (repl, _, sent) = make_repl(ReplConfig {
            codepage: Some("windows-1252".to_string()),
            ..ReplConfig::default()
        });

        repl.run_loop(ScriptedReader::lines(&["é"]).as_mut());

        assert_eq!(sent.contents(), vec![0xE9, b'\n']);
    }

    #[test]
    fn test_codepage_decode_to_sink() {
        let (repl, sink, _) = make_repl(ReplConfig {
            codepage: Some("windows-1252".to_string()),
            ..ReplConfig::default()
        });

        repl.feed(&[0xE9]);

        assert_eq!(sink.contents(), "é".as_bytes());
        assert_eq!(repl.prompt(), "é");
    }

    #[test]
    fn test_malformed_bytes_degrade_to_replacement() {
        let (repl, sink, _) = make_repl(ReplConfig {
            codepage: Some("utf-8".to_string()),
            ..ReplConfig::default()
        });

        repl.feed(&[0xFF]);

        assert_eq!(sink.contents(), "\u{FFFD}".as_bytes());
        assert_eq!(repl.prompt(), "\u{FFFD}");
    }

    #[test]
    fn test_interpreter_labels() {
        assert_eq!(Interpreter::from_label(Some("cmd.exe")), Interpreter::Cmd);
        assert_eq!(Interpreter::from_label(Some("bash")), Interpreter::Sh);
        assert_eq!(Interpreter::from_label(Some("fish")), Interpreter::Unknown);
        assert_eq!(Interpreter::from_label(None), Interpreter::Unknown);
    }
}
