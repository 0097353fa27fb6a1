//! Session management
//!
//! Wires one connected remote shell to the REPL adapter: a reader thread
//! pumps remote output into [`CmdRepl::feed`], the command loop runs on
//! its own detached thread, and the shared completion flag ends the
//! session from whichever side closes first.

use std::io::{Read, Write};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use super::reader::PromptReader;
use super::repl::{CmdRepl, Completion, ReplConfig};

/// Sentinel prompt installed at session start so command boundaries are
/// detectable before the remote side has echoed anything.
pub const DEFAULT_PROMPT: &str = "# ";

/// Session configuration assembled from file config and CLI flags.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub repl: ReplConfig,
    /// Prompt value installed at startup; `None` keeps the remote prompt
    pub prompt: Option<String>,
}

/// One remote shell conversation.
pub struct Session {
    repl: CmdRepl,
    completion: Completion,
    #[allow(dead_code)]
    reader_thread: JoinHandle<()>,
    #[allow(dead_code)]
    loop_thread: JoinHandle<()>,
}

impl Session {
    /// Attach a connected remote shell byte channel.
    ///
    /// `remote_rx` delivers the shell's output in arbitrary fragments;
    /// `remote_tx` receives forwarded command lines. Visible output goes
    /// to `sink`; `local` supplies operator input. Both threads are
    /// spawned here and the configured prompt is installed before the
    /// first read.
    pub fn attach<R, W>(
        remote_rx: R,
        remote_tx: W,
        sink: Box<dyn Write + Send>,
        local: Box<dyn PromptReader + Send>,
        config: SessionConfig,
    ) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let completion = Completion::new();

        let tx = Mutex::new(remote_tx);
        let write_cb = Box::new(move |data: &[u8]| {
            // Fire-and-forget: transport failures surface as a closed
            // read side, not here.
            if let Ok(mut tx) = tx.lock() {
                let _ = tx.write_all(data);
                let _ = tx.flush();
            }
        });

        let repl = CmdRepl::new(sink, write_cb, completion.clone(), config.repl);

        if let Some(prompt) = config.prompt.as_deref() {
            repl.set_prompt(prompt);
        }

        let reader_thread = Self::spawn_reader(remote_rx, repl.clone(), completion.clone());
        let loop_thread = repl.spawn(local);

        Self {
            repl,
            completion,
            reader_thread,
            loop_thread,
        }
    }

    fn spawn_reader<R>(mut remote_rx: R, repl: CmdRepl, completion: Completion) -> JoinHandle<()>
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];

            loop {
                if completion.is_set() {
                    break;
                }

                match remote_rx.read(&mut buffer) {
                    Ok(0) => {
                        info!("remote side closed");
                        completion.set();
                        break;
                    }
                    Ok(n) => {
                        repl.feed(&buffer[..n]);
                    }
                    Err(e) => {
                        debug!("remote read failed: {}", e);
                        completion.set();
                        break;
                    }
                }
            }
        })
    }

    /// The adapter driving this session.
    #[allow(dead_code)]
    pub fn repl(&self) -> &CmdRepl {
        &self.repl
    }

    /// Whether the session is still alive.
    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        !self.completion.is_set()
    }

    /// Block until the session ends from either direction.
    pub fn wait(&self) {
        while !self.completion.is_set() {
            thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Both threads are detached on purpose: the reader may be parked
        // in a blocking read and the loop in a prompt read, and neither
        // may hold up process shutdown. The flag tells them to exit at
        // their next polling point.
        self.completion.set();
    }
}
