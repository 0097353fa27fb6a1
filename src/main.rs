//! remcon - Interactive operator console for remote shell sessions
//!
//! remcon binds a listener, waits for a remote interactive shell to
//! connect, and turns its raw output stream into a local line-edited
//! prompt. The remote shell's prompt is inferred from the stream (and
//! optionally reconfigured to a known value) so the local prompt always
//! mirrors the remote one.
//!
//! # Quick Start
//!
//! ```text
//! remcon                      # Listen on the configured address
//! remcon -l 0.0.0.0:4444      # Listen on an explicit address
//! remcon -i sh                # POSIX-shell remote side, install prompt
//! remcon -i cmd.exe --crlf    # Windows shell with CRLF line endings
//! ```
//!
//! Exit the session with Ctrl+D (or by typing `EOF`); the session also
//! ends when the remote side disconnects.

mod config;
mod core;
mod credentials;
mod listener;

use std::env;
use std::io;
use std::path::PathBuf;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::core::{EditorReader, Interpreter, ReplConfig, Session, SessionConfig};
use crate::credentials::Credentials;
use crate::listener::{split, Listener};

/// Command-line arguments
struct Args {
    /// Log verbosity
    loglevel: Level,
    /// Log to file instead of stderr
    logfile: Option<PathBuf>,
    /// Listener bind address override
    listen: Option<String>,
    /// Working directory to switch to before anything else
    workdir: Option<PathBuf>,
    /// Skip credential validation
    insecure: bool,
    /// Remote interpreter label override
    interpreter: Option<String>,
    /// Force CRLF line termination
    crlf: bool,
    /// Remote encoding label override
    codepage: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            loglevel: Level::WARN,
            logfile: None,
            listen: None,
            workdir: None,
            insecure: false,
            interpreter: None,
            crlf: false,
            codepage: None,
        }
    }
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("remcon {}", VERSION);
}

fn print_help() {
    eprintln!("remcon {} - Interactive operator console for remote shell sessions", VERSION);
    eprintln!();
    eprintln!("Usage: remcon [OPTIONS]");
    eprintln!();
    eprintln!("Listener options:");
    eprintln!("  -l, --listen <ADDR>   Bind address (default from config.toml)");
    eprintln!();
    eprintln!("Session options:");
    eprintln!("  -i, --interpreter <NAME>  Remote interpreter (cmd.exe, sh)");
    eprintln!("      --crlf            Terminate command lines with CRLF");
    eprintln!("      --codepage <CP>   Remote encoding label (e.g. windows-1252)");
    eprintln!();
    eprintln!("Logging options:");
    eprintln!("  -d, --loglevel <LVL>  debug, info, warn or error (default: warn)");
    eprintln!("      --logfile <PATH>  Log to file instead of stderr");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("      --workdir <DIR>   Change working directory on startup");
    eprintln!("      --insecure        Skip credential validation");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.remcon/config.toml");
    eprintln!("Credentials:   ~/.remcon/credentials.toml");
    eprintln!();
    eprintln!("Exit: Ctrl+D, or type 'EOF' at the prompt");
}

fn parse_level(value: &str) -> Result<Level, String> {
    match value.to_lowercase().as_str() {
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(format!("Unknown log level: {}", other)),
    }
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    let take_value = |args: &[String], i: &mut usize, flag: &str| -> Result<String, String> {
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| format!("Missing value for {}", flag))
    };

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-d" | "--loglevel" => {
                let value = take_value(&args, &mut i, "--loglevel")?;
                parsed.loglevel = parse_level(&value)?;
            }
            "--logfile" => {
                parsed.logfile = Some(PathBuf::from(take_value(&args, &mut i, "--logfile")?));
            }
            "-l" | "--listen" => {
                parsed.listen = Some(take_value(&args, &mut i, "--listen")?);
            }
            "--workdir" => {
                parsed.workdir = Some(PathBuf::from(take_value(&args, &mut i, "--workdir")?));
            }
            "--insecure" => {
                parsed.insecure = true;
            }
            "-i" | "--interpreter" => {
                parsed.interpreter = Some(take_value(&args, &mut i, "--interpreter")?);
            }
            "--crlf" => {
                parsed.crlf = true;
            }
            "--codepage" => {
                parsed.codepage = Some(take_value(&args, &mut i, "--codepage")?);
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Initialize logging to the given file, or stderr when none.
fn init_logging(level: Level, logfile: Option<&PathBuf>) {
    match logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path);

            if let Ok(file) = file {
                let subscriber = FmtSubscriber::builder()
                    .with_max_level(level)
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .finish();
                let _ = tracing::subscriber::set_global_default(subscriber);
            } else {
                eprintln!("Could not open log file {}, logging to stderr", path.display());
                init_logging(level, None);
            }
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(io::stderr)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    if let Some(ref workdir) = args.workdir {
        if let Err(e) = env::set_current_dir(workdir) {
            eprintln!("Error: cannot switch to {}: {}", workdir.display(), e);
            std::process::exit(1);
        }
    }

    init_logging(args.loglevel, args.logfile.as_ref());
    info!("remcon {} starting...", VERSION);

    // Credentials are required before the command loop starts.
    let credentials = match Credentials::load(!args.insecure) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    info!("operating as role {:?}", credentials.role);

    // Merge config: command line args override config file
    let mut config = Config::load();
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if args.interpreter.is_some() {
        config.interpreter = args.interpreter;
    }
    if args.crlf {
        config.crlf = true;
    }
    if args.codepage.is_some() {
        config.codepage = args.codepage;
    }

    let interpreter = Interpreter::from_label(config.interpreter.as_deref());
    info!(
        "interpreter: {:?}, crlf: {}, codepage: {:?}",
        interpreter, config.crlf, config.codepage
    );

    let listener = Listener::bind(&config.listen)?;
    let (stream, peer) = listener.accept()?;
    let (remote_rx, remote_tx) = split(&stream)?;

    let session_config = SessionConfig {
        repl: ReplConfig {
            interpreter,
            crlf: config.crlf,
            codepage: config.codepage.clone(),
        },
        // Only recognized interpreters get a prompt installed; for the
        // rest the inferred remote prompt is used as-is.
        prompt: (interpreter != Interpreter::Unknown).then(|| config.prompt.clone()),
    };

    let local = EditorReader::new()?;
    let session = Session::attach(
        remote_rx,
        remote_tx,
        Box::new(io::stdout()),
        Box::new(local),
        session_config,
    );

    eprintln!("Session with {} started. Ctrl+D to exit.", peer);
    session.wait();
    info!("session with {} ended", peer);

    Ok(())
}
