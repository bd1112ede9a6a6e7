//! Command-line interface for taskrun.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::execution::HideSet;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Shell to run the command with.
    pub shell: Option<String>,
    /// Run on a pseudo-terminal.
    pub pty: bool,
    /// Fail instead of falling back to pipes when no pty is possible.
    pub no_fallback: bool,
    /// Streams to hide.
    pub hide: Option<HideSet>,
    /// Echo the command before running it.
    pub echo: bool,
    /// Do not fail on nonzero exit.
    pub warn: bool,
    /// Print the command without running it.
    pub dry: bool,
    /// Timeout in seconds.
    pub timeout: Option<f64>,
    /// Start the command and exit immediately.
    pub disown: bool,
    /// Do not forward our stdin.
    pub no_stdin: bool,
    /// The command words.
    pub command: Vec<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

impl Args {
    /// The command line handed to the shell.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Long("shell") => {
                result.shell = Some(parser.value()?.parse()?);
            }
            Long("pty") => {
                result.pty = true;
            }
            Long("no-fallback") => {
                result.no_fallback = true;
            }
            Long("hide") => {
                let value: String = parser.value()?.parse()?;
                result.hide = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("hide", value))?,
                );
            }
            Short('e') | Long("echo") => {
                result.echo = true;
            }
            Short('w') | Long("warn") => {
                result.warn = true;
            }
            Long("dry") => {
                result.dry = true;
            }
            Short('t') | Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                let secs: f64 = value
                    .parse()
                    .ok()
                    .filter(|secs: &f64| secs.is_finite() && *secs > 0.0)
                    .ok_or_else(|| ArgsError::InvalidValue("timeout", value.clone()))?;
                result.timeout = Some(secs);
            }
            Long("disown") => {
                result.disown = true;
            }
            Long("no-stdin") => {
                result.no_stdin = true;
            }
            Value(val) => {
                // The first word starts the command; everything after it
                // belongs to the command, dashes included.
                result.command.push(val.string()?);
                for word in parser.raw_args()? {
                    result.command.push(
                        word.into_string()
                            .map_err(|w| ArgsError::UnexpectedArgument(w.to_string_lossy().into()))?,
                    );
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"taskrun {version}
Run shell commands with output capture, prompt responders and timeouts

USAGE:
    taskrun [OPTIONS] <COMMAND>...

OPTIONS:
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
        --shell <PATH>      Shell used to run the command
        --pty               Run the command on a pseudo-terminal
        --no-fallback       Never fall back to pipes when --pty is impossible
        --hide <WHICH>      Hide output locally (stdout, stderr, both)
    -e, --echo              Print the command before running it
    -w, --warn              Report nonzero exits without failing
        --dry               Print the command, do not run it
    -t, --timeout <SECS>    Kill the command after SECS seconds
        --disown            Start the command and return immediately
        --no-stdin          Do not forward stdin to the command
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    TASKRUN_SHELL           Shell (overrides config)
    TASKRUN_PTY             Use a pty (1/0)
    TASKRUN_ECHO            Echo commands (1/0)
    TASKRUN_WARN            Warn instead of failing (1/0)
    TASKRUN_HIDE            Streams to hide
    TASKRUN_TIMEOUT         Timeout in seconds
    TASKRUN_SUDO_PASSWORD   Password for sudo prompts
    TASKRUN_LOG_LEVEL       Log level (overrides config)
    RUST_LOG                Alternative log level setting

EXIT STATUS:
    The command's own exit code; 128+N when it was killed by signal N;
    1 when taskrun itself failed (timeout, watcher or I/O error).

EXAMPLES:
    # Run a command, failing on nonzero exit
    taskrun make test

    # Interactive program on a pty
    taskrun --pty -- vim notes.txt

    # Capture quietly with a time limit
    taskrun --hide both -t 30 ./long-job.sh
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("taskrun {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Argument that is not valid text.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
