//! Per-call run options and their resolution against configuration.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::encoding::Encoding;
use crate::config::Config;
use crate::error::TaskrunError;
use crate::watchers::StreamWatcher;
use crate::Result;

/// One of the subprocess's output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard output (the merged stream under a pty).
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// Which streams are kept off the local terminal.
///
/// Hiding only affects local echoing; captured output is never touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HideSpec", into = "HideSpec")]
pub struct HideSet {
    /// Hide stdout.
    pub stdout: bool,
    /// Hide stderr.
    pub stderr: bool,
}

impl HideSet {
    /// Hide nothing.
    pub const NONE: HideSet = HideSet {
        stdout: false,
        stderr: false,
    };
    /// Hide stdout only.
    pub const STDOUT: HideSet = HideSet {
        stdout: true,
        stderr: false,
    };
    /// Hide stderr only.
    pub const STDERR: HideSet = HideSet {
        stdout: false,
        stderr: true,
    };
    /// Hide both streams.
    pub const BOTH: HideSet = HideSet {
        stdout: true,
        stderr: true,
    };

    /// Whether `stream` is hidden.
    pub fn contains(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Stdout => self.stdout,
            StreamKind::Stderr => self.stderr,
        }
    }

    /// Whether nothing is hidden.
    pub fn is_empty(&self) -> bool {
        !self.stdout && !self.stderr
    }

    /// Drop streams whose destination was explicitly overridden.
    pub(crate) fn without_overridden(self, out_overridden: bool, err_overridden: bool) -> Self {
        Self {
            stdout: self.stdout && !out_overridden,
            stderr: self.stderr && !err_overridden,
        }
    }
}

impl From<bool> for HideSet {
    fn from(hide: bool) -> Self {
        if hide {
            HideSet::BOTH
        } else {
            HideSet::NONE
        }
    }
}

impl FromStr for HideSet {
    type Err = TaskrunError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "false" => Ok(HideSet::NONE),
            "out" | "stdout" => Ok(HideSet::STDOUT),
            "err" | "stderr" => Ok(HideSet::STDERR),
            "both" | "true" => Ok(HideSet::BOTH),
            other => Err(TaskrunError::InvalidOptions(format!(
                "'hide' got {other:?} which is not in (None, False, 'out', 'stdout', 'err', 'stderr', 'both', True)"
            ))),
        }
    }
}

impl fmt::Display for HideSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.stdout, self.stderr) {
            (false, false) => "none",
            (true, false) => "stdout",
            (false, true) => "stderr",
            (true, true) => "both",
        };
        f.write_str(name)
    }
}

/// Serialized form of [`HideSet`]: a bool or a stream name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HideSpec {
    /// `true` hides both streams, `false` neither.
    Flag(bool),
    /// `"stdout"`, `"out"`, `"stderr"`, `"err"` or `"both"`.
    Name(String),
}

impl TryFrom<HideSpec> for HideSet {
    type Error = TaskrunError;

    fn try_from(spec: HideSpec) -> Result<Self> {
        match spec {
            HideSpec::Flag(flag) => Ok(flag.into()),
            HideSpec::Name(name) => name.parse(),
        }
    }
}

impl From<HideSet> for HideSpec {
    fn from(hide: HideSet) -> Self {
        match (hide.stdout, hide.stderr) {
            (false, false) => HideSpec::Flag(false),
            (true, true) => HideSpec::Flag(true),
            _ => HideSpec::Name(hide.to_string()),
        }
    }
}

/// A shareable local output destination.
#[derive(Clone)]
pub struct OutputStream {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputStream {
    /// Wrap any writer.
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Our own process's stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Our own process's stderr.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Write `text` and flush.
    pub fn write_str(&self, text: &str) -> Result<()> {
        let mut writer = self.inner.lock().map_err(|_| TaskrunError::LockPoisoned)?;
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutputStream")
    }
}

/// Where the subprocess's stdin comes from.
#[derive(Default)]
pub enum InStream {
    /// Mirror our own process's stdin.
    #[default]
    Inherit,
    /// Do not forward any local input.
    Disabled,
    /// Forward the contents of an arbitrary reader.
    Reader(Box<dyn Read + Send>),
}

impl InStream {
    /// Forward the contents of `reader`.
    pub fn reader<R: Read + Send + 'static>(reader: R) -> Self {
        InStream::Reader(Box::new(reader))
    }
}

impl fmt::Debug for InStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InStream::Inherit => f.write_str("Inherit"),
            InStream::Disabled => f.write_str("Disabled"),
            InStream::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Per-call options. Every `None` falls back to the configured default.
#[derive(Default)]
pub struct RunOptions {
    /// Shell used to run the command.
    pub shell: Option<String>,
    /// Run the command on a pseudo-terminal.
    pub pty: Option<bool>,
    /// Allow falling back to pipes when a pty cannot be used.
    pub fallback: Option<bool>,
    /// Streams to keep off the local terminal.
    pub hide: Option<HideSet>,
    /// Print the command before running it.
    pub echo: Option<bool>,
    /// Mirror forwarded stdin locally; `None` keeps the configured policy.
    pub echo_stdin: Option<bool>,
    /// Template for the echoed command line.
    pub echo_format: Option<String>,
    /// Do not run anything; return a successful empty result.
    pub dry: Option<bool>,
    /// Return nonzero exits as results instead of errors.
    pub warn: Option<bool>,
    /// Return a [`Promise`](super::Promise) immediately.
    pub asynchronous: Option<bool>,
    /// Start the process and forget about it.
    pub disown: Option<bool>,
    /// Extra (or replacement) environment variables.
    pub env: Option<HashMap<String, String>>,
    /// Use `env` as the whole environment instead of merging it.
    pub replace_env: Option<bool>,
    /// Text encoding label, e.g. `"utf-8"`.
    pub encoding: Option<String>,
    /// Kill the command after this long.
    pub timeout: Option<Duration>,
    /// Destination for echoed stdout.
    pub out_stream: Option<OutputStream>,
    /// Destination for echoed stderr.
    pub err_stream: Option<OutputStream>,
    /// Source of forwarded stdin.
    pub in_stream: Option<InStream>,
    /// Watchers scanning the output streams.
    pub watchers: Option<Vec<Arc<dyn StreamWatcher>>>,
}

impl RunOptions {
    /// Options that change nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shell.
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Request (or refuse) a pty.
    pub fn pty(mut self, pty: bool) -> Self {
        self.pty = Some(pty);
        self
    }

    /// Allow or forbid the pty fallback.
    pub fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Hide streams locally.
    pub fn hide(mut self, hide: impl Into<HideSet>) -> Self {
        self.hide = Some(hide.into());
        self
    }

    /// Echo the command.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = Some(echo);
        self
    }

    /// Force stdin mirroring on or off.
    pub fn echo_stdin(mut self, echo: bool) -> Self {
        self.echo_stdin = Some(echo);
        self
    }

    /// Template for the echoed command (`{command}` is substituted).
    pub fn echo_format(mut self, format: impl Into<String>) -> Self {
        self.echo_format = Some(format.into());
        self
    }

    /// Dry-run.
    pub fn dry(mut self, dry: bool) -> Self {
        self.dry = Some(dry);
        self
    }

    /// Do not fail on nonzero exit.
    pub fn warn(mut self, warn: bool) -> Self {
        self.warn = Some(warn);
        self
    }

    /// Run in the background and return a promise.
    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = Some(asynchronous);
        self
    }

    /// Fire and forget.
    pub fn disown(mut self, disown: bool) -> Self {
        self.disown = Some(disown);
        self
    }

    /// Add one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (k, v) in vars {
            env.insert(k.into(), v.into());
        }
        self
    }

    /// Replace the environment instead of merging.
    pub fn replace_env(mut self, replace: bool) -> Self {
        self.replace_env = Some(replace);
        self
    }

    /// Text encoding label.
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Redirect echoed stdout.
    pub fn out_stream(mut self, stream: OutputStream) -> Self {
        self.out_stream = Some(stream);
        self
    }

    /// Redirect echoed stderr.
    pub fn err_stream(mut self, stream: OutputStream) -> Self {
        self.err_stream = Some(stream);
        self
    }

    /// Choose the stdin source.
    pub fn in_stream(mut self, stream: InStream) -> Self {
        self.in_stream = Some(stream);
        self
    }

    /// Add a watcher.
    pub fn watcher(mut self, watcher: Arc<dyn StreamWatcher>) -> Self {
        self.watchers.get_or_insert_with(Vec::new).push(watcher);
        self
    }

    /// Replace the watcher list.
    pub fn watchers(mut self, watchers: Vec<Arc<dyn StreamWatcher>>) -> Self {
        self.watchers = Some(watchers);
        self
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("shell", &self.shell)
            .field("pty", &self.pty)
            .field("hide", &self.hide)
            .field("echo", &self.echo)
            .field("dry", &self.dry)
            .field("warn", &self.warn)
            .field("asynchronous", &self.asynchronous)
            .field("disown", &self.disown)
            .field("timeout", &self.timeout)
            .field("in_stream", &self.in_stream)
            .field(
                "watchers",
                &self.watchers.as_ref().map_or(0, |watchers| watchers.len()),
            )
            .finish_non_exhaustive()
    }
}

/// Options after merging a call's overrides over the configuration.
pub struct ResolvedOptions {
    pub shell: String,
    pub pty: bool,
    pub fallback: bool,
    pub hide: HideSet,
    pub echo: bool,
    pub echo_stdin: Option<bool>,
    pub echo_format: String,
    pub dry: bool,
    pub warn: bool,
    pub asynchronous: bool,
    pub disown: bool,
    /// The complete environment handed to the child.
    pub env: HashMap<String, String>,
    pub encoding: Encoding,
    pub timeout: Option<Duration>,
    pub out_stream: OutputStream,
    pub err_stream: OutputStream,
    pub in_stream: InStream,
    pub watchers: Vec<Arc<dyn StreamWatcher>>,
}

impl ResolvedOptions {
    /// Merge `options` over `config`; call-site values win.
    pub fn resolve(
        config: &Config,
        default_watchers: &[Arc<dyn StreamWatcher>],
        options: RunOptions,
    ) -> Result<Self> {
        let run = &config.run;
        let asynchronous = options.asynchronous.unwrap_or(run.asynchronous);
        let disown = options.disown.unwrap_or(run.disown);
        if asynchronous && disown {
            return Err(TaskrunError::InvalidOptions(
                "Cannot give both 'asynchronous' and 'disown' at the same time!".into(),
            ));
        }

        let hide = options
            .hide
            .unwrap_or(run.hide)
            .without_overridden(options.out_stream.is_some(), options.err_stream.is_some());
        // Hiding stdout silences the echo unless this call asked for it.
        let echo = match options.echo {
            Some(echo) => echo,
            None => run.echo && !hide.stdout,
        };

        let replace_env = options.replace_env.unwrap_or(run.replace_env);
        let env = generate_env(options.env.as_ref().unwrap_or(&run.env), replace_env);

        let encoding = match options.encoding.as_deref().or(run.encoding.as_deref()) {
            Some(label) => label.parse()?,
            None => Encoding::preferred(),
        };

        let timeout = options
            .timeout
            .or_else(|| config.timeouts.command.map(Duration::from_secs_f64));

        Ok(Self {
            shell: options.shell.unwrap_or_else(|| run.shell.clone()),
            pty: options.pty.unwrap_or(run.pty),
            fallback: options.fallback.unwrap_or(run.fallback),
            hide,
            echo,
            echo_stdin: options.echo_stdin.or(run.echo_stdin),
            echo_format: options
                .echo_format
                .unwrap_or_else(|| run.echo_format.clone()),
            dry: options.dry.unwrap_or(run.dry),
            warn: options.warn.unwrap_or(run.warn),
            asynchronous,
            disown,
            env,
            encoding,
            timeout,
            out_stream: options.out_stream.unwrap_or_else(OutputStream::stdout),
            err_stream: options.err_stream.unwrap_or_else(OutputStream::stderr),
            in_stream: options.in_stream.unwrap_or_default(),
            watchers: options
                .watchers
                .unwrap_or_else(|| default_watchers.to_vec()),
        })
    }

    /// The echoed form of `command`.
    pub fn echo_line(&self, command: &str) -> String {
        format!("{}\n", self.echo_format.replace("{command}", command))
    }
}

/// Build the child's environment: `env` over ours, or `env` alone.
pub fn generate_env(env: &HashMap<String, String>, replace_env: bool) -> HashMap<String, String> {
    if replace_env {
        return env.clone();
    }
    overlay_env(std::env::vars_os(), env)
}

/// `base` overlaid with `env`. Entries of `base` that are not valid UTF-8
/// are dropped.
fn overlay_env(
    base: impl IntoIterator<Item = (OsString, OsString)>,
    env: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = base
        .into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect();
    merged.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hide_parsing() {
        assert_eq!("stdout".parse::<HideSet>().unwrap(), HideSet::STDOUT);
        assert_eq!("out".parse::<HideSet>().unwrap(), HideSet::STDOUT);
        assert_eq!("err".parse::<HideSet>().unwrap(), HideSet::STDERR);
        assert_eq!("both".parse::<HideSet>().unwrap(), HideSet::BOTH);
        assert_eq!("true".parse::<HideSet>().unwrap(), HideSet::BOTH);
        assert_eq!("false".parse::<HideSet>().unwrap(), HideSet::NONE);
        assert!("sideways".parse::<HideSet>().is_err());
    }

    #[test]
    fn test_hide_serde() {
        let hide: HideSet = serde_json::from_str("true").unwrap();
        assert_eq!(hide, HideSet::BOTH);
        let hide: HideSet = serde_json::from_str("\"stderr\"").unwrap();
        assert_eq!(hide, HideSet::STDERR);
        assert!(serde_json::from_str::<HideSet>("\"nope\"").is_err());
        assert_eq!(serde_json::to_string(&HideSet::STDOUT).unwrap(), "\"stdout\"");
    }

    #[test]
    fn test_overridden_stream_is_not_hidden() {
        let hide = HideSet::BOTH.without_overridden(true, false);
        assert_eq!(hide, HideSet::STDERR);
    }

    #[test]
    fn test_resolve_defaults() {
        let config = Config::default();
        let opts = ResolvedOptions::resolve(&config, &[], RunOptions::new()).unwrap();
        assert_eq!(opts.shell, config.run.shell);
        assert!(!opts.pty);
        assert!(opts.fallback);
        assert!(!opts.echo);
        assert!(!opts.warn);
        assert!(opts.timeout.is_none());
        assert!(opts.watchers.is_empty());
        assert!(matches!(opts.in_stream, InStream::Inherit));
    }

    #[test]
    fn test_resolve_call_site_wins() {
        let mut config = Config::default();
        config.run.warn = true;
        config.timeouts.command = Some(10.0);

        let opts = ResolvedOptions::resolve(
            &config,
            &[],
            RunOptions::new()
                .warn(false)
                .timeout(Duration::from_millis(250)),
        )
        .unwrap();
        assert!(!opts.warn);
        assert_eq!(opts.timeout, Some(Duration::from_millis(250)));

        let opts = ResolvedOptions::resolve(&config, &[], RunOptions::new()).unwrap();
        assert!(opts.warn);
        assert_eq!(opts.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_async_and_disown_conflict() {
        let config = Config::default();
        let err = ResolvedOptions::resolve(
            &config,
            &[],
            RunOptions::new().asynchronous(true).disown(true),
        )
        .err()
        .unwrap();
        assert!(matches!(err, TaskrunError::InvalidOptions(_)));
    }

    #[test]
    fn test_hidden_stdout_silences_configured_echo() {
        let mut config = Config::default();
        config.run.echo = true;

        let opts =
            ResolvedOptions::resolve(&config, &[], RunOptions::new().hide(HideSet::STDOUT))
                .unwrap();
        assert!(!opts.echo);

        let opts = ResolvedOptions::resolve(
            &config,
            &[],
            RunOptions::new().hide(HideSet::STDOUT).echo(true),
        )
        .unwrap();
        assert!(opts.echo);
    }

    #[test]
    fn test_echo_line_format() {
        let config = Config::default();
        let opts = ResolvedOptions::resolve(
            &config,
            &[],
            RunOptions::new().echo_format("+ {command}"),
        )
        .unwrap();
        assert_eq!(opts.echo_line("ls -l"), "+ ls -l\n");
    }

    #[test]
    fn test_generate_env_merge_and_replace() {
        let mut extra = HashMap::new();
        extra.insert("TASKRUN_TEST_VAR".to_string(), "1".to_string());

        let merged = generate_env(&extra, false);
        assert_eq!(merged.get("TASKRUN_TEST_VAR").map(String::as_str), Some("1"));
        assert!(merged.len() > 1 || std::env::vars_os().count() == 0);

        let replaced = generate_env(&extra, true);
        assert_eq!(replaced, extra);
    }

    #[test]
    #[cfg(unix)]
    fn test_overlay_env_skips_non_utf8() {
        use std::os::unix::ffi::OsStringExt;

        let base = vec![
            (OsString::from("PATH"), OsString::from("/bin")),
            (OsString::from("BAD_VALUE"), OsString::from_vec(vec![0x66, 0xff])),
            (OsString::from_vec(vec![0xfe, 0x41]), OsString::from("bad key")),
        ];
        let extra = HashMap::from([("EXTRA".to_string(), "1".to_string())]);

        let merged = overlay_env(base, &extra);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["PATH"], "/bin");
        assert_eq!(merged["EXTRA"], "1");
        assert!(!merged.contains_key("BAD_VALUE"));
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let config = Config::default();
        let result =
            ResolvedOptions::resolve(&config, &[], RunOptions::new().encoding("klingon"));
        assert!(result.is_err());
    }
}
