//! The configuration-bound front door: [`Context`].

use std::sync::Arc;

use crate::config::Config;
use crate::error::TaskrunError;
use crate::execution::{LocalRunner, RunOptions, RunOutcome, Runner};
use crate::watchers::{FailingResponder, StreamWatcher, WatcherError};
use crate::Result;

/// What sudo prints when it rejects a password.
pub const SUDO_REJECTED: &str = "Sorry, try again.\n";

/// Per-call sudo overrides; unset values come from the `sudo` config
/// section.
#[derive(Debug, Clone, Default)]
pub struct SudoOptions {
    /// Password to answer the prompt with.
    pub password: Option<String>,
    /// User to run as.
    pub user: Option<String>,
}

impl SudoOptions {
    /// Options that change nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the prompt with `password`.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Run as `user` instead of root.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Runs commands with a fixed configuration.
pub struct Context {
    runner: Box<dyn Runner + Send>,
}

impl Context {
    /// A context running commands locally with `config`.
    pub fn new(config: Config) -> Self {
        Self::with_runner(LocalRunner::new(config))
    }

    /// A context around any runner.
    pub fn with_runner<R: Runner + Send + 'static>(runner: R) -> Self {
        Self {
            runner: Box::new(runner),
        }
    }

    /// The configuration in effect.
    pub fn config(&self) -> &Config {
        self.runner.config()
    }

    /// Run `command`. See [`Runner::run`].
    pub fn run(&self, command: &str, options: RunOptions) -> Result<RunOutcome> {
        self.runner.run(command, options)
    }

    /// Run `command` through `sudo`, answering its password prompt.
    ///
    /// The prompt is forced to the configured one so it can be recognised.
    /// With no password configured or given, the prompt is left for the
    /// user to answer. A rejected password surfaces as
    /// [`TaskrunError::AuthFailure`].
    pub fn sudo(
        &self,
        command: &str,
        sudo: SudoOptions,
        mut options: RunOptions,
    ) -> Result<RunOutcome> {
        let config = &self.config().sudo;
        let prompt = config.prompt.clone();
        let password = sudo.password.or_else(|| config.password.clone());
        let user = sudo.user.or_else(|| config.user.clone());

        let mut watchers: Vec<Arc<dyn StreamWatcher>> = options
            .watchers
            .take()
            .unwrap_or_else(|| self.runner.default_watchers().to_vec());
        if let Some(password) = password {
            let responder = FailingResponder::new(
                &regex::escape(&prompt),
                format!("{password}\n"),
                &regex::escape(SUDO_REJECTED),
            )
            .map_err(|e| TaskrunError::InvalidOptions(format!("bad sudo prompt: {e}")))?;
            watchers.push(Arc::new(responder));
        }
        options.watchers = Some(watchers);

        let env_keys: Vec<&str> = options
            .env
            .as_ref()
            .map(|env| {
                let mut keys: Vec<&str> = env.keys().map(String::as_str).collect();
                keys.sort_unstable();
                keys
            })
            .unwrap_or_default();
        let line = sudo_command_line(command, &prompt, user.as_deref(), &env_keys);

        match self.runner.run(&line, options) {
            Err(TaskrunError::Failure {
                result,
                reason: WatcherError::ResponseNotAccepted(_),
            }) => Err(TaskrunError::AuthFailure { result, prompt }),
            other => other,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn sudo_command_line(command: &str, prompt: &str, user: Option<&str>, env_keys: &[&str]) -> String {
    let env_flags = if env_keys.is_empty() {
        String::new()
    } else {
        format!("--preserve-env={} ", shell_quote(&env_keys.join(",")))
    };
    let user_flags = user.map_or_else(String::new, |user| format!("-H -u {} ", shell_quote(user)));
    format!("sudo -S -p {} {env_flags}{user_flags}{command}", shell_quote(prompt))
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::InStream;

    #[test]
    fn test_sudo_command_line() {
        assert_eq!(
            sudo_command_line("whoami", "[sudo] password: ", None, &[]),
            "sudo -S -p '[sudo] password: ' whoami"
        );
        assert_eq!(
            sudo_command_line("whoami", "pw: ", Some("deploy"), &["A", "B"]),
            "sudo -S -p 'pw: ' --preserve-env='A,B' -H -u 'deploy' whoami"
        );
    }

    #[test]
    fn test_sudo_prompt_with_quotes() {
        assert_eq!(
            sudo_command_line("whoami", "it's a password: ", None, &[]),
            r"sudo -S -p 'it'\''s a password: ' whoami"
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_shell_quote_survives_the_shell() {
        let mut config = Config::default();
        config.run.shell = "/bin/sh".to_string();
        let context = Context::new(config);
        let prompt = "it's $HOME `id` \\ \"x\": ";
        let result = context
            .run(
                &format!("printf %s {}", shell_quote(prompt)),
                RunOptions::new().hide(true).in_stream(InStream::Disabled),
            )
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(result.stdout, prompt);
    }

    #[test]
    fn test_context_run() {
        let context = Context::default();
        let result = context
            .run(
                "echo context",
                RunOptions::new().hide(true).in_stream(InStream::Disabled),
            )
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(result.stdout.trim(), "context");
    }

    #[test]
    fn test_context_exposes_config() {
        let mut config = Config::default();
        config.run.warn = true;
        let context = Context::new(config);
        assert!(context.config().run.warn);
    }

    #[test]
    #[cfg(unix)]
    fn test_rejected_password_is_auth_failure() {
        if !std::path::Path::new("/bin/bash").exists() {
            return;
        }
        // A fake sudo that prompts, rejects the reply and prompts again.
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join("fake-sudo.sh");
        std::fs::write(
            &rc,
            "sudo() { printf '%s' \"$3\"; read pw; printf 'Sorry, try again.\\n'; printf '%s' \"$3\"; read pw; return 1; }\n",
        )
        .unwrap();

        let context = Context::default();
        let err = context
            .sudo(
                "true",
                SudoOptions::new().password("wrong"),
                RunOptions::new()
                    .shell("/bin/bash")
                    .hide(true)
                    .in_stream(InStream::Disabled)
                    .env("BASH_ENV", rc.display().to_string()),
            )
            .err()
            .unwrap();
        match err {
            TaskrunError::AuthFailure { prompt, result } => {
                assert_eq!(prompt, "[sudo] password: ");
                assert!(result.exited.is_none());
                assert!(result.command.starts_with("sudo -S -p '[sudo] password: '"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
