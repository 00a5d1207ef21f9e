//! Command lines that run locally or on the GPU host over SSH.

use std::fmt;
use std::process::Command;

/// A program plus arguments, kept as data until it is spawned so it can be
/// logged and wrapped for remote execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run `script` through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", ["-c".to_string(), script.into()])
    }

    /// Single shell-quoted string, suitable as a remote command for `ssh`.
    pub fn to_shell_string(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Wrap this command so it runs on `host`.
    pub fn over_ssh(&self, host: &RemoteHost) -> Self {
        host.wrap(&self.to_shell_string())
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// SSH destination of the GPU host, optionally reached through a jump host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    /// `host`, `user@host` or an alias from `~/.ssh/config`.
    pub destination: String,
    /// `[user@]host[:port]` passed to `ssh -J`.
    pub jump: Option<String>,
}

impl RemoteHost {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            jump: None,
        }
    }

    pub fn with_jump(mut self, jump: impl Into<String>) -> Self {
        self.jump = Some(jump.into());
        self
    }

    /// Read `SSH_USER`, `SSH_TARGET_HOST`, `SSH_JUMP_HOST` and `SSH_JUMP_PORT`.
    ///
    /// Returns `None` when `SSH_TARGET_HOST` is unset.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let target = non_empty("SSH_TARGET_HOST")?;
        let user = non_empty("SSH_USER");
        let with_user = |host: &str| match &user {
            Some(u) => format!("{u}@{host}"),
            None => host.to_string(),
        };

        let jump = non_empty("SSH_JUMP_HOST").map(|jump_host| {
            let base = with_user(&jump_host);
            match non_empty("SSH_JUMP_PORT") {
                Some(port) => format!("{base}:{port}"),
                None => base,
            }
        });

        Some(Self {
            destination: with_user(&target),
            jump,
        })
    }

    /// `ssh` invocation that runs `remote_command` on this host.
    pub fn wrap(&self, remote_command: &str) -> CommandSpec {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(jump) = &self.jump {
            args.push("-J".to_string());
            args.push(jump.clone());
        }
        args.push(self.destination.clone());
        args.push(remote_command.to_string());
        CommandSpec::new("ssh", args)
    }
}

/// Quote `s` for a POSIX shell. Safe words pass through unchanged.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r#"'"'"'"#))
    }
}
