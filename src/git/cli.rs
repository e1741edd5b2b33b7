//! Async git process runner
//!
//! Every invocation:
//! - runs in the repository's working tree with stdin closed unless input is given
//! - never prompts (`GIT_TERMINAL_PROMPT=0`, editor disabled)
//! - produces untranslated, unquoted, uncolored output
//! - is killed if the awaiting future is dropped (cancellation, timeouts)

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::GitError;

/// Default git executable
pub const DEFAULT_GIT_PROGRAM: &str = "git";

static AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(authentication failed|could not read (username|password)|terminal prompts disabled|permission denied \(publickey|invalid username or password|HTTP Basic: Access denied)",
    )
    .expect("valid regex")
});

static UNKNOWN_REVISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(unknown revision|bad revision|invalid object name|not a valid object name|needed a single revision|bad object|invalid reference|not a commit|couldn't find remote ref)",
    )
    .expect("valid regex")
});

static UNKNOWN_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(did not match any file|no such path|does not exist in|exists on disk, but not in)")
        .expect("valid regex")
});

static UNMERGED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(is unmerged|needs merge|resolve your current index first|unmerged files)")
        .expect("valid regex")
});

/// Captured result of one git process
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs git in one working tree
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    workdir: PathBuf,
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Start building an invocation of `git <args>`
    pub fn command<I, S>(&self, args: I) -> Invocation<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation {
            cli: self,
            config: Vec::new(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            stdin: None,
        }
    }

    /// Run and require success, returning stdout
    pub async fn run<I, S>(&self, args: I) -> Result<Vec<u8>, GitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.command(args).run().await?.stdout)
    }

    /// Classify a failed invocation into the adapter's error taxonomy
    pub fn classify_failure(&self, command: &str, output: &GitOutput) -> GitError {
        let stderr = output.stderr.trim();
        let first_line = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or(stderr);

        if stderr.contains("not a git repository") {
            GitError::RepositoryNotFound(self.workdir.clone())
        } else if AUTH_FAILURE.is_match(stderr) {
            GitError::AuthenticationRequired {
                remote: String::new(),
            }
        } else if UNMERGED.is_match(stderr) {
            GitError::IndexConflict(Vec::new())
        } else if UNKNOWN_PATH.is_match(stderr) {
            GitError::PathNotTracked(strip_fatal(first_line))
        } else if UNKNOWN_REVISION.is_match(stderr) {
            GitError::RevisionUnresolvable(strip_fatal(first_line))
        } else {
            GitError::ExternalToolFailure {
                command: command.to_string(),
                code: output.code,
                stderr: stderr.to_string(),
            }
        }
    }
}

fn strip_fatal(line: &str) -> String {
    line.trim()
        .trim_start_matches("fatal: ")
        .trim_start_matches("error: ")
        .to_string()
}

/// A git command being assembled
#[must_use]
pub struct Invocation<'a> {
    cli: &'a GitCli,
    config: Vec<(String, String)>,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
}

impl Invocation<'_> {
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `-c key=value` for this invocation only
    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.push((key.into(), value.into()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Human-readable command line (without config overrides or env)
    pub fn describe(&self) -> String {
        self.args.join(" ")
    }

    /// Run and return the output whatever the exit status
    #[instrument(skip_all, fields(cmd = %self.describe()))]
    pub async fn output(self) -> Result<GitOutput, GitError> {
        let mut cmd = Command::new(&self.cli.program);
        cmd.current_dir(&self.cli.workdir)
            .args(["-c", "core.quotepath=off", "-c", "color.ui=never"]);
        for (key, value) in &self.config {
            cmd.arg("-c").arg(format!("{key}={value}"));
        }
        cmd.args(&self.args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .env("GIT_OPTIONAL_LOCKS", "0")
            .env("LC_ALL", "C")
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| GitError::ExternalToolFailure {
            command: self.describe(),
            code: None,
            stderr: format!("failed to start {}: {e}", self.cli.program.display()),
        })?;

        // Feed stdin concurrently so a chatty process cannot deadlock us
        let writer = match (self.stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => Some(tokio::spawn(async move {
                let written = pipe.write_all(&input).await;
                drop(pipe);
                written
            })),
            _ => None,
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GitError::ExternalToolFailure {
                command: self.args.join(" "),
                code: None,
                stderr: e.to_string(),
            })?;

        if let Some(writer) = writer {
            if let Ok(Err(e)) = writer.await {
                warn!("Failed writing stdin to git: {}", e);
            }
        }

        let result = GitOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(code = ?result.code, "git finished");
        Ok(result)
    }

    /// Run and require a zero exit status
    pub async fn run(self) -> Result<GitOutput, GitError> {
        let cli = self.cli;
        let command = self.describe();
        let output = self.output().await?;
        if output.success() {
            Ok(output)
        } else {
            Err(cli.classify_failure(&command, &output))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> GitOutput {
        GitOutput {
            code: Some(128),
            stdout: Vec::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_classify_failures() {
        let cli = GitCli::new("git", "/repo");

        let err = cli.classify_failure("status", &failed("fatal: not a git repository (or any parent)"));
        assert!(matches!(err, GitError::RepositoryNotFound(p) if p == Path::new("/repo")));

        let err = cli.classify_failure(
            "log",
            &failed("fatal: ambiguous argument 'nope': unknown revision or path not in the working tree."),
        );
        assert!(matches!(err, GitError::RevisionUnresolvable(msg) if msg.contains("nope")));

        let err = cli.classify_failure(
            "checkout",
            &failed("error: pathspec 'x.txt' did not match any file(s) known to git"),
        );
        assert!(matches!(err, GitError::PathNotTracked(_)));

        let err = cli.classify_failure(
            "fetch",
            &failed("fatal: could not read Username for 'https://example.com': terminal prompts disabled"),
        );
        assert!(matches!(err, GitError::AuthenticationRequired { .. }));

        let err = cli.classify_failure(
            "commit",
            &failed("error: Committing is not possible because you have unmerged files."),
        );
        assert!(matches!(err, GitError::IndexConflict(_)));

        let err = cli.classify_failure("gc", &failed("fatal: something unusual"));
        assert!(matches!(
            err,
            GitError::ExternalToolFailure { code: Some(128), .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_executable_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let cli = GitCli::new("/definitely/not/git", dir.path());
        let err = cli.command(["status"]).output().await.unwrap_err();
        assert!(matches!(err, GitError::ExternalToolFailure { code: None, .. }));
    }
}
