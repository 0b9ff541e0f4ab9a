//! Git capability used for every diff, history and apply operation.
//!
//! All invocations are blocking, carry a deadline, and can be cancelled
//! through a shared [`CancelToken`]. Output is kept as raw bytes so binary
//! patches pass through untouched.

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::backoff::ExponentialBackoff;
use crate::config::Config;
use crate::error::{Error, Result};

/// Author and committer name for commits the tool makes itself.
pub const TOOL_USER_NAME: &str = "workcopy-sync";

/// Author and committer email for commits the tool makes itself.
pub const TOOL_USER_EMAIL: &str = "workcopy-sync@localhost";

/// Shared flag used to cancel in-flight git invocations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Running and future invocations fail.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Captured result of one git invocation.
#[derive(Debug)]
pub struct GitOutput {
    /// Exit status of the process.
    pub status: ExitStatus,
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
}

impl GitOutput {
    /// Returns true if git exited with status zero.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Standard output as text with trailing newlines removed.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout)
            .trim_end_matches(['\n', '\r'])
            .to_string()
    }

    /// Standard error as text with surrounding whitespace removed.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Standard output followed by standard error.
    ///
    /// `git am` reports part of its failure on stdout, so conflict
    /// classification looks at both streams.
    pub fn combined_text(&self) -> String {
        let stdout = String::from_utf8_lossy(&self.stdout);
        let stderr = String::from_utf8_lossy(&self.stderr);
        format!("{}\n{}", stdout.trim(), stderr.trim())
            .trim()
            .to_string()
    }
}

/// Handle for running git with a deadline and optional cancellation.
#[derive(Debug, Clone)]
pub struct Git {
    program: String,
    timeout: Duration,
    cancel: Option<CancelToken>,
}

impl Default for Git {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Git {
    /// Creates a runner for the given git executable with a five minute deadline.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(300),
            cancel: None,
        }
    }

    /// Creates a runner from the process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.git_program.clone()).with_timeout(config.git_timeout)
    }

    /// Sets the per-invocation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Runs git in `dir`, returning its output whatever the exit status.
    pub fn run<I, S>(&self, dir: &Path, args: I) -> Result<GitOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let command_line = render_command(&self.program, &args);

        if self.is_cancelled() {
            return Err(Error::Cancelled(command_line));
        }

        tracing::debug!(cwd = ?dir, command = %command_line, "running git");

        let mut child = Command::new(&self.program)
            .current_dir(dir)
            .args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .env("LANG", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Git(format!("failed to run {}: {}", self.program, e)))?;

        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let mut backoff = ExponentialBackoff::for_process_poll();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            if self.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(command = %command_line, "git invocation cancelled");
                return Err(Error::Cancelled(command_line));
            }

            let now = Instant::now();
            if now >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(command = %command_line, "git invocation timed out");
                return Err(Error::TimedOut {
                    command: command_line,
                    seconds: self.timeout.as_secs(),
                });
            }

            thread::sleep(backoff.step(deadline - now));
        };

        let output = GitOutput {
            status,
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
        };

        if !output.success() {
            tracing::debug!(
                command = %command_line,
                code = ?output.status.code(),
                stderr = %output.stderr_text(),
                "git exited with failure"
            );
        }

        Ok(output)
    }

    /// Runs git and fails with [`Error::Git`] on a non-zero exit.
    pub fn run_ok<I, S>(&self, dir: &Path, args: I) -> Result<GitOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let output = self.run(dir, &args)?;
        if !output.success() {
            let detail = output.stderr_text();
            let detail = if detail.is_empty() {
                output.stdout_text()
            } else {
                detail
            };
            return Err(Error::Git(format!(
                "{} (in {}): {}",
                render_command(&self.program, &args),
                dir.display(),
                detail
            )));
        }
        Ok(output)
    }

    /// Runs git and returns its standard output as trimmed text.
    pub fn text<I, S>(&self, dir: &Path, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Ok(self.run_ok(dir, args)?.stdout_text())
    }

    /// Resolves a revision expression to a full commit id.
    pub fn rev_parse(&self, dir: &Path, rev: &str) -> Result<String> {
        let spec = format!("{}^{{commit}}", rev);
        let output = self.run(dir, ["rev-parse", "--verify", "--quiet", spec.as_str()])?;
        if !output.success() {
            return Err(Error::Git(format!(
                "cannot resolve '{}' in {}",
                rev,
                dir.display()
            )));
        }
        Ok(output.stdout_text())
    }

    /// Returns the commit id HEAD points at.
    pub fn head(&self, dir: &Path) -> Result<String> {
        self.rev_parse(dir, "HEAD")
    }

    /// Returns true if `dir` is inside a repository with at least one commit.
    pub fn has_history(&self, dir: &Path) -> Result<bool> {
        let output = self.run(dir, ["rev-parse", "--verify", "--quiet", "HEAD^{commit}"])?;
        Ok(output.success())
    }

    /// Returns the top level of the repository containing `dir`, if any.
    pub fn toplevel(&self, dir: &Path) -> Result<Option<String>> {
        let output = self.run(dir, ["rev-parse", "--show-toplevel"])?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(output.stdout_text()))
    }

    /// Stages every addition, modification and removal in the work tree.
    pub fn stage_all(&self, dir: &Path) -> Result<()> {
        self.run_ok(dir, ["add", "-A"])?;
        Ok(())
    }

    /// Commits whatever is staged using the tool's own identity.
    pub fn commit_as_tool(&self, dir: &Path, message: &str, allow_empty: bool) -> Result<String> {
        let name = format!("user.name={}", TOOL_USER_NAME);
        let email = format!("user.email={}", TOOL_USER_EMAIL);
        let mut args = vec![
            "-c",
            name.as_str(),
            "-c",
            email.as_str(),
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--no-verify",
            "--quiet",
            "-m",
            message,
        ];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run_ok(dir, &args)?;
        self.head(dir)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf);
        }
        buf
    })
}

fn render_command(program: &str, args: &[OsString]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn cancelled_runner_refuses_to_start() {
        let dir = TempDir::new().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let git = Git::default().with_cancel(token);

        let err = git.run(dir.path(), ["--version"]).unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[test]
    fn runs_git_and_captures_stdout() {
        let dir = TempDir::new().unwrap();
        let output = Git::default().run(dir.path(), ["--version"]).unwrap();
        assert!(output.success());
        assert!(output.stdout_text().starts_with("git version"));
    }

    #[test]
    fn run_ok_reports_stderr_on_failure() {
        let dir = TempDir::new().unwrap();
        let err = Git::default()
            .run_ok(dir.path(), ["rev-parse", "--show-toplevel"])
            .unwrap_err();
        match err {
            Error::Git(msg) => assert!(msg.contains("not a git repository"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn missing_program_is_a_git_error() {
        let dir = TempDir::new().unwrap();
        let err = Git::new("definitely-not-git-binary")
            .run(dir.path(), ["status"])
            .unwrap_err();
        assert!(matches!(err, Error::Git(_)));
    }

    #[test]
    fn run_ok_names_the_configured_program() {
        let dir = TempDir::new().unwrap();
        let path = std::env::var_os("PATH").unwrap_or_default();
        let git_path = std::env::split_paths(&path)
            .map(|p| p.join("git"))
            .find(|p| p.is_file())
            .expect("git on PATH");
        let program = git_path.to_string_lossy().to_string();

        let err = Git::new(program.clone())
            .run_ok(dir.path(), ["rev-parse", "--show-toplevel"])
            .unwrap_err();
        match err {
            Error::Git(msg) => assert!(msg.starts_with(&format!("{} rev-parse", program)), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn rev_parse_keeps_cancellation() {
        let dir = TempDir::new().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err = Git::default()
            .with_cancel(token)
            .rev_parse(dir.path(), "HEAD")
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[test]
    fn rev_parse_reports_unknown_revision() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        git.run_ok(dir.path(), ["init", "--quiet"]).unwrap();
        let err = git.rev_parse(dir.path(), "nope").unwrap_err();
        match err {
            Error::Git(msg) => assert!(msg.contains("cannot resolve 'nope'"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn plain_directory_has_no_history() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        assert!(!git.has_history(dir.path()).unwrap());
        assert!(git.toplevel(dir.path()).unwrap().is_none());
    }

    #[test]
    fn commit_as_tool_works_without_user_identity() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        git.run_ok(dir.path(), ["init", "--quiet"]).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        git.stage_all(dir.path()).unwrap();

        let sha = git.commit_as_tool(dir.path(), "first", false).unwrap();
        assert_eq!(sha.len(), 40);
        assert_eq!(git.head(dir.path()).unwrap(), sha);
        assert!(git.has_history(dir.path()).unwrap());
    }
}
