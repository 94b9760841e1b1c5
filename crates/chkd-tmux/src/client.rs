use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chkd_pty::PtyCommand;
use log::debug;
use tokio::process::Command;

use crate::error::TmuxError;
use crate::listing::{parse_session_list, DurableSession, LIST_FORMAT};
use crate::name::DurableName;

/// Narrow interface to the terminal multiplexer.
///
/// The session manager only needs these capabilities, so tests can swap in
/// a fake without spawning a real multiplexer.
#[async_trait]
pub trait MultiplexerClient: Send + Sync {
    /// Fail with [`TmuxError::Unavailable`] when the binary cannot be run.
    async fn ensure_available(&self) -> Result<(), TmuxError>;

    /// Whether a durable session called `name` is running.
    ///
    /// Returns `false` both when the session does not exist and when the
    /// answer cannot be determined (binary missing, server down, timeout,
    /// permission error). Both callers of this probe fall back to creating
    /// the session, which is safe either way.
    async fn exists(&self, name: &DurableName) -> bool;

    /// Destroy the durable session `name`.
    ///
    /// Returns `Ok(false)` when there was no such session.
    async fn kill_session(&self, name: &str) -> Result<bool, TmuxError>;

    /// Every durable session the multiplexer knows about, ours or not.
    async fn list_sessions(&self) -> Result<Vec<DurableSession>, TmuxError>;

    /// The client command a PTY runs to view `name`: an attach when the
    /// session `exists`, otherwise a create rooted at `workspace`.
    fn client_command(&self, name: &DurableName, workspace: &Path, exists: bool) -> PtyCommand;
}

/// [`MultiplexerClient`] backed by the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxClient {
    binary: String,
    socket: Option<String>,
    timeout: Duration,
}

impl TmuxClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            socket: None,
            timeout,
        }
    }

    /// Talk to a private tmux server (`tmux -L <socket>`) instead of the default one.
    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn resolve_binary(&self) -> Result<PathBuf, TmuxError> {
        which::which(&self.binary).map_err(|_| TmuxError::Unavailable {
            binary: self.binary.clone(),
        })
    }

    /// Arguments that precede every tmux subcommand.
    fn base_args(&self) -> Vec<String> {
        match &self.socket {
            Some(socket) => vec!["-L".to_string(), socket.clone()],
            None => Vec::new(),
        }
    }

    /// Run a tmux subcommand to completion, bounded by the configured timeout.
    async fn run(&self, args: &[&str]) -> Result<Output, TmuxError> {
        let binary = self.resolve_binary()?;
        let command = args.first().copied().unwrap_or_default().to_string();

        let mut cmd = Command::new(&binary);
        cmd.args(self.base_args())
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => Err(TmuxError::Timeout {
                command,
                timeout: self.timeout,
            }),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(TmuxError::Unavailable {
                binary: self.binary.clone(),
            }),
            Ok(Err(e)) => Err(TmuxError::Io(e)),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new("tmux", Self::DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl MultiplexerClient for TmuxClient {
    async fn ensure_available(&self) -> Result<(), TmuxError> {
        self.resolve_binary().map(|_| ())
    }

    async fn exists(&self, name: &DurableName) -> bool {
        match self.run(&["has-session", "-t", &exact_target(name.as_str())]).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("has-session probe for {name} failed, treating as absent: {e}");
                false
            }
        }
    }

    async fn kill_session(&self, name: &str) -> Result<bool, TmuxError> {
        let output = self.run(&["kill-session", "-t", &exact_target(name)]).await?;
        if output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_missing_session(&stderr) {
            return Ok(false);
        }
        Err(TmuxError::CommandFailed {
            command: "kill-session".to_string(),
            stderr,
        })
    }

    async fn list_sessions(&self) -> Result<Vec<DurableSession>, TmuxError> {
        let output = self.run(&["list-sessions", "-F", LIST_FORMAT]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_missing_session(&stderr) {
                return Ok(Vec::new());
            }
            return Err(TmuxError::CommandFailed {
                command: "list-sessions".to_string(),
                stderr,
            });
        }

        Ok(parse_session_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn client_command(&self, name: &DurableName, workspace: &Path, exists: bool) -> PtyCommand {
        // Prefer the absolute path; if the lookup fails the spawn reports it.
        let program = self
            .resolve_binary()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| self.binary.clone());

        let command = PtyCommand::new(program).args(self.base_args());
        if exists {
            command.args(["attach-session", "-t", &exact_target(name.as_str())])
        } else {
            // -A turns a lost create race into an attach.
            command
                .args(["new-session", "-A", "-s", name.as_str(), "-c"])
                .arg(workspace.to_string_lossy())
                .cwd(workspace)
        }
    }
}

/// tmux matches `-t` targets by prefix unless they start with `=`.
fn exact_target(name: &str) -> String {
    format!("={name}")
}

/// stderr fragments tmux prints when there is nothing to act on.
///
/// A socket that exists but cannot be opened (permission denied) is a real
/// failure, so "error connecting to" only counts when the socket is missing.
fn is_missing_session(stderr: &str) -> bool {
    const MARKERS: [&str; 3] = ["can't find session", "session not found", "no server running"];
    MARKERS.iter().any(|marker| stderr.contains(marker))
        || (stderr.contains("error connecting to") && stderr.contains("No such file or directory"))
}
