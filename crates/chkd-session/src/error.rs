use std::path::PathBuf;

use chkd_pty::PtyError;
use chkd_tmux::TmuxError;

use crate::record::EphemeralId;

/// Errors surfaced to callers of the session manager.
///
/// Unknown ids are only an error for explicit lookups such as
/// `describe`; write, resize and close treat them as already closed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Multiplexer(#[from] TmuxError),

    #[error("failed to start terminal: {0}")]
    Spawn(#[from] PtyError),

    /// Write or resize failed on a running viewer.
    #[error("terminal I/O failed: {0}")]
    Terminal(#[source] PtyError),

    #[error("unknown terminal session {0}")]
    UnknownSession(EphemeralId),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

impl SessionError {
    /// The multiplexer binary is missing or not executable.
    pub fn is_tool_unavailable(&self) -> bool {
        matches!(self, SessionError::Multiplexer(TmuxError::Unavailable { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_failures_are_not_spawn_failures() {
        let err = SessionError::Terminal(PtyError::Resize("ioctl failed".to_string()));
        let message = err.to_string();
        assert!(message.starts_with("terminal I/O failed"), "{message}");
        assert!(!message.contains("start"), "{message}");
        assert!(std::error::Error::source(&err).is_some());

        let spawn = SessionError::from(PtyError::Spawn("no pty".to_string()));
        assert!(spawn.to_string().starts_with("failed to start terminal"));
    }

    #[test]
    fn test_tool_unavailable() {
        let err = SessionError::from(TmuxError::Unavailable {
            binary: "tmux".to_string(),
        });
        assert!(err.is_tool_unavailable());
        assert!(!SessionError::Terminal(PtyError::Closed).is_tool_unavailable());
    }
}
