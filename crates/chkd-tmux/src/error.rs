use std::time::Duration;

/// Errors from talking to the multiplexer binary.
#[derive(Debug, thiserror::Error)]
pub enum TmuxError {
    #[error("{binary} is not installed or not executable")]
    Unavailable { binary: String },

    #[error("tmux {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("tmux {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("refusing to touch session {name:?}: not a chkd_ session")]
    OutsideNamespace { name: String },

    #[error("tmux I/O error: {0}")]
    Io(#[from] std::io::Error),
}
