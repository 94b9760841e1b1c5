use std::path::{Path, PathBuf};
use std::time::Duration;

use chkd_tmux::{NameResolver, TmuxClient};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::reaper::IdlePolicy;

/// File name looked up under the user's config directory.
const CONFIG_FILE: &str = "terminal.toml";

/// Settings for the session manager. Every field has a default, so an
/// empty or partial TOML file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Multiplexer executable, looked up on PATH.
    pub tmux_binary: String,
    /// Private tmux server socket name (`tmux -L`), if any.
    pub tmux_socket: Option<String>,
    /// Upper bound for every call to the multiplexer binary.
    pub probe_timeout_ms: u64,
    pub cols: u16,
    pub rows: u16,
    /// `TERM` forced on every viewer.
    pub term: String,
    /// Keystrokes that make the multiplexer client detach (tmux: C-b d).
    pub detach_sequence: String,
    pub detach_grace_ms: u64,
    /// How long a create waits for the new durable session to become visible.
    pub create_settle_ms: u64,
    /// Close viewers idle for longer than this. Unset disables eviction.
    pub idle_timeout_secs: Option<u64>,
    pub sweep_interval_secs: u64,
    /// Append a path hash to names that had to be truncated.
    pub collision_suffix: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tmux_binary: "tmux".to_string(),
            tmux_socket: None,
            probe_timeout_ms: 2000,
            cols: 120,
            rows: 30,
            term: "xterm-256color".to_string(),
            detach_sequence: "\u{2}d".to_string(),
            detach_grace_ms: 100,
            create_settle_ms: 1000,
            idle_timeout_secs: None,
            sweep_interval_secs: 30,
            collision_suffix: true,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let text = std::fs::read_to_string(path).map_err(|e| SessionError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&text).map_err(|message| SessionError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Load `<config_dir>/chkd/terminal.toml` if it exists, defaults otherwise.
    pub fn load_default() -> Result<Self, SessionError> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => {
                debug!("no terminal config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chkd").join(CONFIG_FILE))
    }

    fn from_toml(text: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(text).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.tmux_binary.trim().is_empty() {
            return Err("tmux_binary must not be empty".to_string());
        }
        if self.cols == 0 || self.rows == 0 {
            return Err("cols and rows must be at least 1".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn detach_grace(&self) -> Duration {
        Duration::from_millis(self.detach_grace_ms)
    }

    pub fn create_settle(&self) -> Duration {
        Duration::from_millis(self.create_settle_ms)
    }

    /// Idle eviction settings, or `None` when eviction is disabled.
    pub fn idle_policy(&self) -> Option<IdlePolicy> {
        self.idle_timeout_secs.map(|secs| IdlePolicy {
            timeout: Duration::from_secs(secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        })
    }

    pub fn tmux_client(&self) -> TmuxClient {
        let client = TmuxClient::new(&self.tmux_binary, self.probe_timeout());
        match &self.tmux_socket {
            Some(socket) => client.with_socket(socket),
            None => client,
        }
    }

    pub fn name_resolver(&self) -> NameResolver {
        NameResolver::for_current_user().with_collision_suffix(self.collision_suffix)
    }
}
