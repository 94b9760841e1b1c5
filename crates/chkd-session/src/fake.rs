//! In-process multiplexer used by the manager tests.
//!
//! Viewers run `/bin/sh`; "creating" a session just records its name, the
//! way tmux would once the new-session client starts.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chkd_pty::PtyCommand;
use chkd_tmux::{DurableName, DurableSession, MultiplexerClient, TmuxError};

#[derive(Default)]
pub(crate) struct FakeMultiplexer {
    sessions: Mutex<HashSet<String>>,
    spawns: Mutex<Vec<(String, bool)>>,
    unavailable: bool,
    lagging: bool,
}

impl FakeMultiplexer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// New sessions never show up in the probe, so creates wait out the
    /// whole settle window.
    pub(crate) fn lagging() -> Self {
        Self {
            lagging: true,
            ..Self::default()
        }
    }

    pub(crate) fn add_session(&self, name: &str) {
        self.sessions.lock().unwrap().insert(name.to_string());
    }

    pub(crate) fn has_session(&self, name: &str) -> bool {
        self.sessions.lock().unwrap().contains(name)
    }

    /// `(name, existed)` for every client command built so far.
    pub(crate) fn spawns(&self) -> Vec<(String, bool)> {
        self.spawns.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), TmuxError> {
        if self.unavailable {
            return Err(TmuxError::Unavailable {
                binary: "fake-tmux".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MultiplexerClient for FakeMultiplexer {
    async fn ensure_available(&self) -> Result<(), TmuxError> {
        self.check()
    }

    async fn exists(&self, name: &DurableName) -> bool {
        !self.unavailable && self.has_session(name.as_str())
    }

    async fn kill_session(&self, name: &str) -> Result<bool, TmuxError> {
        self.check()?;
        Ok(self.sessions.lock().unwrap().remove(name))
    }

    async fn list_sessions(&self) -> Result<Vec<DurableSession>, TmuxError> {
        self.check()?;
        let mut names: Vec<String> = self.sessions.lock().unwrap().iter().cloned().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| DurableSession {
                name,
                created_at: None,
                attached: false,
                clients: 0,
                windows: 1,
            })
            .collect())
    }

    fn client_command(&self, name: &DurableName, workspace: &Path, exists: bool) -> PtyCommand {
        self.spawns.lock().unwrap().push((name.to_string(), exists));
        let command = PtyCommand::new("/bin/sh");
        if exists {
            return command;
        }
        // A bad directory makes the real new-session fail too.
        if workspace.is_dir() && !self.lagging {
            self.add_session(name.as_str());
        }
        command.cwd(workspace)
    }
}
