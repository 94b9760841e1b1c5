//! One ephemeral viewer: a PTY running a multiplexer client.
//!
//! State only moves forward:
//! `Attaching -> Active -> Detaching -> Closed`, with `Closed` reachable
//! from any state when the handle is torn down. Only `Active` viewers accept
//! input.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chkd_pty::{PtyError, PtyHandle};
use chkd_tmux::DurableName;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

/// Identifier of a single viewer, unique for the life of the process.
///
/// Rendered as `<durable-name>-<spawn-millis>-<seq>`; the sequence number
/// keeps ids distinct even when two viewers spawn in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EphemeralId(String);

impl EphemeralId {
    pub(crate) fn compose(name: &DurableName, spawned_at: DateTime<Utc>, seq: u64) -> Self {
        Self(format!("{name}-{}-{seq}", spawned_at.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EphemeralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EphemeralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EphemeralId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Attaching,
    Active,
    Detaching,
    Closed,
}

/// Whether a viewer found its durable session or had to create it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachMode {
    Created,
    Attached,
}

impl fmt::Display for AttachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachMode::Created => f.write_str("created"),
            AttachMode::Attached => f.write_str("attached"),
        }
    }
}

/// Point-in-time view of a record, safe to hand to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: EphemeralId,
    pub durable_name: DurableName,
    pub state: SessionState,
    pub mode: AttachMode,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

pub struct SessionRecord {
    id: EphemeralId,
    durable_name: DurableName,
    mode: AttachMode,
    created_at: DateTime<Utc>,
    inner: Mutex<RecordInner>,
}

struct RecordInner {
    pty: PtyHandle,
    state: SessionState,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    /// New record in the `Attaching` state.
    pub(crate) fn new(id: EphemeralId, durable_name: DurableName, mode: AttachMode, pty: PtyHandle) -> Self {
        let now = Utc::now();
        Self {
            id,
            durable_name,
            mode,
            created_at: now,
            inner: Mutex::new(RecordInner {
                pty,
                state: SessionState::Attaching,
                last_activity: Instant::now(),
                last_activity_at: now,
            }),
        }
    }

    pub fn id(&self) -> &EphemeralId {
        &self.id
    }

    pub fn durable_name(&self) -> &DurableName {
        &self.durable_name
    }

    pub fn mode(&self) -> AttachMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    // Poisoning is ignored; every field stays consistent between statements.
    fn lock(&self) -> MutexGuard<'_, RecordInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Attaching -> Active`. Returns false if the record already moved on,
    /// e.g. the client exited while the create was settling.
    pub(crate) fn activate(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Attaching {
            return false;
        }
        inner.state = SessionState::Active;
        true
    }

    /// Forward input to the client. `Ok(false)` when the viewer no longer
    /// accepts input.
    pub(crate) fn write(&self, data: &[u8]) -> Result<bool, PtyError> {
        let mut inner = self.lock();
        if inner.state != SessionState::Active {
            return Ok(false);
        }
        match inner.pty.write(data) {
            Ok(()) => {}
            Err(PtyError::Closed) => return Ok(false),
            Err(e) => return Err(e),
        }
        inner.last_activity = Instant::now();
        inner.last_activity_at = Utc::now();
        Ok(true)
    }

    /// Resize the viewer. Does not count as activity.
    pub(crate) fn resize(&self, cols: u16, rows: u16) -> Result<bool, PtyError> {
        let mut inner = self.lock();
        if inner.state != SessionState::Active {
            return Ok(false);
        }
        inner.pty.resize(cols, rows)?;
        Ok(true)
    }

    /// `Active -> Detaching`: send the client its detach keystrokes.
    ///
    /// Returns false if the viewer was not active.
    pub(crate) fn begin_detach(&self, sequence: &[u8]) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Active {
            return false;
        }
        inner.state = SessionState::Detaching;
        if let Err(e) = inner.pty.write(sequence) {
            debug!("{}: detach sequence not delivered: {e}", self.id);
        }
        true
    }

    /// Kill the client process and mark the record closed. Idempotent.
    ///
    /// Blocks for up to a couple hundred milliseconds while the child is
    /// reaped.
    pub(crate) fn terminate(&self) {
        let mut inner = self.lock();
        inner.pty.kill();
        inner.state = SessionState::Closed;
    }

    /// Time since the last input, for active viewers only.
    pub(crate) fn idle_for(&self, now: Instant) -> Option<Duration> {
        let inner = self.lock();
        (inner.state == SessionState::Active).then(|| now.saturating_duration_since(inner.last_activity))
    }

    pub fn summary(&self) -> SessionSummary {
        let inner = self.lock();
        let (cols, rows) = inner.pty.size();
        SessionSummary {
            id: self.id.clone(),
            durable_name: self.durable_name.clone(),
            state: inner.state,
            mode: self.mode,
            pid: inner.pty.pid(),
            cols,
            rows,
            created_at: self.created_at,
            last_activity: inner.last_activity_at,
        }
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id)
            .field("durable_name", &self.durable_name)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}
