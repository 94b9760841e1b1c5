use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

/// How many times `kill` polls for the child to be reaped.
const REAP_ATTEMPTS: u32 = 20;
const REAP_POLL: Duration = Duration::from_millis(10);

/// Errors from PTY operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("failed to open PTY: {0}")]
    Open(String),

    #[error("PTY spawn failed: {0}")]
    Spawn(String),

    #[error("working directory {} is not accessible", .0.display())]
    InvalidWorkingDirectory(PathBuf),

    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PTY resize failed: {0}")]
    Resize(String),

    #[error("PTY handle is closed")]
    Closed,

    #[error("failed to start PTY output thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Description of the child process to run inside a PTY.
///
/// The child inherits the parent's environment; `env` only adds or
/// overrides individual variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl PtyCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

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

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable for the child, replacing any earlier
    /// override of the same key.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.env.push((key, value)),
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env_overrides(&self) -> &[(String, String)] {
        &self.env
    }

    fn to_builder(&self) -> CommandBuilder {
        // CommandBuilder starts from a copy of the current environment.
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.cwd(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Owns a portable-pty child process, master pair, reader, and writer.
///
/// Dropping the handle kills the child.
pub struct PtyHandle {
    master: Option<Box<dyn MasterPty + Send>>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
    size: (u16, u16),
    killed: bool,
}

impl PtyHandle {
    /// Spawn `command` attached to a new PTY of the given dimensions.
    pub fn spawn(command: &PtyCommand, cols: u16, rows: u16) -> Result<Self, PtyError> {
        if let Some(dir) = command.working_dir() {
            if !dir.is_dir() {
                return Err(PtyError::InvalidWorkingDirectory(dir.to_path_buf()));
            }
        }

        let (cols, rows) = clamp_size(cols, rows);
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(cols, rows))
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(command.to_builder())
            .map_err(|e| PtyError::Spawn(format!("{}: {e}", command.program())))?;

        // Our copy of the slave must go, otherwise reads never see EOF when
        // the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(format!("failed to take writer: {e}")))?;

        let pid = child.process_id();
        debug!(
            "spawned {} {:?} in PTY (pid {:?}, {cols}x{rows})",
            command.program(),
            command.get_args(),
            pid
        );

        Ok(Self {
            master: Some(pair.master),
            reader: Some(reader),
            writer: Some(writer),
            child,
            pid,
            size: (cols, rows),
            killed: false,
        })
    }

    /// OS process id of the child, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current terminal dimensions as `(cols, rows)`.
    pub fn size(&self) -> (u16, u16) {
        self.size
    }

    /// Resize the PTY to new dimensions.
    ///
    /// Zero dimensions are clamped to 1. Resizing a killed handle does nothing.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let Some(master) = self.master.as_ref() else {
            return Ok(());
        };
        let (cols, rows) = clamp_size(cols, rows);
        master
            .resize(pty_size(cols, rows))
            .map_err(|e| PtyError::Resize(e.to_string()))?;
        self.size = (cols, rows);
        Ok(())
    }

    /// Write bytes to the PTY master (user input -> child).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let writer = self.writer.as_mut().ok_or(PtyError::Closed)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Blocking read of available output (child -> us).
    ///
    /// Only usable until the reader has been handed off with [`take_reader`].
    ///
    /// [`take_reader`]: PtyHandle::take_reader
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, PtyError> {
        let reader = self.reader.as_mut().ok_or(PtyError::Closed)?;
        Ok(reader.read(buf)?)
    }

    /// Extract the PTY reader so a dedicated thread can own the blocking reads.
    pub fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.reader.take().ok_or(PtyError::Closed)
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        !self.killed && self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Forcibly terminate the child and release the PTY.
    ///
    /// Idempotent: killing an already-dead or already-killed handle is a no-op.
    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        self.writer.take();

        if self.try_wait().is_none() {
            if let Err(e) = self.child.kill() {
                // The child may have exited between try_wait and kill.
                debug!("kill of pid {:?} reported: {e}", self.pid);
            }
            if !self.reap() {
                warn!("pid {:?} not reaped after kill", self.pid);
            }
        }

        self.master.take();
    }

    fn reap(&mut self) -> bool {
        for _ in 0..REAP_ATTEMPTS {
            if self.try_wait().is_some() {
                return true;
            }
            std::thread::sleep(REAP_POLL);
        }
        false
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("pid", &self.pid)
            .field("size", &self.size)
            .field("killed", &self.killed)
            .finish()
    }
}

fn clamp_size(cols: u16, rows: u16) -> (u16, u16) {
    (cols.max(1), rows.max(1))
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}
