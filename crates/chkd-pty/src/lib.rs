//! chkd-pty: pseudo-terminal handles for chkd terminal sessions.
//!
//! This crate owns the OS side of a terminal viewer: a PTY pair wired to a
//! spawned child process (normally a multiplexer client), and the dedicated
//! thread that drains the child's output into a byte stream.
//!
//! # Architecture
//!
//! - [`PtyCommand`]: Program, arguments, working directory and environment
//!   overrides for the child.
//! - [`PtyHandle`]: Low-level PTY process management (spawn, write, resize, kill).
//! - [`OutputStream`]: Unbounded, non-restartable stream of raw output bytes,
//!   fed by [`start_output_pump`].

pub mod output;
pub mod pty;

pub use output::{start_output_pump, OutputStream};
pub use pty::{PtyCommand, PtyError, PtyHandle};
