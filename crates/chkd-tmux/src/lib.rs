//! chkd-tmux: the durable side of chkd terminal sessions.
//!
//! Workspaces map to long-lived tmux sessions. This crate derives the
//! session name for a workspace path, talks to the tmux binary (existence
//! probe, kill, listing) and builds the client command a PTY runs to attach
//! a viewer.

pub mod client;
pub mod error;
pub mod listing;
pub mod name;

pub use client::{MultiplexerClient, TmuxClient};
pub use error::TmuxError;
pub use listing::{kill_namespaced, list_namespaced, parse_session_list, DurableSession};
pub use name::{resolve_session_name, DurableName, NameResolver, MAX_NAME_CHARS, NAMESPACE_PREFIX};
