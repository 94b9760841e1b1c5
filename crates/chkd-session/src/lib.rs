//! chkd-session: workspace terminal sessions for chkd.
//!
//! Maps a workspace path onto a durable tmux session and hands out
//! short-lived PTY viewers attached to it. Viewers are tracked in a
//! [`Registry`]; the [`SessionManager`] decides attach-vs-create, detaches
//! viewers without hurting the durable session, and is the only place that
//! can destroy one.
//!
//! # Architecture
//!
//! - [`SessionConfig`]: TOML-backed settings with defaults for every field.
//! - [`Registry`]: Process-wide table of [`SessionRecord`]s keyed by [`EphemeralId`].
//! - [`SessionManager`]: create / write / resize / close / destroy / list.
//! - [`spawn_idle_reaper`]: Background sweep that closes idle viewers.

pub mod config;
pub mod error;
pub mod manager;
pub mod reaper;
pub mod record;
pub mod registry;

#[cfg(test)]
mod fake;

pub use config::SessionConfig;
pub use error::SessionError;
pub use manager::{Attachment, SessionManager};
pub use reaper::{spawn_idle_reaper, IdlePolicy};
pub use record::{AttachMode, EphemeralId, SessionRecord, SessionState, SessionSummary};
pub use registry::Registry;
