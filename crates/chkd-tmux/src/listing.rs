//! Durable sessions as reported by the multiplexer's own listing.
//!
//! Creation time, attached state and window count come straight from
//! `tmux list-sessions`; none of it is tracked locally.

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;

use crate::client::MultiplexerClient;
use crate::error::TmuxError;
use crate::name::DurableName;

/// `list-sessions -F` format: tab separated so names survive intact.
pub const LIST_FORMAT: &str =
    "#{session_name}\t#{session_created}\t#{session_attached}\t#{session_windows}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DurableSession {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub attached: bool,
    /// Number of clients currently attached.
    pub clients: u32,
    pub windows: u32,
}

/// Parse `list-sessions` output produced with [`LIST_FORMAT`].
///
/// Malformed lines are skipped.
pub fn parse_session_list(stdout: &str) -> Vec<DurableSession> {
    stdout.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<DurableSession> {
    // Split from the right: the three numeric fields never contain tabs.
    let mut fields = line.rsplitn(4, '\t');
    let windows = fields.next()?.trim().parse().ok()?;
    let clients: u32 = fields.next()?.trim().parse().ok()?;
    let created = fields.next()?.trim();
    let name = fields.next()?;
    if name.is_empty() {
        return None;
    }

    let created_at = created
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    Some(DurableSession {
        name: name.to_string(),
        created_at,
        attached: clients > 0,
        clients,
        windows,
    })
}

/// Durable sessions in the chkd namespace, sorted by name.
pub async fn list_namespaced(
    client: &dyn MultiplexerClient,
) -> Result<Vec<DurableSession>, TmuxError> {
    let mut sessions: Vec<DurableSession> = client
        .list_sessions()
        .await?
        .into_iter()
        .filter(|s| DurableName::is_namespaced(&s.name))
        .collect();
    sessions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sessions)
}

/// Kill a durable session by name, refusing anything outside the namespace.
pub async fn kill_namespaced(client: &dyn MultiplexerClient, name: &str) -> Result<bool, TmuxError> {
    if !DurableName::is_namespaced(name) {
        warn!("refusing to kill non-chkd session {name:?}");
        return Err(TmuxError::OutsideNamespace {
            name: name.to_string(),
        });
    }
    client.kill_session(name).await
}
