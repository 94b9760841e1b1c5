//! Subcommand handlers.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chkd_session::{spawn_idle_reaper, SessionManager};
use chkd_tmux::DurableSession;
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::cli::Commands;

type CommandResult = Result<(), Box<dyn Error>>;

pub async fn run_command(manager: Arc<SessionManager>, command: Commands) -> CommandResult {
    match command {
        Commands::Name { workspace } => {
            println!("{}", manager.durable_name(&workspace_path(&workspace)));
            Ok(())
        }
        Commands::Status { workspace } => handle_status(&manager, &workspace_path(&workspace)).await,
        Commands::Sessions { json } => handle_sessions(&manager, json).await,
        Commands::Kill { name } => handle_kill(&manager, &name).await,
        Commands::Destroy { workspace } => handle_destroy(&manager, &workspace_path(&workspace)).await,
        Commands::Open { workspace } => handle_open(manager, &workspace_path(&workspace)).await,
    }
}

/// Names are derived from the absolute path, so `.` and `./x` must resolve
/// the same way the UI would. A path that no longer exists is used as given.
fn workspace_path(raw: &Path) -> PathBuf {
    raw.canonicalize().unwrap_or_else(|_| raw.to_path_buf())
}

async fn handle_status(manager: &SessionManager, workspace: &Path) -> CommandResult {
    let name = manager.durable_name(workspace);
    let state = if manager.has_active_session(workspace).await {
        "running"
    } else {
        "stopped"
    };
    println!("{name}\t{state}");
    Ok(())
}

async fn handle_sessions(manager: &SessionManager, json: bool) -> CommandResult {
    let sessions = manager.list_durable().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("no chkd sessions");
        return Ok(());
    }
    for line in format_table(&sessions) {
        println!("{line}");
    }
    Ok(())
}

fn format_table(sessions: &[DurableSession]) -> Vec<String> {
    let width = sessions
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut lines = vec![format!("{:<width$}  {:<8}  {:>7}  CREATED", "NAME", "STATE", "WINDOWS")];
    for session in sessions {
        let state = if session.attached { "attached" } else { "detached" };
        let created = session
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{:<width$}  {:<8}  {:>7}  {created}",
            session.name, state, session.windows
        ));
    }
    lines
}

async fn handle_kill(manager: &SessionManager, name: &str) -> CommandResult {
    if manager.kill_durable_by_name(name).await? {
        println!("killed {name}");
    } else {
        println!("{name} was not running");
    }
    Ok(())
}

async fn handle_destroy(manager: &SessionManager, workspace: &Path) -> CommandResult {
    let name = manager.durable_name(workspace);
    if manager.destroy_durable(workspace).await? {
        println!("destroyed {name}");
    } else {
        println!("{name} was not running");
    }
    Ok(())
}

/// Relay stdin lines into a viewer and its output to stdout until stdin
/// closes, the viewer ends or Ctrl-C. The durable session survives.
async fn handle_open(manager: Arc<SessionManager>, workspace: &Path) -> CommandResult {
    let reaper_token = CancellationToken::new();
    let reaper = manager
        .config()
        .idle_policy()
        .map(|policy| spawn_idle_reaper(Arc::clone(&manager), policy, reaper_token.clone()));

    let mut attachment = manager.create(workspace).await?;
    let id = attachment.id.clone();
    eprintln!("{} {} ({id})", attachment.mode, attachment.durable_name);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            chunk = attachment.output.recv() => match chunk {
                Some(bytes) => {
                    stdout.write_all(&bytes).await?;
                    stdout.flush().await?;
                }
                None => {
                    info!("{id}: viewer ended");
                    break;
                }
            },
            line = stdin.next_line() => match line? {
                Some(line) => {
                    // tmux expects Enter as a carriage return.
                    if !manager.write(&id, format!("{line}\r").as_bytes())? {
                        break;
                    }
                }
                None => {
                    debug!("stdin closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.close(&id).await;
    reaper_token.cancel();
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    eprintln!("detached from {}", attachment.durable_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn test_format_table() {
        let sessions = vec![
            DurableSession {
                name: "chkd_projects_widget".to_string(),
                created_at: DateTime::from_timestamp(1_700_000_000, 0),
                attached: true,
                clients: 1,
                windows: 3,
            },
            DurableSession {
                name: "chkd_api".to_string(),
                created_at: None,
                attached: false,
                clients: 0,
                windows: 1,
            },
        ];

        let lines = format_table(&sessions);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAME "));
        assert!(lines[1].starts_with("chkd_projects_widget  attached"));
        assert!(lines[1].ends_with("2023-11-14 22:13"));
        assert!(lines[2].starts_with("chkd_api              detached"));
        assert!(lines[2].ends_with("  -"));
    }

    #[test]
    fn test_workspace_path() {
        let dir = std::env::temp_dir();
        assert_eq!(workspace_path(&dir), dir.canonicalize().unwrap());
        let gone = Path::new("/definitely/not/here");
        assert_eq!(workspace_path(gone), gone);
    }
}
