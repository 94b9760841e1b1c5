mod cli;
mod commands;

use std::error::Error;
use std::sync::Arc;

use chkd_session::{SessionConfig, SessionError, SessionManager};
use clap::Parser;

use cli::Cli;

/// Exit status when the multiplexer is not installed.
const EXIT_TOOL_UNAVAILABLE: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("fatal: {e}");
        let unavailable = e
            .downcast_ref::<SessionError>()
            .is_some_and(SessionError::is_tool_unavailable);
        if unavailable {
            eprintln!("hint: install tmux or set tmux_binary in the terminal config");
            std::process::exit(EXIT_TOOL_UNAVAILABLE);
        }
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::load_default()?,
    };

    let manager = Arc::new(SessionManager::from_config(config));
    let result = commands::run_command(Arc::clone(&manager), cli.command).await;

    // Viewers never outlive the process; durable sessions do.
    manager.shutdown();
    result
}
