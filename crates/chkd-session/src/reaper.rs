//! Background sweep that detaches viewers nobody has typed into for a while.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::manager::SessionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    /// Viewers without input for this long are closed.
    pub timeout: Duration,
    pub sweep_interval: Duration,
}

/// Run idle eviction every `policy.sweep_interval` until `token` is cancelled.
///
/// Eviction is an ordinary close, so durable sessions are never touched.
pub fn spawn_idle_reaper(
    manager: Arc<SessionManager>,
    policy: IdlePolicy,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(policy.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let closed = manager.evict_idle(policy.timeout).await;
                    if closed > 0 {
                        info!("idle sweep closed {closed} terminal viewers");
                    }
                }
            }
        }
        debug!("idle reaper stopped");
    })
}
