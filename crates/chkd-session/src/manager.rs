//! Attach-or-create, input, detach and destroy for workspace terminals.
//!
//! Closing a viewer only ever detaches its multiplexer client; the durable
//! session keeps running until [`SessionManager::destroy_durable`] (or
//! [`SessionManager::kill_durable_by_name`]) is called.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chkd_pty::{start_output_pump, OutputStream, PtyHandle};
use chkd_tmux::{
    kill_namespaced, list_namespaced, DurableName, DurableSession, MultiplexerClient, NameResolver,
};
use log::{debug, info, warn};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::record::{AttachMode, EphemeralId, SessionRecord, SessionSummary};
use crate::registry::Registry;

/// How often a create re-probes for the session it just started.
const SETTLE_POLL: Duration = Duration::from_millis(25);

/// A viewer handed back by [`SessionManager::create`].
#[derive(Debug)]
pub struct Attachment {
    pub id: EphemeralId,
    pub durable_name: DurableName,
    pub mode: AttachMode,
    /// Raw client output. Ends when the viewer closes.
    pub output: OutputStream,
}

pub struct SessionManager {
    config: SessionConfig,
    resolver: NameResolver,
    client: Arc<dyn MultiplexerClient>,
    registry: Arc<Registry>,
    /// Serializes probe-then-spawn per durable name.
    create_locks: Mutex<HashMap<DurableName, Arc<AsyncMutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        resolver: NameResolver,
        client: Arc<dyn MultiplexerClient>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            config,
            resolver,
            client,
            registry,
            create_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Manager talking to tmux as described by `config`, with a fresh registry.
    pub fn from_config(config: SessionConfig) -> Self {
        let resolver = config.name_resolver();
        let client = Arc::new(config.tmux_client());
        Self::new(config, resolver, client, Arc::new(Registry::new()))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn durable_name(&self, workspace: &Path) -> DurableName {
        self.resolver.resolve(workspace)
    }

    /// Exclusive hold on `name` for probe-then-spawn and destroy.
    async fn lock_name(&self, name: &DurableName) -> NameLock<'_> {
        let lock = {
            let mut locks = self.create_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(name.clone()).or_default())
        };
        let mut held = NameLock {
            locks: &self.create_locks,
            name: name.clone(),
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Open a viewer on the durable session for `workspace`, creating the
    /// session if it is not running.
    ///
    /// Concurrent creates for the same workspace are serialized, so at most
    /// one of them starts the durable session and the rest attach to it.
    pub async fn create(&self, workspace: &Path) -> Result<Attachment, SessionError> {
        let name = self.resolver.resolve(workspace);
        self.client.ensure_available().await?;

        let _held = self.lock_name(&name).await;

        let exists = self.client.exists(&name).await;
        let mode = if exists {
            AttachMode::Attached
        } else {
            AttachMode::Created
        };
        let command = self
            .client
            .client_command(&name, workspace, exists)
            .env("TERM", &self.config.term);
        let id = self.registry.next_id(&name);
        debug!("{id}: starting viewer for {name} ({mode})");

        let (cols, rows) = (self.config.cols, self.config.rows);
        let mut pty = tokio::task::spawn_blocking(move || PtyHandle::spawn(&command, cols, rows)).await??;
        let reader = pty.take_reader()?;

        let record = Arc::new(SessionRecord::new(id.clone(), name.clone(), mode, pty));
        self.registry.insert(Arc::clone(&record));
        // Until activation, dropping this (error or cancelled create) releases the viewer.
        let pending = PendingViewer::new(Arc::clone(&self.registry), Arc::clone(&record));

        let output = start_output_pump(id.as_str(), reader, self.exit_hook(&id))?;

        if mode == AttachMode::Created {
            self.await_durable(&name).await;
        }

        pending.commit();
        if record.activate() {
            info!("{id}: {mode} {name}");
        } else {
            warn!("{id}: client for {name} exited while attaching");
        }

        Ok(Attachment {
            id,
            durable_name: name,
            mode,
            output,
        })
    }

    /// Runs on the output thread once the client's output ends.
    fn exit_hook(&self, id: &EphemeralId) -> impl FnOnce() + Send + 'static {
        let registry = Arc::downgrade(&self.registry);
        let id = id.clone();
        move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if let Some(record) = registry.remove(&id) {
                info!("{id}: client exited, releasing viewer");
                record.terminate();
            }
        }
    }

    /// Give a freshly started session a moment to show up in the
    /// multiplexer, so an immediate second create attaches instead of
    /// racing it.
    async fn await_durable(&self, name: &DurableName) {
        let deadline = Instant::now() + self.config.create_settle();
        loop {
            if self.client.exists(name).await {
                return;
            }
            if Instant::now() >= deadline {
                debug!("{name} not visible after {:?}", self.config.create_settle());
                return;
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }

    /// Forward input to a viewer. `Ok(false)` if the id is unknown or the
    /// viewer no longer accepts input.
    pub fn write(&self, id: &EphemeralId, data: &[u8]) -> Result<bool, SessionError> {
        match self.registry.get(id) {
            Some(record) => record.write(data).map_err(SessionError::Terminal),
            None => Ok(false),
        }
    }

    /// Resize a viewer. Unknown ids are ignored.
    pub fn resize(&self, id: &EphemeralId, cols: u16, rows: u16) -> Result<bool, SessionError> {
        match self.registry.get(id) {
            Some(record) => record.resize(cols, rows).map_err(SessionError::Terminal),
            None => Ok(false),
        }
    }

    /// Detach and release a viewer, leaving its durable session running.
    ///
    /// Sends the detach keystrokes, waits the configured grace period, then
    /// kills the client process. The teardown runs on its own task, so it
    /// completes even if this future is dropped. Returns false if there was
    /// nothing to close.
    pub async fn close(&self, id: &EphemeralId) -> bool {
        let Some(record) = self.registry.get(id) else {
            return false;
        };
        if !record.begin_detach(self.config.detach_sequence.as_bytes()) {
            return false;
        }
        debug!("{id}: detaching from {}", record.durable_name());

        let registry = Arc::clone(&self.registry);
        let grace = self.config.detach_grace();
        let task_id = id.clone();
        let teardown = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.remove(&task_id);
            terminate(record).await;
            info!("{task_id}: closed");
        });

        if let Err(e) = teardown.await {
            warn!("{id}: close did not finish cleanly: {e}");
        }
        true
    }

    /// Destroy the durable session for `workspace` and every local viewer
    /// of it. Returns whether the multiplexer had such a session.
    pub async fn destroy_durable(&self, workspace: &Path) -> Result<bool, SessionError> {
        let name = self.resolver.resolve(workspace);
        let _held = self.lock_name(&name).await;

        let killed = self.client.kill_session(name.as_str()).await?;
        let released = self.release_viewers(&name).await;
        info!("destroyed {name} (existed: {killed}, viewers released: {released})");
        Ok(killed)
    }

    async fn release_viewers(&self, name: &DurableName) -> usize {
        let viewers = self.registry.remove_by_name(name);
        let count = viewers.len();
        for record in viewers {
            terminate(record).await;
        }
        count
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.registry.snapshot()
    }

    pub fn describe(&self, id: &EphemeralId) -> Result<SessionSummary, SessionError> {
        self.registry
            .get(id)
            .map(|record| record.summary())
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))
    }

    /// Whether the durable session for `workspace` is running.
    ///
    /// Says nothing about local viewers. A probe failure reads as `false`.
    pub async fn has_active_session(&self, workspace: &Path) -> bool {
        self.client.exists(&self.resolver.resolve(workspace)).await
    }

    /// Durable sessions in our namespace, whether or not anything views them.
    pub async fn list_durable(&self) -> Result<Vec<DurableSession>, SessionError> {
        Ok(list_namespaced(self.client.as_ref()).await?)
    }

    /// Destroy a durable session by name, for sessions whose workspace path
    /// is no longer known. Names outside the namespace are refused.
    pub async fn kill_durable_by_name(&self, name: &str) -> Result<bool, SessionError> {
        let killed = kill_namespaced(self.client.as_ref(), name).await?;
        if let Some(name) = DurableName::parse(name) {
            let released = self.release_viewers(&name).await;
            info!("killed {name} (existed: {killed}, viewers released: {released})");
        }
        Ok(killed)
    }

    /// Close active viewers idle for at least `threshold`. Returns how many
    /// were closed.
    pub async fn evict_idle(&self, threshold: Duration) -> usize {
        let mut closed = 0;
        for id in self.registry.idle_ids(threshold) {
            info!("{id}: idle for {threshold:?}, closing");
            if self.close(&id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Kill every viewer immediately, including ones mid-detach. Durable
    /// sessions are left alone. Returns how many viewers were released.
    pub fn shutdown(&self) -> usize {
        let records = self.registry.drain();
        for record in &records {
            record.terminate();
        }
        if !records.is_empty() {
            info!("released {} terminal viewers on shutdown", records.len());
        }
        records.len()
    }
}

/// Per-name create lock. Releasing it forgets the name once nobody else
/// is waiting on it.
struct NameLock<'a> {
    locks: &'a Mutex<HashMap<DurableName, Arc<AsyncMutex<()>>>>,
    name: DurableName,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameLock<'_> {
    fn drop(&mut self) {
        // The owned guard keeps its own reference to the mutex.
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&self.name).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.name);
        }
    }
}

/// A registered viewer whose `create` has not returned yet.
///
/// Dropped without [`commit`](PendingViewer::commit), it removes the record
/// and kills the client.
struct PendingViewer {
    registry: Arc<Registry>,
    record: Option<Arc<SessionRecord>>,
}

impl PendingViewer {
    fn new(registry: Arc<Registry>, record: Arc<SessionRecord>) -> Self {
        Self {
            registry,
            record: Some(record),
        }
    }

    fn commit(mut self) {
        self.record = None;
    }
}

impl Drop for PendingViewer {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };
        self.registry.remove(record.id());
        warn!("{}: create abandoned, releasing viewer", record.id());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || record.terminate());
            }
            Err(_) => record.terminate(),
        }
    }
}

/// Kill a record's client without blocking the runtime.
async fn terminate(record: Arc<SessionRecord>) {
    let id = record.id().clone();
    if let Err(e) = tokio::task::spawn_blocking(move || record.terminate()).await {
        warn!("{id}: terminate failed: {e}");
    }
}
