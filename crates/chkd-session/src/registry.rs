//! Process-wide table of live viewers.
//!
//! The table lock is never held while a record's own lock is taken, so
//! slow operations on one viewer do not stall lookups of the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chkd_tmux::DurableName;
use chrono::Utc;

use crate::record::{EphemeralId, SessionRecord, SessionSummary};

#[derive(Debug, Default)]
pub struct Registry {
    records: Mutex<HashMap<EphemeralId, Arc<SessionRecord>>>,
    next_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<EphemeralId, Arc<SessionRecord>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh id for a viewer of `name`. Never repeats within this registry.
    pub(crate) fn next_id(&self, name: &DurableName) -> EphemeralId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        EphemeralId::compose(name, Utc::now(), seq)
    }

    pub(crate) fn insert(&self, record: Arc<SessionRecord>) {
        let previous = self.table().insert(record.id().clone(), record);
        debug_assert!(previous.is_none(), "ephemeral id reused");
    }

    pub fn get(&self, id: &EphemeralId) -> Option<Arc<SessionRecord>> {
        self.table().get(id).cloned()
    }

    pub(crate) fn remove(&self, id: &EphemeralId) -> Option<Arc<SessionRecord>> {
        self.table().remove(id)
    }

    /// Remove every viewer of `name`.
    pub(crate) fn remove_by_name(&self, name: &DurableName) -> Vec<Arc<SessionRecord>> {
        let mut table = self.table();
        let ids: Vec<EphemeralId> = table
            .values()
            .filter(|r| r.durable_name() == name)
            .map(|r| r.id().clone())
            .collect();
        ids.iter().filter_map(|id| table.remove(id)).collect()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<SessionRecord>> {
        self.table().drain().map(|(_, record)| record).collect()
    }

    fn records(&self) -> Vec<Arc<SessionRecord>> {
        self.table().values().cloned().collect()
    }

    /// Summaries of every viewer, oldest first.
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self.records().iter().map(|r| r.summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Active viewers without input for at least `threshold`.
    pub(crate) fn idle_ids(&self, threshold: Duration) -> Vec<EphemeralId> {
        let now = Instant::now();
        self.records()
            .into_iter()
            .filter(|r| r.idle_for(now).is_some_and(|idle| idle >= threshold))
            .map(|r| r.id().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AttachMode;
    use chkd_pty::{PtyCommand, PtyHandle};

    fn add(registry: &Registry, name: &str) -> Arc<SessionRecord> {
        let name = DurableName::parse(name).unwrap();
        let pty = PtyHandle::spawn(&PtyCommand::new("/bin/sh"), 80, 24).unwrap();
        let record = Arc::new(SessionRecord::new(registry.next_id(&name), name, AttachMode::Attached, pty));
        record.activate();
        registry.insert(Arc::clone(&record));
        record
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = Registry::new();
        let name = DurableName::parse("chkd_x").unwrap();
        let ids: std::collections::HashSet<_> = (0..100).map(|_| registry.next_id(&name)).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = Registry::new();
        let record = add(&registry, "chkd_a");
        assert_eq!(registry.len(), 1);
        assert!(registry.get(record.id()).is_some());

        assert!(registry.remove(record.id()).is_some());
        assert!(registry.remove(record.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_by_name() {
        let registry = Registry::new();
        add(&registry, "chkd_a");
        add(&registry, "chkd_a");
        let other = add(&registry, "chkd_b");

        let removed = registry.remove_by_name(&DurableName::parse("chkd_a").unwrap());
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(other.id()).is_some());
    }

    #[test]
    fn test_snapshot_and_drain() {
        let registry = Registry::new();
        let first = add(&registry, "chkd_a");
        add(&registry, "chkd_b");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(&snapshot[0].id, first.id());

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_idle_ids() {
        let registry = Registry::new();
        let idle = add(&registry, "chkd_a");
        std::thread::sleep(Duration::from_millis(40));
        let busy = add(&registry, "chkd_b");
        busy.write(b"true\n").unwrap();

        assert_eq!(registry.idle_ids(Duration::from_millis(30)), vec![idle.id().clone()]);

        idle.begin_detach(b"\x02d");
        assert!(registry.idle_ids(Duration::from_millis(30)).is_empty());
    }
}
