//! In-memory campaign store
//!
//! Every queue mutation happens under one mutex, so transitions are
//! linearizable: no observer can see a target in two tier queues.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{expect_pending_at, CampaignStore, StoreError, StoreResult};
use crate::types::{Attempt, QueueEntry, Target, TargetId, TerminalFlag, Tier};

/// Position of a pending entry inside its tier queue
type Slot = (DateTime<Utc>, u64, TargetId);

#[derive(Default)]
struct Inner {
    targets: BTreeMap<TargetId, Target>,
    attempts: HashMap<TargetId, Vec<Attempt>>,
    entries: HashMap<TargetId, QueueEntry>,
    /// Per-tier FIFO index; `seq` breaks ties between equal timestamps
    queues: BTreeMap<Tier, BTreeSet<Slot>>,
    /// Where each pending target sits, so removal needs no scan
    slots: HashMap<TargetId, (Tier, Slot)>,
    next_seq: u64,
}

impl Inner {
    fn insert_slot(&mut self, entry: &QueueEntry) -> StoreResult<()> {
        if self.slots.contains_key(&entry.target_id) {
            return Err(StoreError::invariant(
                &entry.target_id,
                "already present in a tier queue",
            ));
        }
        let slot = (entry.enqueued_at, self.next_seq, entry.target_id.clone());
        self.next_seq += 1;
        self.queues.entry(entry.tier).or_default().insert(slot.clone());
        self.slots.insert(entry.target_id.clone(), (entry.tier, slot));
        Ok(())
    }

    /// Remove the target from its tier queue, verifying index and entry agree
    fn remove_slot(&mut self, target_id: &str, tier: Tier) -> StoreResult<()> {
        let (slot_tier, slot) = self
            .slots
            .remove(target_id)
            .ok_or_else(|| StoreError::invariant(target_id, "pending entry has no queue slot"))?;
        if slot_tier != tier {
            return Err(StoreError::invariant(
                target_id,
                format!("queue slot at {slot_tier}, entry at {tier}"),
            ));
        }
        let removed = self
            .queues
            .get_mut(&tier)
            .is_some_and(|queue| queue.remove(&slot));
        if !removed {
            return Err(StoreError::invariant(
                target_id,
                format!("slot missing from {tier} queue"),
            ));
        }
        Ok(())
    }

    fn ready(&self, tier: Tier, max: usize) -> StoreResult<Vec<TargetId>> {
        let Some(queue) = self.queues.get(&tier) else {
            return Ok(Vec::new());
        };
        let mut ids = Vec::new();
        for (_, _, target_id) in queue {
            if ids.len() >= max {
                break;
            }
            let entry = self
                .entries
                .get(target_id)
                .ok_or_else(|| StoreError::invariant(target_id, "queued without an entry"))?;
            if entry.tier != tier || !entry.is_pending() {
                return Err(StoreError::invariant(
                    target_id,
                    format!("queued at {tier} but entry is {}@{}", entry.flag, entry.tier),
                ));
            }
            if !entry.claimed {
                ids.push(target_id.clone());
            }
        }
        Ok(ids)
    }

    /// Remove from the current queue, then apply `update` to the entry
    fn transition<F>(&mut self, target_id: &str, tier: Tier, update: F) -> StoreResult<QueueEntry>
    where
        F: FnOnce(&mut QueueEntry),
    {
        expect_pending_at(self.entries.get(target_id), target_id, tier)?;
        self.remove_slot(target_id, tier)?;

        let entry = self
            .entries
            .get_mut(target_id)
            .ok_or_else(|| StoreError::invariant(target_id, "entry vanished mid-transition"))?;
        update(entry);
        entry.claimed = false;
        let entry = entry.clone();

        if entry.is_pending() {
            self.insert_slot(&entry)?;
        }
        Ok(entry)
    }
}

/// Campaign store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Number of tier queues the target is visible in (0 or 1 when healthy)
    pub fn queue_memberships(&self, target_id: &str) -> StoreResult<usize> {
        let inner = self.lock()?;
        Ok(inner
            .queues
            .values()
            .filter(|q| q.iter().any(|(_, _, id)| id == target_id))
            .count())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl CampaignStore for MemoryStore {
    fn put_target(&self, target: &Target) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner.targets.contains_key(&target.id) {
            return Err(StoreError::DuplicateTarget(target.id.clone()));
        }
        inner.targets.insert(target.id.clone(), target.clone());
        Ok(())
    }

    fn get_target(&self, target_id: &str) -> StoreResult<Option<Target>> {
        Ok(self.lock()?.targets.get(target_id).cloned())
    }

    fn list_targets(&self) -> StoreResult<Vec<Target>> {
        Ok(self.lock()?.targets.values().cloned().collect())
    }

    fn append_discovered(&self, target_id: &str, urls: &[String]) -> StoreResult<usize> {
        let mut inner = self.lock()?;
        let target = inner
            .targets
            .get_mut(target_id)
            .ok_or_else(|| StoreError::NotFound(target_id.to_string()))?;
        Ok(target.append_discovered(urls.iter().cloned()))
    }

    fn record(&self, attempt: &Attempt) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner
            .attempts
            .entry(attempt.target_id.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    fn history(&self, target_id: &str) -> StoreResult<Vec<Attempt>> {
        Ok(self
            .lock()?
            .attempts
            .get(target_id)
            .cloned()
            .unwrap_or_default())
    }

    fn enqueue(&self, target_id: &str, tier: Tier) -> StoreResult<QueueEntry> {
        let mut inner = self.lock()?;
        if inner.entries.contains_key(target_id) {
            return Err(StoreError::DuplicateTarget(target_id.to_string()));
        }
        let entry = QueueEntry::new(target_id, tier);
        inner.insert_slot(&entry)?;
        inner.entries.insert(target_id.to_string(), entry.clone());
        Ok(entry)
    }

    fn dequeue_ready(&self, tier: Tier, max: usize) -> StoreResult<Vec<QueueEntry>> {
        let mut inner = self.lock()?;
        let ids = inner.ready(tier, max)?;
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.claimed = true;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    fn peek_ready(&self, tier: Tier, max: usize) -> StoreResult<Vec<QueueEntry>> {
        let inner = self.lock()?;
        let ids = inner.ready(tier, max)?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect())
    }

    fn has_pending(&self, tier: Tier) -> StoreResult<bool> {
        let inner = self.lock()?;
        Ok(inner.queues.get(&tier).is_some_and(|queue| !queue.is_empty()))
    }

    fn move_to_tier(
        &self,
        target_id: &str,
        from: Tier,
        to: Tier,
        attempt_id: &str,
    ) -> StoreResult<QueueEntry> {
        self.lock()?.transition(target_id, from, |entry| {
            entry.tier = to;
            entry.enqueued_at = Utc::now();
            entry.consecutive_failures = 0;
            entry.last_attempt_id = Some(attempt_id.to_string());
        })
    }

    fn retry_in_place(
        &self,
        target_id: &str,
        tier: Tier,
        attempt_id: &str,
    ) -> StoreResult<QueueEntry> {
        self.lock()?.transition(target_id, tier, |entry| {
            entry.enqueued_at = Utc::now();
            entry.consecutive_failures += 1;
            entry.last_attempt_id = Some(attempt_id.to_string());
        })
    }

    fn finish(
        &self,
        target_id: &str,
        tier: Tier,
        flag: TerminalFlag,
        attempt_id: &str,
    ) -> StoreResult<QueueEntry> {
        if !flag.is_terminal() {
            return Err(StoreError::invariant(target_id, "finish requires a terminal flag"));
        }
        self.lock()?.transition(target_id, tier, |entry| {
            entry.flag = flag;
            entry.last_attempt_id = Some(attempt_id.to_string());
        })
    }

    fn entry(&self, target_id: &str) -> StoreResult<Option<QueueEntry>> {
        Ok(self.lock()?.entries.get(target_id).cloned())
    }

    fn entries(&self) -> StoreResult<Vec<QueueEntry>> {
        let inner = self.lock()?;
        let mut entries: Vec<QueueEntry> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        Ok(entries)
    }

    fn release_claims(&self) -> StoreResult<usize> {
        let mut inner = self.lock()?;
        let mut released = 0;
        for entry in inner.entries.values_mut().filter(|e| e.claimed) {
            entry.claimed = false;
            released += 1;
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Diagnostics};

    fn seeded(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..n {
            let id = format!("d-{i}");
            store.put_target(&Target::new(&id, format!("District {i}"), "CA")).unwrap();
            store.enqueue(&id, Tier::Probe).unwrap();
        }
        store
    }

    fn attempt(target: &str, category: Category) -> Attempt {
        let now = Utc::now();
        Attempt {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: target.to_string(),
            tier: Tier::Probe,
            started_at: now,
            ended_at: now,
            category,
            diagnostics: Diagnostics::default(),
            batch_id: None,
            result: None,
        }
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let store = seeded(1);
        let err = store.put_target(&Target::new("d-0", "Again", "CA")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTarget(id) if id == "d-0"));
        assert!(matches!(
            store.enqueue("d-0", Tier::Rendered),
            Err(StoreError::DuplicateTarget(_))
        ));
    }

    #[test]
    fn test_dequeue_is_fifo_and_claims() {
        let store = seeded(5);
        let first = store.dequeue_ready(Tier::Probe, 2).unwrap();
        let ids: Vec<&str> = first.iter().map(|e| e.target_id.as_str()).collect();
        assert_eq!(ids, vec!["d-0", "d-1"]);
        assert!(first.iter().all(|e| e.claimed));

        // Claimed entries are not handed out twice
        let second = store.dequeue_ready(Tier::Probe, 10).unwrap();
        let ids: Vec<&str> = second.iter().map(|e| e.target_id.as_str()).collect();
        assert_eq!(ids, vec!["d-2", "d-3", "d-4"]);
        assert!(store.dequeue_ready(Tier::Probe, 10).unwrap().is_empty());

        assert_eq!(store.release_claims().unwrap(), 5);
        assert_eq!(store.peek_ready(Tier::Probe, 10).unwrap().len(), 5);
    }

    #[test]
    fn test_has_pending_counts_claimed_entries() {
        let store = seeded(1);
        assert!(store.has_pending(Tier::Probe).unwrap());
        assert!(!store.has_pending(Tier::Search).unwrap());

        store.dequeue_ready(Tier::Probe, 1).unwrap();
        assert!(store.has_pending(Tier::Probe).unwrap());

        store.finish("d-0", Tier::Probe, TerminalFlag::Blocked, "a-1").unwrap();
        assert!(!store.has_pending(Tier::Probe).unwrap());
    }

    #[test]
    fn test_move_to_tier_is_exclusive() {
        let store = seeded(3);
        store.dequeue_ready(Tier::Probe, 1).unwrap();

        let moved = store.move_to_tier("d-0", Tier::Probe, Tier::Rendered, "a-1").unwrap();
        assert_eq!(moved.tier, Tier::Rendered);
        assert!(!moved.claimed);
        assert_eq!(moved.consecutive_failures, 0);
        assert_eq!(moved.last_attempt_id.as_deref(), Some("a-1"));

        assert_eq!(store.queue_memberships("d-0").unwrap(), 1);
        let rendered = store.peek_ready(Tier::Rendered, 10).unwrap();
        assert_eq!(rendered.len(), 1);
        let probe = store.peek_ready(Tier::Probe, 10).unwrap();
        assert!(probe.iter().all(|e| e.target_id != "d-0"));
    }

    #[test]
    fn test_stale_transition_is_an_invariant_violation() {
        let store = seeded(1);
        store.move_to_tier("d-0", Tier::Probe, Tier::Rendered, "a-1").unwrap();

        let err = store
            .move_to_tier("d-0", Tier::Probe, Tier::Rendered, "a-2")
            .unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation { .. }));

        // The failed call left the entry untouched
        let entry = store.entry("d-0").unwrap().unwrap();
        assert_eq!(entry.tier, Tier::Rendered);
        assert_eq!(store.queue_memberships("d-0").unwrap(), 1);
    }

    #[test]
    fn test_retry_in_place_counts_failures() {
        let store = seeded(2);
        store.dequeue_ready(Tier::Probe, 2).unwrap();
        let entry = store.retry_in_place("d-0", Tier::Probe, "a-1").unwrap();
        assert_eq!(entry.consecutive_failures, 1);
        assert_eq!(entry.tier, Tier::Probe);

        // A retried entry goes to the back of its queue
        store.release_claims().unwrap();
        let ids: Vec<String> = store
            .peek_ready(Tier::Probe, 10)
            .unwrap()
            .into_iter()
            .map(|e| e.target_id)
            .collect();
        assert_eq!(ids, vec!["d-1", "d-0"]);
    }

    #[test]
    fn test_finish_leaves_every_queue() {
        let store = seeded(1);
        let entry = store
            .finish("d-0", Tier::Probe, TerminalFlag::Blocked, "a-1")
            .unwrap();
        assert_eq!(entry.flag, TerminalFlag::Blocked);
        assert_eq!(store.queue_memberships("d-0").unwrap(), 0);
        assert!(store.peek_ready(Tier::Probe, 10).unwrap().is_empty());

        // Terminal is absorbing
        assert!(store.move_to_tier("d-0", Tier::Probe, Tier::Rendered, "a-2").is_err());
        assert!(store.finish("d-0", Tier::Probe, TerminalFlag::Succeeded, "a-3").is_err());
    }

    #[test]
    fn test_finish_requires_terminal_flag() {
        let store = seeded(1);
        assert!(store
            .finish("d-0", Tier::Probe, TerminalFlag::Pending, "a-1")
            .is_err());
        assert!(store.entry("d-0").unwrap().unwrap().is_pending());
    }

    #[test]
    fn test_ledger_history_and_counts() {
        let store = seeded(1);
        store.record(&attempt("d-0", Category::NotFound)).unwrap();
        store.record(&attempt("d-0", Category::Timeout)).unwrap();
        store.record(&attempt("d-0", Category::NotFound)).unwrap();

        let history = store.history("d-0").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].category, Category::Timeout);
        assert_eq!(store.count_by_category("d-0", Category::NotFound).unwrap(), 2);
        assert!(store.history("missing").unwrap().is_empty());
    }

    #[test]
    fn test_append_discovered() {
        let store = seeded(1);
        let urls = vec!["https://a.org/hs".to_string(), "https://a.org/hs".to_string()];
        assert_eq!(store.append_discovered("d-0", &urls).unwrap(), 1);
        assert_eq!(store.append_discovered("d-0", &urls).unwrap(), 0);
        assert!(matches!(
            store.append_discovered("nope", &urls),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_moves_never_duplicate() {
        use std::sync::Arc;

        let store = Arc::new(seeded(64));
        let handles: Vec<_> = (0..8)
            .map(|w| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in (w..64).step_by(8) {
                        let id = format!("d-{i}");
                        store
                            .move_to_tier(&id, Tier::Probe, Tier::Rendered, "a")
                            .unwrap();
                        store
                            .move_to_tier(&id, Tier::Rendered, Tier::Document, "b")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..64 {
            assert_eq!(store.queue_memberships(&format!("d-{i}")).unwrap(), 1);
        }
        assert_eq!(store.peek_ready(Tier::Document, 100).unwrap().len(), 64);
    }
}
