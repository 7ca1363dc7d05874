//! RocksDB-backed campaign store
//!
//! Column families separate targets, ledger, and queue while sharing one
//! database. Values are JSON-encoded: the persisted types use internally
//! tagged enums and skipped fields, which need a self-describing format.
//!
//! Queue records are keyed by target only, so a target can never be
//! stored in two tiers. Transitions read-modify-write under the write half
//! of the database lock, which makes them linearizable.
//!
//! The `pending` column family indexes every pending entry by tier and
//! enqueue time. Queue polls scan one tier's prefix instead of decoding
//! the whole queue; the index is written in the same `WriteBatch` as the
//! entry it points at.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, ALL_CFS};
use super::{expect_pending_at, CampaignStore, StoreError, StoreResult};
use crate::types::{Attempt, QueueEntry, Target, TerminalFlag, Tier};

/// Persistent campaign store
pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
    /// Next attempt sequence number, recovered from the ledger on open
    attempt_seq: AtomicU64,
}

impl RocksStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        let store = Self {
            db: RwLock::new(db),
            path,
            attempt_seq: AtomicU64::new(0),
        };
        let next = store.max_attempt_seq()?.map_or(0, |seq| seq + 1);
        store.attempt_seq.store(next, Ordering::SeqCst);
        store.ensure_pending_index()?;
        Ok(store)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, DB>> {
        self.db.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, DB>> {
        self.db.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    fn cf<'a>(db: &'a DB, cf_name: &str) -> StoreResult<&'a ColumnFamily> {
        db.cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))
    }

    fn put<T: Serialize>(db: &DB, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let cf = Self::cf(db, cf_name)?;
        db.put_cf(cf, key.as_bytes(), Self::encode(value)?)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(db: &DB, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        match db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Values under `prefix`, in key order
    fn scan<T: DeserializeOwned>(
        db: &DB,
        cf_name: &str,
        prefix: &str,
    ) -> StoreResult<Vec<(String, T)>> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);
        for item in db.iterator_cf(cf, mode) {
            let (key, value) = item?;
            let Ok(key) = String::from_utf8(key.to_vec()) else {
                continue;
            };
            if !key.starts_with(prefix) {
                break;
            }
            values.push((key, Self::decode(&value)?));
        }
        Ok(values)
    }

    fn max_attempt_seq(&self) -> StoreResult<Option<u64>> {
        let db = self.read()?;
        let cf = db
            .cf_handle(schema::CF_ATTEMPTS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_ATTEMPTS.to_string()))?;
        let mut max = None;
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let seq = std::str::from_utf8(&key)
                .ok()
                .and_then(schema::keys::parse_attempt_seq);
            max = max.max(seq);
        }
        Ok(max)
    }

    fn load_entry(db: &DB, target_id: &str) -> StoreResult<Option<QueueEntry>> {
        Self::get(db, schema::CF_QUEUE, &schema::keys::queue(target_id))
    }

    fn load_entries(db: &DB) -> StoreResult<Vec<QueueEntry>> {
        Ok(Self::scan::<QueueEntry>(db, schema::CF_QUEUE, schema::keys::QUEUE_PREFIX)?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    fn pending_key(entry: &QueueEntry) -> String {
        schema::keys::pending(entry.tier, entry.enqueued_at, &entry.target_id)
    }

    /// Whether one tier's pending index has any key
    fn any_pending(db: &DB, tier: Tier) -> StoreResult<bool> {
        let cf = Self::cf(db, schema::CF_PENDING)?;
        let prefix = schema::keys::pending_prefix(tier);
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);
        match db.iterator_cf(cf, mode).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(key.starts_with(prefix.as_bytes()))
            }
            None => Ok(false),
        }
    }

    /// Unclaimed pending entries at `tier`, walking the index in FIFO order
    fn ready(db: &DB, tier: Tier, max: usize) -> StoreResult<Vec<QueueEntry>> {
        let cf = Self::cf(db, schema::CF_PENDING)?;
        let prefix = schema::keys::pending_prefix(tier);
        let mut ready = Vec::new();
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);
        for item in db.iterator_cf(cf, mode) {
            if ready.len() >= max {
                break;
            }
            let (key, _) = item?;
            let Ok(key) = std::str::from_utf8(&key) else {
                continue;
            };
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(target_id) = schema::keys::parse_pending_id(key) else {
                continue;
            };
            let entry = Self::load_entry(db, target_id)?
                .ok_or_else(|| StoreError::invariant(target_id, "indexed without an entry"))?;
            if entry.tier != tier || !entry.is_pending() {
                return Err(StoreError::invariant(
                    target_id,
                    format!("indexed at {tier} but entry is {}@{}", entry.flag, entry.tier),
                ));
            }
            if !entry.claimed {
                ready.push(entry);
            }
        }
        Ok(ready)
    }

    /// Rebuild the pending index when it is empty but the queue is not,
    /// as with a database written before the index existed
    fn ensure_pending_index(&self) -> StoreResult<()> {
        let db = self.write()?;
        let cf = Self::cf(&db, schema::CF_PENDING)?;
        if db.iterator_cf(cf, IteratorMode::Start).next().is_some() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        let mut indexed = 0;
        for entry in Self::load_entries(&db)?.iter().filter(|e| e.is_pending()) {
            batch.put_cf(cf, Self::pending_key(entry), entry.target_id.as_bytes());
            indexed += 1;
        }
        if indexed > 0 {
            db.write(batch)?;
            tracing::info!(indexed, "Rebuilt pending queue index");
        }
        Ok(())
    }

    fn transition<F>(&self, target_id: &str, tier: Tier, update: F) -> StoreResult<QueueEntry>
    where
        F: FnOnce(&mut QueueEntry),
    {
        let db = self.write()?;
        let entry = Self::load_entry(&db, target_id)?;
        expect_pending_at(entry.as_ref(), target_id, tier)?;
        let Some(mut entry) = entry else {
            return Err(StoreError::invariant(target_id, "no queue entry"));
        };
        let old_key = Self::pending_key(&entry);
        update(&mut entry);
        entry.claimed = false;

        let queue_cf = Self::cf(&db, schema::CF_QUEUE)?;
        let pending_cf = Self::cf(&db, schema::CF_PENDING)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(pending_cf, old_key);
        batch.put_cf(queue_cf, schema::keys::queue(target_id), Self::encode(&entry)?);
        if entry.is_pending() {
            batch.put_cf(pending_cf, Self::pending_key(&entry), target_id.as_bytes());
        }
        db.write(batch)?;
        Ok(entry)
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore").field("path", &self.path).finish()
    }
}

impl CampaignStore for RocksStore {
    fn put_target(&self, target: &Target) -> StoreResult<()> {
        let db = self.write()?;
        let key = schema::keys::target(&target.id);
        if Self::get::<Target>(&db, schema::CF_TARGETS, &key)?.is_some() {
            return Err(StoreError::DuplicateTarget(target.id.clone()));
        }
        Self::put(&db, schema::CF_TARGETS, &key, target)
    }

    fn get_target(&self, target_id: &str) -> StoreResult<Option<Target>> {
        let db = self.read()?;
        Self::get(&db, schema::CF_TARGETS, &schema::keys::target(target_id))
    }

    fn list_targets(&self) -> StoreResult<Vec<Target>> {
        let db = self.read()?;
        Ok(Self::scan::<Target>(&db, schema::CF_TARGETS, schema::keys::TARGET_PREFIX)?
            .into_iter()
            .map(|(_, t)| t)
            .collect())
    }

    fn append_discovered(&self, target_id: &str, urls: &[String]) -> StoreResult<usize> {
        let db = self.write()?;
        let key = schema::keys::target(target_id);
        let mut target: Target = Self::get(&db, schema::CF_TARGETS, &key)?
            .ok_or_else(|| StoreError::NotFound(target_id.to_string()))?;
        let added = target.append_discovered(urls.iter().cloned());
        if added > 0 {
            Self::put(&db, schema::CF_TARGETS, &key, &target)?;
        }
        Ok(added)
    }

    fn record(&self, attempt: &Attempt) -> StoreResult<()> {
        let db = self.read()?;
        let seq = self.attempt_seq.fetch_add(1, Ordering::SeqCst);
        let key = schema::keys::attempt(&attempt.target_id, seq);
        Self::put(&db, schema::CF_ATTEMPTS, &key, attempt)
    }

    fn history(&self, target_id: &str) -> StoreResult<Vec<Attempt>> {
        let db = self.read()?;
        let prefix = schema::keys::attempt_prefix(target_id);
        // Ids may contain ':', so the prefix alone can over-match
        Ok(Self::scan::<Attempt>(&db, schema::CF_ATTEMPTS, &prefix)?
            .into_iter()
            .map(|(_, a)| a)
            .filter(|a| a.target_id == target_id)
            .collect())
    }

    fn enqueue(&self, target_id: &str, tier: Tier) -> StoreResult<QueueEntry> {
        let db = self.write()?;
        if Self::load_entry(&db, target_id)?.is_some() {
            return Err(StoreError::DuplicateTarget(target_id.to_string()));
        }
        let entry = QueueEntry::new(target_id, tier);
        let mut batch = WriteBatch::default();
        batch.put_cf(
            Self::cf(&db, schema::CF_QUEUE)?,
            schema::keys::queue(target_id),
            Self::encode(&entry)?,
        );
        batch.put_cf(
            Self::cf(&db, schema::CF_PENDING)?,
            Self::pending_key(&entry),
            target_id.as_bytes(),
        );
        db.write(batch)?;
        Ok(entry)
    }

    fn dequeue_ready(&self, tier: Tier, max: usize) -> StoreResult<Vec<QueueEntry>> {
        let db = self.write()?;
        let mut ready = Self::ready(&db, tier, max)?;
        let cf = db
            .cf_handle(schema::CF_QUEUE)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_QUEUE.to_string()))?;
        let mut batch = WriteBatch::default();
        for entry in &mut ready {
            entry.claimed = true;
            batch.put_cf(cf, schema::keys::queue(&entry.target_id), Self::encode(entry)?);
        }
        db.write(batch)?;
        Ok(ready)
    }

    fn peek_ready(&self, tier: Tier, max: usize) -> StoreResult<Vec<QueueEntry>> {
        let db = self.read()?;
        Self::ready(&db, tier, max)
    }

    fn has_pending(&self, tier: Tier) -> StoreResult<bool> {
        let db = self.read()?;
        Self::any_pending(&db, tier)
    }

    fn move_to_tier(
        &self,
        target_id: &str,
        from: Tier,
        to: Tier,
        attempt_id: &str,
    ) -> StoreResult<QueueEntry> {
        self.transition(target_id, from, |entry| {
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
        self.transition(target_id, tier, |entry| {
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
        self.transition(target_id, tier, |entry| {
            entry.flag = flag;
            entry.last_attempt_id = Some(attempt_id.to_string());
        })
    }

    fn entry(&self, target_id: &str) -> StoreResult<Option<QueueEntry>> {
        let db = self.read()?;
        Self::load_entry(&db, target_id)
    }

    fn entries(&self) -> StoreResult<Vec<QueueEntry>> {
        let db = self.read()?;
        Self::load_entries(&db)
    }

    fn release_claims(&self) -> StoreResult<usize> {
        let db = self.write()?;
        let cf = db
            .cf_handle(schema::CF_QUEUE)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_QUEUE.to_string()))?;
        let mut batch = WriteBatch::default();
        let mut released = 0;
        for mut entry in Self::load_entries(&db)?.into_iter().filter(|e| e.claimed) {
            entry.claimed = false;
            batch.put_cf(cf, schema::keys::queue(&entry.target_id), Self::encode(&entry)?);
            released += 1;
        }
        db.write(batch)?;
        Ok(released)
    }
}
