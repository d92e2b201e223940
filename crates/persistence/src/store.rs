//! State store contract and the in-process adapter.

use crate::codec;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tap_core::{EconomyError, EconomyResult, UserId, UserRecord};
use tracing::warn;

/// What the economy core needs from a key-value state store.
///
/// `transact` and `transact_pair` hand the closure a private copy of the
/// record(s). The copy is committed in one step when the closure returns
/// `Ok` and dropped when it returns `Err`, so no partial state is ever
/// visible. A commit that changes a record marks its user dirty.
pub trait StateStore: Send + Sync {
    /// Snapshot of a record, `None` if the user was never written.
    fn read(&self, id: UserId) -> EconomyResult<Option<UserRecord>>;

    /// Atomic read-modify-write of one user.
    fn transact<T, F>(&self, id: UserId, f: F) -> EconomyResult<T>
    where
        F: FnOnce(&mut UserRecord) -> EconomyResult<T>;

    /// Atomic read-modify-write of two distinct users; both commit or neither.
    fn transact_pair<T, F>(&self, first: UserId, second: UserId, f: F) -> EconomyResult<T>
    where
        F: FnOnce(&mut UserRecord, &mut UserRecord) -> EconomyResult<T>;

    /// Owner of a referral code.
    fn lookup_code(&self, code: &str) -> EconomyResult<Option<UserId>>;

    /// Claim `code` for `owner`. Returns false if another user holds it.
    fn reserve_code(&self, code: &str, owner: UserId) -> EconomyResult<bool>;

    /// Drop a claim made by `owner`; no-op if someone else holds the code.
    fn release_code(&self, code: &str, owner: UserId) -> EconomyResult<()>;

    fn mark_dirty(&self, ids: &[UserId]) -> EconomyResult<()>;

    /// Remove and return up to `max` dirty users.
    fn drain_dirty(&self, max: usize) -> EconomyResult<Vec<UserId>>;
}

type Slot = Arc<Mutex<Option<Vec<u8>>>>;

/// In-memory store: one mutex per user, records held as encoded bytes.
///
/// Unrelated users never contend on the same lock; the slot map lock is only
/// held to find, create or drop a slot. A slot that ends a transaction
/// without a record is dropped again, so unknown ids leave nothing behind.
#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<UserId, Slot>>,
    codes: Mutex<HashMap<String, UserId>>,
    dirty: Mutex<BTreeSet<UserId>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backing store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Number of users currently marked dirty.
    pub fn dirty_len(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Number of per-user lock slots currently held.
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    fn ensure_available(&self) -> EconomyResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EconomyError::StoreUnavailable("memory store offline".into()));
        }
        Ok(())
    }

    fn slot(&self, id: UserId) -> Slot {
        if let Some(slot) = self.slots.read().get(&id) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(id).or_default())
    }

    fn existing_slot(&self, id: UserId) -> Option<Slot> {
        self.slots.read().get(&id).map(Arc::clone)
    }

    /// Forget a slot that holds no record, unless another caller still has it.
    ///
    /// Must be called without holding the slot's own lock.
    fn drop_vacant_slot(&self, id: UserId, slot: Slot) {
        let mut slots = self.slots.write();
        let same = slots.get(&id).is_some_and(|s| Arc::ptr_eq(s, &slot));
        // one reference in the map, one here
        if same && Arc::strong_count(&slot) == 2 && slot.lock().is_none() {
            slots.remove(&id);
        }
    }

    fn load(bytes: &Option<Vec<u8>>) -> EconomyResult<Option<UserRecord>> {
        bytes.as_deref().map(codec::decode).transpose()
    }

    /// Encoded bytes for `working` if it differs from what is stored.
    fn changed(before: &Option<UserRecord>, working: &UserRecord) -> EconomyResult<Option<Vec<u8>>> {
        let unchanged = match before {
            Some(prev) => prev == working,
            None => *working == UserRecord::default(),
        };
        if unchanged {
            Ok(None)
        } else {
            codec::encode(working).map(Some)
        }
    }

    fn commit_one<T, F>(&self, id: UserId, stored: &mut Option<Vec<u8>>, f: F) -> EconomyResult<T>
    where
        F: FnOnce(&mut UserRecord) -> EconomyResult<T>,
    {
        let before = Self::load(stored)?;
        let mut working = before.clone().unwrap_or_default();
        let out = f(&mut working)?;
        if let Some(bytes) = Self::changed(&before, &working)? {
            *stored = Some(bytes);
            self.dirty.lock().insert(id);
        }
        Ok(out)
    }

    fn commit_pair<T, F>(
        &self,
        (first, stored_a): (UserId, &mut Option<Vec<u8>>),
        (second, stored_b): (UserId, &mut Option<Vec<u8>>),
        f: F,
    ) -> EconomyResult<T>
    where
        F: FnOnce(&mut UserRecord, &mut UserRecord) -> EconomyResult<T>,
    {
        let before_a = Self::load(stored_a)?;
        let before_b = Self::load(stored_b)?;
        let mut working_a = before_a.clone().unwrap_or_default();
        let mut working_b = before_b.clone().unwrap_or_default();
        let out = f(&mut working_a, &mut working_b)?;

        // Encode both before writing either.
        let bytes_a = Self::changed(&before_a, &working_a)?;
        let bytes_b = Self::changed(&before_b, &working_b)?;
        let mut dirty = self.dirty.lock();
        if let Some(bytes) = bytes_a {
            *stored_a = Some(bytes);
            dirty.insert(first);
        }
        if let Some(bytes) = bytes_b {
            *stored_b = Some(bytes);
            dirty.insert(second);
        }
        Ok(out)
    }
}

impl StateStore for MemoryStore {
    fn read(&self, id: UserId) -> EconomyResult<Option<UserRecord>> {
        self.ensure_available()?;
        match self.existing_slot(id) {
            Some(slot) => Self::load(&slot.lock()),
            None => Ok(None),
        }
    }

    fn transact<T, F>(&self, id: UserId, f: F) -> EconomyResult<T>
    where
        F: FnOnce(&mut UserRecord) -> EconomyResult<T>,
    {
        self.ensure_available()?;
        let slot = self.slot(id);
        let (out, vacant) = {
            let mut guard = slot.lock();
            let out = self.commit_one(id, &mut *guard, f);
            (out, guard.is_none())
        };
        if vacant {
            self.drop_vacant_slot(id, slot);
        }
        out
    }

    fn transact_pair<T, F>(&self, first: UserId, second: UserId, f: F) -> EconomyResult<T>
    where
        F: FnOnce(&mut UserRecord, &mut UserRecord) -> EconomyResult<T>,
    {
        self.ensure_available()?;
        if first == second {
            return Err(EconomyError::StoreUnavailable(format!(
                "pair transaction on a single key {first}"
            )));
        }
        let slot_a = self.slot(first);
        let slot_b = self.slot(second);
        let (out, vacant_a, vacant_b) = {
            // Ascending id order is the global lock order.
            let (mut guard_a, mut guard_b) = if first < second {
                let a = slot_a.lock();
                let b = slot_b.lock();
                (a, b)
            } else {
                let b = slot_b.lock();
                let a = slot_a.lock();
                (a, b)
            };
            let out = self.commit_pair((first, &mut *guard_a), (second, &mut *guard_b), f);
            (out, guard_a.is_none(), guard_b.is_none())
        };
        if vacant_a {
            self.drop_vacant_slot(first, slot_a);
        }
        if vacant_b {
            self.drop_vacant_slot(second, slot_b);
        }
        out
    }

    fn lookup_code(&self, code: &str) -> EconomyResult<Option<UserId>> {
        self.ensure_available()?;
        Ok(self.codes.lock().get(code).copied())
    }

    fn reserve_code(&self, code: &str, owner: UserId) -> EconomyResult<bool> {
        self.ensure_available()?;
        let mut codes = self.codes.lock();
        match codes.get(code) {
            Some(holder) => Ok(*holder == owner),
            None => {
                codes.insert(code.to_string(), owner);
                Ok(true)
            }
        }
    }

    fn release_code(&self, code: &str, owner: UserId) -> EconomyResult<()> {
        self.ensure_available()?;
        let mut codes = self.codes.lock();
        if codes.get(code) == Some(&owner) {
            codes.remove(code);
        } else {
            warn!(code, %owner, "release of a code not held by owner ignored");
        }
        Ok(())
    }

    fn mark_dirty(&self, ids: &[UserId]) -> EconomyResult<()> {
        self.ensure_available()?;
        self.dirty.lock().extend(ids.iter().copied());
        Ok(())
    }

    fn drain_dirty(&self, max: usize) -> EconomyResult<Vec<UserId>> {
        self.ensure_available()?;
        let mut dirty = self.dirty.lock();
        let mut out = Vec::with_capacity(max.min(dirty.len()));
        while out.len() < max {
            match dirty.pop_first() {
                Some(id) => out.push(id),
                None => break,
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use tap_core::UserEconomyState;

    fn seeded(store: &MemoryStore, id: UserId, points: u64) {
        store
            .transact(id, |rec| {
                let mut s = UserEconomyState::new(0);
                s.points = points;
                rec.economy = Some(s);
                Ok(())
            })
            .unwrap();
    }

    fn points(store: &MemoryStore, id: UserId) -> u64 {
        store
            .read(id)
            .unwrap()
            .and_then(|r| r.economy)
            .map_or(0, |s| s.points)
    }

    #[test]
    fn commit_marks_dirty_and_persists() {
        let store = MemoryStore::new();
        seeded(&store, UserId(1), 10);
        assert_eq!(points(&store, UserId(1)), 10);
        assert_eq!(store.drain_dirty(10).unwrap(), vec![UserId(1)]);
        assert!(store.drain_dirty(10).unwrap().is_empty());
    }

    #[test]
    fn error_discards_working_copy() {
        let store = MemoryStore::new();
        seeded(&store, UserId(1), 10);
        store.drain_dirty(10).unwrap();
        let res: EconomyResult<()> = store.transact(UserId(1), |rec| {
            if let Some(s) = rec.economy.as_mut() {
                s.points = 999;
            }
            Err(EconomyError::Overflow)
        });
        assert_eq!(res, Err(EconomyError::Overflow));
        assert_eq!(points(&store, UserId(1)), 10);
        assert_eq!(store.dirty_len(), 0);
    }

    #[test]
    fn unchanged_commit_is_not_dirty() {
        let store = MemoryStore::new();
        store.transact(UserId(5), |_| Ok(())).unwrap();
        assert_eq!(store.read(UserId(5)).unwrap(), None);
        assert_eq!(store.dirty_len(), 0);
    }

    #[test]
    fn unknown_ids_leave_no_slots() {
        let store = MemoryStore::new();
        for id in 1..=50 {
            let res: EconomyResult<()> =
                store.transact(UserId(id), |_| Err(EconomyError::UserNotFound(UserId(id))));
            assert!(res.is_err());
        }
        store.transact(UserId(51), |_| Ok(())).unwrap();
        let res: EconomyResult<()> =
            store.transact_pair(UserId(52), UserId(53), |_, _| Err(EconomyError::SelfReferral));
        assert!(res.is_err());
        assert_eq!(store.slot_count(), 0);

        seeded(&store, UserId(7), 1);
        assert_eq!(store.slot_count(), 1);
        // only the side that was written keeps its slot
        store
            .transact_pair(UserId(7), UserId(8), |a, _| {
                if let Some(s) = a.economy.as_mut() {
                    s.points += 1;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(store.slot_count(), 1);
        assert_eq!(points(&store, UserId(7)), 2);
    }

    #[test]
    fn pair_commits_both_or_neither() {
        let store = MemoryStore::new();
        seeded(&store, UserId(1), 0);
        seeded(&store, UserId(2), 0);
        let ok = store.transact_pair(UserId(2), UserId(1), |a, b| {
            for rec in [a, b] {
                if let Some(s) = rec.economy.as_mut() {
                    s.points += 5;
                }
            }
            Ok(())
        });
        assert!(ok.is_ok());
        assert_eq!(points(&store, UserId(1)), 5);
        assert_eq!(points(&store, UserId(2)), 5);

        let failed: EconomyResult<()> = store.transact_pair(UserId(1), UserId(2), |a, _b| {
            if let Some(s) = a.economy.as_mut() {
                s.points += 100;
            }
            Err(EconomyError::SelfReferral)
        });
        assert!(failed.is_err());
        assert_eq!(points(&store, UserId(1)), 5);
    }

    #[test]
    fn pair_rejects_same_key() {
        let store = MemoryStore::new();
        let res = store.transact_pair(UserId(3), UserId(3), |_, _| Ok(()));
        assert!(matches!(res, Err(EconomyError::StoreUnavailable(_))));
    }

    #[test]
    fn offline_store_fails_without_writing() {
        let store = MemoryStore::new();
        seeded(&store, UserId(1), 10);
        store.set_available(false);
        let res = store.transact(UserId(1), |rec| {
            rec.economy = None;
            Ok(())
        });
        assert!(matches!(res, Err(EconomyError::StoreUnavailable(_))));
        store.set_available(true);
        assert_eq!(points(&store, UserId(1)), 10);
    }

    #[test]
    fn codes_are_exclusive() {
        let store = MemoryStore::new();
        assert!(store.reserve_code("ABCD2345", UserId(1)).unwrap());
        assert!(!store.reserve_code("ABCD2345", UserId(2)).unwrap());
        assert_eq!(store.lookup_code("ABCD2345").unwrap(), Some(UserId(1)));
        store.release_code("ABCD2345", UserId(2)).unwrap();
        assert_eq!(store.lookup_code("ABCD2345").unwrap(), Some(UserId(1)));
        store.release_code("ABCD2345", UserId(1)).unwrap();
        assert_eq!(store.lookup_code("ABCD2345").unwrap(), None);
    }

    #[test]
    fn drain_respects_batch_size() {
        let store = MemoryStore::new();
        let ids: Vec<UserId> = (1..=5).map(UserId).collect();
        store.mark_dirty(&ids).unwrap();
        assert_eq!(store.drain_dirty(2).unwrap().len(), 2);
        assert_eq!(store.drain_dirty(10).unwrap().len(), 3);
    }

    #[test]
    fn concurrent_increments_are_serialized() {
        let store = MemoryStore::new();
        seeded(&store, UserId(1), 0);
        seeded(&store, UserId(2), 0);
        std::thread::scope(|scope| {
            for t in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for _ in 0..250 {
                        let id = if t % 2 == 0 { UserId(1) } else { UserId(2) };
                        store
                            .transact(id, |rec| {
                                if let Some(s) = rec.economy.as_mut() {
                                    s.points += 1;
                                }
                                Ok(())
                            })
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(points(&store, UserId(1)), 1000);
        assert_eq!(points(&store, UserId(2)), 1000);
    }

    #[test]
    fn concurrent_first_writes_are_not_lost() {
        let store = MemoryStore::new();
        std::thread::scope(|scope| {
            for t in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for _ in 0..100 {
                        // odd threads leave the record untouched
                        store
                            .transact(UserId(1), |rec| {
                                if t % 2 == 0 {
                                    let s = rec
                                        .economy
                                        .get_or_insert_with(|| UserEconomyState::new(0));
                                    s.points += 1;
                                }
                                Ok(())
                            })
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(points(&store, UserId(1)), 400);
        assert_eq!(store.slot_count(), 1);
    }

    #[test]
    fn opposite_pair_orders_do_not_deadlock() {
        let store = MemoryStore::new();
        seeded(&store, UserId(1), 0);
        seeded(&store, UserId(2), 0);
        std::thread::scope(|scope| {
            for t in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    let (a, b) = if t % 2 == 0 {
                        (UserId(1), UserId(2))
                    } else {
                        (UserId(2), UserId(1))
                    };
                    for _ in 0..200 {
                        store
                            .transact_pair(a, b, |ra, rb| {
                                for rec in [ra, rb] {
                                    if let Some(s) = rec.economy.as_mut() {
                                        s.points += 1;
                                    }
                                }
                                Ok(())
                            })
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(points(&store, UserId(1)), 800);
        assert_eq!(points(&store, UserId(2)), 800);
    }

    proptest! {
        #[test]
        fn dirty_set_tracks_changed_records(
            ops in prop::collection::vec((0i64..8, 0u64..3, any::<bool>()), 1..60)
        ) {
            let store = MemoryStore::new();
            let mut expected: BTreeMap<UserId, u64> = BTreeMap::new();
            for (id, delta, fail) in ops {
                let id = UserId(id);
                let res: EconomyResult<()> = store.transact(id, |rec| {
                    if delta > 0 {
                        let s = rec.economy.get_or_insert_with(|| UserEconomyState::new(0));
                        s.points += delta;
                    }
                    if fail { Err(EconomyError::Overflow) } else { Ok(()) }
                });
                prop_assert_eq!(res.is_err(), fail);
                if !fail && delta > 0 {
                    *expected.entry(id).or_default() += delta;
                }
            }
            let drained = store.drain_dirty(usize::MAX).unwrap();
            prop_assert_eq!(drained, expected.keys().copied().collect::<Vec<_>>());
            prop_assert_eq!(store.slot_count(), expected.len());
            for (id, total) in expected {
                prop_assert_eq!(points(&store, id), total);
            }
        }
    }
}
