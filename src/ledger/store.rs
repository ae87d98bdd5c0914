//! Game Record Store
//!
//! Write-once commitments with a single reveal per record. The table keeps
//! one mutex per record so reveals of different games never wait on each
//! other; the index lock is only held to find or insert a slot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::hash::{SeedHash, ServerSeed};
use crate::game::events::{LedgerEvent, LedgerEventData};
use crate::game::record::{GameId, GameRecord};
use crate::ledger::clock::{LedgerClock, SystemClock};
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::log::EventLog;

/// Durable mapping from game identifier to commitment record.
///
/// Implementations must serialize writes per identifier: of several
/// concurrent creates for one id exactly one succeeds, and of several
/// concurrent reveals exactly one succeeds. Every successful write appends
/// one event to [`GameStore::events`].
pub trait GameStore: Send + Sync {
    /// Insert a new unrevealed record.
    ///
    /// Fails with [`LedgerError::AlreadyCommitted`] if `id` exists; the
    /// existing record is untouched.
    fn create_commitment(
        &self,
        id: &GameId,
        seed_hash: SeedHash,
        committer: Option<&str>,
    ) -> Result<GameRecord>;

    /// Snapshot of a record, `None` if never committed.
    fn get_record(&self, id: &GameId) -> Option<GameRecord>;

    /// Store the seed and mark the record revealed.
    ///
    /// The seed is checked against the commitment inside the record's
    /// critical section; on any error the record is unchanged.
    fn finalize_reveal(&self, id: &GameId, server_seed: &ServerSeed) -> Result<GameRecord>;

    /// Event log of all successful writes.
    fn events(&self) -> &EventLog;

    /// Number of records.
    fn len(&self) -> usize;

    /// True if no game was committed yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Slot = Arc<Mutex<GameRecord>>;

#[derive(Default)]
struct Index {
    slots: BTreeMap<GameId, Slot>,
    last_committed_at: Option<DateTime<Utc>>,
}

/// Shared record table behind both store implementations.
///
/// `persist` hooks run with the final event before it is published; a
/// failing hook aborts the write.
#[derive(Default)]
pub(crate) struct RecordTable {
    index: RwLock<Index>,
    log: EventLog,
}

impl RecordTable {
    pub(crate) fn create<F>(
        &self,
        id: &GameId,
        seed_hash: SeedHash,
        committer: Option<&str>,
        now: DateTime<Utc>,
        persist: F,
    ) -> Result<GameRecord>
    where
        F: FnOnce(&LedgerEvent) -> Result<()>,
    {
        if id.as_str().is_empty() {
            return Err(LedgerError::InvalidInput("empty game id"));
        }

        let mut index = self.index.write().map_err(|_| LedgerError::LockPoisoned)?;

        if index.slots.contains_key(id) {
            return Err(LedgerError::AlreadyCommitted(id.clone()));
        }

        // Inclusion time never runs backwards across commits
        let committed_at = match index.last_committed_at {
            Some(last) if last > now => last,
            _ => now,
        };

        let committer = committer.map(str::to_owned);
        let record = GameRecord::committed(
            id.clone(),
            seed_hash,
            committed_at,
            committer.clone(),
            index.slots.len() as u64,
        );

        self.log.append_with(
            id,
            committed_at,
            LedgerEventData::Committed { seed_hash, committer },
            persist,
        )?;

        index.slots.insert(id.clone(), Arc::new(Mutex::new(record.clone())));
        index.last_committed_at = Some(committed_at);

        debug!(game_id = %id, sequence = record.sequence(), "commitment stored");
        Ok(record)
    }

    pub(crate) fn finalize<F>(
        &self,
        id: &GameId,
        server_seed: &ServerSeed,
        now: DateTime<Utc>,
        persist: F,
    ) -> Result<GameRecord>
    where
        F: FnOnce(&LedgerEvent) -> Result<()>,
    {
        if server_seed.as_bytes().is_empty() {
            return Err(LedgerError::InvalidInput("empty server seed"));
        }

        let slot = self.slot(id)?.ok_or_else(|| LedgerError::NotFound(id.clone()))?;
        let mut current = slot.lock().map_err(|_| LedgerError::LockPoisoned)?;

        if current.revealed() {
            return Err(LedgerError::AlreadyRevealed(id.clone()));
        }
        if !current.seed_hash().matches(server_seed.as_bytes()) {
            return Err(LedgerError::SeedMismatch(id.clone()));
        }

        let mut updated = current.clone();
        updated.mark_revealed(server_seed.clone(), now);

        self.log.append_with(
            id,
            now,
            LedgerEventData::Revealed { server_seed: server_seed.clone() },
            persist,
        )?;

        *current = updated.clone();

        debug!(game_id = %id, "reveal stored");
        Ok(updated)
    }

    /// Re-execute a logged event and require it to come out identical.
    pub(crate) fn restore(&self, event: &LedgerEvent) -> Result<()> {
        let same_event = |produced: &LedgerEvent| {
            if produced == event {
                Ok(())
            } else {
                Err(LedgerError::Corrupt(format!(
                    "event {} does not replay to the logged entry",
                    event.sequence
                )))
            }
        };

        let outcome = match &event.data {
            LedgerEventData::Committed { seed_hash, committer } => self
                .create(&event.game_id, *seed_hash, committer.as_deref(), event.at, same_event)
                .map(drop),
            LedgerEventData::Revealed { server_seed } => self
                .finalize(&event.game_id, server_seed, event.at, same_event)
                .map(drop),
        };

        outcome.map_err(|e| match e {
            LedgerError::Corrupt(_) | LedgerError::Io(_) | LedgerError::LockPoisoned => e,
            protocol => LedgerError::Corrupt(format!(
                "event {} violates the protocol: {}",
                event.sequence, protocol
            )),
        })
    }

    pub(crate) fn get(&self, id: &GameId) -> Option<GameRecord> {
        let slot = {
            let index = self.index.read().unwrap_or_else(|e| e.into_inner());
            index.slots.get(id).cloned()
        }?;
        let record = slot.lock().unwrap_or_else(|e| e.into_inner());
        Some(record.clone())
    }

    pub(crate) fn records(&self) -> BTreeMap<GameId, GameRecord> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index
            .slots
            .iter()
            .map(|(id, slot)| {
                let record = slot.lock().unwrap_or_else(|e| e.into_inner());
                (id.clone(), record.clone())
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.read().unwrap_or_else(|e| e.into_inner()).slots.len()
    }

    pub(crate) fn log(&self) -> &EventLog {
        &self.log
    }

    fn slot(&self, id: &GameId) -> Result<Option<Slot>> {
        let index = self.index.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(index.slots.get(id).cloned())
    }
}

/// In-memory store. State is lost on drop.
pub struct MemoryStore {
    table: RecordTable,
    clock: Arc<dyn LedgerClock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store stamped by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store stamped by `clock`.
    pub fn with_clock(clock: Arc<dyn LedgerClock>) -> Self {
        Self {
            table: RecordTable::default(),
            clock,
        }
    }

    /// Snapshot of every record, keyed by id.
    pub fn records(&self) -> BTreeMap<GameId, GameRecord> {
        self.table.records()
    }
}

impl GameStore for MemoryStore {
    fn create_commitment(
        &self,
        id: &GameId,
        seed_hash: SeedHash,
        committer: Option<&str>,
    ) -> Result<GameRecord> {
        self.table.create(id, seed_hash, committer, self.clock.now(), |_| Ok(()))
    }

    fn get_record(&self, id: &GameId) -> Option<GameRecord> {
        self.table.get(id)
    }

    fn finalize_reveal(&self, id: &GameId, server_seed: &ServerSeed) -> Result<GameRecord> {
        self.table.finalize(id, server_seed, self.clock.now(), |_| Ok(()))
    }

    fn events(&self) -> &EventLog {
        self.table.log()
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}

/// Rebuild records from an event log.
///
/// Fails with [`LedgerError::Corrupt`] if the events are out of order or
/// describe an impossible history (double commit, reveal before commit,
/// seed not matching).
pub fn replay<'a, I>(events: I) -> Result<BTreeMap<GameId, GameRecord>>
where
    I: IntoIterator<Item = &'a LedgerEvent>,
{
    let table = RecordTable::default();
    for event in events {
        table.restore(event)?;
    }
    Ok(table.records())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::commit;
    use crate::game::record::GameState;
    use crate::ledger::clock::ManualClock;
    use chrono::Duration;
    use std::thread;

    fn seed(s: &str) -> ServerSeed {
        ServerSeed::new(s.as_bytes().to_vec())
    }

    #[test]
    fn test_create_and_get() {
        let store = MemoryStore::new();
        let id = GameId::new("g1");

        assert!(store.get_record(&id).is_none());

        let record = store.create_commitment(&id, commit(b"seedA"), Some("op")).unwrap();
        assert_eq!(record.state(), GameState::Committed);
        assert_eq!(record.sequence(), 0);
        assert_eq!(store.get_record(&id), Some(record));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_create_keeps_first() {
        let store = MemoryStore::new();
        let id = GameId::new("g1");

        store.create_commitment(&id, commit(b"seedA"), None).unwrap();
        let err = store.create_commitment(&id, commit(b"seedB"), None).unwrap_err();

        assert!(matches!(err, LedgerError::AlreadyCommitted(_)));
        assert_eq!(store.get_record(&id).unwrap().seed_hash(), &commit(b"seedA"));
        assert_eq!(store.events().len(), 1);
    }

    #[test]
    fn test_finalize_checks() {
        let store = MemoryStore::new();
        let id = GameId::new("g1");

        assert!(matches!(
            store.finalize_reveal(&id, &seed("seedA")),
            Err(LedgerError::NotFound(_))
        ));

        store.create_commitment(&id, commit(b"seedA"), None).unwrap();

        assert!(matches!(
            store.finalize_reveal(&id, &seed("seedB")),
            Err(LedgerError::SeedMismatch(_))
        ));
        assert!(!store.get_record(&id).unwrap().revealed());

        let record = store.finalize_reveal(&id, &seed("seedA")).unwrap();
        assert!(record.revealed());

        assert!(matches!(
            store.finalize_reveal(&id, &seed("seedA")),
            Err(LedgerError::AlreadyRevealed(_))
        ));
        assert_eq!(store.events().len(), 2);
    }

    #[test]
    fn test_empty_id_and_seed_rejected() {
        let store = MemoryStore::new();

        assert!(matches!(
            store.create_commitment(&"".into(), commit(b""), None),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(store.is_empty());

        // commit("") is a valid digest, but revealing an empty seed is not
        let id = GameId::new("g1");
        store.create_commitment(&id, commit(b""), None).unwrap();
        assert!(matches!(
            store.finalize_reveal(&id, &seed("")),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(!store.get_record(&id).unwrap().revealed());
        assert_eq!(store.events().len(), 1);
    }

    #[test]
    fn test_committed_at_is_monotonic() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryStore::with_clock(clock.clone());

        let a = store.create_commitment(&"a".into(), commit(b"a"), None).unwrap();

        // Clock steps back; inclusion time must not
        clock.set(start - Duration::seconds(30));
        let b = store.create_commitment(&"b".into(), commit(b"b"), None).unwrap();

        clock.set(start + Duration::seconds(10));
        let c = store.create_commitment(&"c".into(), commit(b"c"), None).unwrap();

        assert_eq!(a.committed_at(), start);
        assert_eq!(b.committed_at(), start);
        assert_eq!(c.committed_at(), start + Duration::seconds(10));
        assert_eq!(c.sequence(), 2);
    }

    #[test]
    fn test_failed_persist_leaves_table_unchanged() {
        let table = RecordTable::default();
        let id = GameId::new("g1");

        let result = table.create(&id, commit(b"seedA"), None, Utc::now(), |_| {
            Err(LedgerError::Corrupt("disk".into()))
        });
        assert!(result.is_err());
        assert!(table.get(&id).is_none());
        assert!(table.log().is_empty());

        table.create(&id, commit(b"seedA"), None, Utc::now(), |_| Ok(())).unwrap();
        let result = table.finalize(&id, &seed("seedA"), Utc::now(), |_| {
            Err(LedgerError::Corrupt("disk".into()))
        });
        assert!(result.is_err());
        assert!(!table.get(&id).unwrap().revealed());
        assert_eq!(table.log().len(), 1);
    }

    #[test]
    fn test_concurrent_create_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let id = GameId::new("contested");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let id = id.clone();
                thread::spawn(move || {
                    store.create_commitment(&id, commit(format!("seed{}", i).as_bytes()), None)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();

        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(LedgerError::AlreadyCommitted(_)))));
        assert_eq!(store.get_record(&id).as_ref(), Some(winners[0]));
    }

    #[test]
    fn test_concurrent_reveal_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let id = GameId::new("g1");
        store.create_commitment(&id, commit(b"seedA"), None).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                thread::spawn(move || store.finalize_reveal(&id, &seed("seedA")))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(LedgerError::AlreadyRevealed(_))))
                .count(),
            15
        );
        assert_eq!(store.events().len(), 2);
    }

    #[test]
    fn test_replay_matches_store() {
        let store = MemoryStore::new();
        for name in ["a", "b", "c"] {
            store.create_commitment(&name.into(), commit(name.as_bytes()), Some("op")).unwrap();
        }
        store.finalize_reveal(&"b".into(), &seed("b")).unwrap();

        let events = store.events().snapshot();
        let rebuilt = replay(&events).unwrap();

        assert_eq!(rebuilt, store.records());
    }

    #[test]
    fn test_replay_rejects_impossible_history() {
        let store = MemoryStore::new();
        store.create_commitment(&"a".into(), commit(b"a"), None).unwrap();
        store.finalize_reveal(&"a".into(), &seed("a")).unwrap();
        let events = store.events().snapshot();

        // Reveal without its commit
        assert!(matches!(replay(&events[1..]), Err(LedgerError::Corrupt(_))));

        // Duplicate commit
        let doubled = vec![events[0].clone(), events[0].clone()];
        assert!(matches!(replay(&doubled), Err(LedgerError::Corrupt(_))));

        // Sequence gap
        let mut gapped = events.clone();
        gapped[1].sequence = 7;
        assert!(matches!(replay(&gapped), Err(LedgerError::Corrupt(_))));
    }
}
