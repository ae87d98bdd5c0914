//! Journal-backed store.
//!
//! Every event is written as one JSON line and `fsync`ed before the write is
//! acknowledged. Opening a journal replays it through the same table logic
//! the live store uses, so a tampered or truncated history is refused.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::core::hash::{SeedHash, ServerSeed};
use crate::game::events::LedgerEvent;
use crate::game::record::{GameId, GameRecord};
use crate::ledger::clock::{LedgerClock, SystemClock};
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::log::EventLog;
use crate::ledger::store::{GameStore, RecordTable};

/// Append-only file store.
///
/// If a failed append cannot be rolled back the store stops accepting
/// writes; reads keep working.
pub struct JournalStore {
    table: RecordTable,
    file: Mutex<File>,
    /// Set when the file may end in a partial line.
    failed: AtomicBool,
    path: PathBuf,
    clock: Arc<dyn LedgerClock>,
}

impl JournalStore {
    /// Open or create the journal at `path`, stamped by the wall clock.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open or create the journal at `path`, stamped by `clock`.
    pub fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn LedgerClock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let table = RecordTable::default();
        let mut replayed = 0usize;

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: LedgerEvent = serde_json::from_str(&line).map_err(|e| {
                    LedgerError::Corrupt(format!("line {}: {}", line_no + 1, e))
                })?;
                table.restore(&event)?;
                replayed += 1;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!(path = %path.display(), events = replayed, games = table.len(), "journal opened");

        Ok(Self {
            table,
            file: Mutex::new(file),
            failed: AtomicBool::new(false),
            path,
            clock,
        })
    }

    /// Journal location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one event and sync it to disk.
    fn append(&self, event: &LedgerEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)
            .map_err(|e| LedgerError::Corrupt(format!("encode event {}: {}", event.sequence, e)))?;
        line.push(b'\n');

        let mut file = self.file.lock().map_err(|_| LedgerError::LockPoisoned)?;
        if self.failed.load(Ordering::Acquire) {
            return Err(LedgerError::Corrupt(format!(
                "{} has an unrecovered partial write",
                self.path.display()
            )));
        }
        let committed_len = file.metadata()?.len();

        if let Err(e) = file.write_all(&line).and_then(|_| file.sync_data()) {
            warn!(path = %self.path.display(), sequence = event.sequence, "journal append failed: {}", e);
            // Drop any partial line so the next open still replays cleanly
            if let Err(truncate) = file.set_len(committed_len) {
                error!(
                    path = %self.path.display(),
                    len = committed_len,
                    "journal truncate failed, refusing further writes: {}",
                    truncate
                );
                self.failed.store(true, Ordering::Release);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// True once a failed append could not be rolled back.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

impl GameStore for JournalStore {
    fn create_commitment(
        &self,
        id: &GameId,
        seed_hash: SeedHash,
        committer: Option<&str>,
    ) -> Result<GameRecord> {
        self.table
            .create(id, seed_hash, committer, self.clock.now(), |event| self.append(event))
    }

    fn get_record(&self, id: &GameId) -> Option<GameRecord> {
        self.table.get(id)
    }

    fn finalize_reveal(&self, id: &GameId, server_seed: &ServerSeed) -> Result<GameRecord> {
        self.table
            .finalize(id, server_seed, self.clock.now(), |event| self.append(event))
    }

    fn events(&self) -> &EventLog {
        self.table.log()
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::commit;
    use crate::ledger::clock::ManualClock;
    use chrono::Utc;

    fn seed(s: &str) -> ServerSeed {
        ServerSeed::new(s.as_bytes().to_vec())
    }

    #[test]
    fn test_reopen_restores_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let before = {
            let store = JournalStore::open_with_clock(&path, clock.clone()).unwrap();
            store.create_commitment(&"g1".into(), commit(b"seedA"), Some("op")).unwrap();
            store.create_commitment(&"g2".into(), commit(b"seedB"), None).unwrap();
            store.finalize_reveal(&"g1".into(), &seed("seedA")).unwrap();
            (store.get_record(&"g1".into()), store.get_record(&"g2".into()), store.events().snapshot())
        };

        let reopened = JournalStore::open_with_clock(&path, clock).unwrap();
        assert_eq!(reopened.get_record(&"g1".into()), before.0);
        assert_eq!(reopened.get_record(&"g2".into()), before.1);
        assert_eq!(reopened.events().snapshot(), before.2);
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_reopened_store_keeps_enforcing_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        {
            let store = JournalStore::open(&path).unwrap();
            store.create_commitment(&"g1".into(), commit(b"seedA"), None).unwrap();
            store.finalize_reveal(&"g1".into(), &seed("seedA")).unwrap();
        }

        let store = JournalStore::open(&path).unwrap();
        assert!(matches!(
            store.create_commitment(&"g1".into(), commit(b"seedB"), None),
            Err(LedgerError::AlreadyCommitted(_))
        ));
        assert!(matches!(
            store.finalize_reveal(&"g1".into(), &seed("seedA")),
            Err(LedgerError::AlreadyRevealed(_))
        ));

        // New writes continue the sequence
        store.create_commitment(&"g2".into(), commit(b"seedC"), None).unwrap();
        assert_eq!(store.events().snapshot().last().unwrap().sequence, 2);
    }

    #[test]
    fn test_rejected_writes_are_not_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let store = JournalStore::open(&path).unwrap();
        store.create_commitment(&"g1".into(), commit(b"seedA"), None).unwrap();
        let _ = store.create_commitment(&"g1".into(), commit(b"seedB"), None);
        let _ = store.finalize_reveal(&"g1".into(), &seed("wrong"));

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }

    #[test]
    fn test_unrecoverable_append_stops_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let store = JournalStore::open(&path).unwrap();
        store.create_commitment(&"g1".into(), commit(b"seedA"), None).unwrap();

        // A read-only handle fails both the write and the truncate
        let writable = std::mem::replace(&mut *store.file.lock().unwrap(), File::open(&path).unwrap());
        assert!(matches!(
            store.create_commitment(&"g2".into(), commit(b"seedB"), None),
            Err(LedgerError::Io(_))
        ));
        assert!(store.is_failed());
        assert!(store.get_record(&"g2".into()).is_none());
        assert_eq!(store.events().len(), 1);

        // Even with a working file back, the store keeps refusing
        *store.file.lock().unwrap() = writable;
        assert!(matches!(
            store.finalize_reveal(&"g1".into(), &seed("seedA")),
            Err(LedgerError::Corrupt(_))
        ));
        assert!(!store.get_record(&"g1".into()).unwrap().revealed());

        drop(store);
        let reopened = JournalStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(!reopened.is_failed());
    }

    #[test]
    fn test_corrupt_line_refuses_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        {
            let store = JournalStore::open(&path).unwrap();
            store.create_commitment(&"g1".into(), commit(b"seedA"), None).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        assert!(matches!(JournalStore::open(&path), Err(LedgerError::Corrupt(_))));
    }

    #[test]
    fn test_forged_reveal_refuses_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        {
            let store = JournalStore::open(&path).unwrap();
            store.create_commitment(&"g1".into(), commit(b"seedA"), None).unwrap();
            store.finalize_reveal(&"g1".into(), &seed("seedA")).unwrap();
        }

        // Swap the revealed seed for a different one
        let text = std::fs::read_to_string(&path).unwrap();
        let forged = text.replace(&seed("seedA").to_hex(), &seed("seedB").to_hex());
        std::fs::write(&path, forged).unwrap();

        assert!(matches!(JournalStore::open(&path), Err(LedgerError::Corrupt(_))));
    }
}
