//! Append-only event log with live fan-out.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::game::events::{LedgerEvent, LedgerEventData};
use crate::game::record::GameId;
use crate::ledger::error::{LedgerError, Result};

/// Buffered events per slow subscriber before it starts lagging.
const BROADCAST_CAPACITY: usize = 1024;

/// Ordered log of every successful state change.
///
/// Sequence numbers are assigned under the log lock, so they are gap-free
/// and match the order in which appends were persisted.
pub struct EventLog {
    entries: Mutex<Vec<LedgerEvent>>,
    tx: broadcast::Sender<LedgerEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            entries: Mutex::new(Vec::new()),
            tx,
        }
    }

    /// Append an event.
    ///
    /// `persist` sees the event with its final sequence number before it
    /// becomes visible; if it fails nothing is appended.
    pub(crate) fn append_with<F>(
        &self,
        game_id: &GameId,
        at: DateTime<Utc>,
        data: LedgerEventData,
        persist: F,
    ) -> Result<LedgerEvent>
    where
        F: FnOnce(&LedgerEvent) -> Result<()>,
    {
        let mut entries = self.entries.lock().map_err(|_| LedgerError::LockPoisoned)?;

        let event = LedgerEvent {
            sequence: entries.len() as u64,
            game_id: game_id.clone(),
            at,
            data,
        };

        persist(&event)?;
        entries.push(event.clone());

        // No subscribers is fine
        let _ = self.tx.send(event.clone());

        Ok(event)
    }

    /// Live feed of events appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }

    /// Copy of the whole log.
    pub fn snapshot(&self) -> Vec<LedgerEvent> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Events with `sequence >= from`.
    pub fn since(&self, from: u64) -> Vec<LedgerEvent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().skip(from as usize).cloned().collect()
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if nothing was logged yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::commit;

    fn committed(id: &str) -> (GameId, LedgerEventData) {
        (
            GameId::new(id),
            LedgerEventData::Committed {
                seed_hash: commit(id.as_bytes()),
                committer: None,
            },
        )
    }

    #[test]
    fn test_sequence_is_gap_free() {
        let log = EventLog::new();
        for name in ["a", "b", "c"] {
            let (id, data) = committed(name);
            log.append_with(&id, Utc::now(), data, |_| Ok(())).unwrap();
        }

        let seqs: Vec<u64> = log.snapshot().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(log.since(1).len(), 2);
        assert_eq!(log.since(5).len(), 0);
    }

    #[test]
    fn test_failed_persist_appends_nothing() {
        let log = EventLog::new();
        let (id, data) = committed("a");

        let result = log.append_with(&id, Utc::now(), data, |_| {
            Err(LedgerError::Corrupt("disk full".into()))
        });

        assert!(result.is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn test_subscribers_receive_appends() {
        let log = EventLog::new();
        let mut rx = log.subscribe();

        let (id, data) = committed("a");
        let appended = log.append_with(&id, Utc::now(), data, |_| Ok(())).unwrap();

        assert_eq!(rx.try_recv().unwrap(), appended);
    }
}
