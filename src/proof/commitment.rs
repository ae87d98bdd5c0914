//! Commit-Reveal Protocol
//!
//! Per-game state machine `Uncommitted -> Committed -> Revealed`.
//! Commit publishes the seed hash before play, reveal discloses the seed
//! after play, and verify lets anyone check a claimed seed at any time.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, instrument, warn};

use crate::core::hash::{SeedHash, ServerSeed};
use crate::game::record::{state_of, GameId, GameRecord, GameState};
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::log::EventLog;
use crate::ledger::store::GameStore;

/// A freshly committed round whose seed is still secret.
///
/// Handed to the session service, which keeps `server_seed` private until
/// the round is over and then passes it to [`CommitRevealEngine::reveal_game`].
#[derive(Clone, Debug)]
pub struct PendingRound {
    /// Committed record.
    pub record: GameRecord,
    /// Secret seed behind `record.seed_hash()`.
    pub server_seed: ServerSeed,
}

impl PendingRound {
    /// Game identifier.
    pub fn game_id(&self) -> &GameId {
        self.record.id()
    }

    /// Published commitment.
    pub fn seed_hash(&self) -> &SeedHash {
        self.record.seed_hash()
    }
}

/// Commit-reveal engine over an injected record store.
pub struct CommitRevealEngine<S> {
    store: S,
    seed_mismatches: AtomicU64,
}

impl<S: GameStore> CommitRevealEngine<S> {
    /// Engine over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            seed_mismatches: AtomicU64::new(0),
        }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Event log of the underlying store.
    pub fn events(&self) -> &EventLog {
        self.store.events()
    }

    /// Commit to a seed hash for a new game.
    ///
    /// Fails with [`LedgerError::AlreadyCommitted`] if `id` was ever
    /// committed before. This is final: pick a new identifier.
    pub fn commit_game(&self, id: &GameId, seed_hash: SeedHash) -> Result<GameRecord> {
        self.commit_game_as(id, seed_hash, None)
    }

    /// Commit on behalf of an authenticated operator.
    #[instrument(skip(self, seed_hash), fields(game_id = %id))]
    pub fn commit_game_as(
        &self,
        id: &GameId,
        seed_hash: SeedHash,
        committer: Option<&str>,
    ) -> Result<GameRecord> {
        match self.store.create_commitment(id, seed_hash, committer) {
            Ok(record) => {
                info!(seed_hash = %seed_hash, committed_at = %record.committed_at(), "game committed");
                Ok(record)
            }
            Err(e) => {
                debug!("commit rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Generate a server seed, commit to it under a fresh id, and hand both
    /// back to the caller.
    pub fn open_round(&self, committer: Option<&str>) -> Result<PendingRound> {
        let server_seed = ServerSeed::generate();
        let record = self.commit_game_as(&GameId::generate(), server_seed.commitment(), committer)?;
        Ok(PendingRound { record, server_seed })
    }

    /// Reveal the seed of a committed game.
    ///
    /// - unknown id: [`LedgerError::NotFound`]
    /// - already revealed: [`LedgerError::AlreadyRevealed`], even when the
    ///   repeated seed is correct
    /// - seed not hashing to the commitment: [`LedgerError::SeedMismatch`];
    ///   the game stays committed and a correct reveal can follow
    #[instrument(skip(self, server_seed), fields(game_id = %id))]
    pub fn reveal_game(&self, id: &GameId, server_seed: &ServerSeed) -> Result<GameRecord> {
        if server_seed.as_bytes().is_empty() {
            return Err(LedgerError::InvalidInput("empty server seed"));
        }

        let record = self
            .store
            .get_record(id)
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        if record.revealed() {
            debug!("reveal rejected: already revealed");
            return Err(LedgerError::AlreadyRevealed(id.clone()));
        }

        if !record.seed_hash().matches(server_seed.as_bytes()) {
            return Err(self.seed_mismatch(id));
        }

        // The store re-checks under the record lock; a racing reveal shows
        // up here as AlreadyRevealed
        match self.store.finalize_reveal(id, server_seed) {
            Ok(record) => {
                info!("game revealed");
                Ok(record)
            }
            Err(LedgerError::SeedMismatch(_)) => Err(self.seed_mismatch(id)),
            Err(e) => {
                debug!("reveal rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Does `claimed_seed` open the commitment of `id`?
    ///
    /// Pure: callable in any state, same answer before and after reveal.
    /// `false` for unknown games.
    pub fn verify_game(&self, id: &GameId, claimed_seed: &[u8]) -> bool {
        self.store
            .get_record(id)
            .map_or(false, |record| record.seed_hash().matches(claimed_seed))
    }

    /// Record snapshot, `None` if never committed.
    pub fn get_record(&self, id: &GameId) -> Option<GameRecord> {
        self.store.get_record(id)
    }

    /// Protocol state of `id`.
    pub fn game_state(&self, id: &GameId) -> GameState {
        state_of(self.store.get_record(id).as_ref())
    }

    /// Rejected reveals since start-up.
    pub fn seed_mismatch_count(&self) -> u64 {
        self.seed_mismatches.load(Ordering::Relaxed)
    }

    fn seed_mismatch(&self, id: &GameId) -> LedgerError {
        let total = self.seed_mismatches.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(game_id = %id, total, "reveal rejected: seed does not match commitment");
        LedgerError::SeedMismatch(id.clone())
    }
}

/// Does `claimed_seed` open `seed_hash`? No stored state involved.
pub fn verify_seed_hash(claimed_seed: &[u8], seed_hash: &SeedHash) -> bool {
    seed_hash.matches(claimed_seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::commit;
    use crate::ledger::store::MemoryStore;

    fn engine() -> CommitRevealEngine<MemoryStore> {
        CommitRevealEngine::new(MemoryStore::new())
    }

    fn seed(s: &str) -> ServerSeed {
        ServerSeed::new(s.as_bytes().to_vec())
    }

    #[test]
    fn test_commit_transitions_to_committed() {
        let engine = engine();
        let id = GameId::new("g1");

        assert_eq!(engine.game_state(&id), GameState::Uncommitted);
        engine.commit_game(&id, commit(b"seedA")).unwrap();
        assert_eq!(engine.game_state(&id), GameState::Committed);
    }

    #[test]
    fn test_double_commit_rejected() {
        let engine = engine();
        let id = GameId::new("g1");

        engine.commit_game(&id, commit(b"seedA")).unwrap();
        let err = engine.commit_game(&id, commit(b"seedB")).unwrap_err();

        assert!(matches!(err, LedgerError::AlreadyCommitted(_)));
        assert_eq!(engine.get_record(&id).unwrap().seed_hash(), &commit(b"seedA"));
    }

    #[test]
    fn test_commit_after_reveal_rejected() {
        let engine = engine();
        let id = GameId::new("g1");

        engine.commit_game(&id, commit(b"seedA")).unwrap();
        engine.reveal_game(&id, &seed("seedA")).unwrap();

        assert!(matches!(
            engine.commit_game(&id, commit(b"seedA")),
            Err(LedgerError::AlreadyCommitted(_))
        ));
    }

    #[test]
    fn test_reveal_before_commit() {
        let engine = engine();
        assert!(matches!(
            engine.reveal_game(&GameId::new("nope"), &seed("x")),
            Err(LedgerError::NotFound(_))
        ));
        assert!(engine.events().is_empty());
    }

    #[test]
    fn test_wrong_seed_keeps_commitment() {
        let engine = engine();
        let id = GameId::new("g1");
        engine.commit_game(&id, commit(b"seedA")).unwrap();

        let err = engine.reveal_game(&id, &seed("seedB")).unwrap_err();
        assert!(matches!(err, LedgerError::SeedMismatch(_)));
        assert_eq!(engine.game_state(&id), GameState::Committed);
        assert!(!engine.get_record(&id).unwrap().revealed());
        assert_eq!(engine.seed_mismatch_count(), 1);

        // Retry with the right seed still works
        let record = engine.reveal_game(&id, &seed("seedA")).unwrap();
        assert!(record.revealed());
        assert_eq!(record.server_seed().unwrap().as_bytes(), b"seedA");
    }

    #[test]
    fn test_empty_seed_is_not_a_mismatch() {
        let engine = engine();
        let id = GameId::new("g1");
        engine.commit_game(&id, commit(b"seedA")).unwrap();

        assert!(matches!(
            engine.reveal_game(&id, &seed("")),
            Err(LedgerError::InvalidInput(_))
        ));
        assert_eq!(engine.seed_mismatch_count(), 0);
        assert_eq!(engine.game_state(&id), GameState::Committed);
    }

    #[test]
    fn test_second_reveal_rejected() {
        let engine = engine();
        let id = GameId::new("g1");
        engine.commit_game(&id, commit(b"seedA")).unwrap();
        engine.reveal_game(&id, &seed("seedA")).unwrap();

        assert!(matches!(
            engine.reveal_game(&id, &seed("seedA")),
            Err(LedgerError::AlreadyRevealed(_))
        ));
        assert!(matches!(
            engine.reveal_game(&id, &seed("seedB")),
            Err(LedgerError::AlreadyRevealed(_))
        ));
        assert_eq!(engine.game_state(&id), GameState::Revealed);
        assert_eq!(engine.events().len(), 2);
    }

    #[test]
    fn test_verify_is_stable_across_reveal() {
        let engine = engine();
        let id = GameId::new("g1");
        engine.commit_game(&id, commit(b"seedA")).unwrap();

        let before = (engine.verify_game(&id, b"seedA"), engine.verify_game(&id, b"seedB"));
        engine.reveal_game(&id, &seed("seedA")).unwrap();
        let after = (engine.verify_game(&id, b"seedA"), engine.verify_game(&id, b"seedB"));

        assert_eq!(before, (true, false));
        assert_eq!(before, after);
    }

    #[test]
    fn test_verify_unknown_game() {
        assert!(!engine().verify_game(&GameId::new("nope"), b"seedA"));
    }

    #[test]
    fn test_verify_seed_hash() {
        let hash = commit(b"seedA");
        assert!(verify_seed_hash(b"seedA", &hash));
        assert!(!verify_seed_hash(b"seedA ", &hash));
    }

    #[test]
    fn test_open_round() {
        let engine = engine();
        let round = engine.open_round(Some("op")).unwrap();

        assert_eq!(engine.game_state(round.game_id()), GameState::Committed);
        assert_eq!(round.record.committer(), Some("op"));
        assert!(engine.verify_game(round.game_id(), round.server_seed.as_bytes()));

        engine.reveal_game(round.game_id(), &round.server_seed).unwrap();
        assert_eq!(engine.game_state(round.game_id()), GameState::Revealed);
    }

    #[test]
    fn test_events_track_transitions() {
        let engine = engine();
        let id = GameId::new("g1");
        engine.commit_game(&id, commit(b"seedA")).unwrap();
        let _ = engine.reveal_game(&id, &seed("seedB"));
        engine.reveal_game(&id, &seed("seedA")).unwrap();

        let states: Vec<GameState> = engine.events().snapshot().iter().map(|e| e.state()).collect();
        assert_eq!(states, vec![GameState::Committed, GameState::Revealed]);
    }
}
