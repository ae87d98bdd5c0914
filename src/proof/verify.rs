//! Round Verification
//!
//! Third-party check of a finished round: recompute the seed hash and the
//! mine layout from the revealed inputs, and optionally hold them against
//! the record the server committed to before play.

use serde::{Deserialize, Serialize};

use crate::core::hash::{commit, SeedHash};
use crate::game::mines::{DerivationError, MineLayout, RoundParams};
use crate::game::record::{GameId, GameState};
use crate::ledger::store::GameStore;
use crate::proof::commitment::CommitRevealEngine;

/// Recomputed round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundVerification {
    /// Hash of the supplied server seed.
    pub seed_hash: SeedHash,
    /// Layout derived from the supplied inputs.
    pub mines: MineLayout,
}

/// Recompute seed hash and mine layout from revealed inputs.
///
/// Needs no stored state: anyone holding the seeds can run this and compare
/// the hash with the one published before the round.
pub fn verify_round(
    server_seed: &[u8],
    params: &RoundParams,
) -> Result<RoundVerification, DerivationError> {
    let mines = params.derive(server_seed)?;
    Ok(RoundVerification {
        seed_hash: commit(server_seed),
        mines,
    })
}

/// Audit of a stored round against its commitment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundAudit {
    /// Audited game.
    pub game_id: GameId,
    /// State found in the store.
    pub state: GameState,
    /// Revealed seed hashes to the stored commitment.
    pub commitment_matches: bool,
    /// Layout derived from the revealed seed, only when the commitment matches.
    pub verification: Option<RoundVerification>,
}

impl RoundAudit {
    /// Round exists, is revealed, and its seed opens the commitment.
    pub fn is_valid(&self) -> bool {
        self.state == GameState::Revealed && self.commitment_matches
    }
}

/// Audit the stored round `id`.
///
/// Uncommitted and committed rounds report `commitment_matches == false`
/// and no layout; there is nothing to check until the seed is out.
pub fn audit_round<S: GameStore>(
    engine: &CommitRevealEngine<S>,
    id: &GameId,
    params: &RoundParams,
) -> Result<RoundAudit, DerivationError> {
    let record = engine.get_record(id);
    let state = record.as_ref().map_or(GameState::Uncommitted, |r| r.state());

    let revealed = record
        .as_ref()
        .and_then(|r| r.server_seed().map(|seed| (r.seed_hash(), seed)));

    let Some((seed_hash, server_seed)) = revealed else {
        return Ok(RoundAudit {
            game_id: id.clone(),
            state,
            commitment_matches: false,
            verification: None,
        });
    };

    // Recomputed independently of the store's own reveal check
    let verification = verify_round(server_seed.as_bytes(), params)?;
    let commitment_matches = seed_hash.matches(server_seed.as_bytes());

    Ok(RoundAudit {
        game_id: id.clone(),
        state,
        commitment_matches,
        verification: commitment_matches.then_some(verification),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::{ClientSeed, ServerSeed};
    use crate::ledger::store::MemoryStore;

    fn params() -> RoundParams {
        RoundParams {
            client_seed: ClientSeed::new("clientY"),
            nonce: 0,
            grid_size: 25,
            mine_count: 3,
        }
    }

    #[test]
    fn test_verify_round_known_layout() {
        let result = verify_round(b"seedX", &params()).unwrap();
        assert_eq!(result.seed_hash, commit(b"seedX"));
        assert_eq!(result.mines.positions(), &[1, 4, 10]);
    }

    #[test]
    fn test_verify_round_rejects_bad_board() {
        let mut bad = params();
        bad.mine_count = 25;
        assert!(matches!(
            verify_round(b"seedX", &bad),
            Err(DerivationError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn test_audit_unknown_game() {
        let engine = CommitRevealEngine::new(MemoryStore::new());
        let audit = audit_round(&engine, &GameId::new("nope"), &params()).unwrap();

        assert_eq!(audit.state, GameState::Uncommitted);
        assert!(!audit.commitment_matches);
        assert!(audit.verification.is_none());
        assert!(!audit.is_valid());
    }

    #[test]
    fn test_audit_before_and_after_reveal() {
        let engine = CommitRevealEngine::new(MemoryStore::new());
        let id = GameId::new("g1");
        engine.commit_game(&id, commit(b"seedX")).unwrap();

        let pending = audit_round(&engine, &id, &params()).unwrap();
        assert_eq!(pending.state, GameState::Committed);
        assert!(pending.verification.is_none());

        engine.reveal_game(&id, &ServerSeed::new(b"seedX".to_vec())).unwrap();

        let audit = audit_round(&engine, &id, &params()).unwrap();
        assert!(audit.is_valid());
        let verification = audit.verification.unwrap();
        assert_eq!(verification.seed_hash, commit(b"seedX"));
        assert_eq!(verification.mines.positions(), &[1, 4, 10]);
    }
}
