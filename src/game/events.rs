//! Ledger Events
//!
//! One event per successful state change, in the order the writes happened.
//! An observer that replays the events reconstructs exactly the records a
//! direct reader of the store sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::hash::{SeedHash, ServerSeed};
use crate::game::record::{GameId, GameState};

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEventData {
    /// A commitment was recorded.
    Committed {
        /// Published digest.
        seed_hash: SeedHash,
        /// Committing operator.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        committer: Option<String>,
    },

    /// The seed was revealed and matched the commitment.
    Revealed {
        /// Disclosed seed.
        server_seed: ServerSeed,
    },
}

/// Entry of the append-only event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Position in the log (gap-free, from 0).
    pub sequence: u64,
    /// Game the event belongs to.
    pub game_id: GameId,
    /// Substrate timestamp of the write.
    pub at: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub data: LedgerEventData,
}

impl LedgerEvent {
    /// State the game entered with this event.
    pub fn state(&self) -> GameState {
        match self.data {
            LedgerEventData::Committed { .. } => GameState::Committed,
            LedgerEventData::Revealed { .. } => GameState::Revealed,
        }
    }
}
