//! Game Records
//!
//! One record per game identifier. Records are created by a commit and
//! changed exactly once by a reveal; the ledger owns them and hands out
//! snapshots only.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::hash::{SeedHash, ServerSeed};

/// Opaque game identifier, unique for all time.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    /// Wrap an identifier chosen by the caller.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier (UUID v4, simple form).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty identifier.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Protocol state of one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    /// No record exists.
    Uncommitted,
    /// Seed hash published, seed still secret.
    Committed,
    /// Seed disclosed and checked against the commitment.
    Revealed,
}

/// Commitment record for one game.
///
/// Invariant: `revealed()` is true iff `server_seed()` is `Some`, and a
/// present seed always hashes to `seed_hash()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    id: GameId,
    seed_hash: SeedHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_seed: Option<ServerSeed>,
    revealed: bool,
    committed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revealed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    committer: Option<String>,
    sequence: u64,
}

impl GameRecord {
    /// New unrevealed record.
    pub(crate) fn committed(
        id: GameId,
        seed_hash: SeedHash,
        committed_at: DateTime<Utc>,
        committer: Option<String>,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            seed_hash,
            server_seed: None,
            revealed: false,
            committed_at,
            revealed_at: None,
            committer,
            sequence,
        }
    }

    /// Store the checked seed. Callers must have verified it against
    /// `seed_hash` and that the record is not yet revealed.
    pub(crate) fn mark_revealed(&mut self, server_seed: ServerSeed, at: DateTime<Utc>) {
        debug_assert!(!self.revealed);
        debug_assert!(self.seed_hash.matches(server_seed.as_bytes()));
        self.server_seed = Some(server_seed);
        self.revealed = true;
        self.revealed_at = Some(at);
    }

    /// Game identifier.
    pub fn id(&self) -> &GameId {
        &self.id
    }

    /// Published commitment.
    pub fn seed_hash(&self) -> &SeedHash {
        &self.seed_hash
    }

    /// Revealed seed, if any.
    pub fn server_seed(&self) -> Option<&ServerSeed> {
        self.server_seed.as_ref()
    }

    /// Has the seed been revealed?
    pub fn revealed(&self) -> bool {
        self.revealed
    }

    /// Substrate timestamp of the commit.
    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    /// Substrate timestamp of the reveal.
    pub fn revealed_at(&self) -> Option<DateTime<Utc>> {
        self.revealed_at
    }

    /// Operator that committed the record.
    pub fn committer(&self) -> Option<&str> {
        self.committer.as_deref()
    }

    /// Position in commit order.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Current protocol state.
    pub fn state(&self) -> GameState {
        if self.revealed {
            GameState::Revealed
        } else {
            GameState::Committed
        }
    }
}

/// State of an identifier given an optional record.
pub fn state_of(record: Option<&GameRecord>) -> GameState {
    record.map_or(GameState::Uncommitted, GameRecord::state)
}
