//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON objects tagged by `type`. Seeds and digests travel
//! as hex strings; a request may carry a `request_id` that the reply echoes.

use serde::{Deserialize, Serialize};

use crate::core::hash::{ClientSeed, SeedHash, ServerSeed};
use crate::game::events::LedgerEvent;
use crate::game::mines::{DerivationError, MineLayout, RoundParams, RoundRules};
use crate::game::record::{GameId, GameRecord};
use crate::ledger::error::LedgerError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection.
    Auth(AuthRequest),

    /// Publish a seed hash for a new game.
    Commit(CommitRequest),

    /// Disclose the seed of a committed game.
    Reveal(RevealRequest),

    /// Look up a record.
    GetRecord { game_id: GameId },

    /// Check a claimed seed against a game or a raw hash.
    Verify(VerifyRequest),

    /// Derive a mine layout.
    DeriveOutcome(RoundRequest),

    /// Recompute a finished round, optionally against its record.
    VerifyRound(RoundRequest),

    /// Stream ledger events, optionally replaying history first.
    Subscribe(SubscribeRequest),

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT issued by the operator's auth provider.
    pub token: String,
}

/// Commit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    /// New game identifier.
    pub game_id: GameId,
    /// SHA-256 of the secret server seed.
    pub seed_hash: SeedHash,
}

/// Reveal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealRequest {
    /// Committed game.
    pub game_id: GameId,
    /// Seed behind the commitment.
    pub server_seed: ServerSeed,
}

/// Subscribe request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// First sequence to deliver; omitted means only events from now on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_sequence: Option<u64>,
}

/// Verify request. Exactly one of `game_id` and `seed_hash` is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Seed to check.
    pub claimed_seed: ServerSeed,
    /// Check against this game's stored commitment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    /// Check against this raw digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_hash: Option<SeedHash>,
}

/// Round inputs for derivation and verification.
///
/// The board is stated either as a cell count (`grid_size`) or as the side
/// of a square board (`board_side`). A side length is held to the server's
/// [`RoundRules`]; a raw cell count only to the derivation's own bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRequest {
    /// Stored game to check the seed against (`verify_round` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    /// Server seed.
    pub server_seed: ServerSeed,
    /// Player seed.
    pub client_seed: ClientSeed,
    /// Round counter.
    #[serde(default)]
    pub nonce: u64,
    /// Board cell count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<u32>,
    /// Side of a square board.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_side: Option<u32>,
    /// Mines on the board.
    pub mine_count: u32,
}

impl RoundRequest {
    /// Resolve the board and build derivation inputs.
    pub fn params(&self, rules: &RoundRules) -> Result<RoundParams, RequestError> {
        let grid_size = match (self.grid_size, self.board_side) {
            (Some(grid_size), None) => grid_size,
            (None, Some(side)) => rules.check(RoundRules::cells_for_side(side), self.mine_count)?,
            _ => return Err(RequestError::Malformed(
                "exactly one of grid_size and board_side is required".into(),
            )),
        };

        Ok(RoundParams {
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
            grid_size,
            mine_count: self.mine_count,
        })
    }
}

/// A request that cannot be served as sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Fields missing or contradicting each other.
    #[error("{0}")]
    Malformed(String),

    /// Board parameters out of range.
    #[error(transparent)]
    Derivation(#[from] DerivationError),
}

/// Incoming frame: a message plus optional correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Echoed in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// The request.
    #[serde(flatten)]
    pub message: ClientMessage,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Commitment stored.
    Committed { record: GameRecord },

    /// Seed accepted.
    Revealed { record: GameRecord },

    /// Record lookup result; `record` is absent for unknown games.
    Record {
        game_id: GameId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        record: Option<GameRecord>,
    },

    /// Verify result.
    Verified { valid: bool },

    /// Derived layout.
    Outcome { mines: MineLayout },

    /// Recomputed round.
    RoundVerified {
        seed_hash: SeedHash,
        mines: MineLayout,
        /// Present when the request named a stored game.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commitment_matches: Option<bool>,
    },

    /// Subscription active; events from `next_sequence` on follow as
    /// `event` messages, in order and without gaps.
    Subscribed { next_sequence: u64 },

    /// Ledger event.
    Event(LedgerEvent),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Operator identity if successful.
    pub subject: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Outgoing frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    /// Copied from the request this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// The reply.
    #[serde(flatten)]
    pub message: ServerMessage,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&LedgerError> for ServerError {
    fn from(err: &LedgerError) -> Self {
        Self::new(ErrorCode::from(err), err.to_string())
    }
}

impl From<&RequestError> for ServerError {
    fn from(err: &RequestError) -> Self {
        let code = match err {
            RequestError::Malformed(_) => ErrorCode::InvalidRequest,
            RequestError::Derivation(_) => ErrorCode::InvalidParameters,
        };
        Self::new(code, err.to_string())
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Writes are disabled on this server.
    ReadOnly,
    /// Malformed or contradictory request.
    InvalidRequest,
    /// Board parameters out of range.
    InvalidParameters,
    /// Game id already used.
    AlreadyCommitted,
    /// Game never committed.
    NotFound,
    /// Game already revealed.
    AlreadyRevealed,
    /// Seed does not open the commitment.
    SeedMismatch,
    /// Server overloaded.
    ServerOverloaded,
    /// Ledger could not complete the write.
    StorageError,
    /// Internal error.
    InternalError,
}

impl From<&LedgerError> for ErrorCode {
    fn from(err: &LedgerError) -> Self {
        match err {
            LedgerError::AlreadyCommitted(_) => Self::AlreadyCommitted,
            LedgerError::NotFound(_) => Self::NotFound,
            LedgerError::AlreadyRevealed(_) => Self::AlreadyRevealed,
            LedgerError::SeedMismatch(_) => Self::SeedMismatch,
            LedgerError::Io(_) | LedgerError::Corrupt(_) => Self::StorageError,
            LedgerError::LockPoisoned => Self::InternalError,
            LedgerError::InvalidInput(_) => Self::InvalidRequest,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientEnvelope {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerEnvelope {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl From<ClientMessage> for ClientEnvelope {
    fn from(message: ClientMessage) -> Self {
        Self {
            request_id: None,
            message,
        }
    }
}

impl From<ServerMessage> for ServerEnvelope {
    fn from(message: ServerMessage) -> Self {
        Self {
            request_id: None,
            message,
        }
    }
}
