//! Error types raised by the ledger and the commit-reveal protocol.

use thiserror::Error;

use crate::game::record::GameId;

/// Errors surfaced by record stores and the commit-reveal engine.
///
/// The first five variants are protocol outcomes and always leave the store
/// unchanged. The rest are substrate failures: the write did not happen.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A record for this identifier already exists.
    #[error("game {0} already committed")]
    AlreadyCommitted(GameId),

    /// No record for this identifier.
    #[error("game {0} not found")]
    NotFound(GameId),

    /// The seed was already revealed.
    #[error("game {0} already revealed")]
    AlreadyRevealed(GameId),

    /// The revealed seed does not hash to the stored commitment.
    #[error("seed does not match commitment for game {0}")]
    SeedMismatch(GameId),

    /// Empty game id on commit or empty seed on reveal.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Journal I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Journal content is unreadable or violates the protocol.
    #[error("corrupted journal: {0}")]
    Corrupt(String),

    /// A ledger lock was poisoned by a panicking writer.
    #[error("ledger lock was poisoned")]
    LockPoisoned,
}

impl LedgerError {
    /// Could the same call succeed later?
    ///
    /// A mismatched reveal leaves the game committed, so the correct seed can
    /// still be revealed. Duplicate commits, unknown games and repeated
    /// reveals are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SeedMismatch(_) | Self::Io(_) | Self::LockPoisoned
        )
    }

    /// Should this be surfaced to operators as a possible integrity attack?
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::SeedMismatch(_))
    }

    /// Identifier the error refers to, for protocol outcomes.
    pub fn game_id(&self) -> Option<&GameId> {
        match self {
            Self::AlreadyCommitted(id)
            | Self::NotFound(id)
            | Self::AlreadyRevealed(id)
            | Self::SeedMismatch(id) => Some(id),
            _ => None,
        }
    }
}

/// Ledger result alias.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let id = GameId::new("g1");
        assert!(LedgerError::SeedMismatch(id.clone()).is_retryable());
        assert!(!LedgerError::AlreadyCommitted(id.clone()).is_retryable());
        assert!(!LedgerError::AlreadyRevealed(id.clone()).is_retryable());
        assert!(!LedgerError::NotFound(id).is_retryable());
        assert!(LedgerError::LockPoisoned.is_retryable());
        assert!(!LedgerError::InvalidInput("empty game id").is_retryable());
    }

    #[test]
    fn test_security_event() {
        assert!(LedgerError::SeedMismatch(GameId::new("g1")).is_security_event());
        assert!(!LedgerError::NotFound(GameId::new("g1")).is_security_event());
    }

    #[test]
    fn test_game_id_and_display() {
        let err = LedgerError::AlreadyRevealed(GameId::new("g7"));
        assert_eq!(err.game_id().map(GameId::as_str), Some("g7"));
        assert_eq!(err.to_string(), "game g7 already revealed");
        assert!(LedgerError::Corrupt("x".into()).game_id().is_none());
    }
}
