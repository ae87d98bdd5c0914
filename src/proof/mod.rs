//! Fairness Proofs
//!
//! Binds every round to a seed published before play:
//! - Commit-reveal state machine over the record store
//! - Independent recomputation of revealed rounds
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF SYSTEM                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  commitment.rs   - Commit / reveal / verify per game        │
//! │  verify.rs       - Round recomputation and audit            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod verify;

pub use commitment::{verify_seed_hash, CommitRevealEngine, PendingRound};
pub use verify::{audit_round, verify_round, RoundAudit, RoundVerification};
