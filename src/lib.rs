//! # Mines Fair Server
//!
//! Provably-fair commit-reveal engine for Mines rounds. The server commits
//! to a secret seed before a round, plays against it, then reveals it so
//! anyone can recompute the mine layout.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MINES FAIR SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                 │
//! │  ├── hash.rs     - Seed commitments (SHA-256)               │
//! │  └── rng.rs      - Hash-counter seed stream                 │
//! │                                                             │
//! │  game/           - Round data (deterministic)               │
//! │  ├── mines.rs    - Mine placement                           │
//! │  ├── record.rs   - Game records and states                  │
//! │  └── events.rs   - Ledger events                            │
//! │                                                             │
//! │  ledger/         - Write-once record storage                │
//! │  proof/          - Commit / reveal / verify                 │
//! │                                                             │
//! │  network/        - Networking (non-deterministic)           │
//! │  ├── server.rs   - WebSocket server                         │
//! │  ├── protocol.rs - Message types                            │
//! │  └── auth.rs     - Operator JWT validation                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! `core/` and `game/` never read clocks or ambient randomness on the
//! derivation path: the same seeds, nonce and board always give the same
//! layout, on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod ledger;
pub mod network;
pub mod proof;

// Re-export commonly used types
pub use core::hash::{commit, ClientSeed, SeedHash, ServerSeed};
pub use game::mines::{derive_mines, DerivationError, MineLayout, RoundParams};
pub use game::record::{GameId, GameRecord, GameState};
pub use ledger::{GameStore, JournalStore, LedgerError, MemoryStore};
pub use proof::{verify_round, CommitRevealEngine};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
