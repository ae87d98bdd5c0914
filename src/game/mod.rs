//! Game-level data (deterministic).
//!
//! Records, ledger events and the mine derivation. Nothing here touches the
//! clock or the network; timestamps are supplied by the ledger.

pub mod events;
pub mod mines;
pub mod record;

pub use events::{LedgerEvent, LedgerEventData};
pub use mines::{derive_mines, DerivationError, MineLayout, RoundParams, RoundRules};
pub use record::{GameId, GameRecord, GameState};
