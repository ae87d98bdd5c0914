//! Ledger substrate.
//!
//! Durable, write-once storage for game records plus the event log that
//! audits every write. Two stores share the same table logic:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  store.rs    - GameStore trait, MemoryStore  │
//! │  journal.rs  - JSON-lines file store         │
//! │  log.rs      - Event log + live broadcast    │
//! │  clock.rs    - Inclusion timestamps          │
//! │  error.rs    - LedgerError taxonomy          │
//! └──────────────────────────────────────────────┘
//! ```

pub mod clock;
pub mod error;
pub mod journal;
pub mod log;
pub mod store;

pub use clock::{LedgerClock, ManualClock, SystemClock};
pub use error::LedgerError;
pub use journal::JournalStore;
pub use log::EventLog;
pub use store::{replay, GameStore, MemoryStore};
