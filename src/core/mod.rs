//! Core deterministic primitives.
//!
//! Everything here is a pure function of its inputs. Commitments and the
//! outcome stream must give identical results on any platform, because third
//! parties recompute them long after the round was played.

pub mod hash;
pub mod rng;

// Re-export core types
pub use hash::{commit, ct_eq, ClientSeed, ParseSeedHashError, SeedHash, ServerSeed};
pub use rng::SeedStream;
