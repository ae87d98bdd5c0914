//! Seed Commitment Hashing
//!
//! Binds a secret server seed to a public digest before the round starts:
//! - `commit` is plain SHA-256 over the seed bytes
//! - `SeedHash` is the published 32-byte digest
//! - `ct_eq` compares digests without an early exit

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Digest length in bytes (256 bits).
pub const SEED_HASH_LEN: usize = 32;

/// Length of a generated server seed in bytes.
pub const SERVER_SEED_LEN: usize = 32;

/// Length of a generated client seed in bytes (before hex encoding).
pub const CLIENT_SEED_LEN: usize = 16;

/// Public commitment to a server seed.
///
/// Serialized as lower-case hex. Parsing accepts an optional `0x` prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeedHash([u8; SEED_HASH_LEN]);

impl SeedHash {
    /// Wrap raw digest bytes.
    pub const fn from_bytes(bytes: [u8; SEED_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; SEED_HASH_LEN] {
        &self.0
    }

    /// Lower-case hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check a candidate seed against this commitment.
    ///
    /// Recomputes the digest and compares it with [`ct_eq`].
    pub fn matches(&self, seed: &[u8]) -> bool {
        ct_eq(&commit(seed).0, &self.0)
    }
}

impl fmt::Debug for SeedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeedHash({})", self.to_hex())
    }
}

impl fmt::Display for SeedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// Error parsing a hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseSeedHashError {
    /// Not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    /// Decoded to the wrong number of bytes.
    #[error("expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Decoded length.
        got: usize,
    },
}

impl FromStr for SeedHash {
    type Err = ParseSeedHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| ParseSeedHashError::InvalidHex(e.to_string()))?;
        let arr: [u8; SEED_HASH_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseSeedHashError::InvalidLength {
                expected: SEED_HASH_LEN,
                got: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl Serialize for SeedHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SeedHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Secret server seed.
///
/// `Debug` never prints the bytes; use [`ServerSeed::to_hex`] once the seed
/// has been revealed.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerSeed(Vec<u8>);

impl ServerSeed {
    /// Wrap seed bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Draw a fresh seed from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SERVER_SEED_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a hex-encoded seed (optional `0x` prefix).
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.strip_prefix("0x").unwrap_or(s)).map(Self)
    }

    /// Seed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex encoding of the seed bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Commitment for this seed.
    pub fn commitment(&self) -> SeedHash {
        commit(&self.0)
    }

    /// True if the seed has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ServerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerSeed(<{} bytes redacted>)", self.0.len())
    }
}

impl Serialize for ServerSeed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ServerSeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Player-supplied seed, mixed into every derived outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientSeed(String);

impl ClientSeed {
    /// Wrap a player's seed text.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Random seed for players that did not pick one (32 hex chars).
    pub fn generate() -> Self {
        let mut bytes = [0u8; CLIENT_SEED_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Seed text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Seed bytes as fed to the outcome stream.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Commit to a secret: SHA-256 of the raw bytes.
pub fn commit(secret: &[u8]) -> SeedHash {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    SeedHash(hasher.finalize().into())
}

/// Compare two digests without short-circuiting.
///
/// Every byte pair is XOR-folded into one accumulator before the single
/// branch at the end, so the running time does not depend on where the
/// first difference sits.
pub fn ct_eq(a: &[u8; SEED_HASH_LEN], b: &[u8; SEED_HASH_LEN]) -> bool {
    let diff = a
        .iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    std::hint::black_box(diff) == 0
}

// =============================================================================
// TESTS
// =============================================================================
