//! Mine Placement
//!
//! Derives the mine layout of a round from the revealed seed material.
//! The layout is a pure function of five inputs; no clock, no hidden state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::ClientSeed;
use crate::core::rng::SeedStream;

/// Smallest board side the server accepts.
pub const MIN_BOARD_SIDE: u32 = 2;

/// Largest board side the server accepts.
pub const MAX_BOARD_SIDE: u32 = 10;

/// Default board side (5x5).
pub const DEFAULT_BOARD_SIDE: u32 = 5;

/// Default mine count.
pub const DEFAULT_MINE_COUNT: u32 = 3;

/// Derivation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
    /// Grid or mine count out of range.
    #[error("invalid parameters: {mine_count} mines on a {grid_size}-cell grid")]
    InvalidParameters {
        /// Requested cell count.
        grid_size: u32,
        /// Requested mine count.
        mine_count: u32,
    },
}

/// Mine positions for one round, sorted ascending.
///
/// Decoding checks the same shape `derive_mines` produces: distinct cells
/// in ascending order, all on the board, at least one cell left free.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LayoutFields")]
pub struct MineLayout {
    grid_size: u32,
    positions: Vec<u32>,
}

#[derive(Deserialize)]
struct LayoutFields {
    grid_size: u32,
    positions: Vec<u32>,
}

impl TryFrom<LayoutFields> for MineLayout {
    type Error = String;

    fn try_from(fields: LayoutFields) -> Result<Self, Self::Error> {
        let LayoutFields { grid_size, positions } = fields;

        if positions.len() as u64 >= u64::from(grid_size) {
            return Err(format!(
                "{} mines do not fit a {}-cell grid",
                positions.len(),
                grid_size
            ));
        }
        if positions.windows(2).any(|w| w[0] >= w[1]) {
            return Err("mine positions must be strictly ascending".into());
        }
        if let Some(&last) = positions.last() {
            if last >= grid_size {
                return Err(format!("mine at {} is off a {}-cell grid", last, grid_size));
            }
        }

        Ok(Self { grid_size, positions })
    }
}

impl MineLayout {
    /// Cell count of the board.
    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Mine cells, ascending.
    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    /// Number of mines.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True for a mine-free layout.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Check a cell.
    pub fn is_mine(&self, position: u32) -> bool {
        self.positions.binary_search(&position).is_ok()
    }

    /// One flag per cell, `true` where a mine sits.
    pub fn mine_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.grid_size as usize];
        for &p in &self.positions {
            mask[p as usize] = true;
        }
        mask
    }
}

/// Place `mine_count` mines on a `grid_size`-cell board.
///
/// Runs a partial Fisher-Yates shuffle over the virtual array
/// `[0, grid_size)` driven by [`SeedStream`]. Only displaced slots are
/// stored, so memory is proportional to `mine_count`, not the board.
///
/// # Errors
///
/// [`DerivationError::InvalidParameters`] when `grid_size == 0` or
/// `mine_count >= grid_size`. Nothing is hashed in that case.
///
/// # Example
///
/// ```
/// use mines_fair::game::mines::derive_mines;
///
/// let layout = derive_mines(b"seedX", b"clientY", 0, 25, 3).unwrap();
/// assert_eq!(layout.positions(), &[1, 4, 10]);
/// ```
pub fn derive_mines(
    server_seed: &[u8],
    client_seed: &[u8],
    nonce: u64,
    grid_size: u32,
    mine_count: u32,
) -> Result<MineLayout, DerivationError> {
    if grid_size == 0 || mine_count >= grid_size {
        return Err(DerivationError::InvalidParameters { grid_size, mine_count });
    }

    let mut stream = SeedStream::new(server_seed, client_seed, nonce);
    let mut displaced: BTreeMap<u32, u32> = BTreeMap::new();

    for i in 0..mine_count {
        let offset = stream.next_below(u64::from(grid_size - i)) as u32;
        let j = i + offset;

        let at_i = displaced.get(&i).copied().unwrap_or(i);
        let at_j = displaced.get(&j).copied().unwrap_or(j);
        displaced.insert(i, at_j);
        displaced.insert(j, at_i);
    }

    let mut positions: Vec<u32> = (0..mine_count)
        .map(|i| displaced.get(&i).copied().unwrap_or(i))
        .collect();
    positions.sort_unstable();

    Ok(MineLayout { grid_size, positions })
}

/// Inputs of one round, as a verifier receives them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundParams {
    /// Player seed.
    pub client_seed: ClientSeed,
    /// Round counter under one seed pair.
    #[serde(default)]
    pub nonce: u64,
    /// Board cell count.
    pub grid_size: u32,
    /// Mines on the board.
    pub mine_count: u32,
}

impl RoundParams {
    /// Derive this round's layout from a server seed.
    pub fn derive(&self, server_seed: &[u8]) -> Result<MineLayout, DerivationError> {
        derive_mines(
            server_seed,
            self.client_seed.as_bytes(),
            self.nonce,
            self.grid_size,
            self.mine_count,
        )
    }
}

/// Board policy applied by the server to incoming rounds.
///
/// The derivation itself accepts any `mine_count < grid_size`; these rules
/// additionally restrict the board to a square of side
/// `min_side..=max_side` with at least one mine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundRules {
    /// Smallest board side.
    pub min_side: u32,
    /// Largest board side.
    pub max_side: u32,
}

impl Default for RoundRules {
    fn default() -> Self {
        Self {
            min_side: MIN_BOARD_SIDE,
            max_side: MAX_BOARD_SIDE,
        }
    }
}

impl RoundRules {
    /// Validate a round and return its cell count.
    pub fn check(&self, grid_size: u32, mine_count: u32) -> Result<u32, DerivationError> {
        let invalid = DerivationError::InvalidParameters { grid_size, mine_count };

        let side = integer_sqrt(grid_size);
        if side * side != grid_size || side < self.min_side || side > self.max_side {
            return Err(invalid);
        }
        if mine_count == 0 || mine_count >= grid_size {
            return Err(invalid);
        }

        Ok(grid_size)
    }

    /// Cell count for a square board of `side`.
    pub fn cells_for_side(side: u32) -> u32 {
        side.saturating_mul(side)
    }
}

fn integer_sqrt(n: u32) -> u32 {
    let mut root = (n as f64).sqrt() as u32;
    while root.saturating_mul(root) > n {
        root -= 1;
    }
    while (root + 1).saturating_mul(root + 1) <= n {
        root += 1;
    }
    root
}

// =============================================================================
// TESTS
// =============================================================================
