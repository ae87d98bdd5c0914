//! Seeded Outcome Stream
//!
//! SHA-256 in counter mode over `(server_seed, client_seed, nonce)`.
//! Given the same three inputs, produces the identical word sequence on
//! every platform, so anyone holding the revealed seed can replay it.

use sha2::{Digest, Sha256};

/// Domain separator for stream blocks.
const STREAM_DOMAIN: &[u8] = b"MINES_FAIR_STREAM_V1";

/// Words per SHA-256 block.
const WORDS_PER_BLOCK: usize = 4;

/// Deterministic word stream keyed by the round inputs.
///
/// Block `i` is
/// `SHA-256(domain ‖ u32le(|s|) ‖ s ‖ u32le(|c|) ‖ c ‖ u64le(nonce) ‖ u64le(i))`
/// and is consumed as four little-endian `u64` words. Length prefixes keep
/// `("ab", "c")` and `("a", "bc")` apart.
///
/// # Example
///
/// ```
/// use mines_fair::core::rng::SeedStream;
///
/// let mut a = SeedStream::new(b"server", b"client", 0);
/// let mut b = SeedStream::new(b"server", b"client", 0);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug)]
pub struct SeedStream {
    /// Hasher state after absorbing everything except the block counter.
    keyed: Sha256,
    counter: u64,
    block: [u64; WORDS_PER_BLOCK],
    cursor: usize,
}

impl SeedStream {
    /// Key a stream with the round inputs.
    pub fn new(server_seed: &[u8], client_seed: &[u8], nonce: u64) -> Self {
        let mut keyed = Sha256::new();
        keyed.update(STREAM_DOMAIN);
        keyed.update((server_seed.len() as u32).to_le_bytes());
        keyed.update(server_seed);
        keyed.update((client_seed.len() as u32).to_le_bytes());
        keyed.update(client_seed);
        keyed.update(nonce.to_le_bytes());

        Self {
            keyed,
            counter: 0,
            block: [0; WORDS_PER_BLOCK],
            // Forces a refill on first draw
            cursor: WORDS_PER_BLOCK,
        }
    }

    /// Next 64-bit word.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        if self.cursor == WORDS_PER_BLOCK {
            self.refill();
        }
        let word = self.block[self.cursor];
        self.cursor += 1;
        word
    }

    /// Uniform integer in `[0, bound)`.
    ///
    /// Rejects words below `2^64 mod bound` so every residue is hit by the
    /// same number of accepted words. Returns 0 for `bound <= 1`.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound <= 1 {
            return 0;
        }
        // 2^64 mod bound
        let reject_below = (u64::MAX % bound + 1) % bound;
        loop {
            let word = self.next_u64();
            if word >= reject_below {
                return word % bound;
            }
        }
    }

    /// Number of blocks hashed so far.
    pub fn blocks_used(&self) -> u64 {
        self.counter
    }

    fn refill(&mut self) {
        let mut hasher = self.keyed.clone();
        hasher.update(self.counter.to_le_bytes());
        let digest = hasher.finalize();

        for (slot, chunk) in self.block.iter_mut().zip(digest.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *slot = u64::from_le_bytes(word);
        }

        self.counter += 1;
        self.cursor = 0;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_determinism() {
        let mut a = SeedStream::new(b"seedX", b"clientY", 0);
        let mut b = SeedStream::new(b"seedX", b"clientY", 0);

        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_stream_known_values() {
        // These values must never change!
        // If they do, previously played rounds can no longer be verified.
        let mut stream = SeedStream::new(b"seedX", b"clientY", 0);
        assert_eq!(stream.next_u64(), 13807547428964074235);
        assert_eq!(stream.next_u64(), 8741453360168981688);
        assert_eq!(stream.next_u64(), 13929815747773620728);
    }

    #[test]
    fn test_nonce_changes_stream() {
        let mut a = SeedStream::new(b"seedX", b"clientY", 0);
        let mut b = SeedStream::new(b"seedX", b"clientY", 1);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn test_length_prefix_separates_inputs() {
        let mut a = SeedStream::new(b"ab", b"c", 0);
        let mut b = SeedStream::new(b"a", b"bc", 0);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn test_refill_across_blocks() {
        let mut stream = SeedStream::new(b"s", b"c", 3);
        assert_eq!(stream.blocks_used(), 0);

        let first_block: Vec<u64> = (0..WORDS_PER_BLOCK).map(|_| stream.next_u64()).collect();
        assert_eq!(stream.blocks_used(), 1);

        let second = stream.next_u64();
        assert_eq!(stream.blocks_used(), 2);
        assert!(!first_block.contains(&second));
    }

    #[test]
    fn test_next_below() {
        let mut stream = SeedStream::new(b"range", b"check", 0);

        for _ in 0..1000 {
            assert!(stream.next_below(25) < 25);
        }

        // Edge cases
        assert_eq!(stream.next_below(0), 0);
        assert_eq!(stream.next_below(1), 0);
    }

    #[test]
    fn test_next_below_covers_range() {
        let mut stream = SeedStream::new(b"cover", b"all", 0);
        let mut seen = [false; 10];

        for _ in 0..500 {
            seen[stream.next_below(10) as usize] = true;
        }

        assert!(seen.iter().all(|&s| s));
    }
}
