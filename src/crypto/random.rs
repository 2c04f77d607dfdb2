//! Random number generation.
//!
//! Two generators live here: the OS-backed [`SecureRandom`] used for keys,
//! IVs and connection identifiers, and the [`Xorshift128Plus`] generator the
//! protocol layer uses for padding lengths and padding content. The latter
//! is deliberately not cryptographic — padding is skipped by the decoder —
//! and being seedable makes the framing fully reproducible in tests.

use rand::RngCore;
use rand_core::OsRng;

/// Cryptographically secure random number generator.
///
/// Wraps the OS-provided entropy source (e.g., /dev/urandom on Unix).
pub struct SecureRandom;

impl SecureRandom {
    /// Fill a buffer with cryptographically secure random bytes.
    pub fn fill(dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    /// Generate a fixed-size array of random bytes.
    pub fn bytes<const N: usize>() -> [u8; N] {
        let mut buf = [0u8; N];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    /// Generate a random u64.
    pub fn u64() -> u64 {
        OsRng.next_u64()
    }

    /// Generate a random u32.
    pub fn u32() -> u32 {
        OsRng.next_u32()
    }
}

/// The xorshift128+ generator that drives padding decisions.
#[derive(Debug, Clone)]
pub struct Xorshift128Plus {
    s0: u64,
    s1: u64,
}

impl Xorshift128Plus {
    /// Create a generator seeded from the OS entropy source.
    pub fn new() -> Self {
        // A zero state would be a fixed point; the OS giving back 16 zero
        // bytes twice is not a case worth handling gracefully.
        loop {
            let seeded = Self::from_seed(SecureRandom::u64(), SecureRandom::u64());
            if seeded.s0 != 0 || seeded.s1 != 0 {
                return seeded;
            }
        }
    }

    /// Create a generator with explicit state.
    pub fn from_seed(s0: u64, s1: u64) -> Self {
        Self { s0, s1 }
    }

    /// Produce the next value.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.s0;
        let y = self.s1;
        self.s0 = y;
        x ^= x << 23;
        x ^= x >> 17;
        x ^= y ^ (y >> 26);
        self.s1 = x;
        x.wrapping_add(y)
    }

    /// Fill `dest` with generator output.
    pub fn fill(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

impl Default for Xorshift128Plus {
    fn default() -> Self {
        Self::new()
    }
}
