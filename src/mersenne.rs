// Default random engine: MT19937 Mersenne Twister.
//
// Holds 624 words of state plus the read index. The state can be saved and
// restored through serde so that a track can be replayed exactly.

use crate::error::{Result, TransportError};
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

const N: usize = 624;
const M: usize = 397;
const MATRIX_A: u32 = 0x9908_b0df;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7fff_ffff;

/// Seed used by the reference implementation when none is given.
pub const DEFAULT_SEED: u32 = 5489;

/// MT19937 generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MersenneTwister {
    state: Vec<u32>,
    index: usize,
}

impl MersenneTwister {
    /// Create a generator initialised from a 32 bit seed.
    pub fn new(seed: u32) -> Self {
        let mut rng = Self {
            state: vec![0; N],
            index: N,
        };
        rng.reseed(seed);
        rng
    }

    /// Reinitialise the state from a 32 bit seed.
    pub fn reseed(&mut self, seed: u32) {
        self.state[0] = seed;
        for i in 1..N {
            let prev = self.state[i - 1];
            self.state[i] = 1_812_433_253u32
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
        self.index = N;
    }

    /// Snapshot of the internal state and read index.
    pub fn state(&self) -> (&[u32], usize) {
        (&self.state, self.index)
    }

    /// Restore a generator from a snapshot taken with [`MersenneTwister::state`].
    pub fn from_state(state: &[u32], index: usize) -> Result<Self> {
        if state.len() != N {
            return Err(TransportError::value(format!(
                "Mersenne Twister state must hold {} words, got {}",
                N,
                state.len()
            )));
        }
        if index > N {
            return Err(TransportError::value(format!(
                "Mersenne Twister index {} exceeds {}",
                index, N
            )));
        }
        Ok(Self {
            state: state.to_vec(),
            index,
        })
    }

    fn twist(&mut self) {
        for i in 0..N {
            let y = (self.state[i] & UPPER_MASK) | (self.state[(i + 1) % N] & LOWER_MASK);
            let mut next = self.state[(i + M) % N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.state[i] = next;
        }
        self.index = 0;
    }

    #[inline]
    fn next_word(&mut self) -> u32 {
        if self.index >= N {
            self.twist();
        }
        let mut y = self.state[self.index];
        self.index += 1;

        y ^= y >> 11;
        y ^= (y << 7) & 0x9d2c_5680;
        y ^= (y << 15) & 0xefc6_0000;
        y ^ (y >> 18)
    }

    /// Uniform deviate in [0, 1) with 53 bits of resolution.
    #[inline]
    pub fn random(&mut self) -> f64 {
        let a = (self.next_word() >> 5) as f64;
        let b = (self.next_word() >> 6) as f64;
        (a * 67_108_864.0 + b) * (1.0 / 9_007_199_254_740_992.0)
    }
}

impl Default for MersenneTwister {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl SeedableRng for MersenneTwister {
    type Seed = [u8; 4];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u32::from_le_bytes(seed))
    }
}

impl RngCore for MersenneTwister {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        self.next_word()
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        let hi = self.next_word() as u64;
        let lo = self.next_word() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut left = dest;
        while left.len() >= 4 {
            let bytes = self.next_word().to_le_bytes();
            left[..4].copy_from_slice(&bytes);
            left = &mut left[4..];
        }
        if !left.is_empty() {
            let bytes = self.next_word().to_le_bytes();
            left.copy_from_slice(&bytes[..left.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
