use crate::hash::murmur_hash;
use std::cmp::max;

/// Number of probes per key.
const K: u8 = 4;

const SEED: u32 = 0xc7b4e193;

/// Fixed-size bloom filter using double hashing: probe `i` is `h + i * delta`.
pub struct BloomFilter(pub(crate) Vec<u8>);

impl BloomFilter {
    /// Filter of exactly `bytes` bytes (at least one).
    pub fn with_size(bytes: usize) -> BloomFilter {
        BloomFilter(vec![0; max(bytes, 1)])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> BloomFilter {
        BloomFilter(bytes)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn set(&mut self, key: &[u8]) {
        let bits = self.bit_count();
        let mut h = murmur_hash(key, SEED) as u64;
        let delta = rotate(h as u32) as u64;
        for _ in 0..K {
            let bit_pos = h % bits;
            self.0[(bit_pos / 8) as usize] |= 1 << (bit_pos % 8);
            h = h.wrapping_add(delta);
        }
    }

    /// `false` means `key` was never set.
    pub fn test(&self, key: &[u8]) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let bits = self.bit_count();
        let mut h = murmur_hash(key, SEED) as u64;
        let delta = rotate(h as u32) as u64;
        for _ in 0..K {
            let bit_pos = h % bits;
            if self.0[(bit_pos / 8) as usize] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }

    #[inline]
    fn bit_count(&self) -> u64 {
        self.0.len() as u64 * 8
    }
}

/// rotate right 15 bits
#[inline]
fn rotate(h: u32) -> u32 {
    (h >> 15) | (h << 17)
}
