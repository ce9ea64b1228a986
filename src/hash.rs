//! Implementation of murmur hash: [https://sites.google.com/site/murmurhash/]

pub fn murmur_hash(key: &[u8], seed: u32) -> u32 {
    // 'M' and 'R' are mixing constants generated offline.
    const M: u32 = 0x5bd1e995;
    const R: u32 = 24;

    let mut h: u32 = seed ^ key.len() as u32;

    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

#[cfg(test)]
mod tests {
    use crate::hash::murmur_hash;

    #[test]
    fn test_hash() {
        let h1 = murmur_hash("hello".as_bytes(), 0xbc9f1d34);
        let h2 = murmur_hash("hellp".as_bytes(), 0xbc9f1d34);
        let h3 = murmur_hash(String::from("hello").as_bytes(), 0xbc9f1d34);
        assert_eq!(h1, h3);
        assert!((h1 ^ h2).count_ones() >= 8);

        let key = [0x23, 0xc9, 0x00, 0x00];
        let h3 = murmur_hash(&key, 0xf123cf13);
        assert_eq!(h3, 4037331841);
    }

    #[test]
    fn test_tail_bytes_matter() {
        let seed = 0x9747b28c;
        let a = murmur_hash(b"abcde", seed);
        let b = murmur_hash(b"abcdf", seed);
        let c = murmur_hash(b"abcd", seed);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
