//! Salted key hashing for object buckets.
//!
//! 64-bit targets use MurmurHash64A; 32-bit targets use FNV-1a with the salt
//! folded into the offset basis.

/// Hash `key` under `salt`.
#[cfg(target_pointer_width = "64")]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn digest(key: &[u8], salt: usize) -> usize {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let mut h = (salt as u64) ^ (key.len() as u64).wrapping_mul(M);

    let mut chunks = key.chunks_exact(8);
    for chunk in &mut chunks {
        let mut block = [0u8; 8];
        block.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(block);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, byte) in tail.iter().enumerate() {
            h ^= u64::from(*byte) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h as usize
}

#[cfg(not(target_pointer_width = "64"))]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn digest(key: &[u8], salt: usize) -> usize {
    const PRIME: u32 = 0x0100_0193;
    const BASIS: u32 = 0x811c_9dc5;

    let mut h = BASIS.wrapping_add(salt as u32);
    for byte in key {
        h ^= u32::from(*byte);
        h = h.wrapping_mul(PRIME);
    }
    h as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_changes_the_digest() {
        assert_eq!(digest(b"key", 1), digest(b"key", 1));
        assert_ne!(digest(b"key", 1), digest(b"key", 2));
        assert_ne!(digest(b"key", 1), digest(b"kez", 1));
    }

    #[test]
    fn every_tail_length_contributes() {
        let long = b"0123456789abcdef0";
        for n in 1..long.len() {
            assert_ne!(digest(&long[..n], 7), digest(&long[..n - 1], 7), "prefix {n}");
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn empty_key_is_only_the_salt_mix() {
        // With no blocks and no tail only the final avalanche runs.
        const M: u64 = 0xc6a4_a793_5bd1_e995;
        let mut h: u64 = 0;
        h ^= h >> 47;
        h = h.wrapping_mul(M);
        h ^= h >> 47;
        assert_eq!(digest(b"", 0), h as usize);
        assert_eq!(digest(b"", 0), 0);
    }
}
