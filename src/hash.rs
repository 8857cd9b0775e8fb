use crate::params::FilterParams;
use sha1::{Digest, Sha1};

/// The four 32-bit words every offset of an element is derived from.
///
/// They are the first 32 hex characters of the element's SHA-1 digest read
/// as four big-endian integers, which is also how the store-side scripts
/// read `redis.sha1hex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseHashes([u64; 4]);

impl BaseHashes {
    pub fn new(item: &[u8]) -> Self {
        let digest = Sha1::digest(item);
        let mut words = [0u64; 4];
        for (word, chunk) in words.iter_mut().zip(digest.chunks_exact(4)) {
            *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
                as u64;
        }
        Self(words)
    }

    /// Double hashing: `h[i % 2] + i * h[2 + ((i + i % 2) % 4) / 2]` for
    /// `i` in `1..=k`, reduced modulo the vector length.
    pub fn offsets(&self, params: FilterParams) -> Vec<u64> {
        let h = &self.0;
        (1..=params.num_hashes as u64)
            .map(|i| {
                let a = h[(i % 2) as usize];
                let b = h[2 + (((i + i % 2) % 4) / 2) as usize];
                a.wrapping_add(i.wrapping_mul(b)) % params.bits
            })
            .collect()
    }
}

/// Offsets of `item` in a vector described by `params`.
pub fn offsets_for(item: &[u8], params: FilterParams) -> Vec<u64> {
    BaseHashes::new(item).offsets(params)
}
