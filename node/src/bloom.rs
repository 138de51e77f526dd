//! Bloom filter loaded by light clients.
//!
//! Bit positions are `murmur3_32(data, i * 0xFBA4C795 + tweak) % m` for each
//! of the `k` hash functions, so filters built by any compliant client test
//! the same way here.

use neo_peers_connection::message::{FilterLoadPayload, Transaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    k: u8,
    tweak: u32,
}

impl BloomFilter {
    /// Build a filter from the bit array a peer loaded.
    pub fn from_payload(payload: &FilterLoadPayload) -> Self {
        Self {
            bits: payload.filter.clone(),
            k: payload.k,
            tweak: payload.tweak,
        }
    }

    /// An empty filter of `m` bits (rounded up to whole bytes).
    pub fn new(m: usize, k: u8, tweak: u32) -> Self {
        Self {
            bits: vec![0u8; (m + 7) / 8],
            k,
            tweak,
        }
    }

    /// Number of bits in the filter.
    pub fn m(&self) -> usize {
        self.bits.len() * 8
    }

    pub fn k(&self) -> u8 {
        self.k
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn add(&mut self, element: &[u8]) {
        let m = self.m();
        if m == 0 {
            return;
        }
        for i in 0..self.k as u32 {
            let bit = self.bit_index(element, i, m);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Probabilistic membership, never a false negative.
    pub fn check(&self, element: &[u8]) -> bool {
        let m = self.m();
        if m == 0 {
            return false;
        }
        (0..self.k as u32).all(|i| {
            let bit = self.bit_index(element, i, m);
            self.bits[bit / 8] & (1 << (bit % 8)) != 0
        })
    }

    /// Whether a transaction is of interest to the filter owner.
    pub fn test_transaction(&self, tx: &Transaction) -> bool {
        use bitcoin::hashes::Hash;
        self.check(tx.hash().as_byte_array())
    }

    fn bit_index(&self, element: &[u8], i: u32, m: usize) -> usize {
        let seed = i.wrapping_mul(0xFBA4_C795).wrapping_add(self.tweak);
        murmur3_32(element, seed) as usize % m
    }
}

/// MurmurHash3, x86 32-bit variant.
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut hash = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k |= (*byte as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514e_28b7);
        assert_eq!(murmur3_32(b"", 0xffff_ffff), 0x81f1_6f39);
        assert_eq!(murmur3_32(&[0x21, 0x43, 0x65, 0x87], 0), 0xf55b_516b);
        assert_eq!(murmur3_32(&[0x21, 0x43, 0x65], 0), 0x7e4a_8634);
        assert_eq!(murmur3_32(&[0x21, 0x43], 0), 0xa0f7_b07a);
        assert_eq!(murmur3_32(&[0x21], 0), 0x7266_1cf4);
    }

    #[test]
    fn test_add_then_check() {
        let mut filter = BloomFilter::new(1024, 5, 7);
        filter.add(b"alpha");
        filter.add(b"beta");
        assert!(filter.check(b"alpha"));
        assert!(filter.check(b"beta"));
        assert!(!filter.check(b"definitely not added"));
    }

    #[test]
    fn test_loaded_filter_matches_builder() {
        let mut built = BloomFilter::new(256, 3, 42);
        built.add(b"watched");

        let loaded = BloomFilter::from_payload(&FilterLoadPayload {
            filter: built.bits().to_vec(),
            k: built.k(),
            tweak: built.tweak(),
        });
        assert_eq!(loaded.m(), 256);
        assert!(loaded.check(b"watched"));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let mut filter = BloomFilter::new(0, 3, 0);
        filter.add(b"x");
        assert!(!filter.check(b"x"));
    }

    #[test]
    fn test_transaction_match() {
        let tx = Transaction::new(vec![1, 2, 3]);
        let mut filter = BloomFilter::new(512, 4, 0);
        assert!(!filter.test_transaction(&tx));
        use bitcoin::hashes::Hash;
        filter.add(tx.hash().as_byte_array());
        assert!(filter.test_transaction(&tx));
    }
}
