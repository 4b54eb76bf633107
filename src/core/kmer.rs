//! Packed canonical k-mer representation.
//!
//! Bases pack two bits each (A=0, C=1, G=2, T=3) into `[u64; N]` words, first
//! base in the most significant bits, so the derived ordering on the words is
//! the lexicographic ordering on the sequence. `N` is a compile-time word
//! count: `Kmer<1>` covers k <= 32, up to `Kmer<5>` for k <= 160. The k for a
//! given contigging round travels with the k-mer.

use ahash::RandomState;
use std::fmt;

/// Fixed seeds so the shard hash is stable for a given worker count.
const HASH_SEEDS: (u64, u64, u64, u64) = (
    0x9e37_79b9_7f4a_7c15,
    0xcbf2_9ce4_8422_2325,
    0x1000_0000_01b3,
    0x2545_f491_4f6c_dd1d,
);

fn shard_hasher() -> RandomState {
    RandomState::with_seeds(HASH_SEEDS.0, HASH_SEEDS.1, HASH_SEEDS.2, HASH_SEEDS.3)
}

/// Default minimizer length for neighborhood-aware sharding.
pub const MINIMIZER_LEN: usize = 15;

#[inline]
fn base_to_bits(b: u8) -> Option<u64> {
    match b {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

#[inline]
fn bits_to_base(bits: u64) -> u8 {
    match bits & 3 {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        _ => b'T',
    }
}

/// A 2-bit packed k-mer over up to `32 * N` bases.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kmer<const N: usize> {
    words: [u64; N],
    k: u16,
}

impl<const N: usize> Kmer<N> {
    pub const MAX_K: usize = 32 * N;

    /// Pack a window of bases. Returns `None` when the window contains
    /// anything other than uppercase A, C, G or T.
    pub fn from_bases(bases: &[u8]) -> Option<Self> {
        let k = bases.len();
        assert!(k >= 1 && k <= Self::MAX_K, "k={} out of range for Kmer<{}>", k, N);
        let mut words = [0u64; N];
        for (i, &b) in bases.iter().enumerate() {
            let bits = base_to_bits(b)?;
            words[i / 32] |= bits << (2 * (31 - (i % 32)));
        }
        Some(Self { words, k: k as u16 })
    }

    pub fn k(&self) -> usize {
        self.k as usize
    }

    /// Base at position `i`, 0-based from the 5' end.
    #[inline]
    pub fn base(&self, i: usize) -> u8 {
        debug_assert!(i < self.k());
        bits_to_base(self.words[i / 32] >> (2 * (31 - (i % 32))))
    }

    #[inline]
    fn base_bits(&self, i: usize) -> u64 {
        (self.words[i / 32] >> (2 * (31 - (i % 32)))) & 3
    }

    #[inline]
    fn set_base_bits(&mut self, i: usize, bits: u64) {
        let shift = 2 * (31 - (i % 32));
        self.words[i / 32] &= !(3u64 << shift);
        self.words[i / 32] |= (bits & 3) << shift;
    }

    /// First base (5' end).
    pub fn front(&self) -> u8 {
        self.base(0)
    }

    /// Last base (3' end).
    pub fn back(&self) -> u8 {
        self.base(self.k() - 1)
    }

    /// Reverse complement.
    pub fn revcomp(&self) -> Self {
        let k = self.k();
        let mut rc = Self { words: [0u64; N], k: self.k };
        for i in 0..k {
            rc.set_base_bits(k - 1 - i, 3 - self.base_bits(i));
        }
        rc
    }

    /// The lexicographically smaller of the k-mer and its reverse complement,
    /// plus whether the input was flipped.
    pub fn canonical(&self) -> (Self, bool) {
        let rc = self.revcomp();
        if rc < *self {
            (rc, true)
        } else {
            (*self, false)
        }
    }

    /// Drop the first base and append `base` at the 3' end.
    pub fn forward_base(&self, base: u8) -> Self {
        let k = self.k();
        let mut next = Self { words: [0u64; N], k: self.k };
        for i in 0..k - 1 {
            next.set_base_bits(i, self.base_bits(i + 1));
        }
        next.set_base_bits(k - 1, base_to_bits(base).expect("extension base must be ACGT"));
        next
    }

    /// Drop the last base and prepend `base` at the 5' end.
    pub fn backward_base(&self, base: u8) -> Self {
        let k = self.k();
        let mut next = Self { words: [0u64; N], k: self.k };
        for i in 1..k {
            next.set_base_bits(i, self.base_bits(i - 1));
        }
        next.set_base_bits(0, base_to_bits(base).expect("extension base must be ACGT"));
        next
    }

    /// Stable 64-bit hash over the packed words, used for sharding.
    pub fn hash(&self) -> u64 {
        use std::hash::{BuildHasher, Hash, Hasher};
        let mut h = shard_hasher().build_hasher();
        self.words.hash(&mut h);
        h.finish()
    }

    /// Smallest hash over all canonical m-mers of this k-mer. Neighbouring
    /// k-mers mostly share their minimizer, so sharding by this value keeps
    /// graph neighbourhoods together.
    pub fn minimizer_hash(&self, m: usize) -> u64 {
        let k = self.k();
        debug_assert!(m <= 32 && m <= k);
        use std::hash::BuildHasher;
        let hasher = shard_hasher();
        let mut min_hash = u64::MAX;
        // build the first m-mer, then roll
        let mut mmer: u64 = 0;
        let mask: u64 = if m == 32 { u64::MAX } else { (1u64 << (2 * m)) - 1 };
        for i in 0..k {
            mmer = ((mmer << 2) | self.base_bits(i)) & mask;
            if i + 1 >= m {
                let rc = revcomp_packed(mmer, m);
                let h = hasher.hash_one(mmer.min(rc));
                min_hash = min_hash.min(h);
            }
        }
        min_hash
    }

    /// Low 64 bits of the packed representation; unique for k <= 32.
    pub fn packed_u64(&self) -> u64 {
        self.words[0]
    }

    pub fn to_string(&self) -> String {
        (0..self.k()).map(|i| self.base(i) as char).collect()
    }

    /// Extract every k-mer of `seq`, skipping windows that contain anything
    /// other than A, C, G, T (runs of N split the read).
    pub fn get_kmers(k: usize, seq: &str) -> Vec<Self> {
        let bytes = seq.as_bytes();
        if bytes.len() < k {
            return Vec::new();
        }
        let mut kmers = Vec::with_capacity(bytes.len() - k + 1);
        for window in bytes.windows(k) {
            if let Some(kmer) = Self::from_bases(window) {
                kmers.push(kmer);
            }
        }
        kmers
    }
}

/// Stable hash for scalar ids (contig ids, read ids) sharded across workers.
pub fn stable_hash_u64(value: u64) -> u64 {
    use std::hash::BuildHasher;
    shard_hasher().hash_one(value)
}

/// Reverse complement of an m-mer packed into the low 2m bits of a u64.
#[inline]
fn revcomp_packed(mmer: u64, m: usize) -> u64 {
    let mut rc = 0u64;
    let mut v = mmer;
    for _ in 0..m {
        rc = (rc << 2) | (3 - (v & 3));
        v >>= 2;
    }
    rc
}

impl<const N: usize> fmt::Debug for Kmer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kmer({})", self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_roundtrip() {
        let kmer = Kmer::<1>::from_bases(b"ACGTACGTACGTACGTACGTA").unwrap();
        assert_eq!(kmer.k(), 21);
        assert_eq!(kmer.to_string(), "ACGTACGTACGTACGTACGTA");
        assert!(Kmer::<1>::from_bases(b"ACGTN").is_none());
    }

    #[test]
    fn test_multi_word_pack() {
        let seq = "ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACG";
        let kmer = Kmer::<2>::from_bases(seq.as_bytes()).unwrap();
        assert_eq!(kmer.k(), 43);
        assert_eq!(kmer.to_string(), seq);
    }

    #[test]
    fn test_revcomp_involution() {
        let kmer = Kmer::<1>::from_bases(b"AACCGGTTAACCGGTTAACCG").unwrap();
        assert_eq!(kmer.revcomp().revcomp(), kmer);
        assert_eq!(kmer.revcomp().to_string(), "CGGTTAACCGGTTAACCGGTT");
    }

    #[test]
    fn test_canonical_is_min() {
        let kmer = Kmer::<1>::from_bases(b"TTTGGGCCCAAATTTGGGCCC").unwrap();
        let (canon, flipped) = kmer.canonical();
        let (canon_rc, flipped_rc) = kmer.revcomp().canonical();
        assert_eq!(canon, canon_rc);
        assert_ne!(flipped, flipped_rc);
        assert!(canon <= kmer && canon <= kmer.revcomp());
    }

    #[test]
    fn test_ordering_matches_strings() {
        let a = Kmer::<1>::from_bases(b"AAACG").unwrap();
        let b = Kmer::<1>::from_bases(b"AAACT").unwrap();
        let c = Kmer::<1>::from_bases(b"TAAAA").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_forward_backward_base() {
        let kmer = Kmer::<1>::from_bases(b"ACGTA").unwrap();
        assert_eq!(kmer.forward_base(b'C').to_string(), "CGTAC");
        assert_eq!(kmer.backward_base(b'G').to_string(), "GACGT");
        assert_eq!(kmer.front(), b'A');
        assert_eq!(kmer.back(), b'A');
    }

    #[test]
    fn test_hash_stable_and_canonical_pairs() {
        let kmer = Kmer::<1>::from_bases(b"ACGGTTACGGTTACGGTTACG").unwrap();
        assert_eq!(kmer.hash(), kmer.hash());
        let (canon, _) = kmer.canonical();
        let (canon2, _) = kmer.revcomp().canonical();
        assert_eq!(canon.hash(), canon2.hash());
    }

    #[test]
    fn test_minimizer_shared_by_neighbours() {
        let seq = "ACGGTTACGGTTACGGTTACGA";
        let a = Kmer::<1>::from_bases(&seq.as_bytes()[..21]).unwrap();
        let b = Kmer::<1>::from_bases(&seq.as_bytes()[1..22]).unwrap();
        // neighbouring k-mers share 20 of their 15-mers; the minimizer nearly
        // always survives the shift
        let _ = (a.minimizer_hash(15), b.minimizer_hash(15));
        // strand independence is required for sharding
        assert_eq!(a.minimizer_hash(15), a.revcomp().minimizer_hash(15));
    }

    #[test]
    fn test_get_kmers_splits_at_n() {
        let kmers = Kmer::<1>::get_kmers(4, "ACGTNACGTA");
        // windows overlapping the N are dropped
        assert_eq!(kmers.len(), 3);
        assert_eq!(kmers[0].to_string(), "ACGT");
        assert_eq!(kmers[1].to_string(), "ACGT");
        assert_eq!(kmers[2].to_string(), "CGTA");
    }
}
