//! Minmer sketching.
//!
//! A window of DNA is reduced to a deterministic sample of hashed canonical
//! k-mers: every k-mer whose finalized hash falls below `density * 2^64` is
//! retained, independent of sequence content. A 2-mer entropy gate drops
//! homopolymer and microsatellite k-mers that would bloat the inverted
//! index.

use crate::types::{Minmer, SeqId, Strand};

/// Sketching parameters for one window.
#[derive(Debug, Clone, Copy)]
pub struct SketchParams {
    pub k: usize,
    /// Sampling density in (0,1].
    pub density: f64,
    /// Minimum normalized 2-mer entropy, in [0,1]; 0 disables the gate.
    pub complexity: f64,
    /// Hashes at or above this value are never sampled.
    pub sparsity_threshold: u64,
}

impl SketchParams {
    pub fn new(k: usize, density: f64, complexity: f64) -> Self {
        Self {
            k,
            density,
            complexity,
            sparsity_threshold: u64::MAX,
        }
    }

    /// Admission threshold on the hash value.
    pub fn hash_threshold(&self) -> u64 {
        if self.density >= 1.0 {
            u64::MAX
        } else {
            (self.density * u64::MAX as f64) as u64
        }
    }
}

/// Encode a base as 2 bits: A=0, C=1, G=2, T=3. `None` for anything else.
#[inline]
pub fn encode_base(base: u8) -> Option<u64> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Reverse complement of a sequence.
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

#[inline]
pub fn complement(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        other => other,
    }
}

/// MurmurHash3 x64 finalizer over the packed k-mer encoding.
#[inline]
pub fn fmix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^= x >> 33;
    x
}

/// Normalized Shannon entropy of the 2-mer distribution of a k-mer,
/// in [0,1]. A homopolymer scores 0.
pub fn dimer_entropy(kmer: &[u8]) -> f64 {
    if kmer.len() < 2 {
        return 0.0;
    }
    let mut counts = [0u32; 16];
    let mut total = 0u32;
    for pair in kmer.windows(2) {
        if let (Some(a), Some(b)) = (encode_base(pair[0]), encode_base(pair[1])) {
            counts[(a * 4 + b) as usize] += 1;
            total += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    let mut entropy = 0.0f64;
    for &count in &counts {
        if count > 0 {
            let p = count as f64 / total as f64;
            entropy -= p * p.log2();
        }
    }
    entropy / 4.0
}

/// Sketch a window `seq[start..start + len]` of a sequence.
///
/// Returns minmers sorted by position. Positions are absolute within the
/// sequence (window offset included). K-mers containing non-ACGT bases are
/// skipped; the rolling encoding restarts after each invalid base.
pub fn sketch_window(
    seq: &[u8],
    seq_id: SeqId,
    start: usize,
    len: usize,
    params: &SketchParams,
) -> Vec<Minmer> {
    let k = params.k;
    let window = &seq[start..(start + len).min(seq.len())];
    if window.len() < k || k == 0 || k > 32 {
        return Vec::new();
    }

    let threshold = params.hash_threshold().min(params.sparsity_threshold);
    let mask: u64 = if k == 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
    let rc_shift = 2 * (k - 1) as u64;

    let mut minmers = Vec::new();
    let mut forward: u64 = 0;
    let mut reverse: u64 = 0;
    let mut valid = 0usize;

    for (i, &base) in window.iter().enumerate() {
        match encode_base(base) {
            Some(bits) => {
                forward = ((forward << 2) | bits) & mask;
                reverse = (reverse >> 2) | ((3 - bits) << rc_shift);
                valid += 1;
            }
            None => {
                valid = 0;
                forward = 0;
                reverse = 0;
                continue;
            }
        }
        if valid < k {
            continue;
        }

        let kmer_start = i + 1 - k;
        let (canonical, strand) = if forward <= reverse {
            (forward, Strand::Forward)
        } else {
            (reverse, Strand::Reverse)
        };
        let hash = fmix64(canonical);
        if hash >= threshold {
            continue;
        }
        if params.complexity > 0.0
            && dimer_entropy(&window[kmer_start..kmer_start + k]) < params.complexity
        {
            continue;
        }
        minmers.push(Minmer {
            hash,
            seq_id,
            pos: (start + kmer_start) as u32,
            strand,
        });
    }

    minmers
}
