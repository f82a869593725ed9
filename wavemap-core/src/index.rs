//! Inverted minmer index.
//!
//! Maps each sampled hash to its target positions. Built single-writer from
//! streamed minmers, then shared read-only with the mapping workers.
//! Hashes whose position list exceeds the runtime frequency cap are dropped
//! at end-of-batch to bound query cost.
//!
//! The on-disk format (`WFMX01`) is little-endian throughout:
//! magic, version, k, sigma, freq_cap, sequence table, hash table, crc32.

use crate::types::{Minmer, Offset, SeqId, Strand};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

const INDEX_MAGIC: &[u8; 6] = b"WFMX01";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("incompatible index: {0}")]
    Incompatible(String),

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("index invariant violated: {0}")]
    Invariant(String),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// One hit in a position list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHit {
    pub seq_id: SeqId,
    pub pos: u32,
    pub strand: Strand,
}

/// Sequence metadata carried alongside the hash table so a persisted index
/// is self-describing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSequence {
    pub name: String,
    pub length: Offset,
}

/// Inverted index over one batch of target sequences.
#[derive(Debug, Default)]
pub struct MinmerIndex {
    table: HashMap<u64, Vec<IndexHit>>,
    /// Per-target minmers sorted by position, for L2 window recounts.
    per_target: HashMap<SeqId, Vec<(u32, u64)>>,
    sequences: Vec<IndexedSequence>,
    k: u32,
    sigma: f64,
    freq_cap: u64,
    total_minmers: u64,
}

impl MinmerIndex {
    pub fn new(k: u32, sigma: f64) -> Self {
        Self {
            k,
            sigma,
            freq_cap: u64::MAX,
            ..Self::default()
        }
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn freq_cap(&self) -> u64 {
        self.freq_cap
    }

    pub fn total_minmers(&self) -> u64 {
        self.total_minmers
    }

    pub fn num_hashes(&self) -> usize {
        self.table.len()
    }

    pub fn sequences(&self) -> &[IndexedSequence] {
        &self.sequences
    }

    /// Record the metadata of an indexed target.
    pub fn add_sequence(&mut self, name: &str, length: Offset) {
        self.sequences.push(IndexedSequence {
            name: name.to_string(),
            length,
        });
    }

    /// Stream one target's minmers into the index.
    pub fn insert(&mut self, minmers: &[Minmer]) {
        for m in minmers {
            self.table.entry(m.hash).or_default().push(IndexHit {
                seq_id: m.seq_id,
                pos: m.pos,
                strand: m.strand,
            });
            self.per_target
                .entry(m.seq_id)
                .or_default()
                .push((m.pos, m.hash));
            self.total_minmers += 1;
        }
    }

    /// Frequency cap for the batch:
    /// `max(2, ceil(total_ref_bases * sigma * numerator / k))`.
    pub fn compute_freq_cap(total_ref_bases: u64, sigma: f64, numerator: f64, k: u32) -> u64 {
        let cap = (total_ref_bases as f64 * sigma * numerator / k as f64).ceil();
        (cap as u64).max(2)
    }

    /// End-of-batch pass: sort position lists and drop hashes that exceed
    /// the frequency cap.
    pub fn finalize(&mut self, freq_cap: u64) {
        self.freq_cap = freq_cap;
        let cap = freq_cap as usize;
        self.table.retain(|_, hits| hits.len() <= cap);
        for hits in self.table.values_mut() {
            hits.sort_unstable_by_key(|h| (h.seq_id, h.pos));
        }
        for positions in self.per_target.values_mut() {
            positions.sort_unstable_by_key(|&(pos, _)| pos);
        }
    }

    /// Check the post-build invariant; violation is a fatal internal error.
    pub fn check_invariants(&self) -> IndexResult<()> {
        for (hash, hits) in &self.table {
            if hits.len() as u64 > self.freq_cap {
                return Err(IndexError::Invariant(format!(
                    "position list for hash {hash:#x} has {} entries, cap {}",
                    hits.len(),
                    self.freq_cap
                )));
            }
        }
        Ok(())
    }

    pub fn lookup(&self, hash: u64) -> Option<&[IndexHit]> {
        self.table.get(&hash).map(|v| v.as_slice())
    }

    /// Minmers of one target within `[start, end)`, sorted by position.
    pub fn target_window(&self, seq_id: SeqId, start: Offset, end: Offset) -> &[(u32, u64)] {
        match self.per_target.get(&seq_id) {
            None => &[],
            Some(positions) => {
                let lo = positions.partition_point(|&(pos, _)| (pos as Offset) < start);
                let hi = positions.partition_point(|&(pos, _)| (pos as Offset) < end);
                &positions[lo..hi]
            }
        }
    }

    pub fn target_minmer_count(&self, seq_id: SeqId) -> u64 {
        self.per_target.get(&seq_id).map_or(0, |v| v.len() as u64)
    }

    /// Serialize to the portable `WFMX01` layout.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> IndexResult<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(INDEX_MAGIC)?;

        // Everything after the magic is checksummed.
        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(INDEX_VERSION)?;
        body.write_u32::<LittleEndian>(self.k)?;
        body.write_f64::<LittleEndian>(self.sigma)?;
        body.write_u64::<LittleEndian>(self.freq_cap)?;

        body.write_u32::<LittleEndian>(self.sequences.len() as u32)?;
        for seq in &self.sequences {
            let name = seq.name.as_bytes();
            body.write_u32::<LittleEndian>(name.len() as u32)?;
            body.write_all(name)?;
            body.write_u64::<LittleEndian>(seq.length)?;
        }

        let mut hashes: Vec<u64> = self.table.keys().copied().collect();
        hashes.sort_unstable();
        body.write_u64::<LittleEndian>(hashes.len() as u64)?;
        for hash in hashes {
            let hits = &self.table[&hash];
            body.write_u64::<LittleEndian>(hash)?;
            body.write_u32::<LittleEndian>(hits.len() as u32)?;
            for hit in hits {
                body.write_u32::<LittleEndian>(hit.seq_id)?;
                body.write_u32::<LittleEndian>(hit.pos)?;
                body.write_u8(match hit.strand {
                    Strand::Forward => 0,
                    Strand::Reverse => 1,
                })?;
            }
        }

        let crc = crc32fast::hash(&body);
        writer.write_all(&body)?;
        writer.write_u32::<LittleEndian>(crc)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a persisted index, verifying magic, version, checksum, and the
    /// caller's expected parameters.
    pub fn load<P: AsRef<Path>>(path: P, expect_k: u32, expect_sigma: f64) -> IndexResult<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(IndexError::Incompatible("bad magic".to_string()));
        }

        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        if body.len() < 4 {
            return Err(IndexError::Corrupt("truncated file".to_string()));
        }
        let crc_offset = body.len() - 4;
        let stored_crc = u32::from_le_bytes(body[crc_offset..].try_into().unwrap());
        if crc32fast::hash(&body[..crc_offset]) != stored_crc {
            return Err(IndexError::Corrupt("checksum mismatch".to_string()));
        }

        let mut cursor = &body[..crc_offset];
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(IndexError::Incompatible(format!(
                "unsupported version {version}"
            )));
        }
        let k = cursor.read_u32::<LittleEndian>()?;
        let sigma = cursor.read_f64::<LittleEndian>()?;
        if k != expect_k {
            return Err(IndexError::Incompatible(format!(
                "index built with k={k}, run expects k={expect_k}"
            )));
        }
        if (sigma - expect_sigma).abs() > 1e-9 {
            return Err(IndexError::Incompatible(format!(
                "index built with sigma={sigma}, run expects sigma={expect_sigma}"
            )));
        }
        let freq_cap = cursor.read_u64::<LittleEndian>()?;

        let n_seqs = cursor.read_u32::<LittleEndian>()? as usize;
        let mut sequences = Vec::with_capacity(n_seqs);
        for _ in 0..n_seqs {
            let name_len = cursor.read_u32::<LittleEndian>()? as usize;
            if cursor.len() < name_len {
                return Err(IndexError::Corrupt("truncated name".to_string()));
            }
            let name = String::from_utf8_lossy(&cursor[..name_len]).to_string();
            cursor = &cursor[name_len..];
            let length = cursor.read_u64::<LittleEndian>()?;
            sequences.push(IndexedSequence { name, length });
        }

        let n_hashes = cursor.read_u64::<LittleEndian>()?;
        let mut table = HashMap::with_capacity(n_hashes as usize);
        let mut per_target: HashMap<SeqId, Vec<(u32, u64)>> = HashMap::new();
        let mut total_minmers = 0u64;
        for _ in 0..n_hashes {
            let hash = cursor.read_u64::<LittleEndian>()?;
            let n_hits = cursor.read_u32::<LittleEndian>()? as usize;
            let mut hits = Vec::with_capacity(n_hits);
            for _ in 0..n_hits {
                let seq_id = cursor.read_u32::<LittleEndian>()?;
                let pos = cursor.read_u32::<LittleEndian>()?;
                let strand = match cursor.read_u8()? {
                    0 => Strand::Forward,
                    1 => Strand::Reverse,
                    other => {
                        return Err(IndexError::Corrupt(format!("bad strand byte {other}")))
                    }
                };
                hits.push(IndexHit { seq_id, pos, strand });
                per_target.entry(seq_id).or_default().push((pos, hash));
                total_minmers += 1;
            }
            table.insert(hash, hits);
        }
        for positions in per_target.values_mut() {
            positions.sort_unstable_by_key(|&(pos, _)| pos);
        }

        Ok(Self {
            table,
            per_target,
            sequences,
            k,
            sigma,
            freq_cap,
            total_minmers,
        })
    }
}

/// Information-theoretic estimate of distinct k-mers in `total_bases` of
/// reference: min(4^k, total_bases). Computed after the target scan so it
/// sees the real reference size.
pub fn estimate_unique_kmers(total_bases: u64, k: u32) -> u64 {
    if k >= 32 {
        return total_bases;
    }
    let space = 4u64.saturating_pow(k);
    space.min(total_bases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch::{sketch_window, SketchParams};

    fn build_test_index(seq: &[u8]) -> MinmerIndex {
        let mut index = MinmerIndex::new(11, 0.5);
        let minmers = sketch_window(seq, 0, 0, seq.len(), &SketchParams::new(11, 0.5, 0.0));
        index.add_sequence("t1", seq.len() as u64);
        index.insert(&minmers);
        index.finalize(MinmerIndex::compute_freq_cap(seq.len() as u64, 0.5, 1.0, 11));
        index
    }

    fn test_seq(n: usize) -> Vec<u8> {
        (0..n as u32)
            .map(|i| b"ACGT"[(i.wrapping_mul(2654435761).wrapping_add(i >> 3) >> 11) as usize % 4])
            .collect()
    }

    #[test]
    fn freq_cap_formula() {
        assert_eq!(MinmerIndex::compute_freq_cap(0, 0.1, 1.0, 15), 2);
        assert_eq!(MinmerIndex::compute_freq_cap(150_000, 0.1, 1.0, 15), 1000);
        assert_eq!(MinmerIndex::compute_freq_cap(150_000, 0.1, 2.0, 15), 2000);
    }

    #[test]
    fn finalize_drops_frequent_hashes() {
        let mut index = MinmerIndex::new(5, 1.0);
        // Same hash at 5 positions, another at 1.
        let hits: Vec<Minmer> = (0..5)
            .map(|i| Minmer {
                hash: 42,
                seq_id: 0,
                pos: i * 10,
                strand: Strand::Forward,
            })
            .chain(std::iter::once(Minmer {
                hash: 7,
                seq_id: 0,
                pos: 99,
                strand: Strand::Forward,
            }))
            .collect();
        index.insert(&hits);
        index.finalize(4);
        assert!(index.lookup(42).is_none());
        assert_eq!(index.lookup(7).unwrap().len(), 1);
        index.check_invariants().unwrap();
    }

    #[test]
    fn lookup_returns_sorted_hits() {
        let seq = test_seq(2000);
        let index = build_test_index(&seq);
        assert!(index.num_hashes() > 0);
        for hash in index.table.keys() {
            let hits = index.lookup(*hash).unwrap();
            for pair in hits.windows(2) {
                assert!((pair[0].seq_id, pair[0].pos) <= (pair[1].seq_id, pair[1].pos));
            }
        }
    }

    #[test]
    fn target_window_slices_by_position() {
        let seq = test_seq(2000);
        let index = build_test_index(&seq);
        let all = index.target_window(0, 0, seq.len() as u64);
        assert_eq!(all.len() as u64, index.target_minmer_count(0));
        let half = index.target_window(0, 0, 1000);
        assert!(half.len() < all.len());
        assert!(half.iter().all(|&(pos, _)| pos < 1000));
        assert!(index.target_window(9, 0, 1000).is_empty());
    }

    #[test]
    fn save_load_round_trip() {
        let seq = test_seq(3000);
        let index = build_test_index(&seq);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wfmx");
        index.save(&path).unwrap();

        let loaded = MinmerIndex::load(&path, 11, 0.5).unwrap();
        assert_eq!(loaded.num_hashes(), index.num_hashes());
        assert_eq!(loaded.total_minmers(), index.total_minmers());
        assert_eq!(loaded.freq_cap(), index.freq_cap());
        assert_eq!(loaded.sequences(), index.sequences());
        for (hash, hits) in &index.table {
            assert_eq!(loaded.lookup(*hash).unwrap(), hits.as_slice());
        }
    }

    #[test]
    fn load_rejects_parameter_mismatch() {
        let seq = test_seq(1000);
        let index = build_test_index(&seq);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wfmx");
        index.save(&path).unwrap();

        assert!(matches!(
            MinmerIndex::load(&path, 21, 0.5),
            Err(IndexError::Incompatible(_))
        ));
        assert!(matches!(
            MinmerIndex::load(&path, 11, 0.25),
            Err(IndexError::Incompatible(_))
        ));
    }

    #[test]
    fn load_rejects_corruption() {
        let seq = test_seq(1000);
        let index = build_test_index(&seq);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wfmx");
        index.save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            MinmerIndex::load(&path, 11, 0.5),
            Err(IndexError::Corrupt(_))
        ));

        let mut bad_magic = std::fs::read(&path).unwrap();
        bad_magic[0] = b'X';
        std::fs::write(&path, &bad_magic).unwrap();
        assert!(matches!(
            MinmerIndex::load(&path, 11, 0.5),
            Err(IndexError::Incompatible(_))
        ));
    }

    #[test]
    fn unique_kmer_estimate_after_scan() {
        assert_eq!(estimate_unique_kmers(1000, 15), 1000);
        assert_eq!(estimate_unique_kmers(u64::MAX / 2, 8), 65536);
    }
}
