//! Sequence storage.
//!
//! FASTA/FASTQ files (gzip transparently) are loaded into memory with
//! needletail, validated, and uppercased once. Workers never share a
//! mutable reader: `handle()` returns a cheap read-only view, one per
//! worker.

use crate::ids::SequenceIdManager;
use crate::sketch::reverse_complement;
use crate::types::{Offset, SeqId, Strand};
use needletail::parse_fastx_file;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("duplicate sequence name: {0}")]
    DuplicateName(String),

    #[error("sequence {name} is {frac:.0}% N; not DNA")]
    MostlyN { name: String, frac: f64 },

    #[error("no sequences found in {0}")]
    Empty(String),

    #[error("unknown sequence id: {0}")]
    UnknownId(SeqId),

    #[error("range {start}..{end} out of bounds for sequence {name} ({len} bp)")]
    OutOfBounds {
        name: String,
        start: Offset,
        end: Offset,
        len: Offset,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// All loaded sequences, keyed by SeqId.
#[derive(Debug, Default)]
pub struct SequenceStore {
    seqs: HashMap<SeqId, Arc<Vec<u8>>>,
}

impl SequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every sequence of a FASTA/FASTQ file, registering names in the
    /// id manager. `admit` maps each name to its (target, query) roles;
    /// `(false, false)` skips the record. Returns the ids loaded.
    pub fn load_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        ids: &mut SequenceIdManager,
        admit: impl Fn(&str) -> (bool, bool),
    ) -> StoreResult<Vec<SeqId>> {
        let path_str = path.as_ref().display().to_string();
        let mut reader = parse_fastx_file(&path).map_err(|e| StoreError::Parse {
            path: path_str.clone(),
            message: e.to_string(),
        })?;

        let mut loaded = Vec::new();
        let mut seen_any = false;
        while let Some(record) = reader.next() {
            let record = record.map_err(|e| StoreError::Parse {
                path: path_str.clone(),
                message: e.to_string(),
            })?;
            seen_any = true;
            let name = String::from_utf8_lossy(record.id())
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            let (is_target, is_query) = admit(&name);
            if !is_target && !is_query {
                continue;
            }
            let mut seq = record.seq().to_vec();
            seq.make_ascii_uppercase();
            validate_dna(&name, &seq)?;

            let id = ids
                .register(&name, seq.len() as Offset, is_target, is_query)
                .map_err(|_| StoreError::DuplicateName(name.clone()))?;
            self.seqs.entry(id).or_insert_with(|| Arc::new(seq));
            loaded.push(id);
        }
        if !seen_any {
            return Err(StoreError::Empty(path_str));
        }
        Ok(loaded)
    }

    /// Drop sequences no longer needed (between index batches).
    pub fn release(&mut self, ids: &[SeqId]) {
        for id in ids {
            self.seqs.remove(id);
        }
    }

    /// A read-only view safe to hand to a worker thread.
    pub fn handle(&self) -> StoreHandle {
        StoreHandle {
            seqs: self.seqs.clone(),
        }
    }
}

/// Per-worker read-only view of the store.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    seqs: HashMap<SeqId, Arc<Vec<u8>>>,
}

impl StoreHandle {
    pub fn sequence(&self, id: SeqId) -> StoreResult<&[u8]> {
        self.seqs
            .get(&id)
            .map(|s| s.as_slice())
            .ok_or(StoreError::UnknownId(id))
    }

    /// Substring `[start, start + len)` of a sequence.
    pub fn fetch(&self, id: SeqId, start: Offset, len: Offset) -> StoreResult<&[u8]> {
        let seq = self.sequence(id)?;
        let end = start + len;
        if end > seq.len() as Offset {
            return Err(StoreError::OutOfBounds {
                name: format!("#{id}"),
                start,
                end,
                len: seq.len() as Offset,
            });
        }
        Ok(&seq[start as usize..end as usize])
    }

    /// Substring oriented to the requested strand; reverse-complemented
    /// when `strand` is reverse.
    pub fn fetch_oriented(
        &self,
        id: SeqId,
        start: Offset,
        len: Offset,
        strand: Strand,
    ) -> StoreResult<Vec<u8>> {
        let bytes = self.fetch(id, start, len)?;
        Ok(match strand {
            Strand::Forward => bytes.to_vec(),
            Strand::Reverse => reverse_complement(bytes),
        })
    }
}

/// Reject records that are mostly N; DNA inputs with a sprinkling of
/// ambiguity codes pass through (the sketcher skips them).
fn validate_dna(name: &str, seq: &[u8]) -> StoreResult<()> {
    if seq.is_empty() {
        return Ok(());
    }
    let n_count = seq.iter().filter(|&&b| !matches!(b, b'A' | b'C' | b'G' | b'T')).count();
    let frac = n_count as f64 / seq.len() as f64;
    if frac > 0.5 {
        return Err(StoreError::MostlyN {
            name: name.to_string(),
            frac: frac * 100.0,
        });
    }
    Ok(())
}
